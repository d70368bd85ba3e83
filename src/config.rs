use std::str::FromStr;

use crate::constants::defaults;
use crate::error::InvalidArgument;
use crate::types::UnitId;

/// Framing used on a serial line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerialEncoding {
    Rtu,
    Ascii,
    Bin,
}

/// A parsed connection string.
///
/// The format is colon separated: `tcp:host[:port[:unit]]`,
/// `udp:host[:port[:unit]]` and `rtu:port[:unit[:baud]]` with `device`
/// accepted as an alias for `rtu`, plus `ascii` and `bin` for the other
/// serial framings. The default port is 502 and the default baud rate
/// 19200, overridable via the `FIELDBUS_BAUD` environment variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionConfig {
    Tcp {
        host: String,
        port: u16,
        unit_id: Option<UnitId>,
    },
    Udp {
        host: String,
        port: u16,
        unit_id: Option<UnitId>,
    },
    Serial {
        encoding: SerialEncoding,
        port: String,
        unit_id: Option<UnitId>,
        baud_rate: u32,
    },
}

impl FromStr for ConnectionConfig {
    type Err = InvalidArgument;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 2 {
            return Err(InvalidArgument::TooFewParts(parts.len()));
        }

        match parts[0].to_ascii_lowercase().as_str() {
            "tcp" => Ok(ConnectionConfig::Tcp {
                host: parts[1].to_string(),
                port: parse_port(&parts)?,
                unit_id: parse_unit_id(parts.get(3))?,
            }),
            "udp" => Ok(ConnectionConfig::Udp {
                host: parts[1].to_string(),
                port: parse_port(&parts)?,
                unit_id: parse_unit_id(parts.get(3))?,
            }),
            "device" | "rtu" => parse_serial(SerialEncoding::Rtu, &parts),
            "ascii" => parse_serial(SerialEncoding::Ascii, &parts),
            "bin" => parse_serial(SerialEncoding::Bin, &parts),
            other => Err(InvalidArgument::UnknownProtocol(other.to_string())),
        }
    }
}

fn parse_port(parts: &[&str]) -> Result<u16, InvalidArgument> {
    match parts.get(2) {
        Some(field) => field
            .parse()
            .map_err(|_| InvalidArgument::BadNumericField(field.to_string())),
        None => Ok(defaults::PORT),
    }
}

fn parse_unit_id(field: Option<&&str>) -> Result<Option<UnitId>, InvalidArgument> {
    match field {
        Some(field) => field
            .parse::<u8>()
            .map(|value| Some(UnitId::new(value)))
            .map_err(|_| InvalidArgument::BadNumericField(field.to_string())),
        None => Ok(None),
    }
}

fn parse_serial(
    encoding: SerialEncoding,
    parts: &[&str],
) -> Result<ConnectionConfig, InvalidArgument> {
    let unit_id = parse_unit_id(parts.get(2))?;

    let baud_rate = match parts.get(3) {
        Some(field) => field
            .parse()
            .map_err(|_| InvalidArgument::BadNumericField(field.to_string()))?,
        None => default_baud_rate(),
    };

    Ok(ConnectionConfig::Serial {
        encoding,
        port: parts[1].to_string(),
        unit_id,
        baud_rate,
    })
}

fn default_baud_rate() -> u32 {
    match std::env::var(defaults::BAUD_ENV_VAR) {
        Ok(value) => match value.parse() {
            Ok(baud_rate) => baud_rate,
            Err(_) => {
                tracing::warn!(
                    "ignoring unparseable {} value: {}",
                    defaults::BAUD_ENV_VAR,
                    value
                );
                defaults::BAUD_RATE
            }
        },
        Err(_) => defaults::BAUD_RATE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_with_explicit_and_default_port() {
        assert_eq!(
            "tcp:10.0.0.5:1502".parse(),
            Ok(ConnectionConfig::Tcp {
                host: "10.0.0.5".to_string(),
                port: 1502,
                unit_id: None,
            })
        );
        assert_eq!(
            "tcp:plc.local".parse(),
            Ok(ConnectionConfig::Tcp {
                host: "plc.local".to_string(),
                port: 502,
                unit_id: None,
            })
        );
    }

    #[test]
    fn parses_udp_with_optional_unit() {
        assert_eq!(
            "udp:10.0.0.5:1502:9".parse(),
            Ok(ConnectionConfig::Udp {
                host: "10.0.0.5".to_string(),
                port: 1502,
                unit_id: Some(UnitId::new(9)),
            })
        );
    }

    #[test]
    fn device_is_an_alias_for_rtu() {
        let expected = Ok(ConnectionConfig::Serial {
            encoding: SerialEncoding::Rtu,
            port: "/dev/ttyUSB0".to_string(),
            unit_id: Some(UnitId::new(5)),
            baud_rate: 9600,
        });
        assert_eq!("rtu:/dev/ttyUSB0:5:9600".parse(), expected);
        assert_eq!("device:/dev/ttyUSB0:5:9600".parse(), expected);
    }

    #[test]
    fn serial_unit_and_baud_are_optional() {
        assert_eq!(
            "ascii:/dev/ttyS1".parse(),
            Ok(ConnectionConfig::Serial {
                encoding: SerialEncoding::Ascii,
                port: "/dev/ttyS1".to_string(),
                unit_id: None,
                baud_rate: defaults::BAUD_RATE,
            })
        );
    }

    #[test]
    fn parses_bin_encoding() {
        assert_eq!(
            "bin:/dev/ttyS1:3".parse(),
            Ok(ConnectionConfig::Serial {
                encoding: SerialEncoding::Bin,
                port: "/dev/ttyS1".to_string(),
                unit_id: Some(UnitId::new(3)),
                baud_rate: defaults::BAUD_RATE,
            })
        );
    }

    #[test]
    fn protocol_names_are_case_insensitive() {
        assert!(matches!(
            "TCP:host".parse(),
            Ok(ConnectionConfig::Tcp { .. })
        ));
    }

    #[test]
    fn rejects_malformed_strings() {
        assert_eq!(
            ConnectionConfig::from_str("tcp"),
            Err(InvalidArgument::TooFewParts(1))
        );
        assert_eq!(
            ConnectionConfig::from_str("spi:/dev/spidev0.0"),
            Err(InvalidArgument::UnknownProtocol("spi".to_string()))
        );
        assert_eq!(
            ConnectionConfig::from_str("tcp:host:not-a-port"),
            Err(InvalidArgument::BadNumericField("not-a-port".to_string()))
        );
        assert_eq!(
            ConnectionConfig::from_str("rtu:/dev/ttyS0:unit"),
            Err(InvalidArgument::BadNumericField("unit".to_string()))
        );
    }
}
