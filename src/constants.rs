pub mod coil {
    /// u16 representation of COIL == ON when performing write single coil
    pub const ON: u16 = 0xFF00;
    /// u16 representation of COIL == OFF when performing write single coil
    pub const OFF: u16 = 0x0000;
}

pub mod limits {
    /// Maximum count allowed in a read coils/discrete inputs request
    pub const MAX_READ_COILS_COUNT: u16 = 0x07D0;
    /// Maximum count allowed in a read holding/input registers request
    pub const MAX_READ_REGISTERS_COUNT: u16 = 0x007D;
    /// Maximum count allowed in a write multiple coils request
    pub const MAX_WRITE_COILS_COUNT: u16 = 0x07B0;
    /// Maximum count allowed in a write multiple registers request
    pub const MAX_WRITE_REGISTERS_COUNT: u16 = 0x007B;
    /// Maximum number of registers held by a single FIFO
    pub const MAX_FIFO_COUNT: usize = 31;
    /// File numbers are restricted to 0..=9999
    pub const MAX_FILE_NUMBER: u16 = 9999;
    /// Reference type used by the file record functions
    pub const FILE_REFERENCE_TYPE: u8 = 6;
}

pub mod defaults {
    use std::time::Duration;

    /// Registered Modbus TCP/UDP port
    pub const PORT: u16 = 502;
    /// Default serial baud rate
    pub const BAUD_RATE: u32 = 19200;
    /// Environment variable that overrides the default baud rate
    pub const BAUD_ENV_VAR: &str = "FIELDBUS_BAUD";
    /// Per-attempt response timeout used when none is configured
    pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);
    /// Timeout applied to each blocking channel read so that
    /// deactivation is observed promptly
    pub const READ_TIMEOUT: Duration = Duration::from_millis(500);
    /// Socket buffer size suited to Modbus frame sizes
    pub const SOCKET_BUFFER_SIZE: usize = 1024;
}

pub mod exceptions {
    pub const ILLEGAL_FUNCTION: u8 = 0x01;
    pub const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
    pub const ILLEGAL_DATA_VALUE: u8 = 0x03;
    pub const SERVER_DEVICE_FAILURE: u8 = 0x04;
    pub const ACKNOWLEDGE: u8 = 0x05;
    pub const SERVER_DEVICE_BUSY: u8 = 0x06;
    pub const MEMORY_PARITY_ERROR: u8 = 0x08;
    pub const GATEWAY_PATH_UNAVAILABLE: u8 = 0x0A;
    pub const GATEWAY_TARGET_DEVICE_FAILED_TO_RESPOND: u8 = 0x0B;
}
