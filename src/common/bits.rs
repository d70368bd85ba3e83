use crate::common::cursor::WriteCursor;
use crate::error::InternalError;

/// Number of bytes needed to pack `count` bits
pub(crate) fn num_bytes_for_bits(count: u16) -> usize {
    (count as usize + 7) / 8
}

/// Number of bytes needed to serialize `count` 16-bit registers
pub(crate) fn num_bytes_for_registers(count: u16) -> usize {
    2 * (count as usize)
}

/// Pack bits LSB-first into bytes, the layout used by the bit functions
pub(crate) fn pack_bits(values: &[bool], cursor: &mut WriteCursor) -> Result<(), InternalError> {
    for chunk in values.chunks(8) {
        let mut byte = 0u8;
        for (bit, value) in chunk.iter().enumerate() {
            if *value {
                byte |= 1 << bit;
            }
        }
        cursor.write_u8(byte)?;
    }
    Ok(())
}

/// Expand `count` LSB-first packed bits. Callers validate the byte count
/// beforehand, unoccupied positions read as false.
pub(crate) fn unpack_bits(bytes: &[u8], count: u16) -> Vec<bool> {
    (0..count as usize)
        .map(|i| {
            bytes
                .get(i / 8)
                .map(|byte| byte & (1 << (i % 8)) != 0)
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculates_bytes_for_bits() {
        assert_eq!(num_bytes_for_bits(0), 0);
        assert_eq!(num_bytes_for_bits(1), 1);
        assert_eq!(num_bytes_for_bits(8), 1);
        assert_eq!(num_bytes_for_bits(9), 2);
        assert_eq!(num_bytes_for_bits(0x07D0), 250);
    }

    #[test]
    fn packs_bits_lsb_first() {
        let mut buffer = [0u8; 2];
        let mut cursor = WriteCursor::new(&mut buffer);
        let bits = [true, false, true, true, false, false, true, true, true];
        pack_bits(&bits, &mut cursor).unwrap();
        assert_eq!(buffer, [0xCD, 0x01]);
    }

    #[test]
    fn unpack_reverses_pack() {
        let bits = unpack_bits(&[0xCD, 0x01], 9);
        assert_eq!(
            bits,
            vec![true, false, true, true, false, false, true, true, true]
        );
    }
}
