use crate::error::{AduParseError, InternalError};

/// custom read-only cursor
pub(crate) struct ReadCursor<'a> {
    src: &'a [u8],
}

/// custom write cursor
pub(crate) struct WriteCursor<'a> {
    dest: &'a mut [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    pub(crate) fn new(src: &'a [u8]) -> ReadCursor<'a> {
        ReadCursor { src }
    }

    pub(crate) fn len(&self) -> usize {
        self.src.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    pub(crate) fn expect_empty(&self) -> Result<(), AduParseError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AduParseError::TrailingBytes(self.len()))
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, AduParseError> {
        match self.src.split_first() {
            Some((first, rest)) => {
                self.src = rest;
                Ok(*first)
            }
            None => Err(AduParseError::InsufficientBytes),
        }
    }

    pub(crate) fn read_u16_be(&mut self) -> Result<u16, AduParseError> {
        let high = self.read_u8()?;
        let low = self.read_u8()?;
        Ok((high as u16) << 8 | (low as u16))
    }

    pub(crate) fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], AduParseError> {
        match (self.src.get(0..count), self.src.get(count..)) {
            (Some(first), Some(rest)) => {
                self.src = rest;
                Ok(first)
            }
            _ => Err(AduParseError::InsufficientBytes),
        }
    }
}

impl<'a> WriteCursor<'a> {
    pub(crate) fn new(dest: &'a mut [u8]) -> WriteCursor<'a> {
        WriteCursor { dest, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.dest.len() - self.pos
    }

    pub(crate) fn get(&self, range: std::ops::Range<usize>) -> Option<&[u8]> {
        self.dest.get(range)
    }

    pub(crate) fn seek_from_current(&mut self, count: usize) -> Result<(), InternalError> {
        if self.remaining() < count {
            return Err(InternalError::BadSeekOperation);
        }
        self.pos += count;
        Ok(())
    }

    pub(crate) fn seek_from_start(&mut self, count: usize) -> Result<(), InternalError> {
        if self.dest.len() < count {
            return Err(InternalError::BadSeekOperation);
        }
        self.pos = count;
        Ok(())
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> Result<(), InternalError> {
        match self.dest.get_mut(self.pos) {
            Some(x) => {
                *x = value;
                self.pos += 1;
                Ok(())
            }
            None => Err(InternalError::InsufficientWriteSpace(1, 0)),
        }
    }

    pub(crate) fn write_u16_be(&mut self, value: u16) -> Result<(), InternalError> {
        if self.remaining() < 2 {
            // don't write any bytes if there isn't space for the whole thing
            return Err(InternalError::InsufficientWriteSpace(2, self.remaining()));
        }
        self.write_u8((value >> 8) as u8)?;
        self.write_u8((value & 0x00FF) as u8)
    }

    pub(crate) fn write_u16_le(&mut self, value: u16) -> Result<(), InternalError> {
        if self.remaining() < 2 {
            return Err(InternalError::InsufficientWriteSpace(2, self.remaining()));
        }
        self.write_u8((value & 0x00FF) as u8)?;
        self.write_u8((value >> 8) as u8)
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), InternalError> {
        if self.remaining() < bytes.len() {
            return Err(InternalError::InsufficientWriteSpace(
                bytes.len(),
                self.remaining(),
            ));
        }
        for byte in bytes {
            self.write_u8(*byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_cursor_fails_on_empty_input() {
        let mut cursor = ReadCursor::new(&[]);
        assert_eq!(cursor.read_u8(), Err(AduParseError::InsufficientBytes));
        assert_eq!(cursor.read_u16_be(), Err(AduParseError::InsufficientBytes));
    }

    #[test]
    fn read_cursor_consumes_in_order() {
        let mut cursor = ReadCursor::new(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(cursor.read_u16_be(), Ok(0x0102));
        assert_eq!(cursor.read_bytes(2).unwrap(), &[0x03, 0x04]);
        assert!(cursor.expect_empty().is_ok());
    }

    #[test]
    fn write_cursor_back_patches_with_seek() {
        let mut buffer = [0u8; 4];
        let mut cursor = WriteCursor::new(&mut buffer);
        cursor.seek_from_current(2).unwrap();
        cursor.write_u16_be(0xCAFE).unwrap();
        cursor.seek_from_start(0).unwrap();
        cursor.write_u16_be(0xBEEF).unwrap();
        assert_eq!(buffer, [0xBE, 0xEF, 0xCA, 0xFE]);
    }

    #[test]
    fn write_cursor_rejects_overflow() {
        let mut buffer = [0u8; 1];
        let mut cursor = WriteCursor::new(&mut buffer);
        cursor.write_u8(0xAA).unwrap();
        assert!(cursor.write_u8(0xBB).is_err());
    }
}
