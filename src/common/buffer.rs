use crate::error::InternalError;

/// Accumulates chunks handed off by a terminal's receive queue until a
/// framing parser can extract a complete frame
pub(crate) struct ReadBuffer {
    buffer: Vec<u8>,
    begin: usize,
    end: usize,
}

impl ReadBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        ReadBuffer {
            buffer: vec![0; capacity],
            begin: 0,
            end: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.end - self.begin
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    pub(crate) fn clear(&mut self) {
        self.begin = 0;
        self.end = 0;
    }

    pub(crate) fn read(&mut self, count: usize) -> Result<&[u8], InternalError> {
        if self.len() < count {
            return Err(InternalError::InsufficientBytesForRead(count, self.len()));
        }

        match self.buffer.get(self.begin..(self.begin + count)) {
            Some(ret) => {
                self.begin += count;
                Ok(ret)
            }
            None => Err(InternalError::InsufficientBytesForRead(count, self.len())),
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, InternalError> {
        if self.is_empty() {
            return Err(InternalError::InsufficientBytesForRead(1, 0));
        }
        match self.buffer.get(self.begin) {
            Some(ret) => {
                let ret = *ret;
                self.begin += 1;
                Ok(ret)
            }
            None => Err(InternalError::InsufficientBytesForRead(1, 0)),
        }
    }

    pub(crate) fn read_u16_be(&mut self) -> Result<u16, InternalError> {
        let b1 = self.read_u8()? as u16;
        let b2 = self.read_u8()? as u16;
        Ok((b1 << 8) | b2)
    }

    pub(crate) fn read_u16_le(&mut self) -> Result<u16, InternalError> {
        let b1 = self.read_u8()? as u16;
        let b2 = self.read_u8()? as u16;
        Ok((b2 << 8) | b1)
    }

    /// Peek at a byte relative to the current read position without consuming it
    pub(crate) fn peek_at(&self, pos: usize) -> Result<u8, InternalError> {
        if self.len() <= pos {
            return Err(InternalError::InsufficientBytesForRead(pos + 1, self.len()));
        }
        match self.buffer.get(self.begin + pos) {
            Some(ret) => Ok(*ret),
            None => Err(InternalError::InsufficientBytesForRead(pos + 1, self.len())),
        }
    }

    /// Append a chunk received off the wire, growing the buffer if required
    pub(crate) fn append(&mut self, chunk: &[u8]) {
        if self.is_empty() {
            self.begin = 0;
            self.end = 0;
        }

        // shift consumed bytes out before growing
        if self.buffer.len() - self.end < chunk.len() && self.begin > 0 {
            let length = self.len();
            self.buffer.copy_within(self.begin..self.end, 0);
            self.begin = 0;
            self.end = length;
        }

        if self.buffer.len() - self.end < chunk.len() {
            self.buffer.resize(self.end + chunk.len(), 0);
        }

        self.buffer[self.end..self.end + chunk.len()].copy_from_slice(chunk);
        self.end += chunk.len();
    }
}
