use crate::types::UnitId;

/// Maximum number of bytes in a PDU (application data unit minus the unit id)
pub(crate) const MAX_ADU_LENGTH: usize = 253;

/// Transaction identifier carried in the MBAP header. Wraps on overflow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TxId {
    value: u16,
}

impl TxId {
    pub(crate) const fn new(value: u16) -> Self {
        TxId { value }
    }

    pub(crate) const fn to_u16(self) -> u16 {
        self.value
    }

    /// Return the current id and advance to the next one
    pub(crate) fn next(&mut self) -> TxId {
        let ret = *self;
        self.value = self.value.wrapping_add(1);
        ret
    }
}

impl Default for TxId {
    fn default() -> Self {
        TxId::new(0)
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06X}", self.value)
    }
}

/// Header fields common to every framing variant. Serial framings have
/// no transaction id, so it is optional here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub(crate) tx_id: Option<TxId>,
    pub(crate) unit_id: UnitId,
}

impl FrameHeader {
    pub(crate) fn new_tcp(unit_id: UnitId, tx_id: TxId) -> Self {
        FrameHeader {
            tx_id: Some(tx_id),
            unit_id,
        }
    }

    pub(crate) fn new_serial(unit_id: UnitId) -> Self {
        FrameHeader {
            tx_id: None,
            unit_id,
        }
    }
}

/// A parsed frame: the header plus the raw PDU bytes
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) header: FrameHeader,
    length: usize,
    pdu: [u8; MAX_ADU_LENGTH],
}

impl Frame {
    pub(crate) fn new(header: FrameHeader) -> Frame {
        Frame {
            header,
            length: 0,
            pdu: [0; MAX_ADU_LENGTH],
        }
    }

    /// Store the PDU bytes. Panics if `src` exceeds [`MAX_ADU_LENGTH`],
    /// which every parser checks before calling.
    pub(crate) fn set(&mut self, src: &[u8]) {
        self.pdu[0..src.len()].copy_from_slice(src);
        self.length = src.len();
    }

    pub(crate) fn payload(&self) -> &[u8] {
        &self.pdu[0..self.length]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_id_wraps_at_maximum() {
        let mut id = TxId::new(u16::MAX);
        assert_eq!(id.next(), TxId::new(u16::MAX));
        assert_eq!(id.next(), TxId::new(0));
    }

    #[test]
    fn frame_returns_set_payload() {
        let mut frame = Frame::new(FrameHeader::new_serial(UnitId::new(0x2A)));
        frame.set(&[0x03, 0x04]);
        assert_eq!(frame.payload(), &[0x03, 0x04]);
    }
}
