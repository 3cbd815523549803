//! One SPI transfer.

use crate::codec::{check_fits, CodecError};
use crate::payload::Payload;

/// Payload and bit width of a single transfer.
///
/// Validated on construction and read-only afterwards. The sequencer consumes
/// each item once; build a fresh item for every transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceItem {
    payload: Payload,
    payload_width: usize,
}

impl SequenceItem {
    /// Create an item, rejecting zero or over-maximum widths and payloads
    /// that do not fit the width.
    pub fn new(payload: Payload, payload_width: usize) -> Result<Self, CodecError> {
        check_fits(&payload, payload_width)?;
        Ok(Self {
            payload,
            payload_width,
        })
    }

    pub fn payload(&self) -> Payload {
        self.payload
    }

    pub fn payload_width(&self) -> usize {
        self.payload_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::MAX_PAYLOAD_WIDTH;

    #[test]
    fn test_accepts_payload_filling_width() {
        let item = SequenceItem::new(Payload::from(0xffu32), 8).unwrap();
        assert_eq!(item.payload(), Payload::from(0xffu32));
        assert_eq!(item.payload_width(), 8);
    }

    #[test]
    fn test_rejects_zero_width() {
        assert_eq!(
            SequenceItem::new(Payload::ZERO, 0),
            Err(CodecError::InvalidWidth { width: 0 })
        );
    }

    #[test]
    fn test_rejects_width_beyond_maximum() {
        assert_eq!(
            SequenceItem::new(Payload::ZERO, MAX_PAYLOAD_WIDTH + 1),
            Err(CodecError::InvalidWidth {
                width: MAX_PAYLOAD_WIDTH + 1
            })
        );
    }

    #[test]
    fn test_rejects_payload_wider_than_width() {
        for width in [8usize, 16, 32, 352] {
            let payload = Payload::from(1u32) << width;
            let err = SequenceItem::new(payload, width).unwrap_err();
            assert_eq!(
                err,
                CodecError::OutOfRange {
                    payload,
                    bits: width + 1,
                    width
                }
            );
        }
    }
}
