//! Payload codec for the miner's SPI input port.
//!
//! Turns hash-job fields and test counters into [`SequenceItem`]s, and items
//! into the bit stream the driver shifts onto MOSI.
//!
//! # Mining job layout
//!
//! The pipeline takes one 352-bit shift-in per job, most significant field
//! first:
//!
//! ```text
//!  351      344 343                256 255                             0
//! +------------+----------------------+--------------------------------+
//! | difficulty | header fragment      | midstate                       |
//! | (nBits exp)| (nBits low, ntime,   | (SHA-256 state after the first |
//! |            |  merkle root tail)   |  64 header bytes)              |
//! +------------+----------------------+--------------------------------+
//! ```
//!
//! The difficulty byte is the top byte of the 96-bit header fragment: it is
//! the exponent of the compact nBits target, which is the first header word
//! on the wire. [`encode_mining_job`] writes the difficulty into that byte.
//!
//! getwork lists both the midstate and the header words lowest word first, so
//! [`MiningJob::from_getwork`] reverses the 32-bit word order of each field.
//!
//! # Wire order
//!
//! The least significant payload bit is shifted out first. [`to_wire_bits`]
//! and [`from_wire_bits`] convert between an item and that bit order.

use bitvec::prelude::*;

use crate::payload::{Payload, MAX_PAYLOAD_WIDTH};
use crate::sequence::SequenceItem;

/// Default width of an incrementing test payload, in bits.
pub const INCREMENT_WIDTH: usize = 32;

/// Width of an encoded mining job, in bits.
pub const MINING_JOB_WIDTH: usize = HEADER_FRAGMENT_WIDTH + MIDSTATE_WIDTH;

/// Width of a SHA-256 midstate, in bits.
pub const MIDSTATE_WIDTH: usize = 256;

/// Width of the header fragment (nBits, ntime, merkle tail), in bits.
pub const HEADER_FRAGMENT_WIDTH: usize = 96;

/// Bit offset of the difficulty byte inside the header fragment.
const DIFFICULTY_SHIFT: usize = HEADER_FRAGMENT_WIDTH - 8;

/// Error types for payload encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Invalid payload width: {width} (must be 1..={MAX_PAYLOAD_WIDTH})")]
    InvalidWidth { width: usize },

    #[error("Payload {payload} needs {bits} bits, does not fit in {width}")]
    OutOfRange {
        payload: Payload,
        bits: usize,
        width: usize,
    },

    #[error("Difficulty 0x{difficulty:02x} conflicts with header fragment byte 0x{header:02x}")]
    DifficultyMismatch { header: u8, difficulty: u8 },

    #[error("Invalid {field}: {reason}")]
    InvalidHex { field: &'static str, reason: String },
}

/// Check that `payload` fits in `width` bits and `width` is usable.
pub(crate) fn check_fits(payload: &Payload, width: usize) -> Result<(), CodecError> {
    if width == 0 || width > MAX_PAYLOAD_WIDTH {
        return Err(CodecError::InvalidWidth { width });
    }
    let bits = payload.bit_len();
    if bits > width {
        return Err(CodecError::OutOfRange {
            payload: *payload,
            bits,
            width,
        });
    }
    Ok(())
}

/// Encode an incrementing test payload.
///
/// The seed is carried unmodified; callers advance it between transfers.
pub fn encode_incrementing(
    seed: impl Into<Payload>,
    width: usize,
) -> Result<SequenceItem, CodecError> {
    SequenceItem::new(seed.into(), width)
}

/// Encode a mining job into one 352-bit item.
///
/// `header_fragment` is the 96-bit header tail with the nBits word on top. If
/// its top byte is zero, `difficulty` is written there; if it already holds a
/// different value the job is rejected rather than silently patched.
pub fn encode_mining_job(
    midstate: Payload,
    header_fragment: Payload,
    difficulty: u8,
) -> Result<SequenceItem, CodecError> {
    check_fits(&midstate, MIDSTATE_WIDTH)?;
    check_fits(&header_fragment, HEADER_FRAGMENT_WIDTH)?;

    let header_difficulty = top_byte(&header_fragment);
    let header = match header_difficulty {
        0 => header_fragment | (Payload::from(u32::from(difficulty)) << DIFFICULTY_SHIFT),
        byte if byte == difficulty => header_fragment,
        byte => {
            return Err(CodecError::DifficultyMismatch {
                header: byte,
                difficulty,
            })
        }
    };

    SequenceItem::new((header << MIDSTATE_WIDTH) | midstate, MINING_JOB_WIDTH)
}

fn top_byte(header_fragment: &Payload) -> u8 {
    (0..8).fold(0u8, |acc, i| {
        acc | (u8::from(header_fragment.bit(DIFFICULTY_SHIFT + i)) << i)
    })
}

/// A hash job as handed to the mining pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningJob {
    /// SHA-256 midstate, wire word order.
    pub midstate: Payload,

    /// nBits, ntime and merkle root tail, wire word order.
    pub header_fragment: Payload,

    /// Exponent byte of nBits.
    pub difficulty: u8,
}

impl MiningJob {
    /// Build a job from the `midstate` field of a getwork response and the
    /// three header words (merkle tail, ntime, nBits) that follow the first
    /// 64 bytes of its `data` field.
    ///
    /// Both strings list 32-bit words in getwork order; whitespace between
    /// words is ignored.
    pub fn from_getwork(midstate_hex: &str, header_words_hex: &str) -> Result<Self, CodecError> {
        let midstate = parse_words("midstate", midstate_hex, MIDSTATE_WIDTH / 32)?;
        let header_fragment =
            parse_words("header words", header_words_hex, HEADER_FRAGMENT_WIDTH / 32)?;
        let midstate = reverse_words(&midstate, MIDSTATE_WIDTH / 32);
        let header_fragment = reverse_words(&header_fragment, HEADER_FRAGMENT_WIDTH / 32);
        Ok(Self {
            midstate,
            difficulty: top_byte(&header_fragment),
            header_fragment,
        })
    }

    /// Encode this job for the SPI port.
    pub fn encode(&self) -> Result<SequenceItem, CodecError> {
        encode_mining_job(self.midstate, self.header_fragment, self.difficulty)
    }
}

fn parse_words(field: &'static str, hex: &str, words: usize) -> Result<Payload, CodecError> {
    let digits: String = hex.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if digits.len() != words * 8 {
        return Err(CodecError::InvalidHex {
            field,
            reason: format!("expected {} hex digits, got {}", words * 8, digits.len()),
        });
    }
    Payload::from_hex(&digits).map_err(|e| CodecError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

/// Reverse the order of the low `words` 32-bit words of `value`.
pub fn reverse_words(value: &Payload, words: usize) -> Payload {
    let mut out = Payload::ZERO;
    for word in 0..words {
        let target = words - 1 - word;
        for bit in 0..32 {
            out.set_bit(target * 32 + bit, value.bit(word * 32 + bit));
        }
    }
    out
}

/// Serialize an item in wire order: payload bit 0 first.
pub fn to_wire_bits(item: &SequenceItem) -> BitVec<u8, Lsb0> {
    let payload = item.payload();
    (0..item.payload_width()).map(|i| payload.bit(i)).collect()
}

/// Rebuild an item from bits captured in wire order.
///
/// The width of the item is the number of bits captured.
pub fn from_wire_bits(bits: &BitSlice<u8, Lsb0>) -> Result<SequenceItem, CodecError> {
    let mut payload = Payload::ZERO;
    if bits.len() > MAX_PAYLOAD_WIDTH {
        return Err(CodecError::InvalidWidth { width: bits.len() });
    }
    for (i, bit) in bits.iter().by_vals().enumerate() {
        payload.set_bit(i, bit);
    }
    SequenceItem::new(payload, bits.len())
}
