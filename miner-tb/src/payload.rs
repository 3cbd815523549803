//! Wide unsigned payload values.
//!
//! Wraps `ruint::aliases::U512` to provide a stable interface. Payloads on the
//! SPI bus are at most [`MAX_PAYLOAD_WIDTH`] bits; the mining job alone needs
//! 352, so nothing narrower than a 512-bit integer will do. Callers never see
//! the underlying library, only this adapter.

use std::fmt;
use std::ops::{BitOr, Shl};

use ruint::aliases::U512;

/// Widest payload a single transfer can carry, in bits.
pub const MAX_PAYLOAD_WIDTH: usize = 512;

/// An unsigned payload of up to [`MAX_PAYLOAD_WIDTH`] bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Payload(U512);

/// Error parsing a payload from a hex string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid hex payload {input:?}")]
pub struct ParsePayloadError {
    input: String,
}

impl Payload {
    /// Zero constant.
    pub const ZERO: Self = Self(U512::ZERO);

    /// Parse a big-endian hex string, with or without a `0x` prefix.
    ///
    /// Underscores and ASCII whitespace are ignored so test vectors can be
    /// written grouped by word.
    pub fn from_hex(s: &str) -> Result<Self, ParsePayloadError> {
        let digits: String = s
            .trim()
            .trim_start_matches("0x")
            .chars()
            .filter(|c| *c != '_' && !c.is_ascii_whitespace())
            .collect();
        if digits.is_empty() {
            return Err(ParsePayloadError { input: s.to_string() });
        }
        U512::from_str_radix(&digits, 16)
            .map(Self)
            .map_err(|_| ParsePayloadError { input: s.to_string() })
    }

    /// Number of significant bits; zero for the zero payload.
    pub fn bit_len(&self) -> usize {
        self.0.bit_len()
    }

    /// Value of bit `index`, counting from the least significant bit.
    ///
    /// Bits at or above [`MAX_PAYLOAD_WIDTH`] read as zero.
    pub fn bit(&self, index: usize) -> bool {
        index < MAX_PAYLOAD_WIDTH && self.0.bit(index)
    }

    /// Set bit `index`. Indices at or above [`MAX_PAYLOAD_WIDTH`] are ignored.
    pub fn set_bit(&mut self, index: usize, value: bool) {
        if index < MAX_PAYLOAD_WIDTH {
            self.0.set_bit(index, value);
        }
    }

    /// Add one, returning `None` if the result no longer fits 512 bits.
    pub fn checked_increment(self) -> Option<Self> {
        self.0.checked_add(U512::from(1u64)).map(Self)
    }

    /// Big-endian bytes with leading zero bytes removed.
    fn significant_be_bytes(&self) -> Vec<u8> {
        let bytes = self.0.to_be_bytes_vec();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        bytes[first..].to_vec()
    }
}

impl From<u32> for Payload {
    fn from(value: u32) -> Self {
        Self(U512::from(u64::from(value)))
    }
}

impl From<u64> for Payload {
    fn from(value: u64) -> Self {
        Self(U512::from(value))
    }
}

impl From<u128> for Payload {
    fn from(value: u128) -> Self {
        Self(U512::from(value))
    }
}

impl Shl<usize> for Payload {
    type Output = Self;

    fn shl(self, rhs: usize) -> Self::Output {
        Self(self.0 << rhs)
    }
}

impl BitOr for Payload {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::LowerHex for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.significant_be_bytes();
        let mut digits = String::with_capacity(bytes.len() * 2);
        for byte in &bytes {
            digits.push_str(&format!("{byte:02x}"));
        }
        let digits = digits.trim_start_matches('0');
        let digits = if digits.is_empty() { "0" } else { digits };
        // The prefix is only emitted for `{:#x}`.
        f.pad_integral(true, "0x", digits)
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:#x}")
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({self:#x})")
    }
}
