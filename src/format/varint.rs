// Fixed-width little-endian operands used by the CBD instruction stream.
//
// An operand is 0, 1, 2 or 4 bytes wide. The width is selected by a 2-bit
// length class carried in the opcode (for lengths and repeat counts) or
// derived from a magnitude (for source and destination offsets).

use std::io::{self, Read};

// ---------------------------------------------------------------------------
// Width class
// ---------------------------------------------------------------------------

/// Byte width of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WidthClass {
    /// No bytes; the operand is implicitly 0.
    Zero,
    /// One byte.
    One,
    /// Two bytes, little-endian.
    Two,
    /// Four bytes, little-endian.
    Four,
}

impl WidthClass {
    /// Smallest class able to hold `n`.
    #[inline]
    pub fn for_magnitude(n: u64) -> Self {
        match n {
            0 => Self::Zero,
            1..=0xFF => Self::One,
            0x100..=0xFFFF => Self::Two,
            _ => Self::Four,
        }
    }

    /// Class from the 2-bit field of an opcode.
    #[inline]
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Zero,
            1 => Self::One,
            2 => Self::Two,
            _ => Self::Four,
        }
    }

    /// The 2-bit field value for this class.
    #[inline]
    pub fn bits(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 3,
        }
    }

    /// Number of bytes an operand of this class occupies.
    #[inline]
    pub fn bytes(self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
        }
    }

    /// Largest value representable in this class.
    #[inline]
    pub fn max_value(self) -> u64 {
        match self {
            Self::Zero => 0,
            Self::One => 0xFF,
            Self::Two => 0xFFFF,
            Self::Four => 0xFFFF_FFFF,
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Read an operand of the given class from a streaming source.
///
/// Reads exactly `class.bytes()` bytes; a short read surfaces as
/// `io::ErrorKind::UnexpectedEof`.
pub fn decode<R: Read>(r: &mut R, class: WidthClass) -> io::Result<u64> {
    let mut buf = [0u8; 4];
    let n = class.bytes();
    r.read_exact(&mut buf[..n])?;
    Ok(u64::from(u32::from_le_bytes(buf)))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append `value` as an operand of the given class.
pub fn encode(value: u64, class: WidthClass, out: &mut Vec<u8>) -> Result<(), VarWidthError> {
    if value > class.max_value() {
        return Err(VarWidthError::Overflow { value, class });
    }
    let bytes = (value as u32).to_le_bytes();
    out.extend_from_slice(&bytes[..class.bytes()]);
    Ok(())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VarWidthError {
    /// Value does not fit the requested class.
    #[error("value {value} does not fit a {class:?} operand")]
    Overflow { value: u64, class: WidthClass },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
