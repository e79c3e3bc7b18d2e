// Opcode framing for the CBD instruction stream.
//
// Byte values 0..=239 are instant literals. Values 240..=255 are operation
// codes: `c = byte - 240`, the low two bits of `c` select the operation and
// the next two bits select the operand width class.

use super::varint::WidthClass;

/// Largest byte value that stands for itself in the output.
pub const INSTANT_LITERAL_MAX: u8 = 239;

/// First byte value carrying an operation code.
pub const OPCODE_BASE: u8 = 240;

/// Added to the decoded length of SOURCE and DEST copies. Below this size a
/// DATA block is cheaper than an offset reference.
pub const COPY_LENGTH_BIAS: u64 = 7;

const TYPE_MASK: u8 = 0b0011;
const CLASS_SHIFT: u8 = 2;

/// Operation selected by the low two bits of an operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    /// Copy bytes embedded in the patch.
    Data,
    /// Copy bytes from the source file.
    Source,
    /// Copy bytes from the already-written output.
    Dest,
    /// Repeat the previous operation.
    Repeat,
}

impl OpType {
    fn from_bits(bits: u8) -> Self {
        match bits & TYPE_MASK {
            0 => Self::Data,
            1 => Self::Source,
            2 => Self::Dest,
            _ => Self::Repeat,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Data => 0,
            Self::Source => 1,
            Self::Dest => 2,
            Self::Repeat => 3,
        }
    }

    /// Amount added to the decoded length parameter.
    #[inline]
    pub fn length_bias(self) -> u64 {
        match self {
            Self::Data | Self::Repeat => 1,
            Self::Source | Self::Dest => COPY_LENGTH_BIAS,
        }
    }
}

/// One decoded instruction-stream byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Byte copied verbatim to the output.
    Literal(u8),
    /// Operation followed by a length operand of width `class`.
    Op { op: OpType, class: WidthClass },
}

impl Opcode {
    /// Classify a raw stream byte.
    #[inline]
    pub fn from_byte(byte: u8) -> Self {
        if byte <= INSTANT_LITERAL_MAX {
            return Self::Literal(byte);
        }
        let code = byte - OPCODE_BASE;
        Self::Op {
            op: OpType::from_bits(code),
            class: WidthClass::from_bits(code >> CLASS_SHIFT),
        }
    }

    /// Encode back to a stream byte. Returns `None` for a literal above the
    /// instant-literal range.
    #[inline]
    pub fn to_byte(self) -> Option<u8> {
        match self {
            Self::Literal(b) if b <= INSTANT_LITERAL_MAX => Some(b),
            Self::Literal(_) => None,
            Self::Op { op, class } => {
                Some(OPCODE_BASE + ((class.bits() << CLASS_SHIFT) | op.bits()))
            }
        }
    }
}

/// Is `byte` inside the instant-literal range?
#[inline]
pub fn is_instant_literal(byte: u8) -> bool {
    byte <= INSTANT_LITERAL_MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_range() {
        assert_eq!(Opcode::from_byte(0), Opcode::Literal(0));
        assert_eq!(Opcode::from_byte(239), Opcode::Literal(239));
        assert!(matches!(Opcode::from_byte(240), Opcode::Op { .. }));
    }

    #[test]
    fn operation_fields() {
        assert_eq!(
            Opcode::from_byte(240),
            Opcode::Op {
                op: OpType::Data,
                class: WidthClass::Zero
            }
        );
        // 247 = 240 + (1 << 2 | 3): REPEAT with a one-byte count.
        assert_eq!(
            Opcode::from_byte(247),
            Opcode::Op {
                op: OpType::Repeat,
                class: WidthClass::One
            }
        );
        assert_eq!(
            Opcode::from_byte(255),
            Opcode::Op {
                op: OpType::Repeat,
                class: WidthClass::Four
            }
        );
        assert_eq!(
            Opcode::from_byte(249),
            Opcode::Op {
                op: OpType::Source,
                class: WidthClass::Two
            }
        );
    }

    #[test]
    fn every_byte_reencodes() {
        for b in 0..=255u8 {
            assert_eq!(Opcode::from_byte(b).to_byte(), Some(b));
        }
        assert_eq!(Opcode::Literal(240).to_byte(), None);
    }

    #[test]
    fn length_bias() {
        assert_eq!(OpType::Data.length_bias(), 1);
        assert_eq!(OpType::Repeat.length_bias(), 1);
        assert_eq!(OpType::Source.length_bias(), 7);
        assert_eq!(OpType::Dest.length_bias(), 7);
    }
}
