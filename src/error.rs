// Error types for patch application.
//
// Header problems (pre- and post-conditions), instruction-stream corruption
// and storage failures are kept in separate enums so callers can tell them
// apart without inspecting messages.

use std::io;

/// The patch header is malformed or does not apply to the given inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("magic word mismatch: found {found:02X?}")]
    BadMagic { found: [u8; 4] },

    #[error("patch format version {found} is not supported (max {supported})")]
    UnsupportedVersion { found: String, supported: String },

    #[error("header CRC mismatch: stored {stored:#010X}, computed {computed:#010X}")]
    HeaderCrc { stored: u32, computed: u32 },

    #[error("source version {found} is older than required {required}")]
    SourceVersion { required: u16, found: u16 },

    #[error("destination version {found} is older than required {required}")]
    DestinationVersion { required: u16, found: u16 },

    #[error("patch requires a source file but none was given")]
    MissingSource,

    #[error("source file length mismatch: header says {expected}, file has {actual}")]
    SourceLength { expected: u64, actual: u64 },

    #[error("source file CRC mismatch: header says {expected:#010X}, file has {actual:#010X}")]
    SourceCrc { expected: u32, actual: u32 },

    #[error("source-copy patch has differing source and destination fields")]
    InconsistentSourceCopy,

    #[error("instruction CRC mismatch: header says {expected:#010X}, patch has {actual:#010X}")]
    InstructionCrc { expected: u32, actual: u32 },

    #[error("output length mismatch: header says {expected}, produced {actual}")]
    DestinationLength { expected: u64, actual: u64 },

    #[error("output CRC mismatch: header says {expected:#010X}, produced {actual:#010X}")]
    DestinationCrc { expected: u32, actual: u32 },
}

/// The instruction stream is corrupt. `position` is the patch offset of the
/// offending opcode.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DataError {
    #[error("at {position}: output would grow to {projected} bytes, header allows {limit}")]
    DestinationOverflow {
        position: u64,
        projected: u64,
        limit: u64,
    },

    #[error("at {position}: source reference {offset}+{length} exceeds source length {source_len}")]
    SourceOutOfBounds {
        position: u64,
        offset: u64,
        length: u64,
        source_len: u64,
    },

    #[error("at {position}: output reference {offset}+{length} out of bounds (limit {limit})")]
    DestinationOutOfBounds {
        position: u64,
        offset: u64,
        length: u64,
        limit: u64,
    },

    #[error("at {position}: source copy without a source file")]
    MissingSource { position: u64 },

    #[error("at {position}: unexpected repeat instruction")]
    UnexpectedRepeat { position: u64 },

    #[error("at {position}: repeat of an empty block")]
    EmptyRepeatBlock { position: u64 },

    #[error("at {position}: fill byte {byte} is outside the literal range")]
    InvalidFillByte { position: u64, byte: u8 },
}

/// Error returned by every patch-application entry point.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("invalid patch header: {0}")]
    Header(#[from] HeaderError),

    #[error("corrupt patch file: {0}")]
    Data(#[from] DataError),

    #[error("unexpected end of patch file while reading {field} at offset {offset}")]
    Truncated { field: &'static str, offset: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PatchError {
    /// Map an I/O error from a fixed-size patch read, turning a short read
    /// into `Truncated`.
    pub(crate) fn from_patch_read(e: io::Error, field: &'static str, offset: u64) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated { field, offset }
        } else {
            Self::Io(e)
        }
    }

    pub fn is_header(&self) -> bool {
        matches!(self, Self::Header(_))
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }
}
