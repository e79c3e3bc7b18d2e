// CBD patch format.
//
// A patch is a 40-byte header followed by an instruction stream that runs
// to end of file. Bytes 0..=239 in the stream are literals; 240..=255 are
// operation codes carrying a little-endian length operand of 0, 1, 2 or
// 4 bytes.
//
// # Modules
//
// - `varint` : fixed-width little-endian operands and width classes
// - `opcode` : literal / operation byte framing
// - `header` : 40-byte header layout, flags and validity checks
// - `engine` : instruction stream execution

pub mod engine;
pub mod header;
pub mod opcode;
pub mod varint;

pub use engine::{EngineConfig, EngineOutcome, InstructionEngine, LastOperation, RangeSource};
pub use header::{CBD_MAGIC, HEADER_SIZE, HeaderFlags, PatchHeader, SUPPORTED_VERSION};
pub use opcode::{OpType, Opcode};
pub use varint::{VarWidthError, WidthClass};
