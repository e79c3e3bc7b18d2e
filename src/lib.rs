//! cbdpatch: applier for CBD binary delta patches.
//!
//! A CBD patch is a 40-byte header followed by an instruction stream that
//! rebuilds a destination file from literal bytes, ranges of a source file
//! and ranges of the destination already written. Every stage is guarded by
//! CRC-32 checks recorded in the header.
//!
//! The crate provides:
//! - The patch format and instruction engine (`format`)
//! - Header validation and orchestration (`apply`)
//! - Byte-store traits for in-memory and file-backed data (`store`)
//! - File-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use cbdpatch::apply::{ApplyOptions, apply_memory};
//!
//! // Raw stream: copy 7 bytes of the source at offset 0, then two literals.
//! let patch = [241, 0, b'!', b'!'];
//! let options = ApplyOptions {
//!     patch_has_header: false,
//!     ..ApplyOptions::default()
//! };
//! let (output, report) = apply_memory(&patch, Some(&b"abcdefgh"[..]), options).unwrap();
//! assert_eq!(output, b"abcdefg!!");
//! assert_eq!(report.dst_length, 9);
//! ```

pub mod apply;
pub mod checksum;
pub mod error;
pub mod format;
pub mod io;
pub mod store;

#[cfg(feature = "cli")]
pub mod cli;

pub use apply::{ApplyOptions, ApplyReport, PatchApplier, apply_memory};
pub use error::{DataError, HeaderError, PatchError};
