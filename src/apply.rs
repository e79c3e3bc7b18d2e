// Patch application: header validation around one run of the instruction
// engine.
//
// With a header, checks run in a fixed order and stop at the first failure:
// magic, version, header CRC, version gates, source length and CRC, the
// source-copy assertion, then the instruction-section CRC. Only then is the
// destination truncated and written. After the stream ends the produced
// length and CRC are compared with the header.

use log::{debug, warn};

use crate::checksum::{crc32_of, crc32_of_range};
use crate::error::{HeaderError, PatchError};
use crate::format::engine::{EngineConfig, EngineOutcome, InstructionEngine};
use crate::format::header::{self, HEADER_SIZE, PatchHeader, SUPPORTED_VERSION};
use crate::format::varint::WidthClass;
use crate::store::{ByteSink, ByteSource};

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

/// Knobs for one patch application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOptions {
    /// The patch starts with a 40-byte header. When false the whole patch is
    /// a raw instruction stream and no header check runs.
    pub patch_has_header: bool,
    /// Verify the source CRC against the header.
    pub check_source_crc: bool,
    /// Verify the instruction-section CRC before writing any output.
    pub check_patch_crc: bool,
    /// Known source CRC; `None` computes it from the source.
    pub source_crc: Option<u32>,
    /// Reject patches whose source version is older than this.
    pub min_source_version: Option<u16>,
    /// Reject patches whose destination version is older than this.
    pub min_destination_version: Option<u16>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            patch_has_header: true,
            check_source_crc: true,
            check_patch_crc: true,
            source_crc: None,
            min_source_version: None,
            min_destination_version: None,
        }
    }
}

/// What an application produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// CRC-32 of the output.
    pub dst_crc32: u32,
    /// Output length in bytes.
    pub dst_length: u64,
    /// The parsed header, when the patch had one.
    pub header: Option<PatchHeader>,
    /// Operation codes executed.
    pub instructions: u64,
}

// ---------------------------------------------------------------------------
// Source placeholder
// ---------------------------------------------------------------------------

/// Source type for patches applied without a source file.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSource;

impl ByteSource for NoSource {
    fn len(&self) -> u64 {
        0
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("no source: read of {} bytes at {offset}", buf.len()),
        ))
    }
}

// ---------------------------------------------------------------------------
// PatchApplier
// ---------------------------------------------------------------------------

/// Applies one patch to an optional source, writing a destination.
///
/// ```
/// use cbdpatch::apply::{ApplyOptions, PatchApplier};
///
/// // Raw stream: three literals.
/// let mut patch: &[u8] = b"abc";
/// let mut out: Vec<u8> = Vec::new();
/// let options = ApplyOptions {
///     patch_has_header: false,
///     ..ApplyOptions::default()
/// };
/// let report = PatchApplier::new(&mut patch, &mut out)
///     .options(options)
///     .apply()
///     .unwrap();
/// assert_eq!(out, b"abc");
/// assert_eq!(report.dst_length, 3);
/// ```
pub struct PatchApplier<'a, P: ?Sized, D: ?Sized, S: ?Sized = NoSource> {
    patch: &'a mut P,
    destination: &'a mut D,
    source: Option<&'a mut S>,
    options: ApplyOptions,
}

impl<'a, P, D> PatchApplier<'a, P, D, NoSource>
where
    P: ByteSource + ?Sized,
    D: ByteSink + ?Sized,
{
    pub fn new(patch: &'a mut P, destination: &'a mut D) -> Self {
        Self {
            patch,
            destination,
            source: None,
            options: ApplyOptions::default(),
        }
    }
}

impl<'a, P, D, S> PatchApplier<'a, P, D, S>
where
    P: ByteSource + ?Sized,
    D: ByteSink + ?Sized,
    S: ByteSource + ?Sized,
{
    /// Supply the file the patch was made against.
    pub fn with_source<T: ByteSource + ?Sized>(
        self,
        source: &'a mut T,
    ) -> PatchApplier<'a, P, D, T> {
        PatchApplier {
            patch: self.patch,
            destination: self.destination,
            source: Some(source),
            options: self.options,
        }
    }

    pub fn options(mut self, options: ApplyOptions) -> Self {
        self.options = options;
        self
    }

    /// Validate, run the instruction stream and verify the result.
    pub fn apply(self) -> Result<ApplyReport, PatchError> {
        let Self {
            patch,
            destination,
            mut source,
            options,
        } = self;

        let header = if options.patch_has_header {
            Some(validate_header(&mut *patch, source.as_deref_mut(), &options)?)
        } else {
            None
        };

        let (source_width, start, dst_limit) = match &header {
            Some(h) => (
                WidthClass::for_magnitude(u64::from(h.src_length)),
                HEADER_SIZE as u64,
                Some(u64::from(h.dst_length)),
            ),
            None => (
                WidthClass::for_magnitude(source.as_deref().map_or(0, |s| s.len())),
                0,
                None,
            ),
        };

        let config = EngineConfig {
            source_width,
            dst_limit,
        };
        let outcome = InstructionEngine::new(patch, start, source, destination, config).run()?;

        if let Some(h) = &header {
            verify_output(h, &outcome)?;
        }

        Ok(ApplyReport {
            dst_crc32: outcome.crc32,
            dst_length: outcome.length,
            header,
            instructions: outcome.operations,
        })
    }
}

fn validate_header<P, S>(
    patch: &mut P,
    source: Option<&mut S>,
    options: &ApplyOptions,
) -> Result<PatchHeader, PatchError>
where
    P: ByteSource + ?Sized,
    S: ByteSource + ?Sized,
{
    let header =
        PatchHeader::read_from(patch).map_err(|e| PatchError::from_patch_read(e, "header", 0))?;
    debug!(
        "patch header: version {}, flags {:?}, {} -> {} bytes",
        header::version_string(header.version),
        header.flags,
        header.src_length,
        header.dst_length
    );

    if !header.magic_valid() {
        return Err(HeaderError::BadMagic {
            found: header.magic,
        }
        .into());
    }
    if !header.version_valid() {
        return Err(HeaderError::UnsupportedVersion {
            found: header::version_string(header.version),
            supported: header::version_string(SUPPORTED_VERSION),
        }
        .into());
    }
    if !header.header_crc_valid() {
        return Err(HeaderError::HeaderCrc {
            stored: header.header_crc32,
            computed: header.computed_crc32(),
        }
        .into());
    }
    if let Some(required) = options.min_source_version
        && required > header.src_version
    {
        return Err(HeaderError::SourceVersion {
            required,
            found: header.src_version,
        }
        .into());
    }
    if let Some(required) = options.min_destination_version
        && required > header.dst_version
    {
        return Err(HeaderError::DestinationVersion {
            required,
            found: header.dst_version,
        }
        .into());
    }

    if header.has_source() {
        let Some(source) = source else {
            return Err(HeaderError::MissingSource.into());
        };
        let actual = source.len();
        if actual != u64::from(header.src_length) {
            return Err(HeaderError::SourceLength {
                expected: u64::from(header.src_length),
                actual,
            }
            .into());
        }
        if options.check_source_crc {
            let actual = match options.source_crc {
                Some(crc) => crc,
                None => crc32_of(source)?,
            };
            if !header.source_crc_valid(actual) {
                return Err(HeaderError::SourceCrc {
                    expected: header.src_crc32,
                    actual,
                }
                .into());
            }
        }
    } else if source.is_some() {
        warn!("patch does not use a source file; ignoring the one given");
    }

    if header.is_source_copy() && !header.source_copy_consistent() {
        return Err(HeaderError::InconsistentSourceCopy.into());
    }

    if options.check_patch_crc {
        let body_len = patch.len() - HEADER_SIZE as u64;
        let actual = crc32_of_range(patch, HEADER_SIZE as u64, body_len)?;
        if !header.instructions_crc_valid(actual) {
            return Err(HeaderError::InstructionCrc {
                expected: header.instruction_crc32,
                actual,
            }
            .into());
        }
    }

    Ok(header)
}

fn verify_output(header: &PatchHeader, outcome: &EngineOutcome) -> Result<(), HeaderError> {
    if outcome.length != u64::from(header.dst_length) {
        return Err(HeaderError::DestinationLength {
            expected: u64::from(header.dst_length),
            actual: outcome.length,
        });
    }
    if outcome.crc32 != header.dst_crc32 {
        return Err(HeaderError::DestinationCrc {
            expected: header.dst_crc32,
            actual: outcome.crc32,
        });
    }
    if u64::from(header.instruction_count) != outcome.operations {
        debug!(
            "header counts {} instructions, stream executed {}",
            header.instruction_count, outcome.operations
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Convenience API
// ---------------------------------------------------------------------------

/// Apply an in-memory patch, returning the output and the report.
pub fn apply_memory(
    patch: &[u8],
    source: Option<&[u8]>,
    options: ApplyOptions,
) -> Result<(Vec<u8>, ApplyReport), PatchError> {
    let mut patch = patch;
    let mut output: Vec<u8> = Vec::new();
    let report = match source {
        Some(mut src) => PatchApplier::new(&mut patch, &mut output)
            .with_source(&mut src)
            .options(options)
            .apply()?,
        None => PatchApplier::new(&mut patch, &mut output)
            .options(options)
            .apply()?,
    };
    Ok((output, report))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
