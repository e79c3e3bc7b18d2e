// Instruction engine: executes a CBD instruction stream against a source
// and an append-only output.
//
// The stream is consumed one byte at a time. Instant literals collect in a
// bounded buffer; every operation code first flushes that buffer, then
// decodes its length operand and runs. REPEAT consults the operation that
// immediately preceded it, so the engine keeps a small `LastOperation`
// state that every REPEAT resets.
//
// Output is never overwritten. DEST copies read bytes that are already
// written and append them at the end, which makes overlapping copies expand
// runs and short patterns.

use std::io::{self, Read};

use log::{debug, trace};

use super::opcode::{self, OpType, Opcode};
use super::varint::{self, WidthClass};
use crate::checksum::Crc32;
use crate::error::{DataError, PatchError};
use crate::store::{ByteSink, ByteSource};

/// Capacity of the literal buffer.
pub const LITERAL_BUF_SIZE: usize = 128 * 1024;

/// Largest single read/append performed by a copy.
const COPY_CHUNK: usize = 128 * 1024;

/// Read-ahead window for the instruction stream.
const READ_AHEAD: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Last-operation state
// ---------------------------------------------------------------------------

/// Store a copied range came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSource {
    Patch,
    Source,
    Destination,
}

/// What REPEAT would act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastOperation {
    /// Start of stream, or a REPEAT just ran.
    #[default]
    None,
    /// A literal run was flushed by an operation boundary.
    LiteralRun { last_byte: u8 },
    /// A DATA, SOURCE or DEST copy.
    Range {
        from: RangeSource,
        offset: u64,
        length: u64,
    },
}

// ---------------------------------------------------------------------------
// Patch cursor
// ---------------------------------------------------------------------------

/// Sequential reader over a patch store with a read-ahead buffer.
///
/// Positions are absolute offsets into the store, header included.
pub struct PatchCursor<'a, P: ?Sized> {
    store: &'a mut P,
    len: u64,
    pos: u64,
    buf: Vec<u8>,
    buf_start: u64,
}

impl<'a, P: ByteSource + ?Sized> PatchCursor<'a, P> {
    pub fn new(store: &'a mut P, start: u64) -> Self {
        let len = store.len();
        Self {
            store,
            len,
            pos: start,
            buf: Vec::new(),
            buf_start: start,
        }
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }

    /// Next stream byte, or `None` at end of stream.
    #[inline]
    pub fn next_byte(&mut self) -> io::Result<Option<u8>> {
        if self.pos >= self.len {
            return Ok(None);
        }
        if self.buffered().is_empty() {
            self.refill()?;
        }
        let byte = self.buf[(self.pos - self.buf_start) as usize];
        self.pos += 1;
        Ok(Some(byte))
    }

    /// Advance past `n` bytes without reading them.
    pub fn skip(&mut self, n: u64) {
        self.pos = self.pos.saturating_add(n).min(self.len);
    }

    /// The underlying store, for positioned reads.
    pub fn store_mut(&mut self) -> &mut P {
        &mut *self.store
    }

    fn buffered(&self) -> &[u8] {
        let end = self.buf_start + self.buf.len() as u64;
        if self.pos >= self.buf_start && self.pos < end {
            &self.buf[(self.pos - self.buf_start) as usize..]
        } else {
            &[]
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let n = self.remaining().min(READ_AHEAD as u64) as usize;
        self.buf.resize(n, 0);
        self.store.read_at(self.pos, &mut self.buf)?;
        self.buf_start = self.pos;
        Ok(())
    }
}

impl<P: ByteSource + ?Sized> Read for PatchCursor<'_, P> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len || out.is_empty() {
            return Ok(0);
        }
        if self.buffered().is_empty() {
            self.refill()?;
        }
        let avail = self.buffered();
        let n = avail.len().min(out.len());
        out[..n].copy_from_slice(&avail[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Append-only view of the destination with a running CRC.
struct Output<'a, D: ?Sized> {
    store: &'a mut D,
    written: u64,
    crc: Crc32,
    scratch: Vec<u8>,
}

impl<D: ByteSink + ?Sized> Output<'_, D> {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.store.append(data)?;
        self.crc.update(data);
        self.written += data.len() as u64;
        Ok(())
    }

    /// Append `count` back-to-back copies of `block`.
    fn append_repeated(&mut self, block: &[u8], count: u64) -> io::Result<()> {
        if block.is_empty() || count == 0 {
            return Ok(());
        }
        if block.len() >= COPY_CHUNK {
            for _ in 0..count {
                self.append(block)?;
            }
            return Ok(());
        }
        let per_chunk = (COPY_CHUNK / block.len()) as u64;
        let chunk = block.repeat(per_chunk.min(count) as usize);
        let mut left = count;
        while left >= per_chunk {
            self.append(&chunk)?;
            left -= per_chunk;
        }
        if left > 0 {
            self.append(&chunk[..left as usize * block.len()])?;
        }
        Ok(())
    }

    /// Copy `length` bytes of `from` at `offset` to the end of the output.
    fn copy_from<S: ByteSource + ?Sized>(
        &mut self,
        from: &mut S,
        offset: u64,
        length: u64,
    ) -> io::Result<()> {
        let mut scratch = std::mem::take(&mut self.scratch);
        let mut pos = offset;
        let end = offset + length;
        while pos < end {
            let n = (end - pos).min(COPY_CHUNK as u64) as usize;
            scratch.resize(n, 0);
            from.read_at(pos, &mut scratch)?;
            self.append(&scratch)?;
            pos += n as u64;
        }
        self.scratch = scratch;
        Ok(())
    }

    /// Copy `length` bytes starting at `offset` of the output itself.
    ///
    /// `offset` must be below `written`. When the range runs past the
    /// current end, bytes appended by this copy are read again, so the
    /// result repeats the `written - offset` bytes starting at `offset`.
    fn copy_within(&mut self, offset: u64, length: u64) -> io::Result<()> {
        let distance = self.written - offset;
        if distance >= length || distance >= COPY_CHUNK as u64 {
            let mut scratch = std::mem::take(&mut self.scratch);
            let mut read_pos = offset;
            let mut left = length;
            while left > 0 {
                // Never read past the bytes present when this chunk starts.
                let n = left.min(self.written - read_pos).min(COPY_CHUNK as u64) as usize;
                scratch.resize(n, 0);
                self.store.read_at(read_pos, &mut scratch)?;
                self.append(&scratch)?;
                read_pos += n as u64;
                left -= n as u64;
            }
            self.scratch = scratch;
            return Ok(());
        }

        // Short period: the copy is the period repeated, then a prefix of it.
        let mut period = vec![0u8; distance as usize];
        self.store.read_at(offset, &mut period)?;
        self.append_repeated(&period, length / distance)?;
        let tail = (length % distance) as usize;
        self.append(&period[..tail])
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Facts the engine needs from the caller.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Width of SOURCE offsets, derived from the source length.
    pub source_width: WidthClass,
    /// Declared output length; `None` when the patch carries no header.
    pub dst_limit: Option<u64>,
}

/// Result of running an instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOutcome {
    pub crc32: u32,
    pub length: u64,
    /// Operation codes executed (literals excluded).
    pub operations: u64,
}

/// Executes one instruction stream. Created per application and consumed
/// by [`InstructionEngine::run`].
pub struct InstructionEngine<'a, P: ?Sized, S: ?Sized, D: ?Sized> {
    patch: PatchCursor<'a, P>,
    source: Option<&'a mut S>,
    source_len: u64,
    source_width: WidthClass,
    dst_limit: Option<u64>,
    out: Output<'a, D>,
    literals: Vec<u8>,
    last: LastOperation,
    operations: u64,
}

impl<'a, P, S, D> InstructionEngine<'a, P, S, D>
where
    P: ByteSource + ?Sized,
    S: ByteSource + ?Sized,
    D: ByteSink + ?Sized,
{
    /// `start` is the patch offset of the first instruction byte.
    pub fn new(
        patch: &'a mut P,
        start: u64,
        source: Option<&'a mut S>,
        destination: &'a mut D,
        config: EngineConfig,
    ) -> Self {
        let source_len = source.as_deref().map_or(0, |s| s.len());
        Self {
            patch: PatchCursor::new(patch, start),
            source,
            source_len,
            source_width: config.source_width,
            dst_limit: config.dst_limit,
            out: Output {
                store: destination,
                written: 0,
                crc: Crc32::new(),
                scratch: Vec::new(),
            },
            literals: Vec::with_capacity(LITERAL_BUF_SIZE),
            last: LastOperation::None,
            operations: 0,
        }
    }

    /// Truncate the destination, consume the stream to its end and return
    /// the output checksum and length.
    pub fn run(mut self) -> Result<EngineOutcome, PatchError> {
        self.out.store.truncate()?;

        loop {
            let position = self.patch.position();
            let Some(byte) = self.patch.next_byte()? else {
                break;
            };
            match Opcode::from_byte(byte) {
                Opcode::Literal(b) => self.push_literal(b)?,
                Opcode::Op { op, class } => {
                    self.flush_literals(position, true)?;
                    self.execute(position, op, class)?;
                    self.operations += 1;
                }
            }
        }
        let end = self.patch.position();
        self.flush_literals(end, true)?;
        self.out.store.flush()?;

        let outcome = EngineOutcome {
            crc32: self.out.crc.value(),
            length: self.out.written,
            operations: self.operations,
        };
        debug!(
            "instruction stream done: {} operations, {} bytes, crc {:#010X}",
            outcome.operations, outcome.length, outcome.crc32
        );
        Ok(outcome)
    }

    fn push_literal(&mut self, byte: u8) -> Result<(), PatchError> {
        if self.literals.len() == LITERAL_BUF_SIZE {
            let position = self.patch.position();
            self.flush_literals(position, false)?;
        }
        self.literals.push(byte);
        Ok(())
    }

    /// Write buffered literals. Only a flush at an operation boundary
    /// (`boundary == true`) makes the run visible to REPEAT.
    fn flush_literals(&mut self, position: u64, boundary: bool) -> Result<(), PatchError> {
        let Some(&last_byte) = self.literals.last() else {
            return Ok(());
        };
        self.check_growth(position, self.literals.len() as u64)?;
        self.out.append(&self.literals)?;
        self.literals.clear();
        if boundary {
            self.last = LastOperation::LiteralRun { last_byte };
        }
        Ok(())
    }

    fn execute(&mut self, position: u64, op: OpType, class: WidthClass) -> Result<(), PatchError> {
        let param = self.read_operand(class, "length")?;
        let length = param + op.length_bias();
        trace!("{position}: {op:?} {length}");
        match op {
            OpType::Data => self.copy_data(position, length),
            OpType::Source => self.copy_source(position, length),
            OpType::Dest => self.copy_dest(position, length),
            OpType::Repeat => self.repeat(position, length),
        }
    }

    fn read_operand(&mut self, class: WidthClass, field: &'static str) -> Result<u64, PatchError> {
        let at = self.patch.position();
        varint::decode(&mut self.patch, class)
            .map_err(|e| PatchError::from_patch_read(e, field, at))
    }

    fn check_growth(&self, position: u64, added: u64) -> Result<(), DataError> {
        let Some(limit) = self.dst_limit else {
            return Ok(());
        };
        match self.out.written.checked_add(added) {
            Some(projected) if projected <= limit => Ok(()),
            projected => Err(DataError::DestinationOverflow {
                position,
                projected: projected.unwrap_or(u64::MAX),
                limit,
            }),
        }
    }

    fn copy_data(&mut self, position: u64, length: u64) -> Result<(), PatchError> {
        self.check_growth(position, length)?;
        let offset = self.patch.position();
        if self.patch.remaining() < length {
            return Err(PatchError::Truncated {
                field: "data block",
                offset,
            });
        }
        self.out.copy_from(self.patch.store_mut(), offset, length)?;
        self.patch.skip(length);
        self.last = LastOperation::Range {
            from: RangeSource::Patch,
            offset,
            length,
        };
        Ok(())
    }

    fn copy_source(&mut self, position: u64, length: u64) -> Result<(), PatchError> {
        if self.source.is_none() {
            return Err(DataError::MissingSource { position }.into());
        }
        self.check_growth(position, length)?;
        let offset = self.read_operand(self.source_width, "source offset")?;
        if offset.checked_add(length).is_none_or(|end| end > self.source_len) {
            return Err(DataError::SourceOutOfBounds {
                position,
                offset,
                length,
                source_len: self.source_len,
            }
            .into());
        }
        let Some(source) = self.source.as_deref_mut() else {
            return Err(DataError::MissingSource { position }.into());
        };
        self.out.copy_from(source, offset, length)?;
        self.last = LastOperation::Range {
            from: RangeSource::Source,
            offset,
            length,
        };
        Ok(())
    }

    fn copy_dest(&mut self, position: u64, length: u64) -> Result<(), PatchError> {
        self.check_growth(position, length)?;
        // Offset width follows the output length at this instruction.
        let width = WidthClass::for_magnitude(self.out.written);
        let offset = self.read_operand(width, "destination offset")?;
        let end = offset.checked_add(length);
        if let Some(limit) = self.dst_limit
            && end.is_none_or(|end| end > limit)
        {
            return Err(DataError::DestinationOutOfBounds {
                position,
                offset,
                length,
                limit,
            }
            .into());
        }
        if offset >= self.out.written {
            return Err(DataError::DestinationOutOfBounds {
                position,
                offset,
                length,
                limit: self.out.written,
            }
            .into());
        }
        self.out.copy_within(offset, length)?;
        self.last = LastOperation::Range {
            from: RangeSource::Destination,
            offset,
            length,
        };
        Ok(())
    }

    fn repeat(&mut self, position: u64, count: u64) -> Result<(), PatchError> {
        // Taking the state leaves `None`, so a second REPEAT in a row fails.
        match std::mem::take(&mut self.last) {
            LastOperation::None => Err(DataError::UnexpectedRepeat { position }.into()),
            LastOperation::LiteralRun { last_byte } => {
                if !opcode::is_instant_literal(last_byte) {
                    return Err(DataError::InvalidFillByte {
                        position,
                        byte: last_byte,
                    }
                    .into());
                }
                self.check_growth(position, count)?;
                self.out.append_repeated(&[last_byte], count)?;
                Ok(())
            }
            LastOperation::Range {
                from,
                offset,
                length,
            } => {
                if length == 0 {
                    return Err(DataError::EmptyRepeatBlock { position }.into());
                }
                let total = count.checked_mul(length).unwrap_or(u64::MAX);
                self.check_growth(position, total)?;
                let block = self.read_block(position, from, offset, length)?;
                self.out.append_repeated(&block, count)?;
                Ok(())
            }
        }
    }

    /// Read a previously copied range once, from wherever it came from.
    fn read_block(
        &mut self,
        position: u64,
        from: RangeSource,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, PatchError> {
        let len = usize::try_from(length)
            .map_err(|_| io::Error::other(format!("repeat block of {length} bytes is too large")))?;
        let mut block = vec![0u8; len];
        match from {
            RangeSource::Patch => self.patch.store_mut().read_at(offset, &mut block)?,
            RangeSource::Source => match self.source.as_deref_mut() {
                Some(source) => source.read_at(offset, &mut block)?,
                None => return Err(DataError::MissingSource { position }.into()),
            },
            RangeSource::Destination => self.out.store.read_at(offset, &mut block)?,
        }
        Ok(block)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
