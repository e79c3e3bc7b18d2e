// Random-access byte stores backing the patch, source and output.
//
// The engine only needs positioned reads and a length from the patch and
// source, plus append and truncate for the output. In-memory slices and
// vectors are provided, and `FileStore` wraps a buffered `std::fs::File`.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// A store that supports positioned reads.
pub trait ByteSource {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Fill `buf` from `offset`. A read past the end fails with
    /// `io::ErrorKind::UnexpectedEof`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An append-only store that can also be read back.
pub trait ByteSink: ByteSource {
    /// Append `data` at the current end.
    fn append(&mut self, data: &[u8]) -> io::Result<()>;

    /// Discard all contents.
    fn truncate(&mut self) -> io::Result<()>;

    /// Push buffered writes to the underlying storage.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: ByteSource + ?Sized> ByteSource for &mut T {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_at(offset, buf)
    }
}

impl<T: ByteSink + ?Sized> ByteSink for &mut T {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).append(data)
    }

    fn truncate(&mut self) -> io::Result<()> {
        (**self).truncate()
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

fn past_end(offset: u64, len: usize, total: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read of {len} bytes at offset {offset} past end ({total} bytes)"),
    )
}

fn slice_range(data: &[u8], offset: u64, len: usize) -> io::Result<&[u8]> {
    usize::try_from(offset)
        .ok()
        .and_then(|start| data.get(start..start.checked_add(len)?))
        .ok_or_else(|| past_end(offset, len, data.len() as u64))
}

// ---------------------------------------------------------------------------
// In-memory stores
// ---------------------------------------------------------------------------

impl ByteSource for &[u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        buf.copy_from_slice(slice_range(self, offset, buf.len())?);
        Ok(())
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        Vec::len(self) as u64
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        buf.copy_from_slice(slice_range(self, offset, buf.len())?);
        Ok(())
    }
}

impl ByteSink for Vec<u8> {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }

    fn truncate(&mut self) -> io::Result<()> {
        self.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

/// A file accessed through positioned reads and end-of-file appends.
///
/// Appends go through a `BufWriter`; the buffer is flushed before any
/// positioned read so reads see every appended byte. The length is tracked
/// locally, so appends never query metadata.
#[derive(Debug)]
pub struct FileStore {
    file: BufWriter<File>,
    len: u64,
    /// The OS file cursor sits at `len`.
    at_end: bool,
}

impl FileStore {
    /// Open an existing file for reading.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::from_file(File::open(path)?)
    }

    /// Open (or create) a file for reading and writing. Existing contents
    /// are kept until [`ByteSink::truncate`] is called.
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Self::from_file(file)
    }

    /// Wrap an already-open file.
    pub fn from_file(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: BufWriter::with_capacity(BUF_SIZE, file),
            len,
            at_end: false,
        })
    }
}

impl ByteSource for FileStore {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if offset.saturating_add(buf.len() as u64) > self.len {
            return Err(past_end(offset, buf.len(), self.len));
        }
        self.file.flush()?;
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        self.at_end = false;
        file.read_exact(buf)
    }
}

impl ByteSink for FileStore {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        if !self.at_end {
            self.file.get_mut().seek(SeekFrom::Start(self.len))?;
            self.at_end = true;
        }
        self.file.write_all(data)?;
        self.len += data.len() as u64;
        Ok(())
    }

    fn truncate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let file = self.file.get_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        self.len = 0;
        self.at_end = true;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
