// CRC-32 helpers for patch verification.
//
// `Crc32` accumulates the checksum of the output as it is produced. The
// one-shot helpers checksum a whole store (the source file) or a byte range
// of one (the instruction section of a patch) with a sequential read.

use std::io;

use crate::store::ByteSource;

const BUF_SIZE: usize = 64 * 1024;

/// Incremental CRC-32 (IEEE).
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("value", &format_args!("{:#010X}", self.value()))
            .finish()
    }
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Checksum of every byte fed so far.
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// CRC-32 of the full contents of `store`.
pub fn crc32_of<S: ByteSource + ?Sized>(store: &mut S) -> io::Result<u32> {
    let len = store.len();
    crc32_of_range(store, 0, len)
}

/// CRC-32 of `len` bytes of `store` starting at `offset`.
pub fn crc32_of_range<S: ByteSource + ?Sized>(
    store: &mut S,
    offset: u64,
    len: u64,
) -> io::Result<u32> {
    let mut crc = Crc32::new();
    let mut buf = vec![0u8; len.min(BUF_SIZE as u64) as usize];
    let mut pos = offset;
    let end = offset.saturating_add(len);
    while pos < end {
        let n = (end - pos).min(BUF_SIZE as u64) as usize;
        store.read_at(pos, &mut buf[..n])?;
        crc.update(&buf[..n]);
        pos += n as u64;
    }
    Ok(crc.value())
}
