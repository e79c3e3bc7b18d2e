// CBD patch header: fixed 40-byte preamble, all integers little-endian.
//
//   0  magic              4   "CBD="
//   4  version            2   (minor << 8) | major, ASCII digits
//   6  flags              2
//   8  src_length         4
//  12  dst_length         4
//  16  src_version        2
//  18  dst_version        2
//  20  instruction_count  4
//  24  instruction_crc32  4   CRC-32 of everything after the header
//  28  src_crc32          4
//  32  dst_crc32          4
//  36  header_crc32       4   CRC-32 of bytes 0..36

use std::fmt;
use std::io;

use bitflags::bitflags;

use crate::store::ByteSource;

pub const CBD_MAGIC: [u8; 4] = *b"CBD=";

/// Total header size in bytes.
pub const HEADER_SIZE: usize = 40;

/// Bytes covered by the header CRC.
const HEADER_CRC_SPAN: usize = 36;

/// Highest format version this crate applies (1.2).
pub const SUPPORTED_VERSION: u16 = pack_version(b'1', b'2');

/// Pack ASCII `major` and `minor` digits into the on-disk version field.
pub const fn pack_version(major: u8, minor: u8) -> u16 {
    ((minor as u16) << 8) | major as u16
}

/// Render a packed version as `major.minor`.
pub fn version_string(version: u16) -> String {
    let [major, minor] = version.to_le_bytes();
    format!("{}.{}", major as char, minor as char)
}

bitflags! {
    /// Header flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HeaderFlags: u16 {
        /// The patch references a source file.
        const HAS_SOURCE = 1 << 3;
        /// Source and destination are identical.
        const SRC_COPY = 1 << 7;
    }
}

/// Parsed patch header. Fields are read-only facts about the patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub flags: HeaderFlags,
    pub src_length: u32,
    pub dst_length: u32,
    pub src_version: u16,
    pub dst_version: u16,
    pub instruction_count: u32,
    pub instruction_crc32: u32,
    pub src_crc32: u32,
    pub dst_crc32: u32,
    pub header_crc32: u32,
    /// CRC-32 of the first 36 bytes as read.
    computed_crc32: u32,
}

impl Default for PatchHeader {
    fn default() -> Self {
        Self {
            magic: CBD_MAGIC,
            version: SUPPORTED_VERSION,
            flags: HeaderFlags::empty(),
            src_length: 0,
            dst_length: 0,
            src_version: 0,
            dst_version: 0,
            instruction_count: 0,
            instruction_crc32: 0,
            src_crc32: 0,
            dst_crc32: 0,
            header_crc32: 0,
            computed_crc32: 0,
        }
    }
}

fn le16(b: &[u8; HEADER_SIZE], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le32(b: &[u8; HEADER_SIZE], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

impl PatchHeader {
    /// Parse a header from its 40-byte encoding. Nothing is validated here;
    /// use the `*_valid` checks.
    pub fn parse(bytes: &[u8; HEADER_SIZE]) -> Self {
        Self {
            magic: [bytes[0], bytes[1], bytes[2], bytes[3]],
            version: le16(bytes, 4),
            flags: HeaderFlags::from_bits_retain(le16(bytes, 6)),
            src_length: le32(bytes, 8),
            dst_length: le32(bytes, 12),
            src_version: le16(bytes, 16),
            dst_version: le16(bytes, 18),
            instruction_count: le32(bytes, 20),
            instruction_crc32: le32(bytes, 24),
            src_crc32: le32(bytes, 28),
            dst_crc32: le32(bytes, 32),
            header_crc32: le32(bytes, 36),
            computed_crc32: crc32fast::hash(&bytes[..HEADER_CRC_SPAN]),
        }
    }

    /// Read the header from the start of a store.
    pub fn read_from<S: ByteSource + ?Sized>(store: &mut S) -> io::Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        store.read_at(0, &mut buf)?;
        Ok(Self::parse(&buf))
    }

    /// Encode to the 40-byte layout. The header CRC field is recomputed from
    /// the other fields; `header_crc32` is ignored.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut b = [0u8; HEADER_SIZE];
        b[0..4].copy_from_slice(&self.magic);
        b[4..6].copy_from_slice(&self.version.to_le_bytes());
        b[6..8].copy_from_slice(&self.flags.bits().to_le_bytes());
        b[8..12].copy_from_slice(&self.src_length.to_le_bytes());
        b[12..16].copy_from_slice(&self.dst_length.to_le_bytes());
        b[16..18].copy_from_slice(&self.src_version.to_le_bytes());
        b[18..20].copy_from_slice(&self.dst_version.to_le_bytes());
        b[20..24].copy_from_slice(&self.instruction_count.to_le_bytes());
        b[24..28].copy_from_slice(&self.instruction_crc32.to_le_bytes());
        b[28..32].copy_from_slice(&self.src_crc32.to_le_bytes());
        b[32..36].copy_from_slice(&self.dst_crc32.to_le_bytes());
        let crc = crc32fast::hash(&b[..HEADER_CRC_SPAN]);
        b[36..40].copy_from_slice(&crc.to_le_bytes());
        b
    }

    #[inline]
    pub fn has_source(&self) -> bool {
        self.flags.contains(HeaderFlags::HAS_SOURCE)
    }

    #[inline]
    pub fn is_source_copy(&self) -> bool {
        self.flags.contains(HeaderFlags::SRC_COPY)
    }

    pub fn magic_valid(&self) -> bool {
        self.magic == CBD_MAGIC
    }

    pub fn version_valid(&self) -> bool {
        self.version <= SUPPORTED_VERSION
    }

    pub fn header_crc_valid(&self) -> bool {
        self.computed_crc32 == self.header_crc32
    }

    /// CRC-32 of the first 36 bytes as they were read.
    pub fn computed_crc32(&self) -> u32 {
        self.computed_crc32
    }

    pub fn source_crc_valid(&self, actual: u32) -> bool {
        self.src_crc32 == actual
    }

    pub fn instructions_crc_valid(&self, actual: u32) -> bool {
        self.instruction_crc32 == actual
    }

    /// Source and destination fields agree, as a source-copy patch requires.
    pub fn source_copy_consistent(&self) -> bool {
        self.src_crc32 == self.dst_crc32 && self.src_length == self.dst_length
    }
}

impl fmt::Display for PatchHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "CBD magic:                    {}", self.magic.escape_ascii())?;
        writeln!(f, "CBD version:                  {}", version_string(self.version))?;
        write!(f, "CBD flags:                    ")?;
        if self.flags.is_empty() {
            writeln!(f, "none")?;
        } else {
            for (name, _) in self.flags.iter_names() {
                write!(f, "{name} ")?;
            }
            writeln!(f)?;
        }
        writeln!(f, "CBD source length:            {}", self.src_length)?;
        writeln!(f, "CBD target length:            {}", self.dst_length)?;
        writeln!(f, "CBD source version:           {}", self.src_version)?;
        writeln!(f, "CBD target version:           {}", self.dst_version)?;
        writeln!(f, "CBD instruction count:        {}", self.instruction_count)?;
        writeln!(f, "CBD instruction CRC-32:       {:08X}", self.instruction_crc32)?;
        writeln!(f, "CBD source CRC-32:            {:08X}", self.src_crc32)?;
        writeln!(f, "CBD target CRC-32:            {:08X}", self.dst_crc32)?;
        write!(f, "CBD header CRC-32:            {:08X}", self.header_crc32)?;
        if !self.header_crc_valid() {
            write!(f, " (computed {:08X})", self.computed_crc32)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PatchHeader {
        PatchHeader {
            flags: HeaderFlags::HAS_SOURCE,
            src_length: 1000,
            dst_length: 1200,
            src_version: 3,
            dst_version: 4,
            instruction_count: 17,
            instruction_crc32: 0x1122_3344,
            src_crc32: 0xAABB_CCDD,
            dst_crc32: 0x0102_0304,
            ..Default::default()
        }
    }

    #[test]
    fn supported_version_packs_ascii_digits() {
        assert_eq!(SUPPORTED_VERSION, 0x3231);
        assert_eq!(version_string(SUPPORTED_VERSION), "1.2");
    }

    #[test]
    fn field_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[0..4], b"CBD=");
        assert_eq!(&bytes[4..6], b"12");
        assert_eq!(&bytes[6..8], &[0x08, 0x00]);
        assert_eq!(&bytes[8..12], &1000u32.to_le_bytes());
        assert_eq!(&bytes[28..32], &[0xDD, 0xCC, 0xBB, 0xAA]);
        let crc = crc32fast::hash(&bytes[..36]);
        assert_eq!(&bytes[36..40], &crc.to_le_bytes());
    }

    #[test]
    fn parse_recovers_fields_and_validates() {
        let bytes = sample().to_bytes();
        let mut store: &[u8] = &bytes;
        let hdr = PatchHeader::read_from(&mut store).unwrap();
        assert!(hdr.magic_valid());
        assert!(hdr.version_valid());
        assert!(hdr.header_crc_valid());
        assert!(hdr.has_source());
        assert!(!hdr.is_source_copy());
        assert_eq!(hdr.src_length, 1000);
        assert_eq!(hdr.dst_length, 1200);
        assert_eq!(hdr.src_version, 3);
        assert_eq!(hdr.dst_version, 4);
        assert_eq!(hdr.instruction_count, 17);
        assert!(hdr.instructions_crc_valid(0x1122_3344));
        assert!(hdr.source_crc_valid(0xAABB_CCDD));
        assert!(!hdr.source_crc_valid(0));
    }

    #[test]
    fn corrupted_byte_fails_header_crc() {
        let mut bytes = sample().to_bytes();
        bytes[10] ^= 0x01;
        let hdr = PatchHeader::parse(&bytes);
        assert!(hdr.magic_valid());
        assert!(!hdr.header_crc_valid());
    }

    #[test]
    fn newer_version_is_rejected() {
        let hdr = PatchHeader {
            version: pack_version(b'1', b'3'),
            ..sample()
        };
        let parsed = PatchHeader::parse(&hdr.to_bytes());
        assert!(!parsed.version_valid());

        let older = PatchHeader {
            version: pack_version(b'1', b'0'),
            ..sample()
        };
        assert!(PatchHeader::parse(&older.to_bytes()).version_valid());
    }

    #[test]
    fn bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[3] = b'!';
        assert!(!PatchHeader::parse(&bytes).magic_valid());
    }

    #[test]
    fn unknown_flag_bits_are_kept() {
        let hdr = PatchHeader {
            flags: HeaderFlags::from_bits_retain(0x0101),
            ..sample()
        };
        let parsed = PatchHeader::parse(&hdr.to_bytes());
        assert_eq!(parsed.flags.bits(), 0x0101);
        assert!(parsed.header_crc_valid());
    }

    #[test]
    fn source_copy_consistency() {
        let mut hdr = sample();
        hdr.flags |= HeaderFlags::SRC_COPY;
        assert!(!hdr.source_copy_consistent());
        hdr.dst_length = hdr.src_length;
        hdr.dst_crc32 = hdr.src_crc32;
        assert!(hdr.source_copy_consistent());
    }

    #[test]
    fn short_input_is_eof() {
        let mut store: &[u8] = &[0u8; 39];
        let err = PatchHeader::read_from(&mut store).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut store: &[u8] = &[0u8; 12];
        let err = PatchHeader::read_from(&mut store).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn display_lists_flags() {
        let text = sample().to_string();
        assert!(text.contains("CBD version:                  1.2"));
        assert!(text.contains("HAS_SOURCE"));
    }
}
