//! Snapshot binary format definitions
//!
//! ```text
//! header    magic "DCOR" | version u32 | flags u32 | endianness u32
//! kind      u8 (1 = value, 2 = coroutine)
//! objects   count u32, then one encoded value per heap object
//! body      encoded value | coroutine record
//! checksum  SHA-256 of everything between header and checksum
//! ```
//!
//! All integers are little-endian.

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Magic number: the bytes "DCOR"
pub const SNAPSHOT_MAGIC: u32 = u32::from_le_bytes(*b"DCOR");

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Endianness marker written in the header
pub const ENDIANNESS_MARKER: u32 = 0x0102_0304;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Checksum size in bytes
pub const CHECKSUM_SIZE: usize = 32;

/// Default bound on how deeply values may nest inside one another
pub const DEFAULT_MAX_DEPTH: usize = 512;

/// Snapshot header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Reserved, always zero
    pub flags: u32,
    pub endianness: u32,
}

impl SnapshotHeader {
    pub fn new() -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: SNAPSHOT_VERSION,
            flags: 0,
            endianness: ENDIANNESS_MARKER,
        }
    }

    /// Validate snapshot header
    ///
    /// Runs before anything else is decoded, so a stream from another format
    /// version is rejected without touching its body.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }

        if self.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: self.version,
            });
        }

        if self.endianness != ENDIANNESS_MARKER {
            return Err(SnapshotError::Corrupted {
                offset: 12,
                reason: format!("unexpected endianness marker {:#010x}", self.endianness),
            });
        }

        Ok(())
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.endianness.to_le_bytes());
    }

    pub fn decode(reader: &mut ByteReader<'_>) -> Result<Self, SnapshotError> {
        Ok(Self {
            magic: reader.read_u32()?,
            version: reader.read_u32()?,
            flags: reader.read_u32()?,
            endianness: reader.read_u32()?,
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// What the body of a stream holds
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BodyKind {
    Value = 1,
    Coroutine = 2,
}

impl BodyKind {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(BodyKind::Value),
            2 => Some(BodyKind::Coroutine),
            _ => None,
        }
    }
}

/// Tag byte of an encoded value
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ValueTag {
    Nil = 0,
    False = 1,
    True = 2,
    Int = 3,
    Float = 4,
    Str = 5,
    List = 6,
    Map = 7,
    Struct = 8,
    Ref = 9,
    Func = 10,
    Dyn = 11,
}

impl ValueTag {
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => ValueTag::Nil,
            1 => ValueTag::False,
            2 => ValueTag::True,
            3 => ValueTag::Int,
            4 => ValueTag::Float,
            5 => ValueTag::Str,
            6 => ValueTag::List,
            7 => ValueTag::Map,
            8 => ValueTag::Struct,
            9 => ValueTag::Ref,
            10 => ValueTag::Func,
            11 => ValueTag::Dyn,
            _ => return None,
        })
    }
}

/// Checksum for snapshot integrity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotChecksum {
    hash: [u8; CHECKSUM_SIZE],
}

impl SnapshotChecksum {
    /// Compute SHA-256 checksum of data
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let mut hash = [0u8; CHECKSUM_SIZE];
        hash.copy_from_slice(&hasher.finalize());
        Self { hash }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let hash: [u8; CHECKSUM_SIZE] = bytes.try_into().ok()?;
        Some(Self { hash })
    }

    /// Verify that checksum matches the given data
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.hash
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

/// Snapshot error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("Invalid snapshot magic number")]
    InvalidMagic,

    #[error("Snapshot format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Snapshot checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("Unexpected end of snapshot at offset {offset}")]
    UnexpectedEof { offset: usize },

    #[error("Unregistered function identifier '{key}' at offset {offset}")]
    UnregisteredIdentifier { key: String, offset: usize },

    #[error("Unknown dynamic type '{type_id}' at offset {offset}")]
    UnknownDynamicType { type_id: String, offset: usize },

    #[error("Corrupted snapshot at offset {offset}: {reason}")]
    Corrupted { offset: usize, reason: String },

    #[error("Cannot encode value: {0}")]
    Unencodable(String),
}

/// Cursor over an encoded stream that reports offsets in errors
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// A reader over `data` whose offsets start at `base`
    pub fn at(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: base }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(SnapshotError::UnexpectedEof { offset: self.pos })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, SnapshotError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64, SnapshotError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_str(&mut self) -> Result<String, SnapshotError> {
        let start = self.pos;
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SnapshotError::Corrupted {
            offset: start,
            reason: "string is not valid UTF-8".into(),
        })
    }

    /// Read a length prefix, rejecting counts that cannot fit in the remaining input
    pub fn read_len(&mut self, min_item_size: usize) -> Result<usize, SnapshotError> {
        let start = self.pos;
        let len = self.read_u32()? as usize;
        let remaining = self.data.len().saturating_sub(self.pos);
        if len.saturating_mul(min_item_size.max(1)) > remaining {
            return Err(SnapshotError::UnexpectedEof { offset: start });
        }
        Ok(len)
    }
}

/// Little-endian output helpers
pub trait ByteWriter {
    fn put_u8(&mut self, v: u8);
    fn put_u32(&mut self, v: u32);
    fn put_u64(&mut self, v: u64);
    fn put_str(&mut self, s: &str);
}

impl ByteWriter for Vec<u8> {
    fn put_u8(&mut self, v: u8) {
        self.push(v);
    }

    fn put_u32(&mut self, v: u32) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.extend_from_slice(&v.to_le_bytes());
    }

    fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.extend_from_slice(s.as_bytes());
    }
}
