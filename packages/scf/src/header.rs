use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use super::error::{Result, ScfError};
use super::hash::ContentHash;
use super::kind::{AssetKind, CompressionKind};

/// Magic tag at offset 0 of every container file.
pub const MAGIC: [u8; 4] = *b"SNOW";

/// First format version: no per-asset stat fields.
pub const VERSION_1: u8 = 1;

/// Current format version: adds `triangle_count` and `vram_usage`.
pub const VERSION_2: u8 = 2;

/// Version written by [`crate::encode`].
pub const CURRENT_VERSION: u8 = VERSION_2;

/// Sentinel for the v2 stat fields when the value is unknown or not
/// applicable to the asset kind.
pub const STAT_UNKNOWN: i64 = -1;

const HEADER_LEN_V1: u64 = 79;
const HEADER_LEN_V2: u64 = 95;

/// Header length in bytes for a given format version.
///
/// A pure function of the version byte, so the payload offset of any
/// container is known after reading the first five bytes.
pub fn header_len(version: u8) -> Result<u64> {
    match version {
        VERSION_1 => Ok(HEADER_LEN_V1),
        VERSION_2 => Ok(HEADER_LEN_V2),
        other => Err(ScfError::UnsupportedVersion(other)),
    }
}

/// Parsed container header.
///
/// `hash` is always the hash of the fully decompressed payload. Readers must
/// never trust it without re-verification during extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    pub version: u8,
    pub hash: ContentHash,
    pub compression: CompressionKind,
    pub kind: AssetKind,
    pub uncompressed_size: u32,
    pub compressed_size: u32,
    /// Triangle count of the asset, [`STAT_UNKNOWN`] if not applicable.
    /// Version 1 headers always read back as [`STAT_UNKNOWN`].
    pub triangle_count: i64,
    /// Estimated VRAM usage in bytes, [`STAT_UNKNOWN`] if not applicable.
    pub vram_usage: i64,
}

impl ContainerHeader {
    /// Serialized length of this header in bytes.
    pub fn len(&self) -> u64 {
        // Version is validated on construction and on read.
        header_len(self.version).unwrap_or(HEADER_LEN_V2)
    }

    /// Write the header at the writer's current position.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        header_len(self.version)?;

        w.write_all(&MAGIC)?;
        w.write_all(&[self.version])?;
        w.write_all(self.hash.to_hex().as_bytes())?;
        w.write_all(&[self.compression as u8, self.kind as u8])?;
        w.write_all(&self.uncompressed_size.to_le_bytes())?;
        w.write_all(&self.compressed_size.to_le_bytes())?;

        if self.version >= VERSION_2 {
            w.write_all(&self.triangle_count.to_le_bytes())?;
            w.write_all(&self.vram_usage.to_le_bytes())?;
        }

        Ok(())
    }

    /// Read and validate a header from the reader's current position.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(ScfError::BadMagic(magic));
        }

        let mut version = [0u8; 1];
        r.read_exact(&mut version)?;
        let version = version[0];
        header_len(version)?;

        let mut hash_hex = [0u8; 64];
        r.read_exact(&mut hash_hex)?;
        let hash_str = std::str::from_utf8(&hash_hex)
            .map_err(|_| ScfError::InvalidHash("hash field is not ASCII hex".into()))?;
        let hash = ContentHash::from_hex(hash_str)?;

        let mut bytes = [0u8; 2];
        r.read_exact(&mut bytes)?;
        let compression = CompressionKind::try_from(bytes[0])?;
        let kind = AssetKind::try_from(bytes[1])?;

        let mut u32_buf = [0u8; 4];
        r.read_exact(&mut u32_buf)?;
        let uncompressed_size = u32::from_le_bytes(u32_buf);
        r.read_exact(&mut u32_buf)?;
        let compressed_size = u32::from_le_bytes(u32_buf);

        let (triangle_count, vram_usage) = if version >= VERSION_2 {
            let mut i64_buf = [0u8; 8];
            r.read_exact(&mut i64_buf)?;
            let triangles = i64::from_le_bytes(i64_buf);
            r.read_exact(&mut i64_buf)?;
            let vram = i64::from_le_bytes(i64_buf);
            (triangles, vram)
        } else {
            (STAT_UNKNOWN, STAT_UNKNOWN)
        };

        Ok(Self {
            version,
            hash,
            compression,
            kind,
            uncompressed_size,
            compressed_size,
            triangle_count,
            vram_usage,
        })
    }
}
