use serde::{Deserialize, Serialize};

use super::error::ScfError;

/// Kind of game asset stored in a container, one byte on the wire.
///
/// The lower-case name doubles as the file extension of the extracted
/// artifact (`{HASH}.texture`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AssetKind {
    Model = 0,
    Texture = 1,
    Material = 2,
    Timeline = 3,
    Animation = 4,
    Effect = 5,
    Skeleton = 6,
    Audio = 7,
}

impl AssetKind {
    /// Lower-case name, used as the on-disk file extension.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Texture => "texture",
            Self::Material => "material",
            Self::Timeline => "timeline",
            Self::Animation => "animation",
            Self::Effect => "effect",
            Self::Skeleton => "skeleton",
            Self::Audio => "audio",
        }
    }
}

impl TryFrom<u8> for AssetKind {
    type Error = ScfError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Model),
            1 => Ok(Self::Texture),
            2 => Ok(Self::Material),
            3 => Ok(Self::Timeline),
            4 => Ok(Self::Animation),
            5 => Ok(Self::Effect),
            6 => Ok(Self::Skeleton),
            7 => Ok(Self::Audio),
            other => Err(ScfError::UnknownAssetKind(other)),
        }
    }
}

/// Payload compression algorithm, one byte on the wire.
///
/// Only zstd is defined today; the byte exists so a future algorithm does
/// not need a format migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionKind {
    Zstd = 0,
}

impl TryFrom<u8> for CompressionKind {
    type Error = ScfError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Zstd),
            other => Err(ScfError::UnknownCompression(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_kind_byte_round_trip() {
        for byte in 0u8..=7 {
            let kind = AssetKind::try_from(byte).unwrap();
            assert_eq!(kind as u8, byte);
        }
    }

    #[test]
    fn unknown_asset_kind_rejected() {
        assert!(matches!(
            AssetKind::try_from(200),
            Err(ScfError::UnknownAssetKind(200))
        ));
    }

    #[test]
    fn extension_is_lower_case() {
        assert_eq!(AssetKind::Texture.as_str(), "texture");
        assert_eq!(AssetKind::Skeleton.as_str(), "skeleton");
    }

    #[test]
    fn unknown_compression_rejected() {
        assert!(matches!(
            CompressionKind::try_from(9),
            Err(ScfError::UnknownCompression(9))
        ));
    }
}
