use thiserror::Error;

/// Errors from container format operations.
#[derive(Debug, Error)]
pub enum ScfError {
    /// The file does not start with the `SNOW` magic tag.
    #[error("bad magic {0:02X?}, not a container file")]
    BadMagic([u8; 4]),

    /// The header declares a format version this build cannot read.
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u8),

    /// The header's asset-kind byte is not a known value.
    #[error("unknown asset kind byte {0:#04x}")]
    UnknownAssetKind(u8),

    /// The header's compression byte is not a known value.
    #[error("unknown compression byte {0:#04x}")]
    UnknownCompression(u8),

    /// The header's hash field is not valid hex.
    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    /// The extracted payload does not hash to the header's declared value.
    #[error("content hash mismatch (header {expected}, payload {actual})")]
    HashMismatch { expected: String, actual: String },

    /// A payload byte count does not fit the header's 32-bit size fields.
    #[error("payload of {bytes} bytes exceeds the 4 GiB container limit")]
    SizeOverflow { bytes: u64 },

    #[error("container IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ScfError>;
