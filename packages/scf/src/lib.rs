//! SNOW container format (SCF): the on-disk shape of every cached artifact.
//!
//! A container wraps exactly one artifact's zstd-compressed bytes behind a
//! small patchable header carrying the content hash of the decompressed
//! payload. The crate also provides the out-of-band metadata envelope codec
//! and the bounded reader used to guard extraction of size-declared
//! payloads.

mod bounded;
mod codec;
mod envelope;
mod error;
mod hash;
mod header;
mod kind;

pub use bounded::BoundedReader;
pub use codec::{
    DEFAULT_COMPRESSION_LEVEL, EncodeOptions, decode, encode, encode_to_path,
    encode_with_progress, read_header_from_path,
};
pub use envelope::{ENVELOPE_VERSION, Envelope, EnvelopeError, KEY_REPLACES};
pub use error::{Result, ScfError};
pub use hash::{ContentHash, ContentHasher};
pub use header::{
    CURRENT_VERSION, ContainerHeader, MAGIC, STAT_UNKNOWN, VERSION_1, VERSION_2, header_len,
};
pub use kind::{AssetKind, CompressionKind};
