//! Local artifact store services around the container cache: the usage
//! ledger feeding the external eviction policy, the volume compression
//! manager keeping the cache directory dense on disk, and store
//! configuration.

mod config;
mod ledger;
mod volume;

pub use config::{CacheConfig, LedgerConfig, StoreConfig};
pub use ledger::{LedgerError, SCHEMA_VERSION, UsageLedger, UsageStat};
pub use volume::{VolumeCompression, VolumeSupport};
