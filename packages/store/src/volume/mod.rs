//! Filesystem-level compression of the cache directory.
//!
//! Orthogonal to the containers' own payload compression: it recovers the
//! incompressible residue (headers, already-compressed blobs) on volumes
//! whose block-level compression can still help. Strictly best-effort: on
//! unsupported filesystems, foreign OS environments, or any OS call failure
//! the manager goes inert and every operation falls back to logical sizes.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

#[cfg(target_os = "linux")]
#[path = "linux.rs"]
mod sys;
#[cfg(windows)]
#[path = "windows.rs"]
mod sys;
#[cfg(not(any(target_os = "linux", windows)))]
#[path = "inert.rs"]
mod sys;

/// Result of probing a volume for transparent-compression support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeSupport {
    Supported,
    Unsupported,
    /// The probe itself failed; treated like unsupported at call sites.
    Unknown,
}

/// Manages transparent compression for one cache directory root.
///
/// Probe results and the cluster size are cached per root; moving the cache
/// directory to another volume means constructing a new manager.
pub struct VolumeCompression {
    root: PathBuf,
    ensured: AtomicBool,
    support: OnceLock<VolumeSupport>,
    cluster_size: OnceLock<u64>,
}

impl VolumeCompression {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ensured: AtomicBool::new(false),
            support: OnceLock::new(),
            cluster_size: OnceLock::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Cached capability of the root's volume.
    pub fn support(&self) -> VolumeSupport {
        *self.support.get_or_init(|| {
            let support = sys::probe(&self.root);
            debug!(root = %self.root.display(), ?support, "volume compression probe");
            support
        })
    }

    /// Turn on directory-level compression once per process lifetime.
    ///
    /// Subsequent calls are no-ops; use [`adjust_compression_state`] to
    /// force a change.
    ///
    /// [`adjust_compression_state`]: Self::adjust_compression_state
    pub fn ensure_directory_compression(&self) {
        if self.ensured.swap(true, Ordering::SeqCst) {
            debug!("directory compression already ensured this process");
            return;
        }
        self.apply(true, self.support());
    }

    /// Explicitly enable or disable directory compression.
    ///
    /// Support is re-probed on every call rather than read from the cache: a
    /// cache directory that moved between volumes may have changed its
    /// answer.
    pub fn adjust_compression_state(&self, compress: bool) {
        let support = sys::probe(&self.root);
        self.apply(compress, support);
    }

    fn apply(&self, compress: bool, support: VolumeSupport) {
        if support != VolumeSupport::Supported {
            debug!(
                root = %self.root.display(),
                ?support,
                "volume does not support transparent compression, skipping"
            );
            return;
        }

        if sys::set_compression(&self.root, compress) {
            debug!(root = %self.root.display(), compress, "directory compression updated");
        } else {
            warn!(
                root = %self.root.display(),
                "updating directory compression failed, treating volume as unsupported"
            );
        }
    }

    fn cluster_size(&self) -> u64 {
        *self
            .cluster_size
            .get_or_init(|| sys::cluster_size(&self.root).unwrap_or(0))
    }

    /// Actual allocated size of `path` in bytes, rounded up to the volume's
    /// cluster size.
    ///
    /// Falls back to the logical file length on unsupported volumes,
    /// non-block-cluster filesystems, or any OS call failure; a missing file
    /// reports zero.
    pub fn on_disk_size(&self, path: &Path) -> u64 {
        let logical = fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        if self.support() != VolumeSupport::Supported {
            return logical;
        }
        let cluster = self.cluster_size();
        if cluster == 0 {
            return logical;
        }

        match sys::allocated_size(path) {
            Some(allocated) => allocated.div_ceil(cluster) * cluster,
            None => logical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_never_errors() {
        let dir = tempfile::tempdir().unwrap();
        let volume = VolumeCompression::new(dir.path());
        // Whatever the answer, asking twice is cheap and consistent.
        assert_eq!(volume.support(), volume.support());
    }

    #[test]
    fn ensure_is_idempotent_and_inert_on_any_volume() {
        let dir = tempfile::tempdir().unwrap();
        let volume = VolumeCompression::new(dir.path());
        volume.ensure_directory_compression();
        volume.ensure_directory_compression();
        volume.adjust_compression_state(false);
        volume.adjust_compression_state(true);
    }

    #[test]
    fn missing_file_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        let volume = VolumeCompression::new(dir.path());
        assert_eq!(volume.on_disk_size(&dir.path().join("absent.bin")), 0);
    }

    #[test]
    fn on_disk_size_falls_back_to_logical_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        fs::write(&path, vec![0xA5u8; 1234]).unwrap();

        let volume = VolumeCompression::new(dir.path());
        let size = volume.on_disk_size(&path);
        if volume.support() == VolumeSupport::Supported {
            // Allocation-dependent, but never absurd.
            assert!(size <= 1024 * 1024);
        } else {
            assert_eq!(size, 1234);
        }
    }
}
