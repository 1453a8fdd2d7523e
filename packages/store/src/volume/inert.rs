//! Fallback backend for targets without a transparent-compression story:
//! every probe answers "unsupported" and the manager stays inert.

use std::path::Path;

use super::VolumeSupport;

pub(super) fn probe(_root: &Path) -> VolumeSupport {
    VolumeSupport::Unsupported
}

pub(super) fn set_compression(_path: &Path, _compress: bool) -> bool {
    false
}

pub(super) fn allocated_size(_path: &Path) -> Option<u64> {
    None
}

pub(super) fn cluster_size(_root: &Path) -> Option<u64> {
    None
}
