//! Linux backend: btrfs transparent compression via the per-inode
//! `FS_COMPR_FL` flag. Directories pass the flag on to newly created files.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use tracing::debug;

use super::VolumeSupport;

const BTRFS_SUPER_MAGIC: u64 = 0x9123_683e;

// _IOR('f', 1, long) / _IOW('f', 2, long) on LP64 targets.
const FS_IOC_GETFLAGS: libc::c_ulong = 0x8008_6601;
const FS_IOC_SETFLAGS: libc::c_ulong = 0x4008_6602;
const FS_COMPR_FL: libc::c_long = 0x0000_0004;

fn cstring(path: &Path) -> Option<CString> {
    CString::new(path.as_os_str().as_bytes()).ok()
}

pub(super) fn probe(root: &Path) -> VolumeSupport {
    let Some(c_path) = cstring(root) else {
        return VolumeSupport::Unknown;
    };

    let mut sfs: libc::statfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statfs(c_path.as_ptr(), &mut sfs) } != 0 {
        debug!(root = %root.display(), "statfs failed");
        return VolumeSupport::Unknown;
    }

    if sfs.f_type as u64 == BTRFS_SUPER_MAGIC {
        VolumeSupport::Supported
    } else {
        VolumeSupport::Unsupported
    }
}

pub(super) fn set_compression(path: &Path, compress: bool) -> bool {
    let Some(c_path) = cstring(path) else {
        return false;
    };

    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return false;
    }

    let mut flags: libc::c_long = 0;
    let ok = unsafe {
        if libc::ioctl(fd, FS_IOC_GETFLAGS, &mut flags) == 0 {
            if compress {
                flags |= FS_COMPR_FL;
            } else {
                flags &= !FS_COMPR_FL;
            }
            libc::ioctl(fd, FS_IOC_SETFLAGS, &flags) == 0
        } else {
            false
        }
    };

    unsafe { libc::close(fd) };
    ok
}

pub(super) fn allocated_size(path: &Path) -> Option<u64> {
    let c_path = cstring(path)?;

    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::stat(c_path.as_ptr(), &mut st) } != 0 {
        return None;
    }

    // st_blocks counts 512-byte units regardless of the filesystem block size.
    Some(st.st_blocks.max(0) as u64 * 512)
}

pub(super) fn cluster_size(root: &Path) -> Option<u64> {
    let c_path = cstring(root)?;

    let mut sfs: libc::statfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statfs(c_path.as_ptr(), &mut sfs) } != 0 {
        return None;
    }

    let bsize = sfs.f_bsize;
    (bsize > 0).then(|| bsize as u64)
}
