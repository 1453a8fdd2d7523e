//! Windows backend: NTFS transparent compression via
//! `FSCTL_SET_COMPRESSION`. Compressing a directory makes new files inherit
//! the attribute. Windows-compatibility layers (Wine) advertise the volume
//! flag without honoring it, so they are treated as unsupported.

use std::ffi::{OsStr, c_void};
use std::os::windows::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};
use std::ptr::{null, null_mut};

use tracing::debug;

use windows_sys::Win32::Foundation::{
    CloseHandle, GENERIC_READ, GENERIC_WRITE, GetLastError, INVALID_HANDLE_VALUE, NO_ERROR,
};
use windows_sys::Win32::Storage::FileSystem::{
    COMPRESSION_FORMAT_DEFAULT, COMPRESSION_FORMAT_NONE, CreateFileW, FILE_FILE_COMPRESSION,
    FILE_FLAG_BACKUP_SEMANTICS, FILE_SHARE_READ, FILE_SHARE_WRITE, GetCompressedFileSizeW,
    GetDiskFreeSpaceW, GetVolumeInformationW, INVALID_FILE_SIZE, OPEN_EXISTING,
};
use windows_sys::Win32::System::IO::DeviceIoControl;
use windows_sys::Win32::System::Ioctl::FSCTL_SET_COMPRESSION;
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleA, GetProcAddress};

use super::VolumeSupport;

fn wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

/// Volume root (`C:\`) for a path, as GetVolumeInformationW requires.
fn volume_root(path: &Path) -> PathBuf {
    match path.components().next() {
        Some(Component::Prefix(prefix)) => {
            let mut root = PathBuf::from(prefix.as_os_str());
            root.push("\\");
            root
        }
        _ => PathBuf::from("\\"),
    }
}

fn running_under_wine() -> bool {
    unsafe {
        let ntdll = GetModuleHandleA(c"ntdll.dll".as_ptr() as *const u8);
        if ntdll.is_null() {
            return false;
        }
        GetProcAddress(ntdll, c"wine_get_version".as_ptr() as *const u8).is_some()
    }
}

pub(super) fn probe(root: &Path) -> VolumeSupport {
    if running_under_wine() {
        debug!("running under a Windows compatibility layer, compression disabled");
        return VolumeSupport::Unsupported;
    }

    let wide_root = wide(volume_root(root).as_os_str());
    let mut serial = 0u32;
    let mut max_component = 0u32;
    let mut flags = 0u32;

    let ok = unsafe {
        GetVolumeInformationW(
            wide_root.as_ptr(),
            null_mut(),
            0,
            &mut serial,
            &mut max_component,
            &mut flags,
            null_mut(),
            0,
        )
    };
    if ok == 0 {
        debug!(root = %root.display(), "GetVolumeInformationW failed");
        return VolumeSupport::Unknown;
    }

    if flags & FILE_FILE_COMPRESSION != 0 {
        VolumeSupport::Supported
    } else {
        VolumeSupport::Unsupported
    }
}

pub(super) fn set_compression(path: &Path, compress: bool) -> bool {
    let wide_path = wide(path.as_os_str());

    let handle = unsafe {
        CreateFileW(
            wide_path.as_ptr(),
            GENERIC_READ | GENERIC_WRITE,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            null(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS,
            null_mut(),
        )
    };
    if handle == INVALID_HANDLE_VALUE {
        return false;
    }

    let state: u16 = if compress {
        COMPRESSION_FORMAT_DEFAULT
    } else {
        COMPRESSION_FORMAT_NONE
    };
    let mut returned = 0u32;

    let ok = unsafe {
        DeviceIoControl(
            handle,
            FSCTL_SET_COMPRESSION,
            &state as *const u16 as *const c_void,
            std::mem::size_of::<u16>() as u32,
            null_mut(),
            0,
            &mut returned,
            null_mut(),
        ) != 0
    };

    unsafe { CloseHandle(handle) };
    ok
}

pub(super) fn allocated_size(path: &Path) -> Option<u64> {
    let wide_path = wide(path.as_os_str());
    let mut high = 0u32;

    let low = unsafe { GetCompressedFileSizeW(wide_path.as_ptr(), &mut high) };
    if low == INVALID_FILE_SIZE && unsafe { GetLastError() } != NO_ERROR {
        return None;
    }

    Some(((high as u64) << 32) | low as u64)
}

pub(super) fn cluster_size(root: &Path) -> Option<u64> {
    let wide_root = wide(volume_root(root).as_os_str());
    let mut sectors_per_cluster = 0u32;
    let mut bytes_per_sector = 0u32;
    let mut free_clusters = 0u32;
    let mut total_clusters = 0u32;

    let ok = unsafe {
        GetDiskFreeSpaceW(
            wide_root.as_ptr(),
            &mut sectors_per_cluster,
            &mut bytes_per_sector,
            &mut free_clusters,
            &mut total_clusters,
        )
    };
    if ok == 0 {
        return None;
    }

    let cluster = sectors_per_cluster as u64 * bytes_per_sector as u64;
    (cluster > 0).then_some(cluster)
}
