//! Windows API bindings for NTFS volume access
//!
//! Safe wrappers around the Win32 calls the three operations need: raw
//! volume handles, cluster geometry, the USN enumeration and file-record
//! IOCTLs, and seek/read on the volume handle.

use crate::error::{Result, UndeleteError};
use crate::ntfs::structs::ClusterGeometry;
use std::ffi::OsStr;
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, GetDiskFreeSpaceW, ReadFile, SetFilePointerEx, FILE_BEGIN, FILE_CURRENT,
    FILE_END, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_MODE, OPEN_EXISTING,
    SET_FILE_POINTER_MOVE_METHOD,
};
use windows::Win32::System::IO::DeviceIoControl;

// ============================================================================
// IOCTL Control Codes and Flags (winioctl.h)
// ============================================================================

pub const FSCTL_GET_NTFS_FILE_RECORD: u32 = 0x0009_0068;
pub const FSCTL_ENUM_USN_DATA: u32 = 0x0009_00B3;

pub const GENERIC_READ: u32 = 0x8000_0000;
pub const FILE_SHARE_READ: u32 = 0x0000_0001;
pub const FILE_SHARE_WRITE: u32 = 0x0000_0002;
pub const FILE_SHARE_DELETE: u32 = 0x0000_0004;
pub const FILE_FLAG_BACKUP_SEMANTICS: u32 = 0x0200_0000;

pub const ERROR_HANDLE_EOF: u32 = 38;

pub const INVALID_HANDLE_VALUE: isize = -1;

/// Output buffer size for the enumeration and file-record IOCTLs
pub const IOCTL_BUFFER_SIZE: usize = 1024 * 1024;

// ============================================================================
// Safe Handle Wrapper
// ============================================================================

/// RAII wrapper for a Windows HANDLE; closed on drop on every exit path.
pub struct SafeHandle {
    handle: isize,
}

impl SafeHandle {
    pub fn new(handle: isize) -> Option<Self> {
        if handle == INVALID_HANDLE_VALUE || handle == 0 {
            None
        } else {
            Some(Self { handle })
        }
    }

    pub fn as_raw(&self) -> HANDLE {
        HANDLE(self.handle as *mut std::ffi::c_void)
    }
}

impl Drop for SafeHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.as_raw());
        }
    }
}

fn to_wide(text: &str) -> Vec<u16> {
    OsStr::new(text)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

// ============================================================================
// Volume Operations
// ============================================================================

/// Open a raw read-only handle to `\\.\X:` with backup semantics.
pub fn open_volume(drive_letter: char) -> Result<SafeHandle> {
    let path = format!(r"\\.\{}:", drive_letter);
    let wide_path = to_wide(&path);

    let handle = unsafe {
        CreateFileW(
            PCWSTR::from_raw(wide_path.as_ptr()),
            GENERIC_READ,
            FILE_SHARE_MODE(FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE),
            None,
            OPEN_EXISTING,
            FILE_FLAGS_AND_ATTRIBUTES(FILE_FLAG_BACKUP_SEMANTICS),
            HANDLE::default(),
        )
    };

    match handle {
        Ok(h) => SafeHandle::new(h.0 as isize)
            .ok_or_else(|| UndeleteError::VolumeOpen(path.clone(), io::Error::last_os_error())),
        Err(e) => Err(UndeleteError::VolumeOpen(
            path,
            io::Error::from_raw_os_error(e.code().0 & 0xFFFF),
        )),
    }
}

/// Query bytes/sector and sectors/cluster for a drive root.
pub fn query_cluster_geometry(drive_letter: char) -> Result<ClusterGeometry> {
    let root = format!(r"{}:\", drive_letter);
    let wide_root = to_wide(&root);

    let mut sectors_per_cluster: u32 = 0;
    let mut bytes_per_sector: u32 = 0;
    let mut free_clusters: u32 = 0;
    let mut total_clusters: u32 = 0;

    let result = unsafe {
        GetDiskFreeSpaceW(
            PCWSTR::from_raw(wide_root.as_ptr()),
            Some(&mut sectors_per_cluster),
            Some(&mut bytes_per_sector),
            Some(&mut free_clusters),
            Some(&mut total_clusters),
        )
    };

    if result.is_err() {
        return Err(UndeleteError::Io {
            step: "GetDiskFreeSpaceW",
            source: io::Error::last_os_error(),
        });
    }

    Ok(ClusterGeometry::new(bytes_per_sector, sectors_per_cluster))
}

// ============================================================================
// IOCTL Operations
// ============================================================================

/// Send a DeviceIoControl request, returning the bytes written to `out_buffer`.
fn device_io_control(
    handle: &SafeHandle,
    control_code: u32,
    in_buffer: Option<&[u8]>,
    out_buffer: &mut [u8],
) -> io::Result<u32> {
    let mut bytes_returned: u32 = 0;

    let (in_ptr, in_size) = match in_buffer {
        Some(buf) => (buf.as_ptr() as *const std::ffi::c_void, buf.len() as u32),
        None => (ptr::null(), 0),
    };

    let result = unsafe {
        DeviceIoControl(
            handle.as_raw(),
            control_code,
            Some(in_ptr),
            in_size,
            Some(out_buffer.as_mut_ptr() as *mut std::ffi::c_void),
            out_buffer.len() as u32,
            Some(&mut bytes_returned),
            None,
        )
    };

    match result {
        Ok(()) => Ok(bytes_returned),
        Err(_) => Err(io::Error::last_os_error()),
    }
}

/// Input structure for FSCTL_ENUM_USN_DATA
#[repr(C)]
struct MftEnumData {
    start_file_reference_number: u64,
    low_usn: i64,
    high_usn: i64,
}

/// Issue one FSCTL_ENUM_USN_DATA call.
///
/// Returns `Ok(Some(bytes_returned))` with the batch in `buffer` (8-byte
/// next-FRN header followed by packed USN_RECORD_V2 entries), or `Ok(None)`
/// when the enumeration reports ERROR_HANDLE_EOF, its normal completion.
pub fn enum_usn_data(
    handle: &SafeHandle,
    start_frn: u64,
    buffer: &mut [u8],
) -> Result<Option<usize>> {
    let input = MftEnumData {
        start_file_reference_number: start_frn,
        low_usn: 0,
        high_usn: i64::MAX,
    };

    let input_bytes = unsafe {
        std::slice::from_raw_parts(
            &input as *const MftEnumData as *const u8,
            std::mem::size_of::<MftEnumData>(),
        )
    };

    match device_io_control(handle, FSCTL_ENUM_USN_DATA, Some(input_bytes), buffer) {
        Ok(bytes_returned) => Ok(Some(bytes_returned as usize)),
        Err(e) => {
            if e.raw_os_error() == Some(ERROR_HANDLE_EOF as i32) {
                return Ok(None);
            }
            Err(UndeleteError::Enumeration(format!(
                "FSCTL_ENUM_USN_DATA failed with error {}",
                e.raw_os_error().unwrap_or(0)
            )))
        }
    }
}

/// Fetch one MFT file record via FSCTL_GET_NTFS_FILE_RECORD.
///
/// The driver wraps the record in `{ returned FRN: u64, record length: u32,
/// record bytes }`; both the returned FRN (which may differ from the request
/// when the record is not in use) and the unwrapped record buffer are
/// returned. Record buffers from this control already have the update
/// sequence array applied.
pub fn get_ntfs_file_record(handle: &SafeHandle, file_ref: u64) -> Result<(u64, Vec<u8>)> {
    let input = file_ref.to_le_bytes();
    let mut buffer = vec![0u8; IOCTL_BUFFER_SIZE];

    let bytes_returned =
        device_io_control(handle, FSCTL_GET_NTFS_FILE_RECORD, Some(&input), &mut buffer).map_err(
            |e| {
                UndeleteError::RecordFetch(format!(
                    "FSCTL_GET_NTFS_FILE_RECORD failed with error {}",
                    e.raw_os_error().unwrap_or(0)
                ))
            },
        )? as usize;

    if bytes_returned < 12 {
        return Err(UndeleteError::Parse(
            "file record response too small".to_string(),
        ));
    }

    let returned_ref = u64::from_le_bytes(buffer[0..8].try_into().unwrap());
    let record_length = u32::from_le_bytes(buffer[8..12].try_into().unwrap()) as usize;

    if record_length == 0 || 12 + record_length > bytes_returned {
        return Err(UndeleteError::Parse(format!(
            "file record length {} exceeds response of {} bytes",
            record_length, bytes_returned
        )));
    }

    buffer.truncate(12 + record_length);
    buffer.drain(..12);
    Ok((returned_ref, buffer))
}

// ============================================================================
// Volume Reader
// ============================================================================

/// `Read + Seek` over a raw volume handle, so the recovery copier can treat
/// a live volume like any other byte source.
pub struct VolumeReader {
    handle: SafeHandle,
}

impl VolumeReader {
    pub fn new(handle: SafeHandle) -> Self {
        Self { handle }
    }
}

impl io::Read for VolumeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut bytes_read: u32 = 0;
        let result = unsafe {
            ReadFile(
                self.handle.as_raw(),
                Some(buf),
                Some(&mut bytes_read),
                None,
            )
        };
        match result {
            Ok(()) => Ok(bytes_read as usize),
            Err(_) => Err(io::Error::last_os_error()),
        }
    }
}

impl io::Seek for VolumeReader {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, method): (i64, SET_FILE_POINTER_MOVE_METHOD) = match pos {
            io::SeekFrom::Start(offset) => (offset as i64, FILE_BEGIN),
            io::SeekFrom::Current(offset) => (offset, FILE_CURRENT),
            io::SeekFrom::End(offset) => (offset, FILE_END),
        };

        let mut new_pos: i64 = 0;
        let result =
            unsafe { SetFilePointerEx(self.handle.as_raw(), offset, Some(&mut new_pos), method) };
        match result {
            Ok(()) => Ok(new_pos as u64),
            Err(_) => Err(io::Error::last_os_error()),
        }
    }
}
