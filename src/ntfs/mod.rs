//! NTFS on-disk structure engine
//!
//! - USN change journal scanning and deleted-file discovery
//! - MFT file-record parsing (attribute walk, run-list decoding)
//! - Raw-cluster recovery of file content from a run map
//! - Safe Win32 wrappers for the volume I/O underneath

pub mod mft;
pub mod recovery;
pub mod structs;
pub mod usn;
#[cfg(windows)]
pub mod winapi;

pub use mft::{parse_file_record, AttributeInfo, FileRecordDetails};
pub use recovery::{check_recovery_args, copy_runs};
pub use structs::{
    attribute_type_name, filetime_to_datetime, filetime_to_unix_ms, reason_to_string,
    ClusterGeometry, DataRun, UsnRecordV2,
};
pub use usn::{parse_enum_batch, reconstruct_path, DeletedEntry, DeletedFile, FileTableEntry};

use crate::error::{Result, UndeleteError};

/// Normalize a drive identifier to an uppercase letter.
///
/// Takes the first character of the argument; an empty identifier is an
/// `InvalidArgument`.
pub fn normalize_drive(drive: &str) -> Result<char> {
    let letter = drive
        .trim()
        .chars()
        .next()
        .ok_or_else(|| UndeleteError::InvalidArgument("drive letter is required".to_string()))?;
    Ok(letter.to_ascii_uppercase())
}
