//! USN journal scanner
//!
//! Enumerates the change journal of an NTFS volume, builds a file-reference
//! table as a side effect, and reports every record whose reason mask carries
//! FILE_DELETE with a full path reconstructed from that table.

use crate::ntfs::structs::{
    filetime_to_unix_ms, reason_to_string, usn_reason, UsnRecordV2, USN_RECORD_V2_MIN_LEN,
};
use std::collections::HashMap;
use std::fmt;

#[cfg(windows)]
use crate::error::Result;
#[cfg(windows)]
use crate::ntfs::winapi;
#[cfg(windows)]
use log::{debug, warn};

/// Ancestor walk limit during path reconstruction; guards against reference
/// cycles in a damaged table.
pub const MAX_PATH_DEPTH: usize = 1024;

// ============================================================================
// File Table
// ============================================================================

/// What the scan remembers about every file it saw in the journal, keyed by
/// the child's file reference number. Last write wins for duplicate FRNs.
#[derive(Debug, Clone)]
pub struct FileTableEntry {
    pub parent_ref: u64,
    pub name: String,
    pub is_directory: bool,
}

pub type FileTable = HashMap<u64, FileTableEntry>;

// ============================================================================
// Deleted Records
// ============================================================================

/// A journal record carrying FILE_DELETE, before path reconstruction.
#[derive(Debug, Clone)]
pub struct DeletedEntry {
    pub file_ref: u64,
    pub parent_ref: u64,
    pub name: String,
    pub is_directory: bool,
    /// Unix milliseconds, converted from the record's FILETIME
    pub timestamp_ms: i64,
    pub reason: u32,
}

impl DeletedEntry {
    /// Deletion time as a chrono UTC timestamp.
    pub fn deleted_at(&self) -> chrono::DateTime<chrono::Utc> {
        use chrono::TimeZone;
        chrono::Utc
            .timestamp_millis_opt(self.timestamp_ms)
            .single()
            .unwrap_or_default()
    }
}

impl fmt::Display for DeletedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (frn {}, parent {}, {})",
            self.name,
            self.file_ref,
            self.parent_ref,
            reason_to_string(self.reason)
        )
    }
}

/// A deleted file with its reconstructed path, ready for the caller.
#[derive(Debug, Clone)]
pub struct DeletedFile {
    pub name: String,
    pub path: String,
    pub file_ref: u64,
    pub parent_ref: u64,
    pub is_directory: bool,
    pub timestamp_ms: i64,
    pub reason: u32,
    pub drive: char,
}

// ============================================================================
// Batch Walking
// ============================================================================

/// Walk one FSCTL_ENUM_USN_DATA batch.
///
/// The batch starts with an 8-byte next-FRN header followed by back-to-back
/// USN_RECORD_V2 entries. Every record updates `table`; records carrying
/// FILE_DELETE are also appended to `deleted`. A record with a zero length,
/// a length past the batch end, or a body shorter than the V2 fixed part
/// truncates the batch silently; enumeration is expected to continue with
/// the returned FRN.
///
/// Returns the next-FRN header value, or `None` for a batch too small to
/// carry one.
pub fn parse_enum_batch(
    batch: &[u8],
    table: &mut FileTable,
    deleted: &mut Vec<DeletedEntry>,
) -> Option<u64> {
    if batch.len() < 8 {
        return None;
    }

    let next_frn = u64::from_le_bytes(batch[0..8].try_into().ok()?);
    let mut offset = 8usize;

    while batch.len() - offset >= USN_RECORD_V2_MIN_LEN {
        let record_length =
            u32::from_le_bytes(batch[offset..offset + 4].try_into().ok()?) as usize;
        if record_length == 0 || record_length > batch.len() - offset {
            break;
        }

        let Some(record) = UsnRecordV2::from_bytes(&batch[offset..offset + record_length]) else {
            break;
        };

        let is_directory = record.is_directory();
        table.insert(
            record.file_reference_number,
            FileTableEntry {
                parent_ref: record.parent_file_reference_number,
                name: record.file_name.clone(),
                is_directory,
            },
        );

        if record.reason & usn_reason::FILE_DELETE != 0 {
            deleted.push(DeletedEntry {
                file_ref: record.file_reference_number,
                parent_ref: record.parent_file_reference_number,
                name: record.file_name,
                is_directory,
                timestamp_ms: filetime_to_unix_ms(record.timestamp),
                reason: record.reason,
            });
        }

        offset += record_length;
    }

    Some(next_frn)
}

// ============================================================================
// Path Reconstruction
// ============================================================================

/// Rebuild `X:\ancestors...\name` by walking parent references through the
/// file table.
///
/// The walk ends at FRN 0, at a self-referential entry (the root directory),
/// at a missing ancestor, or at [`MAX_PATH_DEPTH`]. A missing ancestor is not
/// an error; the path is simply rooted at the drive from the highest resolved
/// segment. Empty ancestor names are skipped.
pub fn reconstruct_path(drive: char, name: &str, parent_ref: u64, table: &FileTable) -> String {
    let mut segments: Vec<&str> = vec![name];

    let mut current = parent_ref;
    let mut depth = 0;
    while current != 0 && depth < MAX_PATH_DEPTH {
        let Some(entry) = table.get(&current) else {
            break;
        };
        if !entry.name.is_empty() {
            segments.push(&entry.name);
        }
        if current == entry.parent_ref {
            break;
        }
        current = entry.parent_ref;
        depth += 1;
    }

    let mut path = format!("{}:\\", drive);
    for segment in segments.iter().rev() {
        if !path.ends_with('\\') {
            path.push('\\');
        }
        path.push_str(segment);
    }
    path
}

// ============================================================================
// Scan Operation
// ============================================================================

/// Scan the change journal of `drive` and return every deleted file the
/// journal still remembers, each with a reconstructed full path.
///
/// Opens its own volume handle, enumerates with a 1 MiB buffer until the
/// driver reports EOF, then runs the path post-pass over the completed file
/// table. The handle is released on every exit path.
#[cfg(windows)]
pub fn scan(drive: &str) -> Result<Vec<DeletedFile>> {
    let letter = crate::ntfs::normalize_drive(drive)?;
    let volume = winapi::open_volume(letter)?;

    let mut buffer = vec![0u8; winapi::IOCTL_BUFFER_SIZE];
    let mut table = FileTable::new();
    let mut deleted = Vec::new();
    let mut start_frn: u64 = 0;

    loop {
        let Some(bytes_returned) = winapi::enum_usn_data(&volume, start_frn, &mut buffer)? else {
            break;
        };

        let Some(next_frn) = parse_enum_batch(&buffer[..bytes_returned], &mut table, &mut deleted)
        else {
            break;
        };

        if next_frn == 0 || next_frn == start_frn {
            warn!("USN enumeration stalled at FRN {next_frn}, stopping");
            break;
        }
        start_frn = next_frn;
    }

    debug!(
        "scan {}: {} table entries, {} deletions",
        letter,
        table.len(),
        deleted.len()
    );

    Ok(deleted
        .into_iter()
        .map(|entry| {
            let path = reconstruct_path(letter, &entry.name, entry.parent_ref, &table);
            DeletedFile {
                name: entry.name,
                path,
                file_ref: entry.file_ref,
                parent_ref: entry.parent_ref,
                is_directory: entry.is_directory,
                timestamp_ms: entry.timestamp_ms,
                reason: entry.reason,
                drive: letter,
            }
        })
        .collect())
}
