//! NTFS on-disk structures and shared decoders
//!
//! Bounded-slice readers for MFT file records, attribute records, run lists,
//! USN_RECORD_V2 entries and FILETIME values. Nothing here touches the OS;
//! every reader takes a byte slice and refuses to look past its end.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

// ============================================================================
// NTFS Constants
// ============================================================================

/// MFT record signature "FILE" in little-endian
pub const MFT_RECORD_SIGNATURE: u32 = 0x454C4946;

/// End of attributes marker
pub const ATTRIBUTE_END_MARKER: u32 = 0xFFFFFFFF;

/// Common attribute header size (both resident and non-resident forms)
pub const ATTRIBUTE_HEADER_LEN: usize = 16;

/// Minimum size of a USN_RECORD_V2 (fixed part, before the file name)
pub const USN_RECORD_V2_MIN_LEN: usize = 60;

// MFT record flags
pub const MFT_RECORD_IN_USE: u16 = 0x0001;
pub const MFT_RECORD_IS_DIRECTORY: u16 = 0x0002;

/// Directory bit in the FileAttributes field of a USN record
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;

/// Index part of a file reference number (low 48 bits; the high 16 are the
/// record's sequence number)
pub const FRN_INDEX_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

// ============================================================================
// Attribute Types
// ============================================================================

/// Map an attribute type code to its NTFS name.
pub fn attribute_type_name(type_code: u32) -> &'static str {
    match type_code {
        0x10 => "StandardInformation",
        0x20 => "AttributeList",
        0x30 => "FileName",
        0x40 => "ObjectId",
        0x50 => "SecurityDescriptor",
        0x60 => "VolumeName",
        0x70 => "VolumeInformation",
        0x80 => "Data",
        0x90 => "IndexRoot",
        0xA0 => "IndexAllocation",
        0xB0 => "Bitmap",
        0xC0 => "ReparsePoint",
        0xD0 => "EAInformation",
        0xE0 => "EA",
        0xF0 => "PropertySet",
        0x100 => "LoggedUtilityStream",
        _ => "Unknown",
    }
}

// ============================================================================
// Cluster Geometry
// ============================================================================

/// Cluster geometry of a volume, queried once per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
}

impl ClusterGeometry {
    pub fn new(bytes_per_sector: u32, sectors_per_cluster: u32) -> Self {
        Self {
            bytes_per_sector,
            sectors_per_cluster,
        }
    }

    /// Bytes per cluster
    pub fn cluster_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_cluster as u64
    }
}

// ============================================================================
// MFT File Record Header
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FileRecordHeader {
    pub signature: u32,
    pub update_sequence_offset: u16,
    pub update_sequence_size: u16,
    pub log_sequence_number: u64,
    pub sequence_number: u16,
    pub hard_link_count: u16,
    pub first_attribute_offset: u16,
    pub flags: u16,
    pub bytes_in_use: u32,
    pub bytes_allocated: u32,
    pub base_file_record: u64,
    pub next_attribute_id: u16,
    pub mft_record_number: u32,
}

impl FileRecordHeader {
    /// Fixed header size on disk
    pub const LEN: usize = 48;

    /// Parse the file record header from raw bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }

        let mut cursor = Cursor::new(data);

        let signature = cursor.read_u32::<LittleEndian>().ok()?;
        let update_sequence_offset = cursor.read_u16::<LittleEndian>().ok()?;
        let update_sequence_size = cursor.read_u16::<LittleEndian>().ok()?;
        let log_sequence_number = cursor.read_u64::<LittleEndian>().ok()?;
        let sequence_number = cursor.read_u16::<LittleEndian>().ok()?;
        let hard_link_count = cursor.read_u16::<LittleEndian>().ok()?;
        let first_attribute_offset = cursor.read_u16::<LittleEndian>().ok()?;
        let flags = cursor.read_u16::<LittleEndian>().ok()?;
        let bytes_in_use = cursor.read_u32::<LittleEndian>().ok()?;
        let bytes_allocated = cursor.read_u32::<LittleEndian>().ok()?;
        let base_file_record = cursor.read_u64::<LittleEndian>().ok()?;
        let next_attribute_id = cursor.read_u16::<LittleEndian>().ok()?;
        let _padding = cursor.read_u16::<LittleEndian>().ok()?;
        let mft_record_number = cursor.read_u32::<LittleEndian>().ok()?;

        Some(Self {
            signature,
            update_sequence_offset,
            update_sequence_size,
            log_sequence_number,
            sequence_number,
            hard_link_count,
            first_attribute_offset,
            flags,
            bytes_in_use,
            bytes_allocated,
            base_file_record,
            next_attribute_id,
            mft_record_number,
        })
    }

    /// Check the "FILE" signature
    pub fn is_valid(&self) -> bool {
        self.signature == MFT_RECORD_SIGNATURE
    }

    pub fn is_in_use(&self) -> bool {
        (self.flags & MFT_RECORD_IN_USE) != 0
    }

    pub fn is_directory(&self) -> bool {
        (self.flags & MFT_RECORD_IS_DIRECTORY) != 0
    }
}

// ============================================================================
// Attribute Headers
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AttributeHeader {
    pub type_code: u32,
    pub length: u32,
    pub non_resident: bool,
    pub name_length: u8,
    pub name_offset: u16,
    pub flags: u16,
    pub instance: u16,
}

impl AttributeHeader {
    /// Parse the common attribute header from raw bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < ATTRIBUTE_HEADER_LEN {
            return None;
        }

        let mut cursor = Cursor::new(data);

        Some(Self {
            type_code: cursor.read_u32::<LittleEndian>().ok()?,
            length: cursor.read_u32::<LittleEndian>().ok()?,
            non_resident: cursor.read_u8().ok()? != 0,
            name_length: cursor.read_u8().ok()?,
            name_offset: cursor.read_u16::<LittleEndian>().ok()?,
            flags: cursor.read_u16::<LittleEndian>().ok()?,
            instance: cursor.read_u16::<LittleEndian>().ok()?,
        })
    }

    /// Decode the attribute's stream name (UTF-16LE at `name_offset`,
    /// `name_length` code units), bounded by the attribute's own length.
    pub fn name(&self, attr_data: &[u8]) -> Option<String> {
        if self.name_length == 0 {
            return None;
        }
        let start = self.name_offset as usize;
        let bytes = self.name_length as usize * 2;
        let end = start.checked_add(bytes)?;
        if end > attr_data.len() {
            return None;
        }
        Some(decode_utf16le(&attr_data[start..end]))
    }
}

#[derive(Debug, Clone)]
pub struct ResidentAttributeHeader {
    pub base: AttributeHeader,
    pub value_length: u32,
    pub value_offset: u16,
    pub indexed_flag: u8,
}

impl ResidentAttributeHeader {
    /// Parse a resident attribute header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let base = AttributeHeader::from_bytes(data)?;
        if base.non_resident || data.len() < 24 {
            return None;
        }

        let mut cursor = Cursor::new(&data[ATTRIBUTE_HEADER_LEN..]);

        Some(Self {
            base,
            value_length: cursor.read_u32::<LittleEndian>().ok()?,
            value_offset: cursor.read_u16::<LittleEndian>().ok()?,
            indexed_flag: cursor.read_u8().ok()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NonResidentAttributeHeader {
    pub base: AttributeHeader,
    pub lowest_vcn: u64,
    pub highest_vcn: u64,
    pub run_offset: u16,
    pub compression_unit: u16,
    pub allocated_size: u64,
    pub data_size: u64,
    pub initialized_size: u64,
    pub compressed_size: Option<u64>,
}

impl NonResidentAttributeHeader {
    /// Parse a non-resident attribute header
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        let base = AttributeHeader::from_bytes(data)?;
        if !base.non_resident || data.len() < 64 {
            return None;
        }

        let mut cursor = Cursor::new(&data[ATTRIBUTE_HEADER_LEN..]);

        let lowest_vcn = cursor.read_u64::<LittleEndian>().ok()?;
        let highest_vcn = cursor.read_u64::<LittleEndian>().ok()?;
        let run_offset = cursor.read_u16::<LittleEndian>().ok()?;
        let compression_unit = cursor.read_u16::<LittleEndian>().ok()?;
        let _padding = cursor.read_u32::<LittleEndian>().ok()?;
        let allocated_size = cursor.read_u64::<LittleEndian>().ok()?;
        let data_size = cursor.read_u64::<LittleEndian>().ok()?;
        let initialized_size = cursor.read_u64::<LittleEndian>().ok()?;

        let compressed_size = if compression_unit > 0 && data.len() >= 72 {
            Some(cursor.read_u64::<LittleEndian>().ok()?)
        } else {
            None
        };

        Some(Self {
            base,
            lowest_vcn,
            highest_vcn,
            run_offset,
            compression_unit,
            allocated_size,
            data_size,
            initialized_size,
            compressed_size,
        })
    }
}

// ============================================================================
// Data Runs
// ============================================================================

/// One segment of a non-resident attribute's extent map.
///
/// `lcn` is absolute on the volume; for a sparse run it carries the running
/// LCN total unchanged, and the `sparse` flag is what marks the hole.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataRun {
    pub vcn_start: i64,
    pub lcn: i64,
    pub length: i64,
    pub sparse: bool,
}

impl DataRun {
    /// Decode a run list.
    ///
    /// Each record starts with a header byte whose low nibble is the width of
    /// the length field and whose high nibble is the width of the signed LCN
    /// delta; a zero byte terminates the list. Decoding stops at the first
    /// malformed record (zero-width length, field overrun) and returns what
    /// was decoded so far.
    pub fn decode(data: &[u8], lowest_vcn: i64) -> Vec<DataRun> {
        let mut runs = Vec::new();
        let mut pos = 0usize;
        let mut current_vcn = lowest_vcn;
        let mut current_lcn: i64 = 0;

        while pos < data.len() {
            let header = data[pos];
            if header == 0 {
                break;
            }

            let length_size = (header & 0x0F) as usize;
            let offset_size = ((header >> 4) & 0x0F) as usize;

            if length_size == 0 || length_size > 8 || offset_size > 8 {
                break;
            }

            pos += 1;
            if pos + length_size + offset_size > data.len() {
                break;
            }

            let mut length: i64 = 0;
            for i in 0..length_size {
                length |= (data[pos + i] as i64) << (8 * i);
            }
            pos += length_size;

            let sparse = offset_size == 0;
            let delta = read_signed_le(&data[pos..pos + offset_size]);
            pos += offset_size;

            current_lcn += delta;
            runs.push(DataRun {
                vcn_start: current_vcn,
                lcn: current_lcn,
                length,
                sparse,
            });
            current_vcn += length;
        }

        runs
    }
}

/// Read a little-endian two's-complement integer of `data.len()` bytes
/// (at most 8), sign-extending to 64 bits. An empty slice yields 0.
pub fn read_signed_le(data: &[u8]) -> i64 {
    let size = data.len();
    if size == 0 || size > 8 {
        return 0;
    }

    let mut value: i64 = 0;
    for (i, byte) in data.iter().enumerate() {
        value |= (*byte as i64) << (8 * i);
    }

    if size < 8 && (data[size - 1] & 0x80) != 0 {
        value |= -1i64 << (size * 8);
    }

    value
}

// ============================================================================
// USN Records
// ============================================================================

/// A decoded USN_RECORD_V2.
#[derive(Debug, Clone)]
pub struct UsnRecordV2 {
    pub record_length: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub file_reference_number: u64,
    pub parent_file_reference_number: u64,
    pub usn: i64,
    pub timestamp: i64,
    pub reason: u32,
    pub source_info: u32,
    pub security_id: u32,
    pub file_attributes: u32,
    pub file_name: String,
}

impl UsnRecordV2 {
    /// Parse a USN_RECORD_V2 from raw bytes.
    ///
    /// `data` should span exactly the record (`RecordLength` bytes). The
    /// FileNameLength field is in bytes and is halved during the UTF-16
    /// decode.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < USN_RECORD_V2_MIN_LEN {
            return None;
        }

        let mut cursor = Cursor::new(data);

        let record_length = cursor.read_u32::<LittleEndian>().ok()?;
        let major_version = cursor.read_u16::<LittleEndian>().ok()?;
        let minor_version = cursor.read_u16::<LittleEndian>().ok()?;
        let file_reference_number = cursor.read_u64::<LittleEndian>().ok()?;
        let parent_file_reference_number = cursor.read_u64::<LittleEndian>().ok()?;
        let usn = cursor.read_i64::<LittleEndian>().ok()?;
        let timestamp = cursor.read_i64::<LittleEndian>().ok()?;
        let reason = cursor.read_u32::<LittleEndian>().ok()?;
        let source_info = cursor.read_u32::<LittleEndian>().ok()?;
        let security_id = cursor.read_u32::<LittleEndian>().ok()?;
        let file_attributes = cursor.read_u32::<LittleEndian>().ok()?;
        let file_name_length = cursor.read_u16::<LittleEndian>().ok()?;
        let file_name_offset = cursor.read_u16::<LittleEndian>().ok()?;

        let name_start = file_name_offset as usize;
        let name_end = name_start.checked_add(file_name_length as usize)?;
        if name_end > data.len() || name_end > record_length as usize {
            return None;
        }
        let file_name = decode_utf16le(&data[name_start..name_end]);

        Some(Self {
            record_length,
            major_version,
            minor_version,
            file_reference_number,
            parent_file_reference_number,
            usn,
            timestamp,
            reason,
            source_info,
            security_id,
            file_attributes,
            file_name,
        })
    }

    pub fn is_directory(&self) -> bool {
        (self.file_attributes & FILE_ATTRIBUTE_DIRECTORY) != 0
    }
}

// USN reason flags
pub mod usn_reason {
    pub const DATA_OVERWRITE: u32 = 0x0000_0001;
    pub const DATA_EXTEND: u32 = 0x0000_0002;
    pub const DATA_TRUNCATION: u32 = 0x0000_0004;
    pub const NAMED_DATA_OVERWRITE: u32 = 0x0000_0010;
    pub const NAMED_DATA_EXTEND: u32 = 0x0000_0020;
    pub const NAMED_DATA_TRUNCATION: u32 = 0x0000_0040;
    pub const FILE_CREATE: u32 = 0x0000_0100;
    pub const FILE_DELETE: u32 = 0x0000_0200;
    pub const EA_CHANGE: u32 = 0x0000_0400;
    pub const SECURITY_CHANGE: u32 = 0x0000_0800;
    pub const RENAME_OLD_NAME: u32 = 0x0000_1000;
    pub const RENAME_NEW_NAME: u32 = 0x0000_2000;
    pub const INDEXABLE_CHANGE: u32 = 0x0000_4000;
    pub const BASIC_INFO_CHANGE: u32 = 0x0000_8000;
    pub const HARD_LINK_CHANGE: u32 = 0x0001_0000;
    pub const COMPRESSION_CHANGE: u32 = 0x0002_0000;
    pub const ENCRYPTION_CHANGE: u32 = 0x0004_0000;
    pub const OBJECT_ID_CHANGE: u32 = 0x0008_0000;
    pub const REPARSE_POINT_CHANGE: u32 = 0x0010_0000;
    pub const STREAM_CHANGE: u32 = 0x0020_0000;
    pub const CLOSE: u32 = 0x8000_0000;
}

/// Render a reason bitmask as a human-readable flag list.
pub fn reason_to_string(reason: u32) -> String {
    const NAMES: &[(u32, &str)] = &[
        (usn_reason::DATA_OVERWRITE, "DATA_OVERWRITE"),
        (usn_reason::DATA_EXTEND, "DATA_EXTEND"),
        (usn_reason::DATA_TRUNCATION, "DATA_TRUNCATION"),
        (usn_reason::NAMED_DATA_OVERWRITE, "NAMED_DATA_OVERWRITE"),
        (usn_reason::NAMED_DATA_EXTEND, "NAMED_DATA_EXTEND"),
        (usn_reason::NAMED_DATA_TRUNCATION, "NAMED_DATA_TRUNCATION"),
        (usn_reason::FILE_CREATE, "FILE_CREATE"),
        (usn_reason::FILE_DELETE, "FILE_DELETE"),
        (usn_reason::EA_CHANGE, "EA_CHANGE"),
        (usn_reason::SECURITY_CHANGE, "SECURITY_CHANGE"),
        (usn_reason::RENAME_OLD_NAME, "RENAME_OLD_NAME"),
        (usn_reason::RENAME_NEW_NAME, "RENAME_NEW_NAME"),
        (usn_reason::INDEXABLE_CHANGE, "INDEXABLE_CHANGE"),
        (usn_reason::BASIC_INFO_CHANGE, "BASIC_INFO_CHANGE"),
        (usn_reason::HARD_LINK_CHANGE, "HARD_LINK_CHANGE"),
        (usn_reason::COMPRESSION_CHANGE, "COMPRESSION_CHANGE"),
        (usn_reason::ENCRYPTION_CHANGE, "ENCRYPTION_CHANGE"),
        (usn_reason::OBJECT_ID_CHANGE, "OBJECT_ID_CHANGE"),
        (usn_reason::REPARSE_POINT_CHANGE, "REPARSE_POINT_CHANGE"),
        (usn_reason::STREAM_CHANGE, "STREAM_CHANGE"),
        (usn_reason::CLOSE, "CLOSE"),
    ];

    let flags: Vec<&str> = NAMES
        .iter()
        .filter(|(bit, _)| reason & bit != 0)
        .map(|(_, name)| *name)
        .collect();

    if flags.is_empty() {
        "UNKNOWN".to_string()
    } else {
        flags.join(" | ")
    }
}

// ============================================================================
// Text and Time Conversions
// ============================================================================

/// Decode a UTF-16LE byte slice, dropping a trailing odd byte if present.
pub fn decode_utf16le(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Milliseconds between 1601-01-01 and 1970-01-01
const FILETIME_EPOCH_OFFSET_MS: i64 = 11_644_473_600_000;

/// Convert a Windows FILETIME (100 ns ticks since 1601-01-01 UTC) to Unix
/// milliseconds.
pub fn filetime_to_unix_ms(filetime: i64) -> i64 {
    filetime / 10_000 - FILETIME_EPOCH_OFFSET_MS
}

/// Convert a Windows FILETIME to a chrono UTC timestamp.
pub fn filetime_to_datetime(filetime: i64) -> chrono::DateTime<chrono::Utc> {
    use chrono::TimeZone;
    chrono::Utc
        .timestamp_millis_opt(filetime_to_unix_ms(filetime))
        .single()
        .unwrap_or_default()
}
