//! MFT file-record parser
//!
//! Decodes a single MFT file record into its attribute list: resident
//! payloads are captured as raw bytes, non-resident attributes get their
//! run list decoded. On Windows the record is fetched live with
//! FSCTL_GET_NTFS_FILE_RECORD.

use crate::error::{Result, UndeleteError};
use crate::ntfs::structs::{
    attribute_type_name, AttributeHeader, ClusterGeometry, DataRun, FileRecordHeader,
    NonResidentAttributeHeader, ResidentAttributeHeader, ATTRIBUTE_END_MARKER,
    ATTRIBUTE_HEADER_LEN,
};

#[cfg(windows)]
use crate::ntfs::structs::FRN_INDEX_MASK;
#[cfg(windows)]
use crate::ntfs::winapi;
#[cfg(windows)]
use log::debug;

// ============================================================================
// Parsed Attributes
// ============================================================================

/// One attribute record from the walk.
///
/// For resident attributes `resident_data` holds the value bytes and `runs`
/// is empty; for non-resident attributes the decoded run list describes the
/// extent map and `resident_data` is empty.
#[derive(Debug, Clone)]
pub struct AttributeInfo {
    pub type_code: u32,
    pub type_name: &'static str,
    pub non_resident: bool,
    /// Stream name (e.g. an alternate data stream), not the file name
    pub name: Option<String>,
    pub data_size: u64,
    pub allocated_size: u64,
    pub runs: Vec<DataRun>,
    pub resident_data: Vec<u8>,
}

/// Everything the parser recovers from one MFT file record, annotated with
/// the volume's cluster geometry.
#[derive(Debug, Clone)]
pub struct FileRecordDetails {
    pub in_use: bool,
    pub is_directory: bool,
    pub base_reference: u64,
    pub hard_link_count: u16,
    pub flags: u16,
    pub attributes: Vec<AttributeInfo>,
    pub geometry: ClusterGeometry,
}

// ============================================================================
// Record Parsing
// ============================================================================

/// Parse an MFT file record buffer.
///
/// The buffer must already have the update sequence array applied, which is
/// the case for records returned by FSCTL_GET_NTFS_FILE_RECORD; raw records
/// read straight from disk need a fix-up pass first.
///
/// The attribute walk never reads past `BytesInUse` (or the buffer end,
/// whichever is smaller) and stops at the first malformed attribute,
/// returning what was decoded up to that point. Attributes referenced
/// through an $ATTRIBUTE_LIST in other MFT records are not followed.
pub fn parse_file_record(buffer: &[u8], geometry: ClusterGeometry) -> Result<FileRecordDetails> {
    let header = FileRecordHeader::from_bytes(buffer).ok_or_else(|| {
        UndeleteError::Parse(format!(
            "file record buffer of {} bytes is shorter than the record header",
            buffer.len()
        ))
    })?;

    if !header.is_valid() {
        return Err(UndeleteError::Parse(format!(
            "bad file record signature 0x{:08X}, expected 'FILE'",
            header.signature
        )));
    }

    let mut details = FileRecordDetails {
        in_use: header.is_in_use(),
        is_directory: header.is_directory(),
        base_reference: header.base_file_record,
        hard_link_count: header.hard_link_count,
        flags: header.flags,
        attributes: Vec::new(),
        geometry,
    };

    let bound = buffer.len().min(header.bytes_in_use as usize);
    let mut offset = header.first_attribute_offset as usize;

    while offset + ATTRIBUTE_HEADER_LEN <= bound {
        let Some(attr) = AttributeHeader::from_bytes(&buffer[offset..bound]) else {
            break;
        };
        if attr.type_code == ATTRIBUTE_END_MARKER || attr.length == 0 {
            break;
        }

        let length = attr.length as usize;
        if offset + length > bound {
            break;
        }
        let attr_data = &buffer[offset..offset + length];

        if let Some(info) = decode_attribute(&attr, attr_data) {
            details.attributes.push(info);
        } else {
            break;
        }

        offset += length;
    }

    Ok(details)
}

/// Decode one attribute record; `None` stops the walk at a truncated body.
fn decode_attribute(attr: &AttributeHeader, attr_data: &[u8]) -> Option<AttributeInfo> {
    let name = attr.name(attr_data);

    if attr.non_resident {
        let nr = NonResidentAttributeHeader::from_bytes(attr_data)?;
        let runs = if (nr.run_offset as usize) < attr_data.len() {
            DataRun::decode(&attr_data[nr.run_offset as usize..], nr.lowest_vcn as i64)
        } else {
            Vec::new()
        };

        Some(AttributeInfo {
            type_code: attr.type_code,
            type_name: attribute_type_name(attr.type_code),
            non_resident: true,
            name,
            data_size: nr.data_size,
            allocated_size: nr.allocated_size,
            runs,
            resident_data: Vec::new(),
        })
    } else {
        let res = ResidentAttributeHeader::from_bytes(attr_data)?;
        let value_offset = res.value_offset as usize;
        let value_length = res.value_length as usize;

        let resident_data = if value_length > 0
            && value_offset
                .checked_add(value_length)
                .is_some_and(|end| end <= attr_data.len())
        {
            attr_data[value_offset..value_offset + value_length].to_vec()
        } else {
            Vec::new()
        };

        Some(AttributeInfo {
            type_code: attr.type_code,
            type_name: attribute_type_name(attr.type_code),
            non_resident: false,
            name,
            data_size: res.value_length as u64,
            allocated_size: res.value_length as u64,
            runs: Vec::new(),
            resident_data,
        })
    }
}

// ============================================================================
// Record Fetch Operation
// ============================================================================

/// Fetch and parse the MFT file record behind `file_ref` on `drive`.
///
/// Queries cluster geometry, opens the volume, issues the file-record
/// control and decodes the returned buffer. The volume handle is released
/// on every exit path.
#[cfg(windows)]
pub fn get_file_record(drive: &str, file_ref: u64) -> Result<FileRecordDetails> {
    let letter = crate::ntfs::normalize_drive(drive)?;
    let geometry = winapi::query_cluster_geometry(letter)?;
    let volume = winapi::open_volume(letter)?;

    let (returned_ref, record) = winapi::get_ntfs_file_record(&volume, file_ref)?;
    if returned_ref & FRN_INDEX_MASK != file_ref & FRN_INDEX_MASK {
        // The driver returns the nearest preceding in-use record when the
        // requested one is free.
        debug!(
            "requested record {} but the volume returned {}",
            file_ref & FRN_INDEX_MASK,
            returned_ref & FRN_INDEX_MASK
        );
    }

    parse_file_record(&record, geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ntfs::structs::MFT_RECORD_SIGNATURE;

    const RECORD_SIZE: usize = 1024;
    const FIRST_ATTRIBUTE_OFFSET: usize = 56;

    fn utf16_bytes(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    fn build_resident_attribute(type_code: u32, name: Option<&str>, value: &[u8]) -> Vec<u8> {
        let name_bytes = name.map(utf16_bytes).unwrap_or_default();
        let name_offset = 24usize;
        let value_offset = name_offset + name_bytes.len();
        let length = (value_offset + value.len() + 7) & !7;

        let mut attr = vec![0u8; length];
        attr[0..4].copy_from_slice(&type_code.to_le_bytes());
        attr[4..8].copy_from_slice(&(length as u32).to_le_bytes());
        attr[8] = 0; // resident
        attr[9] = (name_bytes.len() / 2) as u8;
        attr[10..12].copy_from_slice(&(name_offset as u16).to_le_bytes());
        attr[16..20].copy_from_slice(&(value.len() as u32).to_le_bytes());
        attr[20..22].copy_from_slice(&(value_offset as u16).to_le_bytes());
        attr[name_offset..name_offset + name_bytes.len()].copy_from_slice(&name_bytes);
        attr[value_offset..value_offset + value.len()].copy_from_slice(value);
        attr
    }

    fn build_nonresident_attribute(
        type_code: u32,
        name: Option<&str>,
        lowest_vcn: u64,
        highest_vcn: u64,
        allocated_size: u64,
        data_size: u64,
        run_list: &[u8],
    ) -> Vec<u8> {
        let name_bytes = name.map(utf16_bytes).unwrap_or_default();
        let name_offset = 64usize;
        let run_offset = name_offset + name_bytes.len();
        let length = (run_offset + run_list.len() + 7) & !7;

        let mut attr = vec![0u8; length];
        attr[0..4].copy_from_slice(&type_code.to_le_bytes());
        attr[4..8].copy_from_slice(&(length as u32).to_le_bytes());
        attr[8] = 1; // non-resident
        attr[9] = (name_bytes.len() / 2) as u8;
        attr[10..12].copy_from_slice(&(name_offset as u16).to_le_bytes());
        attr[16..24].copy_from_slice(&lowest_vcn.to_le_bytes());
        attr[24..32].copy_from_slice(&highest_vcn.to_le_bytes());
        attr[32..34].copy_from_slice(&(run_offset as u16).to_le_bytes());
        attr[40..48].copy_from_slice(&allocated_size.to_le_bytes());
        attr[48..56].copy_from_slice(&data_size.to_le_bytes());
        attr[56..64].copy_from_slice(&data_size.to_le_bytes()); // initialized
        attr[name_offset..name_offset + name_bytes.len()].copy_from_slice(&name_bytes);
        attr[run_offset..run_offset + run_list.len()].copy_from_slice(run_list);
        attr
    }

    fn build_file_record(flags: u16, attributes: &[Vec<u8>]) -> Vec<u8> {
        let mut record = vec![0u8; RECORD_SIZE];
        record[0..4].copy_from_slice(&MFT_RECORD_SIGNATURE.to_le_bytes());
        record[4..6].copy_from_slice(&48u16.to_le_bytes()); // USA offset
        record[6..8].copy_from_slice(&3u16.to_le_bytes()); // USA size
        record[18..20].copy_from_slice(&1u16.to_le_bytes()); // hard links
        record[20..22].copy_from_slice(&(FIRST_ATTRIBUTE_OFFSET as u16).to_le_bytes());
        record[22..24].copy_from_slice(&flags.to_le_bytes());
        record[28..32].copy_from_slice(&(RECORD_SIZE as u32).to_le_bytes());

        let mut offset = FIRST_ATTRIBUTE_OFFSET;
        for attr in attributes {
            record[offset..offset + attr.len()].copy_from_slice(attr);
            offset += attr.len();
        }
        record[offset..offset + 4].copy_from_slice(&ATTRIBUTE_END_MARKER.to_le_bytes());
        offset += 8;

        record[24..28].copy_from_slice(&(offset as u32).to_le_bytes()); // bytes in use
        record
    }

    fn geometry() -> ClusterGeometry {
        ClusterGeometry::new(512, 8)
    }

    #[test]
    fn rejects_bad_signature() {
        let mut record = build_file_record(1, &[]);
        record[0..4].copy_from_slice(b"BAAD");
        let err = parse_file_record(&record, geometry()).unwrap_err();
        assert!(matches!(err, UndeleteError::Parse(_)));
        assert!(err.to_string().contains("FILE"));
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(parse_file_record(&[0u8; 32], geometry()).is_err());
    }

    #[test]
    fn reads_record_level_fields() {
        let record = build_file_record(3, &[]);
        let details = parse_file_record(&record, geometry()).unwrap();
        assert!(details.in_use);
        assert!(details.is_directory);
        assert_eq!(details.hard_link_count, 1);
        assert_eq!(details.flags, 3);
        assert!(details.attributes.is_empty());
        assert_eq!(details.geometry.cluster_size(), 4096);
    }

    #[test]
    fn nonresident_data_attribute_with_runs() {
        // [length=3, lcn=+1000], [length=2, sparse]
        let run_list = [0x21, 0x03, 0xE8, 0x03, 0x01, 0x02, 0x00];
        let attr = build_nonresident_attribute(0x80, None, 0, 4, 20480, 17000, &run_list);
        let record = build_file_record(1, &[attr]);

        let details = parse_file_record(&record, geometry()).unwrap();
        assert_eq!(details.attributes.len(), 1);

        let data = &details.attributes[0];
        assert_eq!(data.type_name, "Data");
        assert!(data.non_resident);
        assert!(data.name.is_none());
        assert_eq!(data.data_size, 17000);
        assert_eq!(data.allocated_size, 20480);
        assert!(data.resident_data.is_empty());
        assert_eq!(
            data.runs,
            vec![
                DataRun {
                    vcn_start: 0,
                    lcn: 1000,
                    length: 3,
                    sparse: false
                },
                DataRun {
                    vcn_start: 3,
                    lcn: 1000,
                    length: 2,
                    sparse: true
                },
            ]
        );
    }

    #[test]
    fn resident_attribute_captures_value() {
        let value = b"resident file name payload";
        let attr = build_resident_attribute(0x30, None, value);
        let record = build_file_record(1, &[attr]);

        let details = parse_file_record(&record, geometry()).unwrap();
        let file_name = &details.attributes[0];
        assert_eq!(file_name.type_name, "FileName");
        assert!(!file_name.non_resident);
        assert_eq!(file_name.resident_data, value);
        assert_eq!(file_name.data_size, value.len() as u64);
        assert_eq!(file_name.allocated_size, value.len() as u64);
        assert!(file_name.runs.is_empty());
    }

    #[test]
    fn alternate_stream_name_is_decoded() {
        let attr = build_nonresident_attribute(
            0x80,
            Some("Zone.Identifier"),
            0,
            0,
            4096,
            26,
            &[0x11, 0x01, 0x40, 0x00],
        );
        let record = build_file_record(1, &[attr]);

        let details = parse_file_record(&record, geometry()).unwrap();
        assert_eq!(details.attributes[0].name.as_deref(), Some("Zone.Identifier"));
    }

    #[test]
    fn walk_preserves_attribute_order() {
        let standard = build_resident_attribute(0x10, None, &[0u8; 48]);
        let file_name = build_resident_attribute(0x30, None, b"name");
        let data = build_nonresident_attribute(0x80, None, 0, 0, 4096, 100, &[0x11, 0x01, 0x05, 0x00]);
        let record = build_file_record(1, &[standard, file_name, data]);

        let details = parse_file_record(&record, geometry()).unwrap();
        let names: Vec<&str> = details.attributes.iter().map(|a| a.type_name).collect();
        assert_eq!(names, vec!["StandardInformation", "FileName", "Data"]);
    }

    #[test]
    fn oversized_attribute_stops_walk_with_partial_result() {
        let good = build_resident_attribute(0x10, None, &[0u8; 48]);
        let mut bad = build_resident_attribute(0x30, None, b"name");
        bad[4..8].copy_from_slice(&4096u32.to_le_bytes()); // length past record end
        let record = build_file_record(1, &[good, bad]);

        let details = parse_file_record(&record, geometry()).unwrap();
        assert_eq!(details.attributes.len(), 1);
        assert_eq!(details.attributes[0].type_name, "StandardInformation");
    }

    #[test]
    fn walk_never_reads_past_bytes_in_use() {
        let good = build_resident_attribute(0x10, None, &[0u8; 48]);
        let mut record = build_file_record(1, &[good]);
        // Shrink BytesInUse below the first attribute; the walk sees nothing
        record[24..28].copy_from_slice(&(FIRST_ATTRIBUTE_OFFSET as u32).to_le_bytes());

        let details = parse_file_record(&record, geometry()).unwrap();
        assert!(details.attributes.is_empty());
    }

    #[test]
    fn unknown_attribute_type_is_reported() {
        let attr = build_resident_attribute(0x123, None, b"??");
        let record = build_file_record(1, &[attr]);
        let details = parse_file_record(&record, geometry()).unwrap();
        assert_eq!(details.attributes[0].type_name, "Unknown");
        assert_eq!(details.attributes[0].type_code, 0x123);
    }
}
