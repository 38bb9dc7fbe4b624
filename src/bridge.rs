//! Host-bridge value shapes
//!
//! The three operations are plain blocking functions; a host runtime drives
//! them from a worker thread and exchanges JSON-shaped values. This module
//! pins those shapes down: integers that can exceed 53 bits travel as
//! decimal strings, resident payloads as standard-alphabet base64, and the
//! inbound numeric fields accept either form. All parsers are total: a
//! malformed value is an `InvalidArgument`, never a panic.

use crate::error::{Result, UndeleteError};
use crate::ntfs::mft::{AttributeInfo, FileRecordDetails};
use crate::ntfs::structs::DataRun;
use crate::ntfs::usn::DeletedFile;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// Result Shapes
// ============================================================================

/// One deleted file from `scan`, as the host sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResultJson {
    pub name: String,
    pub path: String,
    pub file_reference_number: String,
    pub parent_reference_number: String,
    pub is_directory: bool,
    pub timestamp_ms: f64,
    pub reason: u32,
    pub drive: String,
}

impl From<&DeletedFile> for ScanResultJson {
    fn from(file: &DeletedFile) -> Self {
        Self {
            name: file.name.clone(),
            path: file.path.clone(),
            file_reference_number: file.file_ref.to_string(),
            parent_reference_number: file.parent_ref.to_string(),
            is_directory: file.is_directory,
            timestamp_ms: file.timestamp_ms as f64,
            reason: file.reason,
            drive: file.drive.to_string(),
        }
    }
}

/// One data run inside a non-resident attribute.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJson {
    pub vcn: String,
    pub lcn: String,
    pub length: String,
    pub sparse: bool,
}

impl From<&DataRun> for RunJson {
    fn from(run: &DataRun) -> Self {
        Self {
            vcn: run.vcn_start.to_string(),
            lcn: run.lcn.to_string(),
            length: run.length.to_string(),
            sparse: run.sparse,
        }
    }
}

/// One attribute record. Exactly one of `runs` (non-resident) and
/// `residentDataBase64` (resident, non-empty payload) is present; both are
/// omitted for a resident attribute with an empty value.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeJson {
    #[serde(rename = "type")]
    pub type_code: u32,
    pub type_name: String,
    pub non_resident: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub data_size: String,
    pub allocated_size: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs: Option<Vec<RunJson>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resident_data_base64: Option<String>,
}

impl From<&AttributeInfo> for AttributeJson {
    fn from(attr: &AttributeInfo) -> Self {
        let runs = if attr.runs.is_empty() {
            None
        } else {
            Some(attr.runs.iter().map(RunJson::from).collect())
        };
        let resident_data_base64 = if runs.is_none() && !attr.resident_data.is_empty() {
            Some(BASE64.encode(&attr.resident_data))
        } else {
            None
        };

        Self {
            type_code: attr.type_code,
            type_name: attr.type_name.to_string(),
            non_resident: attr.non_resident,
            name: attr.name.clone(),
            data_size: attr.data_size.to_string(),
            allocated_size: attr.allocated_size.to_string(),
            runs,
            resident_data_base64,
        }
    }
}

/// The `getFileRecord` result shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecordJson {
    pub in_use: bool,
    pub is_directory: bool,
    pub base_reference: String,
    pub hard_link_count: u16,
    pub flags: u16,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub cluster_size: String,
    pub attributes: Vec<AttributeJson>,
}

impl From<&FileRecordDetails> for FileRecordJson {
    fn from(details: &FileRecordDetails) -> Self {
        Self {
            in_use: details.in_use,
            is_directory: details.is_directory,
            base_reference: details.base_reference.to_string(),
            hard_link_count: details.hard_link_count,
            flags: details.flags,
            bytes_per_sector: details.geometry.bytes_per_sector,
            sectors_per_cluster: details.geometry.sectors_per_cluster,
            cluster_size: details.geometry.cluster_size().to_string(),
            attributes: details.attributes.iter().map(AttributeJson::from).collect(),
        }
    }
}

// ============================================================================
// Argument Parsing
// ============================================================================

/// Parse an unsigned integer that may arrive as a decimal string or a JSON
/// number.
pub fn parse_unsigned(value: &Value, what: &str) -> Result<u64> {
    match value {
        Value::String(text) => text
            .parse::<u64>()
            .map_err(|_| UndeleteError::InvalidArgument(format!("invalid {what}: '{text}'"))),
        Value::Number(number) => number
            .as_u64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f < u64::MAX as f64)
                    .map(|f| f as u64)
            })
            .ok_or_else(|| {
                UndeleteError::InvalidArgument(format!("invalid {what}: {number}"))
            }),
        other => Err(UndeleteError::InvalidArgument(format!(
            "{what} must be a number or decimal string, got {other}"
        ))),
    }
}

/// Parse a signed integer that may arrive as a decimal string or a JSON
/// number.
pub fn parse_signed(value: &Value, what: &str) -> Result<i64> {
    match value {
        Value::String(text) => text
            .parse::<i64>()
            .map_err(|_| UndeleteError::InvalidArgument(format!("invalid {what}: '{text}'"))),
        Value::Number(number) => number
            .as_i64()
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .ok_or_else(|| {
                UndeleteError::InvalidArgument(format!("invalid {what}: {number}"))
            }),
        other => Err(UndeleteError::InvalidArgument(format!(
            "{what} must be a number or decimal string, got {other}"
        ))),
    }
}

/// Parse one inbound run entry `{ vcn?, lcn, length, sparse? }`.
pub fn parse_run(value: &Value) -> Result<DataRun> {
    let Value::Object(fields) = value else {
        return Err(UndeleteError::InvalidArgument(
            "run entry must be an object".to_string(),
        ));
    };

    let length = fields
        .get("length")
        .ok_or_else(|| UndeleteError::InvalidArgument("run length missing".to_string()))
        .and_then(|v| parse_signed(v, "run length"))?;
    let lcn = fields
        .get("lcn")
        .ok_or_else(|| UndeleteError::InvalidArgument("run LCN missing".to_string()))
        .and_then(|v| parse_signed(v, "run LCN"))?;
    let vcn_start = match fields.get("vcn") {
        Some(v) => parse_signed(v, "run VCN")?,
        None => 0,
    };
    let sparse = matches!(fields.get("sparse"), Some(Value::Bool(true)));

    Ok(DataRun {
        vcn_start,
        lcn,
        length,
        sparse,
    })
}

/// Parse the inbound `runs` argument of `recoverDataRuns`.
pub fn parse_runs_array(value: &Value) -> Result<Vec<DataRun>> {
    let Value::Array(entries) = value else {
        return Err(UndeleteError::InvalidArgument(
            "runs must be an array".to_string(),
        ));
    };
    entries.iter().map(parse_run).collect()
}
