//! # usn-undelete
//!
//! NTFS undelete toolkit for forensic workflows: find recently deleted files
//! through the USN change journal, inspect their MFT records, and rebuild
//! their content from raw volume clusters while the file is no longer
//! reachable through normal filesystem APIs.
//!
//! Three operations share one data model (file references, attribute
//! records, data runs, cluster geometry):
//!
//! - [`scan`] enumerates the change journal and reports every record carrying
//!   `FILE_DELETE` with a path reconstructed from the journal's own
//!   file-reference table.
//! - [`get_file_record`] fetches and parses one MFT file record: record
//!   flags, the full attribute list, resident payloads, decoded run lists.
//! - [`recover_data_runs`] copies a file's clusters off the raw volume into
//!   an output file, zero-filling sparse runs and padding to the exact
//!   declared size.
//!
//! Each operation is synchronous blocking I/O on the caller's thread, opens
//! its own volume handle and releases it on every exit path. The operations
//! are independent and safe to run concurrently; no state is shared between
//! them.
//!
//! ## Example
//!
//! ```no_run
//! # #[cfg(windows)]
//! # fn main() -> usn_undelete::Result<()> {
//! let deleted = usn_undelete::scan("C")?;
//! for file in &deleted {
//!     println!("{}", file.path);
//! }
//!
//! // Pick a candidate and pull its MFT record
//! let record = usn_undelete::get_file_record("C", deleted[0].file_ref)?;
//! let data = record
//!     .attributes
//!     .iter()
//!     .find(|a| a.type_name == "Data" && a.name.is_none())
//!     .expect("no unnamed $DATA attribute");
//!
//! usn_undelete::recover_data_runs(
//!     "C",
//!     &data.runs,
//!     record.geometry.cluster_size(),
//!     data.data_size,
//!     std::path::Path::new(r"D:\recovered\note.txt"),
//! )?;
//! # Ok(())
//! # }
//! # #[cfg(not(windows))]
//! # fn main() {}
//! ```
//!
//! All on-disk-format parsing ([`ntfs::structs`], [`ntfs::mft`],
//! [`ntfs::usn`]) and the recovery copier ([`ntfs::recovery::copy_runs`])
//! are platform-independent; only the volume I/O in `ntfs::winapi` and the
//! three drive-letter entry points require Windows. Host runtimes exchange
//! values through the shapes in [`bridge`].
//!
//! Limitations: `$ATTRIBUTE_LIST` chains spanning multiple MFT records are
//! not followed, resident payloads are returned as raw bytes, and
//! compressed or encrypted non-resident streams are not decoded.

pub mod bridge;
pub mod error;
pub mod ntfs;

pub use error::{Result, UndeleteError};
pub use ntfs::mft::{parse_file_record, AttributeInfo, FileRecordDetails};
pub use ntfs::recovery::copy_runs;
pub use ntfs::structs::{ClusterGeometry, DataRun};
pub use ntfs::usn::{DeletedEntry, DeletedFile, FileTableEntry};

#[cfg(windows)]
pub use ntfs::mft::get_file_record;
#[cfg(windows)]
pub use ntfs::recovery::recover_data_runs;
#[cfg(windows)]
pub use ntfs::usn::scan;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
