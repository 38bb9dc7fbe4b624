//! Error types for usn-undelete
//!
//! One variant per failure kind; every operation surfaces exactly one of
//! these and releases its handles before returning.

use thiserror::Error;

/// Main error type for undelete operations
#[derive(Error, Debug)]
pub enum UndeleteError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to open volume '{0}': {1}")]
    VolumeOpen(String, #[source] std::io::Error),

    #[error("failed to open output '{0}': {1}")]
    OutputOpen(String, #[source] std::io::Error),

    #[error("USN enumeration failed: {0}")]
    Enumeration(String),

    #[error("MFT record fetch failed: {0}")]
    RecordFetch(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("{step} failed: {source}")]
    Io {
        step: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for undelete operations
pub type Result<T> = std::result::Result<T, UndeleteError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn invalid_argument_display() {
        let err = UndeleteError::InvalidArgument("drive letter is required".into());
        assert_eq!(
            err.to_string(),
            "invalid argument: drive letter is required"
        );
    }

    #[test]
    fn volume_open_carries_os_error() {
        let io = IoError::from_raw_os_error(5);
        let err = UndeleteError::VolumeOpen(r"\\.\C:".to_string(), io);
        let text = err.to_string();
        assert!(text.contains(r"\\.\C:"));
        assert!(text.contains("os error 5"));
    }

    #[test]
    fn io_names_the_failing_step() {
        let err = UndeleteError::Io {
            step: "SetFilePointerEx",
            source: IoError::new(ErrorKind::InvalidInput, "seek past end"),
        };
        assert!(err.to_string().starts_with("SetFilePointerEx failed"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<UndeleteError>();
    }
}
