use crate::constants::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::error;

/// Malformed XML input or a structurally invalid event sequence.
///
/// This is the only error the XML layer produces; tag mismatches detected by
/// the tree builder are folded into the same kind.
#[derive(Debug, Clone, Error)]
#[error("XML parsing error: {cause}")]
pub struct XmlParsingError {
    pub cause: String,
}

impl XmlParsingError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

impl From<quick_xml::Error> for XmlParsingError {
    fn from(err: quick_xml::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Failure while producing an archive stream.
#[derive(Debug, Clone, Error)]
#[error("zip error: {cause}")]
pub struct ZipError {
    pub cause: String,
}

impl ZipError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

impl From<std::io::Error> for ZipError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Corrupt archive or filesystem failure during extraction. Never retried.
#[derive(Debug, Error)]
#[error("unzip error: {cause}")]
pub struct UnzipError {
    pub cause: String,
}

impl UnzipError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }
}

/// Error reported by the storage layer.
///
/// Labels mirror the driver-level error labels that drive the transaction
/// retry policy (see [`crate::transaction`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("storage error: {message}")]
pub struct StorageError {
    message: String,
    labels: Vec<String>,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            labels: Vec::new(),
        }
    }

    /// A failure the whole transaction may be replayed after.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(message).with_label(TRANSIENT_TRANSACTION_ERROR)
    }

    /// A commit whose outcome the driver could not confirm.
    pub fn unknown_commit_result(message: impl Into<String>) -> Self {
        Self::new(message).with_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn is_transient_transaction_error(&self) -> bool {
        self.has_label(TRANSIENT_TRANSACTION_ERROR)
    }

    pub fn is_unknown_commit_result(&self) -> bool {
        self.has_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failures surfaced by a backup import.
///
/// `Storage` only travels inside a transaction so the runner can inspect its
/// labels; [`ImportError::redacted`] turns it into `Server` before it leaves
/// the importer.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("missing backup file: {0}")]
    MissingBackupFile(String),
    #[error("wrong backup format: {reason}")]
    WrongFormat { reason: String },
    #[error("backup file is corrupted: {reason}")]
    FileCorrupted { reason: String },
    #[error("internal server error (reference {reference})")]
    Server { reference: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ImportError {
    pub fn wrong_format(reason: impl Into<String>) -> Self {
        ImportError::WrongFormat {
            reason: reason.into(),
        }
    }

    pub fn corrupted(reason: impl Into<String>) -> Self {
        ImportError::FileCorrupted {
            reason: reason.into(),
        }
    }

    /// Logs an unexpected failure server-side and returns the opaque variant.
    pub fn unexpected(err: &dyn fmt::Display) -> Self {
        ImportError::Server {
            reference: log_redacted(err),
        }
    }

    /// Replaces storage details with a reference id. Structural errors pass through.
    pub fn redacted(self) -> Self {
        match self {
            ImportError::Storage(err) => ImportError::unexpected(&err),
            other => other,
        }
    }
}

impl From<XmlParsingError> for ImportError {
    fn from(err: XmlParsingError) -> Self {
        ImportError::corrupted(err.cause)
    }
}

impl From<UnzipError> for ImportError {
    fn from(err: UnzipError) -> Self {
        ImportError::corrupted(err.cause)
    }
}

impl From<serde_json::Error> for ImportError {
    fn from(err: serde_json::Error) -> Self {
        ImportError::corrupted(err.to_string())
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::unexpected(&err)
    }
}

static REFERENCE_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Logs the full error with a fresh reference id and returns the id.
pub fn log_redacted(err: &dyn fmt::Display) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let seq = REFERENCE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let reference = format!("{millis:x}-{seq:04x}");
    error!(reference = %reference, error = %err, "Unexpected server error");
    reference
}

/// Top-level error for the command-line binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Import failed: {0}")]
    Import(#[from] ImportError),
    #[error("Export failed: {0}")]
    Export(#[from] ZipError),
    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_labels() {
        let err = StorageError::transient("write conflict");
        assert!(err.is_transient_transaction_error());
        assert!(!err.is_unknown_commit_result());

        let err = StorageError::unknown_commit_result("network blip");
        assert!(err.is_unknown_commit_result());
        assert!(!err.is_transient_transaction_error());
        assert_eq!(err.message(), "network blip");
    }

    #[test]
    fn redaction_hides_storage_details() {
        let err = ImportError::Storage(StorageError::new("password=hunter2")).redacted();
        match err {
            ImportError::Server { reference } => {
                assert!(!reference.is_empty());
                assert!(!reference.contains("hunter2"));
            }
            other => panic!("expected Server, got {other:?}"),
        }
    }

    #[test]
    fn redaction_keeps_structural_errors() {
        let err = ImportError::wrong_format("root is <foo>").redacted();
        assert!(matches!(err, ImportError::WrongFormat { .. }));
    }

    #[test]
    fn xml_errors_become_corruption() {
        let err: ImportError = XmlParsingError::new("mismatched tag").into();
        assert!(err.to_string().contains("mismatched tag"));
        assert!(matches!(err, ImportError::FileCorrupted { .. }));
    }

    #[test]
    fn app_error_display() {
        let err = AppError::InvalidInput("Not a number".to_string());
        assert!(err.to_string().contains("Invalid input"));
    }
}
