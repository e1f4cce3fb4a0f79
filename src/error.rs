use thiserror::Error;

/// Transfer failures callers may want to match on. They travel inside
/// `anyhow::Error`; use `downcast_ref::<TransferError>()` to inspect.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("{operation} {url} failed with status {status}: {body}")]
    UnexpectedStatus {
        operation: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("symlink {path} points to {target} whose content does not match the stored checksum")]
    SymlinkValidation { path: String, target: String },

    #[error("invalid pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("path {0} must not contain wildcards when sha256 and size are provided")]
    WildcardChecksumPath(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn status(operation: &'static str, url: &str, status: u16, body: &[u8]) -> Self {
        TransferError::UnexpectedStatus {
            operation,
            url: url.to_string(),
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}
