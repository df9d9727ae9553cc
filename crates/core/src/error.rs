use std::time::Duration;
use vault_files::FilesError;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("path escapes storage root: {0}")]
    PathTraversal(String),
    #[error("content does not match extension .{extension} (detected {detected})")]
    ContentMismatch { extension: String, detected: String },
    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("no suitable {kind} stream (available: {})", available.join(", "))]
    NoSuitableStream { kind: String, available: Vec<String> },
    #[error("unsupported document type: {0}")]
    UnsupportedDocumentType(String),
    #[error(
        "fetch failed{}: {body}",
        status.map(|s| format!(" (status {s})")).unwrap_or_default()
    )]
    FetchFailed { status: Option<u16>, body: String },
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error(
        "mux failed ({}): {stderr}",
        exit_code.map(|c| format!("exit code {c}")).unwrap_or_else(|| "killed by signal".into())
    )]
    MuxFailed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("corrupt sidecar {}: {source}", path.display())]
    CorruptSidecar {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("repository error: {0}")]
    Repository(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type VaultResult<T> = std::result::Result<T, VaultError>;

impl From<FilesError> for VaultError {
    fn from(err: FilesError) -> Self {
        match err {
            FilesError::InvalidRootDirectory(msg) => VaultError::InvalidInput(msg),
            FilesError::PathTraversal(msg) => VaultError::PathTraversal(msg),
            FilesError::ContentMismatch {
                extension,
                detected,
            } => VaultError::ContentMismatch {
                extension,
                detected,
            },
            FilesError::ChecksumMismatch { expected, actual } => {
                VaultError::ChecksumMismatch { expected, actual }
            }
            FilesError::NotFound(msg) => VaultError::NotFound(msg),
            FilesError::Unauthorized(msg) => VaultError::Unauthorized(msg),
            FilesError::CorruptSidecar { path, source } => {
                VaultError::CorruptSidecar { path, source }
            }
            FilesError::Io(e) => VaultError::Io(e),
        }
    }
}

impl From<vault_types::TextError> for VaultError {
    fn from(err: vault_types::TextError) -> Self {
        VaultError::InvalidInput(err.to_string())
    }
}

impl From<vault_uuid::UuidError> for VaultError {
    fn from(err: vault_uuid::UuidError) -> Self {
        VaultError::InvalidInput(err.to_string())
    }
}

impl VaultError {
    /// Transport-level failure talking to an upstream source.
    pub(crate) fn transport(err: reqwest::Error) -> Self {
        VaultError::FetchFailed {
            status: err.status().map(|s| s.as_u16()),
            body: err.to_string(),
        }
    }
}
