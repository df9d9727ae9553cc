//! Vault blob storage
//!
//! This crate owns everything the vault writes under its storage root: content-addressed blob
//! files and the JSON sidecars that record which logical files point at each blob. It knows
//! nothing about users, sessions or the relational records describing a file; callers hand it
//! bytes, a declared extension and a [`SidecarEntry`].
//!
//! ## Layout
//!
//! ```text
//! <storage_root>/
//! ├── .tmp/                       # in-flight uploads, same volume as the blobs
//! └── ab/
//!     └── cd/
//!         ├── abcd…ef.mp4         # blob, named by SHA-256 + extension
//!         └── abcd…ef.mp4.meta.json
//! ```
//!
//! ## Write path
//!
//! 1. [`ContentStore::stage_stream`] copies bytes into `.tmp/` while hashing them.
//! 2. [`ContentStore::commit`] sniffs the leading bytes against the declared extension, takes
//!    the per-blob lock, renames the temp file into place unless an identical blob already
//!    exists, and appends the sidecar entry under the same lock.
//!
//! Temp files are [`tempfile::TempPath`] values, so every early return removes them.
//!
//! ## Example Usage
//!
//! ```no_run
//! use vault_files::{ContentStore, SidecarEntry};
//! use vault_types::FileExtension;
//! use vault_uuid::VaultId;
//! use std::path::Path;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ContentStore::new(Path::new("/srv/vault"))?;
//! let staged = store.stage_stream(&b"hello"[..]).await?;
//! let entry = SidecarEntry::new(VaultId::new(), VaultId::new(), false);
//! let blob = store
//!     .commit(staged, &FileExtension::new("txt")?, entry, false)
//!     .await?;
//! println!("stored at {}", blob.relative_path.display());
//! # Ok(())
//! # }
//! ```

mod constants;
mod locks;
mod paths;
mod sidecar;
mod sniff;
mod store;

use std::path::PathBuf;

pub use constants::{SIDECAR_SUFFIX, SNIFF_LEN, TEMP_DIR_NAME};
pub use locks::{PathLockGuard, PathLocks};
pub use paths::PathResolver;
pub use sidecar::{MetadataSidecar, SidecarEntry};
pub use sniff::{detect_mime, validate_content};
pub use store::{ContentStore, StagedBlob, StoredBlob};

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum FilesError {
    /// Root directory does not exist or is not a directory
    #[error("Invalid root directory: {0}")]
    InvalidRootDirectory(String),

    /// A caller-supplied path would resolve outside the storage root
    #[error("Path escapes storage root: {0}")]
    PathTraversal(String),

    /// Sniffed content disagrees with the declared extension
    #[error("Content does not match extension .{extension} (detected {detected})")]
    ContentMismatch { extension: String, detected: String },

    /// Caller asserted a digest that the written bytes do not have
    #[error("Checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Blob or sidecar is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// No sidecar entry grants the caller access
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Sidecar exists but is not a JSON array of entries
    #[error("Corrupt sidecar {}: {source}", path.display())]
    CorruptSidecar {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type FilesResult<T> = Result<T, FilesError>;
