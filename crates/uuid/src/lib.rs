//! Identifiers for vault records.
//!
//! Logical files, users and access groups are all keyed by a UUID. The vault stores and
//! compares these in one *canonical* text form: **32 lowercase hexadecimal characters** with no
//! hyphens. The same string appears in sidecar files, so two spellings of the same UUID must
//! never coexist on disk.
//!
//! - [`VaultId::new`] allocates a fresh random identifier.
//! - [`VaultId::parse`] validates canonical input strictly.
//! - [`VaultId::parse_lenient`] accepts the hyphenated and uppercase forms callers commonly paste
//!   and normalises them.

mod service;

pub use service::{Uuid, VaultId};

/// Error type for UUID operations.
#[derive(Debug, thiserror::Error)]
pub enum UuidError {
    /// Invalid input provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for UUID operations.
pub type UuidResult<T> = Result<T, UuidError>;
