//! Read authorisation for logical files.
//!
//! One predicate serves every read path: direct retrieval by id, retrieval by blob path and
//! listing. Retrieval treats a `false` answer as `Unauthorized`; listing silently drops the row.

use crate::identity::SessionIdentity;
use crate::models::LogicalFileReference;
use crate::{VaultError, VaultResult};

/// What the caller wants to do with the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPurpose {
    /// Raw bytes. Public access is governed by `public_download`.
    Download,
    /// Metadata in a listing. Public access is governed by `public_viewing`.
    Listing,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessGate;

impl AccessGate {
    /// True if `identity` may read `reference` for `purpose`.
    ///
    /// Granted to admins, to the owner, to anyone when the relevant public flag is set, and to
    /// members of the file's access group.
    pub fn can_read(
        identity: &SessionIdentity,
        reference: &LogicalFileReference,
        purpose: AccessPurpose,
    ) -> bool {
        let public = match purpose {
            AccessPurpose::Download => reference.public_download,
            AccessPurpose::Listing => reference.public_viewing,
        };
        identity.is_admin
            || reference.owner_id == identity.user_id
            || public
            || identity.in_group(&reference.access_group_id)
    }

    /// Hard gate for direct retrieval.
    ///
    /// # Errors
    ///
    /// Returns `VaultError::Unauthorized` when [`AccessGate::can_read`] is false.
    pub fn ensure_can_read(
        identity: &SessionIdentity,
        reference: &LogicalFileReference,
        purpose: AccessPurpose,
    ) -> VaultResult<()> {
        if Self::can_read(identity, reference, purpose) {
            return Ok(());
        }
        Err(VaultError::Unauthorized(format!(
            "user {} may not read file {}",
            identity.user_id, reference.id
        )))
    }

    /// Row filter for listings: keeps only what `identity` may see, in order.
    pub fn filter_visible<T>(
        identity: &SessionIdentity,
        rows: Vec<T>,
        reference_of: impl Fn(&T) -> &LogicalFileReference,
    ) -> Vec<T> {
        rows.into_iter()
            .filter(|row| Self::can_read(identity, reference_of(row), AccessPurpose::Listing))
            .collect()
    }
}
