//! Caller identity threaded explicitly into every core operation.

use std::collections::HashSet;
use vault_uuid::VaultId;

/// Who is asking, as established by the authentication layer for one request.
///
/// The core never looks identities up or persists them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub user_id: VaultId,
    pub is_admin: bool,
    pub access_group_ids: HashSet<VaultId>,
}

impl SessionIdentity {
    /// A regular user belonging to `groups`.
    pub fn user(user_id: VaultId, groups: impl IntoIterator<Item = VaultId>) -> Self {
        Self {
            user_id,
            is_admin: false,
            access_group_ids: groups.into_iter().collect(),
        }
    }

    /// An administrator. Admins bypass group checks.
    pub fn admin(user_id: VaultId) -> Self {
        Self {
            user_id,
            is_admin: true,
            access_group_ids: HashSet::new(),
        }
    }

    pub fn in_group(&self, group: &VaultId) -> bool {
        self.access_group_ids.contains(group)
    }
}
