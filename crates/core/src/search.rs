//! Listing of files visible to a caller.

use crate::access::AccessGate;
use crate::identity::SessionIdentity;
use crate::models::{FileListing, SearchFilters};
use crate::{VaultResult, VaultService};

impl VaultService {
    /// Files matching `filters` that `identity` may see, oldest first.
    ///
    /// Rows the caller may not see are left out; this never fails with `Unauthorized`.
    #[tracing::instrument(skip(self, identity), fields(user = %identity.user_id))]
    pub fn list_accessible(
        &self,
        identity: &SessionIdentity,
        filters: &SearchFilters,
    ) -> VaultResult<Vec<FileListing>> {
        let rows = self.repo.search(filters)?;
        let total = rows.len();
        let visible = AccessGate::filter_visible(identity, rows, |(reference, _)| reference);
        tracing::debug!(total, visible = visible.len(), "listing filtered");

        let resolver = self.content.resolver();
        Ok(visible
            .into_iter()
            .map(|(reference, metadata)| FileListing {
                file_path: resolver
                    .relative_path(&reference.content_hash, &reference.extension)
                    .to_string_lossy()
                    .replace('\\', "/"),
                name: metadata.name.as_str().to_owned(),
                description: metadata.description,
                data_id: metadata.data_id,
                ref_id: reference.id,
                mime_type: metadata.mime_type,
                file_extension: reference.extension,
                tags: metadata.tags,
                categories: metadata.categories,
                size_in_bytes: reference.size_in_bytes,
                checksum: metadata.checksum,
                metadata: metadata.metadata,
                public_viewing: reference.public_viewing,
                public_download: reference.public_download,
                download_count: reference.download_count,
                saved_at: reference.created_at,
                last_modified_at: metadata.last_modified_at,
                last_modified_by_id: metadata.last_modified_by_id,
            })
            .collect())
    }
}
