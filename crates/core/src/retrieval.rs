//! Access-gated reads by id or by public blob path.
//!
//! Both lookups end at the same check: the repository record for the logical file and
//! [`AccessGate::ensure_can_read`]. A path lookup uses the blob's sidecar only to find which
//! records point at that blob.

use crate::access::{AccessGate, AccessPurpose};
use crate::constants::ACCESS_LOG_TARGET;
use crate::identity::SessionIdentity;
use crate::models::{
    FileLookup, LogicalFileMetadata, LogicalFileReference, OpenedFile, PhysicalFile,
};
use crate::{VaultError, VaultResult, VaultService};
use std::path::Path;

/// Download name: the stored name with the extension appended unless already present.
fn download_name(metadata: &LogicalFileMetadata, reference: &LogicalFileReference) -> String {
    let name = metadata.name.as_str();
    let suffix = format!(".{}", reference.extension);
    if name.to_ascii_lowercase().ends_with(&suffix) {
        name.to_owned()
    } else {
        format!("{name}{suffix}")
    }
}

impl VaultService {
    async fn reference_at_path(
        &self,
        identity: &SessionIdentity,
        candidate: &str,
    ) -> VaultResult<LogicalFileReference> {
        let resolver = self.content.resolver();
        let path = resolver.full_path_if_safe(candidate)?;
        let entries = self.content.sidecar().entries(&path).await?;
        if entries.is_empty() {
            return Err(VaultError::NotFound(format!("no file at {candidate}")));
        }

        let mut known = 0usize;
        for entry in entries {
            let Some(reference) = self.repo.reference(entry.ref_id)? else {
                tracing::warn!(
                    ref_id = %entry.ref_id,
                    path = %path.display(),
                    "sidecar entry has no record, skipping"
                );
                continue;
            };
            if resolver.full_path(&reference.content_hash, &reference.extension) != path {
                tracing::warn!(
                    ref_id = %entry.ref_id,
                    path = %path.display(),
                    "sidecar entry points at a record for another blob, skipping"
                );
                continue;
            }
            known += 1;
            if AccessGate::can_read(identity, &reference, AccessPurpose::Download) {
                return Ok(reference);
            }
        }

        if known == 0 {
            return Err(VaultError::NotFound(format!("no file at {candidate}")));
        }
        Err(VaultError::Unauthorized(format!(
            "user {} may not read {}",
            identity.user_id, candidate
        )))
    }

    /// Resolves `lookup` to a record `identity` may download.
    async fn readable(
        &self,
        identity: &SessionIdentity,
        lookup: &FileLookup,
    ) -> VaultResult<(LogicalFileReference, LogicalFileMetadata)> {
        let reference = match lookup {
            FileLookup::Id(id) => {
                let reference = self
                    .repo
                    .reference(*id)?
                    .ok_or_else(|| VaultError::NotFound(format!("file {id}")))?;
                AccessGate::ensure_can_read(identity, &reference, AccessPurpose::Download)?;
                reference
            }
            FileLookup::Path(candidate) => self.reference_at_path(identity, candidate).await?,
        };
        let metadata = self
            .repo
            .metadata(reference.id)?
            .ok_or_else(|| VaultError::NotFound(format!("metadata for file {}", reference.id)))?;
        Ok((reference, metadata))
    }

    /// Opens the bytes of a logical file for reading and counts the download.
    ///
    /// # Errors
    ///
    /// - `VaultError::PathTraversal` for a path that escapes the storage root
    /// - `VaultError::NotFound` if the record, sidecar or blob is missing
    /// - `VaultError::Unauthorized` if `identity` may not read the file
    #[tracing::instrument(skip(self, identity), fields(user = %identity.user_id))]
    pub async fn open_stream(
        &self,
        identity: &SessionIdentity,
        lookup: &FileLookup,
    ) -> VaultResult<OpenedFile> {
        let (reference, metadata) = self.readable(identity, lookup).await?;
        let stream = self
            .content
            .open(&reference.content_hash, &reference.extension)
            .await?;
        let downloads = self.repo.increment_download_count(reference.id)?;

        let file_name = download_name(&metadata, &reference);
        tracing::info!(
            target: ACCESS_LOG_TARGET,
            user = %identity.user_id,
            ref_id = %reference.id,
            name = %file_name,
            downloads,
            "stream opened"
        );
        Ok(OpenedFile {
            stream,
            file_name,
            extension: reference.extension,
            size_in_bytes: reference.size_in_bytes,
        })
    }

    /// Resolves the on-disk location of a logical file for callers that serve it themselves.
    ///
    /// # Errors
    ///
    /// As for [`VaultService::open_stream`].
    #[tracing::instrument(skip(self, identity), fields(user = %identity.user_id))]
    pub async fn resolve_physical_path(
        &self,
        identity: &SessionIdentity,
        lookup: &FileLookup,
    ) -> VaultResult<PhysicalFile> {
        let (reference, metadata) = self.readable(identity, lookup).await?;
        let path = self
            .content
            .resolver()
            .full_path(&reference.content_hash, &reference.extension);
        if !tokio::fs::try_exists(&path).await? {
            return Err(VaultError::NotFound(format!(
                "blob for file {} is missing",
                reference.id
            )));
        }

        let file_name = download_name(&metadata, &reference);
        tracing::info!(
            target: ACCESS_LOG_TARGET,
            user = %identity.user_id,
            ref_id = %reference.id,
            name = %file_name,
            "physical path resolved"
        );
        Ok(PhysicalFile {
            content_type: content_type_for(&path),
            path,
            file_name,
        })
    }
}

fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StoreRequest, StoreSource};
    use crate::repository::{FileRepository, InMemoryFileRepository};
    use crate::CoreConfig;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use vault_uuid::VaultId;

    struct Fixture {
        _dir: TempDir,
        service: VaultService,
        repo: Arc<InMemoryFileRepository>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let repo = Arc::new(InMemoryFileRepository::new());
        let config = CoreConfig::new(dir.path().to_path_buf()).unwrap();
        let service = VaultService::new(config, repo.clone()).unwrap();
        Fixture {
            _dir: dir,
            service,
            repo,
        }
    }

    async fn store(
        fx: &Fixture,
        owner: &SessionIdentity,
        group: VaultId,
        public_download: bool,
        bytes: &'static [u8],
    ) -> VaultId {
        let mut request =
            StoreRequest::new("report", "txt", group, StoreSource::Stream(Box::new(bytes)));
        request.public_download = public_download;
        fx.service.store(owner, request).await.unwrap()
    }

    fn path_of(fx: &Fixture, id: VaultId) -> String {
        let reference = fx.repo.reference(id).unwrap().unwrap();
        fx.service
            .content
            .resolver()
            .relative_path(&reference.content_hash, &reference.extension)
            .to_string_lossy()
            .replace('\\', "/")
    }

    #[tokio::test]
    async fn test_open_by_id_counts_downloads() {
        let fx = fixture();
        let owner = SessionIdentity::user(VaultId::new(), []);
        let id = store(&fx, &owner, VaultId::new(), false, b"quarterly").await;

        let mut opened = fx
            .service
            .open_stream(&owner, &FileLookup::Id(id))
            .await
            .unwrap();
        let mut body = Vec::new();
        opened.stream.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"quarterly");
        assert_eq!(opened.file_name, "report.txt");
        assert_eq!(opened.size_in_bytes, 9);

        fx.service
            .open_stream(&owner, &FileLookup::Id(id))
            .await
            .unwrap();
        assert_eq!(fx.repo.reference(id).unwrap().unwrap().download_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let fx = fixture();
        let who = SessionIdentity::admin(VaultId::new());
        let err = fx
            .service
            .open_stream(&who, &FileLookup::Id(VaultId::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_path_lookup_picks_readable_entry_among_shared_blob() {
        let fx = fixture();
        let group_a = VaultId::new();
        let group_b = VaultId::new();
        let alice = SessionIdentity::user(VaultId::new(), [group_a]);
        let bob = SessionIdentity::user(VaultId::new(), [group_b]);

        let first = store(&fx, &alice, group_a, false, b"same bytes").await;
        let second = store(&fx, &bob, group_b, false, b"same bytes").await;
        let path = path_of(&fx, first);
        assert_eq!(path, path_of(&fx, second));

        let member_b = SessionIdentity::user(VaultId::new(), [group_b]);
        let physical = fx
            .service
            .resolve_physical_path(&member_b, &FileLookup::Path(path.clone()))
            .await
            .unwrap();
        assert_eq!(physical.content_type, "text/plain");
        assert!(physical.path.ends_with(&path));

        fx.service
            .open_stream(&member_b, &FileLookup::Path(path.clone()))
            .await
            .unwrap();
        assert_eq!(fx.repo.reference(second).unwrap().unwrap().download_count, 1);
        assert_eq!(fx.repo.reference(first).unwrap().unwrap().download_count, 0);

        let outsider = SessionIdentity::user(VaultId::new(), []);
        let err = fx
            .service
            .open_stream(&outsider, &FileLookup::Path(path))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_path_lookup_honours_owner_and_public_download() {
        let fx = fixture();
        let owner = SessionIdentity::user(VaultId::new(), []);
        let id = store(&fx, &owner, VaultId::new(), false, b"owned").await;
        let path = path_of(&fx, id);
        fx.service
            .open_stream(&owner, &FileLookup::Path(path))
            .await
            .unwrap();

        let public = store(&fx, &owner, VaultId::new(), true, b"for everyone").await;
        let stranger = SessionIdentity::user(VaultId::new(), []);
        fx.service
            .open_stream(&stranger, &FileLookup::Path(path_of(&fx, public)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_path_lookup_rejects_traversal_and_unknown_paths() {
        let fx = fixture();
        let who = SessionIdentity::admin(VaultId::new());

        let err = fx
            .service
            .open_stream(&who, &FileLookup::Path("../../etc/passwd".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::PathTraversal(_)));

        let err = fx
            .service
            .resolve_physical_path(&who, &FileLookup::Path("ab/cd/nothing.txt".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sidecar_entries_without_records_are_ignored() {
        let fx = fixture();
        let owner = SessionIdentity::user(VaultId::new(), []);
        let id = store(&fx, &owner, VaultId::new(), true, b"orphaned").await;
        let path = path_of(&fx, id);
        fx.repo.delete(id).unwrap();

        let err = fx
            .service
            .open_stream(&owner, &FileLookup::Path(path))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NotFound(_)));
    }

    #[test]
    fn test_download_name_does_not_double_extension() {
        use chrono::Utc;
        use vault_types::{ContentHash, FileExtension, NonEmptyText};

        let hash = ContentHash::from_digest(&[9; 32]);
        let reference = LogicalFileReference {
            id: VaultId::new(),
            content_hash: hash.clone(),
            extension: FileExtension::new("pdf").unwrap(),
            access_group_id: VaultId::new(),
            public_viewing: false,
            public_download: false,
            size_in_bytes: 1,
            created_at: Utc::now(),
            owner_id: VaultId::new(),
            download_count: 0,
        };
        let mut metadata = LogicalFileMetadata {
            data_id: VaultId::new(),
            ref_id: reference.id,
            name: NonEmptyText::new("Invoice.PDF").unwrap(),
            description: String::new(),
            tags: Default::default(),
            categories: Default::default(),
            mime_type: "application/pdf".into(),
            checksum: hash,
            metadata: serde_json::Value::Null,
            last_modified_at: Utc::now(),
            last_modified_by_id: VaultId::new(),
        };
        assert_eq!(download_name(&metadata, &reference), "Invoice.PDF");
        metadata.name = NonEmptyText::new("Invoice").unwrap();
        assert_eq!(download_name(&metadata, &reference), "Invoice.pdf");
    }
}
