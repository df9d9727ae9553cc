//! Ingestion: uploads, plain URL downloads and external-source fetches all end in
//! [`VaultService::record`].

use crate::constants::ACCESS_LOG_TARGET;
use crate::fetch::deadline_after;
use crate::fetch::http::{download_to_temp, ensure_success};
use crate::identity::SessionIdentity;
use crate::models::{
    FetchRequest, FileDescriptor, LogicalFileMetadata, LogicalFileReference, SourceKind,
    StoreRequest, StoreSource,
};
use crate::{VaultError, VaultResult, VaultService};
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vault_files::{SidecarEntry, StagedBlob, detect_mime};
use vault_types::{FileExtension, NonEmptyText};
use vault_uuid::VaultId;

fn mime_type_for(head: &[u8], extension: &FileExtension) -> String {
    detect_mime(head).map(str::to_owned).unwrap_or_else(|| {
        mime_guess::from_ext(extension.as_str())
            .first_or_octet_stream()
            .essence_str()
            .to_owned()
    })
}

impl VaultService {
    /// Stores an upload or a plain URL download as a new logical file owned by `identity`.
    ///
    /// # Errors
    ///
    /// - `VaultError::InvalidInput` for a blank name, unusable extension or missing group
    /// - `VaultError::FetchFailed` if a source URL cannot be downloaded
    /// - `VaultError::ContentMismatch` if the bytes contradict the extension; nothing is written
    /// - `VaultError::Io` on disk failures
    #[tracing::instrument(skip(self, identity, request), fields(user = %identity.user_id))]
    pub async fn store(
        &self,
        identity: &SessionIdentity,
        request: StoreRequest,
    ) -> VaultResult<VaultId> {
        let (descriptor, extension, source, overwrite) = request.validate()?;

        let staged = match source {
            StoreSource::Stream(reader) => self.content.stage_stream(reader).await?,
            StoreSource::Url(url) => {
                let url = url.trim();
                if url.is_empty() {
                    return Err(VaultError::InvalidInput("source url is required".into()));
                }
                let response = self
                    .http
                    .get(url)
                    .send()
                    .await
                    .map_err(VaultError::transport)?;
                let response = ensure_success(response).await?;
                let temp = download_to_temp(response, &self.content, "url-").await?;
                self.content.stage_file(temp).await?
            }
        };

        self.record(identity, descriptor, &extension, staged, overwrite)
            .await
    }

    /// Fetches from an external source under the configured default deadline.
    ///
    /// # Errors
    ///
    /// See [`VaultService::fetch_with_deadline`].
    pub async fn fetch(
        &self,
        identity: &SessionIdentity,
        kind: SourceKind,
        request: FetchRequest,
        cancel: &CancellationToken,
    ) -> VaultResult<VaultId> {
        let deadline = deadline_after(self.config.fetch_timeout());
        self.fetch_with_deadline(identity, kind, request, deadline, cancel)
            .await
    }

    /// Fetches from an external source and stores the result as a new logical file.
    ///
    /// The stored name is the one advertised by the source, else (for OneDrive) the request's
    /// description, else the source's default name.
    ///
    /// # Errors
    ///
    /// - `VaultError::InvalidInput` for a blank URL, missing group, or no track requested
    /// - `VaultError::Cancelled` / `VaultError::Timeout` if `cancel` or `deadline` win
    /// - any fetcher, muxer or storage error
    #[tracing::instrument(skip(self, identity, request, cancel), fields(user = %identity.user_id, source = %request.source_url))]
    pub async fn fetch_with_deadline(
        &self,
        identity: &SessionIdentity,
        kind: SourceKind,
        request: FetchRequest,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> VaultResult<VaultId> {
        let fallback = NonEmptyText::new(kind.default_name())?;
        request.descriptor(fallback.clone())?;
        let policy = request.policy();
        if kind == SourceKind::YouTube && !policy.video && !policy.audio {
            return Err(VaultError::InvalidInput(
                "at least one of video or audio must be requested".into(),
            ));
        }

        let fetched = self
            .fetchers
            .fetch(
                kind,
                request.source_url.trim(),
                &policy,
                &self.content,
                deadline,
                cancel,
            )
            .await?;

        // OneDrive files without a usable name are named after the request's description.
        let described = match kind {
            SourceKind::OneDrive => request.description.as_deref(),
            _ => None,
        };
        let name = fetched
            .name
            .as_deref()
            .and_then(|n| NonEmptyText::new(n).ok())
            .or_else(|| described.and_then(|d| NonEmptyText::new(d).ok()))
            .unwrap_or(fallback);
        let descriptor = request.descriptor(name)?;
        let extension = fetched.extension;

        let staged = self.content.stage_file(fetched.temp).await?;
        if cancel.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        self.record(identity, descriptor, &extension, staged, false)
            .await
    }

    /// Commits a staged blob and creates its reference and metadata records.
    ///
    /// The sidecar entry is appended by the commit, after the blob is in place. The repository
    /// insert comes last; if it fails the commit is retracted, removing the new sidecar entry
    /// and any blob the commit created.
    pub(crate) async fn record(
        &self,
        identity: &SessionIdentity,
        descriptor: FileDescriptor,
        extension: &FileExtension,
        staged: StagedBlob,
        overwrite: bool,
    ) -> VaultResult<VaultId> {
        let ref_id = VaultId::new();
        let mime_type = mime_type_for(staged.head(), extension);
        let entry = SidecarEntry::new(
            ref_id,
            descriptor.access_group_id,
            descriptor.public_download,
        );

        let stored = self
            .content
            .commit(staged, extension, entry, overwrite)
            .await?;

        let now = Utc::now();
        let reference = LogicalFileReference {
            id: ref_id,
            content_hash: stored.hash.clone(),
            extension: stored.extension.clone(),
            access_group_id: descriptor.access_group_id,
            public_viewing: descriptor.public_viewing,
            public_download: descriptor.public_download,
            size_in_bytes: stored.size,
            created_at: now,
            owner_id: identity.user_id,
            download_count: 0,
        };
        let metadata = LogicalFileMetadata {
            data_id: VaultId::new(),
            ref_id,
            name: descriptor.name,
            description: descriptor.description,
            tags: descriptor.tags,
            categories: descriptor.categories,
            mime_type,
            checksum: stored.hash.clone(),
            metadata: descriptor.metadata,
            last_modified_at: now,
            last_modified_by_id: identity.user_id,
        };
        let name = metadata.name.clone();

        if let Err(e) = self.repo.insert(reference, metadata) {
            tracing::warn!(
                ref_id = %ref_id,
                path = %stored.path.display(),
                "repository insert failed, retracting stored blob: {}",
                e
            );
            if let Err(rollback) = self.content.retract(&stored, ref_id).await {
                tracing::error!(
                    ref_id = %ref_id,
                    path = %stored.path.display(),
                    "failed to retract sidecar entry: {}",
                    rollback
                );
            }
            return Err(e);
        }

        tracing::info!(
            target: ACCESS_LOG_TARGET,
            user = %identity.user_id,
            ref_id = %ref_id,
            name = %name,
            size = stored.size,
            deduplicated = stored.deduplicated,
            "file created"
        );
        Ok(ref_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::share_token;
    use crate::models::{FileLookup, SearchFilters};
    use crate::repository::{FileRepository, InMemoryFileRepository};
    use crate::CoreConfig;
    use httpmock::prelude::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn service(dir: &TempDir) -> (VaultService, Arc<InMemoryFileRepository>) {
        let repo = Arc::new(InMemoryFileRepository::new());
        let config = CoreConfig::new(dir.path().to_path_buf()).unwrap();
        let service = VaultService::new(config, repo.clone()).unwrap();
        (service, repo)
    }

    fn upload(name: &str, ext: &str, group: VaultId, bytes: &'static [u8]) -> StoreRequest {
        StoreRequest::new(name, ext, group, StoreSource::Stream(Box::new(bytes)))
    }

    /// Repository whose inserts always fail.
    struct FailingRepository;

    impl FileRepository for FailingRepository {
        fn insert(
            &self,
            _reference: LogicalFileReference,
            _metadata: LogicalFileMetadata,
        ) -> VaultResult<()> {
            Err(VaultError::Repository("database unavailable".into()))
        }

        fn reference(&self, _id: VaultId) -> VaultResult<Option<LogicalFileReference>> {
            Ok(None)
        }

        fn metadata(&self, _ref_id: VaultId) -> VaultResult<Option<LogicalFileMetadata>> {
            Ok(None)
        }

        fn search(
            &self,
            _filters: &SearchFilters,
        ) -> VaultResult<Vec<(LogicalFileReference, LogicalFileMetadata)>> {
            Ok(Vec::new())
        }

        fn increment_download_count(&self, id: VaultId) -> VaultResult<u64> {
            Err(VaultError::NotFound(format!("file {id}")))
        }

        fn delete(&self, _id: VaultId) -> VaultResult<bool> {
            Ok(false)
        }
    }

    /// Every file under `root`, relative to it, skipping the temp area.
    fn stored_files(root: &std::path::Path) -> Vec<std::path::PathBuf> {
        fn walk(root: &std::path::Path, dir: &std::path::Path, acc: &mut Vec<std::path::PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries {
                let path = entry.unwrap().path();
                if path.file_name().is_some_and(|n| n == ".tmp") {
                    continue;
                }
                if path.is_dir() {
                    walk(root, &path, acc);
                } else {
                    acc.push(path.strip_prefix(root).unwrap().to_path_buf());
                }
            }
        }
        let mut files = Vec::new();
        walk(root, root, &mut files);
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_store_creates_reference_and_metadata() {
        let dir = TempDir::new().unwrap();
        let (service, repo) = service(&dir);
        let owner = SessionIdentity::user(VaultId::new(), []);
        let group = VaultId::new();

        let mut request = upload("notes", "txt", group, b"plain words");
        request.tags = vec![" work ".into(), "".into()];
        let id = service.store(&owner, request).await.unwrap();

        let reference = repo.reference(id).unwrap().unwrap();
        assert_eq!(reference.owner_id, owner.user_id);
        assert_eq!(reference.access_group_id, group);
        assert_eq!(reference.size_in_bytes, 11);

        let metadata = repo.metadata(id).unwrap().unwrap();
        assert_eq!(metadata.name.as_str(), "notes");
        assert_eq!(metadata.mime_type, "text/plain");
        assert_eq!(metadata.checksum, reference.content_hash);
        assert_eq!(metadata.tags.iter().collect::<Vec<_>>(), vec!["work"]);
    }

    #[tokio::test]
    async fn test_mismatched_content_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let (service, repo) = service(&dir);
        let owner = SessionIdentity::user(VaultId::new(), []);

        let err = service
            .store(&owner, upload("fake", "png", VaultId::new(), b"%PDF-1.4 not an image"))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::ContentMismatch { .. }));
        assert!(repo.search(&Default::default()).unwrap().is_empty());
        let leftovers = std::fs::read_dir(dir.path().join(".tmp"))
            .map(|d| d.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_store_from_url_downloads_first() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/files/readme.txt");
                then.status(200)
                    .header("content-type", "text/plain")
                    .body("hello from upstream");
            })
            .await;

        let dir = TempDir::new().unwrap();
        let (service, _repo) = service(&dir);
        let owner = SessionIdentity::user(VaultId::new(), []);
        let request = StoreRequest::new(
            "readme",
            "txt",
            VaultId::new(),
            StoreSource::Url(server.url("/files/readme.txt")),
        );
        let id = service.store(&owner, request).await.unwrap();

        let mut opened = service
            .open_stream(&owner, &FileLookup::Id(id))
            .await
            .unwrap();
        let mut body = String::new();
        opened.stream.read_to_string(&mut body).await.unwrap();
        assert_eq!(body, "hello from upstream");
    }

    #[tokio::test]
    async fn test_store_from_failing_url_is_fetch_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone");
                then.status(410).body("gone");
            })
            .await;

        let dir = TempDir::new().unwrap();
        let (service, _repo) = service(&dir);
        let owner = SessionIdentity::user(VaultId::new(), []);
        let request = StoreRequest::new(
            "gone",
            "txt",
            VaultId::new(),
            StoreSource::Url(server.url("/gone")),
        );
        let err = service.store(&owner, request).await.unwrap_err();
        assert!(matches!(err, VaultError::FetchFailed { status: Some(410), .. }));
    }

    #[tokio::test]
    async fn test_failed_insert_leaves_storage_untouched() {
        let dir = TempDir::new().unwrap();
        let config = CoreConfig::new(dir.path().to_path_buf()).unwrap();
        let service = VaultService::new(config, Arc::new(FailingRepository)).unwrap();
        let owner = SessionIdentity::user(VaultId::new(), []);

        let err = service
            .store(&owner, upload("orphan", "txt", VaultId::new(), b"never recorded"))
            .await
            .unwrap_err();

        assert!(matches!(err, VaultError::Repository(_)), "{err:?}");
        assert!(stored_files(dir.path()).is_empty());
        let leftovers = std::fs::read_dir(dir.path().join(".tmp"))
            .map(|d| d.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_failed_insert_keeps_existing_blob_and_sidecar() {
        let dir = TempDir::new().unwrap();
        let (service, repo) = service(&dir);
        let owner = SessionIdentity::user(VaultId::new(), []);
        let id = service
            .store(&owner, upload("first", "txt", VaultId::new(), b"shared content"))
            .await
            .unwrap();
        let reference = repo.reference(id).unwrap().unwrap();
        let blob = service
            .content_store()
            .resolver()
            .full_path(&reference.content_hash, &reference.extension);
        let sidecar = vault_files::PathResolver::sidecar_path(&blob);
        let files_before = stored_files(dir.path());
        let sidecar_before = std::fs::read(&sidecar).unwrap();

        let config = CoreConfig::new(dir.path().to_path_buf()).unwrap();
        let failing = VaultService::new(config, Arc::new(FailingRepository)).unwrap();
        let err = failing
            .store(&owner, upload("second", "txt", VaultId::new(), b"shared content"))
            .await
            .unwrap_err();

        assert!(matches!(err, VaultError::Repository(_)), "{err:?}");
        assert_eq!(stored_files(dir.path()), files_before);
        assert_eq!(std::fs::read(&blob).unwrap(), b"shared content");
        assert_eq!(std::fs::read(&sidecar).unwrap(), sidecar_before);
        let entries = service.content_store().sidecar().entries(&blob).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ref_id, id);
    }

    #[tokio::test]
    async fn test_onedrive_file_without_name_takes_the_description() {
        const SHARE: &str = "https://1drv.ms/t/s!AkQ8minutes";
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path(format!("/v1.0/shares/{}/root/content", share_token(SHARE)));
                then.status(200)
                    .header("content-type", "text/plain")
                    .body("minutes of the board meeting");
            })
            .await;

        let dir = TempDir::new().unwrap();
        let repo = Arc::new(InMemoryFileRepository::new());
        let config = CoreConfig::new(dir.path().to_path_buf())
            .unwrap()
            .with_onedrive_base_url(server.base_url());
        let service = VaultService::new(config, repo.clone()).unwrap();
        let owner = SessionIdentity::user(VaultId::new(), []);

        let mut described = FetchRequest::new(SHARE, VaultId::new());
        described.description = Some("Board minutes".into());
        let id = service
            .fetch(&owner, SourceKind::OneDrive, described, &CancellationToken::new())
            .await
            .unwrap();
        let metadata = repo.metadata(id).unwrap().unwrap();
        assert_eq!(metadata.name.as_str(), "Board minutes");
        assert_eq!(metadata.description, "Board minutes");

        let mut blank = FetchRequest::new(SHARE, VaultId::new());
        blank.description = Some("   ".into());
        let id = service
            .fetch(&owner, SourceKind::OneDrive, blank, &CancellationToken::new())
            .await
            .unwrap();
        let metadata = repo.metadata(id).unwrap().unwrap();
        assert_eq!(metadata.name.as_str(), "OneDrive File");
    }

    #[tokio::test]
    async fn test_fetch_validates_before_network() {
        let dir = TempDir::new().unwrap();
        let (service, _repo) = service(&dir);
        let owner = SessionIdentity::user(VaultId::new(), []);

        let mut request = FetchRequest::new("https://youtu.be/dQw4w9WgXcQ", VaultId::new());
        request.download_video = false;
        request.download_audio = false;
        let err = service
            .fetch(&owner, SourceKind::YouTube, request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));

        let mut request = FetchRequest::new("https://youtu.be/dQw4w9WgXcQ", VaultId::new());
        request.access_group_id = None;
        let err = service
            .fetch(&owner, SourceKind::YouTube, request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));
    }
}
