//! # Vault Core
//!
//! Ingestion, content-addressed storage and access-gated retrieval for the file vault, plus the
//! external-source fetch pipeline (YouTube, Google Drive, OneDrive) and stream muxing.
//!
//! Everything goes through [`VaultService`]:
//! - `store` / `fetch` create a logical file and return its id
//! - `open_stream` / `resolve_physical_path` read one, by id or by public blob path
//! - `list_accessible` lists what a caller may see
//!
//! **No transport concerns**: authentication, HTTP routing and the relational schema live
//! outside this crate. Callers hand in a [`SessionIdentity`] and a [`FileRepository`].

pub mod access;
pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod identity;
mod ingest;
pub mod models;
pub mod mux;
pub mod repository;
mod retrieval;
mod search;

pub use access::{AccessGate, AccessPurpose};
pub use config::{CoreConfig, duration_secs_from_env_value, program_from_env_value};
pub use error::{VaultError, VaultResult};
pub use fetch::{FetchService, FetchedFile, SourceFetcher, YouTubeCatalog};
pub use identity::SessionIdentity;
pub use models::{
    DownloadPolicy, FetchRequest, FileDescriptor, FileListing, FileLookup, LogicalFileMetadata,
    LogicalFileReference, OpenedFile, PhysicalFile, SearchFilters, SourceKind, StoreRequest,
    StoreSource,
};
pub use mux::{MuxInput, Muxer};
pub use repository::{FileRepository, InMemoryFileRepository};
pub use tokio_util::sync::CancellationToken;

use fetch::{GoogleDriveFetcher, OneDriveFetcher, YouTubeFetcher, YtDlpCatalog};
use std::sync::Arc;
use vault_files::ContentStore;

/// Entry point for every core operation.
///
/// Cheap to clone; clones share the store's lock registry, the HTTP client and the repository.
#[derive(Clone)]
pub struct VaultService {
    config: Arc<CoreConfig>,
    content: ContentStore,
    repo: Arc<dyn FileRepository>,
    http: reqwest::Client,
    fetchers: FetchService,
}

impl VaultService {
    /// Builds the service with the stock fetchers: `yt-dlp` plus the configured encoder for
    /// YouTube, and the public Google Drive and OneDrive endpoints from `config`.
    ///
    /// # Errors
    ///
    /// - `VaultError::InvalidInput` if the storage root is unusable
    /// - `VaultError::FetchFailed` if the HTTP client cannot be built
    pub fn new(config: CoreConfig, repo: Arc<dyn FileRepository>) -> VaultResult<Self> {
        let content = ContentStore::new(config.storage_root())?;
        let http = fetch::http::build_client(&config)?;
        let catalog = Arc::new(YtDlpCatalog::new(config.yt_dlp_program(), http.clone()));

        let mut service = Self {
            config: Arc::new(config),
            content,
            repo,
            http,
            fetchers: FetchService::new(),
        };
        service = service.with_youtube_catalog(catalog);
        let drive = GoogleDriveFetcher::new(
            service.http.clone(),
            service.config.google_drive_base_url(),
        );
        let onedrive =
            OneDriveFetcher::new(service.http.clone(), service.config.onedrive_base_url());
        service.fetchers.register(Arc::new(drive));
        service.fetchers.register(Arc::new(onedrive));

        tracing::info!(
            root = %service.content.resolver().root().display(),
            encoder = %service.config.encoder_program().display(),
            "vault service ready"
        );
        Ok(service)
    }

    /// Swaps the YouTube stream catalogue, keeping the configured encoder and mux timeout.
    pub fn with_youtube_catalog(mut self, catalog: Arc<dyn YouTubeCatalog>) -> Self {
        let muxer = Muxer::new(
            self.config.encoder_program(),
            self.config.mux_container().clone(),
        );
        let youtube = YouTubeFetcher::new(catalog, muxer, self.config.mux_timeout());
        self.fetchers.register(Arc::new(youtube));
        self
    }

    /// Replaces the fetcher for its [`SourceKind`].
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetchers.register(fetcher);
        self
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.content
    }
}
