//! Fetchers for external sources.
//!
//! Each fetcher turns a share URL or identifier into a temp file inside the store's temp area
//! plus a declared name and extension. Ingestion into the store happens afterwards, in
//! [`crate::VaultService::fetch`].
//!
//! Temp files are [`TempPath`] values throughout, so every exit path (error, timeout,
//! cancellation, dropped future) removes them.

mod google_drive;
pub mod http;
mod onedrive;
pub mod youtube;

pub use google_drive::{GoogleDriveFetcher, extract_drive_id};
pub use onedrive::{OneDriveFetcher, share_token};
pub use youtube::{
    Selection, StreamKind, StreamVariant, VideoManifest, YouTubeCatalog, YouTubeFetcher,
    YtDlpCatalog, parse_video_id, select_streams,
};

use crate::models::{DownloadPolicy, SourceKind};
use crate::{VaultError, VaultResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vault_files::ContentStore;
use vault_types::FileExtension;

/// Result of a successful fetch, ready for staging.
#[derive(Debug)]
pub struct FetchedFile {
    pub temp: TempPath,
    /// Name advertised by the source, if any.
    pub name: Option<String>,
    pub extension: FileExtension,
}

/// One external origin.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Downloads `source` into the store's temp area.
    async fn fetch(
        &self,
        source: &str,
        policy: &DownloadPolicy,
        store: &ContentStore,
    ) -> VaultResult<FetchedFile>;
}

/// Dispatches to the fetcher for a [`SourceKind`] under a deadline and a cancellation token.
#[derive(Clone, Default)]
pub struct FetchService {
    fetchers: HashMap<SourceKind, Arc<dyn SourceFetcher>>,
}

impl FetchService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `fetcher`, replacing any previous one for the same kind.
    pub fn register(&mut self, fetcher: Arc<dyn SourceFetcher>) {
        self.fetchers.insert(fetcher.kind(), fetcher);
    }

    pub fn with(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.register(fetcher);
        self
    }

    /// Runs the fetcher for `kind`, racing it against `deadline` and `cancel`.
    ///
    /// Losing the race drops the fetch future, which removes its temp files and kills any
    /// child process it started.
    ///
    /// # Errors
    ///
    /// - `VaultError::Cancelled` if `cancel` fires first
    /// - `VaultError::Timeout` if `deadline` passes first
    /// - `VaultError::InvalidInput` if no fetcher is registered for `kind`
    /// - whatever the fetcher itself returns
    #[tracing::instrument(skip(self, policy, store, cancel))]
    pub async fn fetch(
        &self,
        kind: SourceKind,
        source: &str,
        policy: &DownloadPolicy,
        store: &ContentStore,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> VaultResult<FetchedFile> {
        let fetcher = self
            .fetchers
            .get(&kind)
            .ok_or_else(|| VaultError::InvalidInput(format!("no fetcher for {kind}")))?;

        let budget = deadline.saturating_duration_since(Instant::now());
        tracing::info!(budget_secs = budget.as_secs(), "fetch started");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(VaultError::Cancelled),
            outcome = tokio::time::timeout_at(deadline, fetcher.fetch(source, policy, store)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(VaultError::Timeout {
                        operation: "fetch",
                        after: budget,
                    }),
                }
            }
        };

        match &result {
            Ok(fetched) => tracing::info!(
                extension = %fetched.extension,
                name = fetched.name.as_deref().unwrap_or_default(),
                "fetch finished"
            ),
            Err(e) => tracing::warn!("fetch failed: {}", e),
        }
        result
    }
}

/// Deadline `after` from now.
pub fn deadline_after(after: Duration) -> Instant {
    Instant::now() + after
}
