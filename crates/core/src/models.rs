//! Plain value objects exchanged with the repository and with callers.

use crate::constants::{
    GOOGLE_DRIVE_DEFAULT_NAME, ONEDRIVE_DEFAULT_NAME, YOUTUBE_DEFAULT_NAME,
};
use crate::{VaultError, VaultResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use tokio::io::AsyncRead;
use vault_types::{ContentHash, FileExtension, NonEmptyText};
use vault_uuid::VaultId;

/// One upload or fetch event pointing at a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalFileReference {
    pub id: VaultId,
    pub content_hash: ContentHash,
    pub extension: FileExtension,
    pub access_group_id: VaultId,
    pub public_viewing: bool,
    pub public_download: bool,
    pub size_in_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub owner_id: VaultId,
    pub download_count: u64,
}

/// Descriptive record, one-to-one with a [`LogicalFileReference`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalFileMetadata {
    pub data_id: VaultId,
    pub ref_id: VaultId,
    pub name: NonEmptyText,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    pub mime_type: String,
    pub checksum: ContentHash,
    pub metadata: serde_json::Value,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by_id: VaultId,
}

/// Where the bytes for a [`StoreRequest`] come from.
pub enum StoreSource {
    /// Bytes supplied by the caller.
    Stream(Box<dyn AsyncRead + Send + Unpin>),
    /// A plain URL to download with a GET.
    Url(String),
}

impl fmt::Debug for StoreSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreSource::Stream(_) => f.write_str("Stream(..)"),
            StoreSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

/// Inbound request to store a file.
#[derive(Debug)]
pub struct StoreRequest {
    pub file_name: String,
    pub extension: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub access_group_id: Option<VaultId>,
    pub description: Option<String>,
    pub public_viewing: bool,
    pub public_download: bool,
    pub metadata: Option<serde_json::Value>,
    pub overwrite: bool,
    pub source: StoreSource,
}

impl StoreRequest {
    /// A request with empty descriptive fields and private visibility.
    pub fn new(
        file_name: impl Into<String>,
        extension: impl Into<String>,
        access_group_id: VaultId,
        source: StoreSource,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            extension: extension.into(),
            tags: Vec::new(),
            categories: Vec::new(),
            access_group_id: Some(access_group_id),
            description: None,
            public_viewing: false,
            public_download: false,
            metadata: None,
            overwrite: false,
            source,
        }
    }
}

/// Fields shared by every ingestion path once validated.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    pub name: NonEmptyText,
    pub access_group_id: VaultId,
    pub tags: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    pub description: String,
    pub public_viewing: bool,
    pub public_download: bool,
    pub metadata: serde_json::Value,
}

pub(crate) fn required_group(group: Option<VaultId>) -> VaultResult<VaultId> {
    match group {
        Some(id) if !id.is_nil() => Ok(id),
        _ => Err(VaultError::InvalidInput("access group is required".into())),
    }
}

fn clean_set(values: Vec<String>) -> BTreeSet<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .collect()
}

impl StoreRequest {
    /// Splits the request into validated descriptive fields, extension and byte source.
    ///
    /// # Errors
    ///
    /// `VaultError::InvalidInput` for a blank name, unusable extension or missing group.
    pub fn validate(self) -> VaultResult<(FileDescriptor, FileExtension, StoreSource, bool)> {
        let name = NonEmptyText::new(&self.file_name)
            .map_err(|_| VaultError::InvalidInput("file name is required".into()))?;
        let extension = FileExtension::new(&self.extension)?;
        let access_group_id = required_group(self.access_group_id)?;

        let descriptor = FileDescriptor {
            name,
            access_group_id,
            tags: clean_set(self.tags),
            categories: clean_set(self.categories),
            description: self.description.unwrap_or_default(),
            public_viewing: self.public_viewing,
            public_download: self.public_download,
            metadata: self.metadata.unwrap_or(serde_json::Value::Null),
        };
        Ok((descriptor, extension, self.source, self.overwrite))
    }
}

/// External origins a file can be fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    YouTube,
    GoogleDrive,
    OneDrive,
}

impl SourceKind {
    /// Guesses the origin of a share URL from its host.
    pub fn detect(url: &str) -> Option<Self> {
        let lower = url.to_ascii_lowercase();
        if ["youtube.com", "youtu.be", "youtube-nocookie.com"]
            .iter()
            .any(|h| lower.contains(h))
        {
            Some(SourceKind::YouTube)
        } else if ["drive.google.com", "docs.google.com", "drive.usercontent.google.com"]
            .iter()
            .any(|h| lower.contains(h))
        {
            Some(SourceKind::GoogleDrive)
        } else if ["1drv.ms", "onedrive.live.com", "sharepoint.com"]
            .iter()
            .any(|h| lower.contains(h))
        {
            Some(SourceKind::OneDrive)
        } else {
            None
        }
    }

    pub fn default_name(self) -> &'static str {
        match self {
            SourceKind::YouTube => YOUTUBE_DEFAULT_NAME,
            SourceKind::GoogleDrive => GOOGLE_DRIVE_DEFAULT_NAME,
            SourceKind::OneDrive => ONEDRIVE_DEFAULT_NAME,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::YouTube => "youtube",
            SourceKind::GoogleDrive => "google-drive",
            SourceKind::OneDrive => "onedrive",
        })
    }
}

/// Which tracks to download and at what quality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadPolicy {
    pub video: bool,
    pub audio: bool,
    pub video_quality: Option<String>,
    pub audio_quality: Option<String>,
}

impl DownloadPolicy {
    pub fn both() -> Self {
        Self {
            video: true,
            audio: true,
            ..Self::default()
        }
    }
}

/// Inbound request to fetch a file from an external source.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub source_url: String,
    pub access_group_id: Option<VaultId>,
    pub download_video: bool,
    pub download_audio: bool,
    pub video_quality: Option<String>,
    pub audio_quality: Option<String>,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub description: Option<String>,
    pub public_viewing: bool,
    pub public_download: bool,
}

impl FetchRequest {
    /// A private request for both tracks at best quality.
    pub fn new(source_url: impl Into<String>, access_group_id: VaultId) -> Self {
        Self {
            source_url: source_url.into(),
            access_group_id: Some(access_group_id),
            download_video: true,
            download_audio: true,
            video_quality: None,
            audio_quality: None,
            tags: Vec::new(),
            categories: Vec::new(),
            description: None,
            public_viewing: false,
            public_download: false,
        }
    }

    pub fn policy(&self) -> DownloadPolicy {
        let quality = |q: &Option<String>| {
            q.as_ref()
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
        };
        DownloadPolicy {
            video: self.download_video,
            audio: self.download_audio,
            video_quality: quality(&self.video_quality),
            audio_quality: quality(&self.audio_quality),
        }
    }

    /// Validates the request; the name is filled in later from the fetched source.
    ///
    /// # Errors
    ///
    /// `VaultError::InvalidInput` for a blank URL or a missing group.
    pub(crate) fn descriptor(&self, name: NonEmptyText) -> VaultResult<FileDescriptor> {
        if self.source_url.trim().is_empty() {
            return Err(VaultError::InvalidInput("source url is required".into()));
        }
        Ok(FileDescriptor {
            name,
            access_group_id: required_group(self.access_group_id)?,
            tags: clean_set(self.tags.clone()),
            categories: clean_set(self.categories.clone()),
            description: self.description.clone().unwrap_or_default(),
            public_viewing: self.public_viewing,
            public_download: self.public_download,
            metadata: serde_json::json!({ "sourceUrl": self.source_url.trim() }),
        })
    }
}

/// Retrieval key: a stable id or a caller-supplied relative blob path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLookup {
    Id(VaultId),
    Path(String),
}

impl fmt::Display for FileLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileLookup::Id(id) => write!(f, "id {id}"),
            FileLookup::Path(path) => write!(f, "path {path}"),
        }
    }
}

/// An open blob plus the names needed to serve it.
#[derive(Debug)]
pub struct OpenedFile {
    pub stream: tokio::fs::File,
    pub file_name: String,
    pub extension: FileExtension,
    pub size_in_bytes: u64,
}

/// A resolved blob location for callers that serve files themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalFile {
    pub path: PathBuf,
    pub content_type: String,
    pub file_name: String,
}

/// Optional narrowing for listings. Blank values are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Exact match against any tag, case-insensitive.
    pub tag: Option<String>,
    /// Exact match against any category, case-insensitive.
    pub category: Option<String>,
    /// Substring of the name, case-insensitive.
    pub name: Option<String>,
    /// Substring of the description, case-insensitive.
    pub description: Option<String>,
}

fn active(filter: &Option<String>) -> Option<String> {
    filter
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

impl SearchFilters {
    pub fn matches(&self, metadata: &LogicalFileMetadata) -> bool {
        let any_equal = |set: &BTreeSet<String>, wanted: &str| {
            set.iter().any(|v| v.to_lowercase() == wanted)
        };

        if let Some(tag) = active(&self.tag) {
            if !any_equal(&metadata.tags, &tag) {
                return false;
            }
        }
        if let Some(category) = active(&self.category) {
            if !any_equal(&metadata.categories, &category) {
                return false;
            }
        }
        if let Some(name) = active(&self.name) {
            if !metadata.name.as_str().to_lowercase().contains(&name) {
                return false;
            }
        }
        if let Some(description) = active(&self.description) {
            if !metadata.description.to_lowercase().contains(&description) {
                return false;
            }
        }
        true
    }
}

/// One row of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListing {
    /// Relative blob path, usable with [`FileLookup::Path`].
    pub file_path: String,
    pub name: String,
    pub description: String,
    pub data_id: VaultId,
    pub ref_id: VaultId,
    pub mime_type: String,
    pub file_extension: FileExtension,
    pub tags: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    pub size_in_bytes: u64,
    pub checksum: ContentHash,
    pub metadata: serde_json::Value,
    pub public_viewing: bool,
    pub public_download: bool,
    pub download_count: u64,
    pub saved_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by_id: VaultId,
}
