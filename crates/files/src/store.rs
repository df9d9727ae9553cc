//! Content-addressed blob store.

use crate::constants::{COPY_BUFFER_SIZE, SNIFF_LEN};
use crate::locks::PathLocks;
use crate::paths::PathResolver;
use crate::sidecar::{MetadataSidecar, SidecarEntry};
use crate::sniff::validate_content;
use crate::{FilesError, FilesResult};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use vault_types::{ContentHash, FileExtension};
use vault_uuid::VaultId;

/// Bytes written to the store's temp area and hashed, not yet visible under a blob name.
///
/// Dropping a `StagedBlob` deletes its temp file.
#[derive(Debug)]
pub struct StagedBlob {
    temp: TempPath,
    hash: ContentHash,
    size: u64,
    head: Vec<u8>,
}

impl StagedBlob {
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Leading bytes kept for content sniffing.
    pub fn head(&self) -> &[u8] {
        &self.head
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Fails if the computed digest differs from one the caller claimed.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::ChecksumMismatch` on disagreement.
    pub fn ensure_hash(&self, expected: &ContentHash) -> FilesResult<()> {
        if &self.hash != expected {
            return Err(FilesError::ChecksumMismatch {
                expected: expected.to_string(),
                actual: self.hash.to_string(),
            });
        }
        Ok(())
    }
}

/// Outcome of a successful [`ContentStore::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub hash: ContentHash,
    pub extension: FileExtension,
    pub size: u64,
    /// Absolute blob path.
    pub path: PathBuf,
    /// Blob path relative to the storage root.
    pub relative_path: PathBuf,
    /// True when an identical blob was already present and the body write was skipped.
    pub deduplicated: bool,
    /// True when no blob existed at `path` before this commit.
    pub created: bool,
}

/// Streams bytes into content-addressed blobs and records who references them.
///
/// Cloning is cheap; clones share the lock registry so writers from any clone serialise
/// correctly.
#[derive(Debug, Clone)]
pub struct ContentStore {
    resolver: PathResolver,
    sidecar: MetadataSidecar,
    locks: Arc<PathLocks>,
}

impl ContentStore {
    /// Opens a store over an existing root directory.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidRootDirectory` if the root is unusable.
    pub fn new(root: &Path) -> FilesResult<Self> {
        let resolver = PathResolver::new(root)?;
        let locks = Arc::new(PathLocks::new());
        Ok(Self {
            resolver,
            sidecar: MetadataSidecar::new(Arc::clone(&locks)),
            locks,
        })
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn sidecar(&self) -> &MetadataSidecar {
        &self.sidecar
    }

    /// Creates an empty temp file in the store's temp area.
    ///
    /// Fetchers download into these so that staging can hash in place and promotion is a
    /// same-volume rename.
    pub async fn create_temp(&self, prefix: &str) -> FilesResult<(tokio::fs::File, TempPath)> {
        let dir = self.resolver.temp_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let prefix = prefix.to_owned();
        let named = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(&prefix).tempfile_in(dir)
        })
        .await
        .map_err(|e| std::io::Error::other(format!("temp file task failed: {e}")))??;
        let (file, path) = named.into_parts();
        Ok((tokio::fs::File::from_std(file), path))
    }

    /// Copies `reader` into a new temp file, hashing the bytes as they are written.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::Io` on any read or write failure; the temp file is removed.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn stage_stream<R>(&self, mut reader: R) -> FilesResult<StagedBlob>
    where
        R: AsyncRead + Unpin,
    {
        let (mut file, temp) = self.create_temp("upload-").await?;
        let mut hasher = Sha256::new();
        let mut head = Vec::with_capacity(SNIFF_LEN);
        let mut size = 0u64;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let chunk = &buf[..n];
            hasher.update(chunk);
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(n);
                head.extend_from_slice(&chunk[..take]);
            }
            file.write_all(chunk).await?;
            size += n as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(StagedBlob {
            temp,
            hash: ContentHash::from_digest(&hasher.finalize().into()),
            size,
            head,
        })
    }

    /// Stages a file some other component already wrote.
    ///
    /// Files already in the store's temp area are hashed where they are. Anything else (for
    /// example a temp file on another volume) is copied in through [`Self::stage_stream`] and
    /// the original is deleted.
    pub async fn stage_file(&self, temp: TempPath) -> FilesResult<StagedBlob> {
        let in_temp_area = temp
            .parent()
            .and_then(|p| p.canonicalize().ok())
            .is_some_and(|p| p == self.resolver.temp_dir());

        let mut file = tokio::fs::File::open(&temp).await?;
        if !in_temp_area {
            tracing::debug!(source = %temp.display(), "copying foreign temp file into store");
            return self.stage_stream(file).await;
        }

        let mut hasher = Sha256::new();
        let mut head = Vec::with_capacity(SNIFF_LEN);
        let mut size = 0u64;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            if head.len() < SNIFF_LEN {
                let take = (SNIFF_LEN - head.len()).min(n);
                head.extend_from_slice(&buf[..take]);
            }
            size += n as u64;
        }

        Ok(StagedBlob {
            temp,
            hash: ContentHash::from_digest(&hasher.finalize().into()),
            size,
            head,
        })
    }

    /// Validates, promotes and records a staged blob.
    ///
    /// Under the blob's lock: if a blob already exists and `overwrite` is false the body write
    /// is skipped, otherwise the temp file is renamed into place. The sidecar entry is then
    /// appended in the same critical section, so it never points at a path that is not there.
    ///
    /// # Errors
    ///
    /// - `FilesError::ContentMismatch` if the bytes do not fit `extension` (nothing is written)
    /// - `FilesError::CorruptSidecar` if the existing sidecar cannot be parsed
    /// - `FilesError::Io` for disk failures
    ///
    /// On every error the temp file is removed, and a blob created by this call is removed
    /// again if its sidecar append fails.
    #[tracing::instrument(level = "debug", skip(self, staged, entry), fields(hash = %staged.hash))]
    pub async fn commit(
        &self,
        staged: StagedBlob,
        extension: &FileExtension,
        entry: SidecarEntry,
        overwrite: bool,
    ) -> FilesResult<StoredBlob> {
        validate_content(&staged.head, extension)?;

        let StagedBlob {
            temp, hash, size, ..
        } = staged;
        let final_path = self.resolver.full_path(&hash, extension);
        let guard = self.locks.lock(&final_path).await;

        let existed = tokio::fs::try_exists(&final_path).await?;
        let deduplicated = existed && !overwrite;
        if deduplicated {
            tracing::debug!(path = %final_path.display(), "blob already stored, skipping write");
            drop(temp);
        } else {
            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            promote(temp, final_path.clone()).await?;
        }

        if let Err(e) = self.sidecar.append_locked(&guard, entry).await {
            if !existed {
                if let Err(cleanup) = tokio::fs::remove_file(&final_path).await {
                    tracing::warn!(
                        path = %final_path.display(),
                        "failed to remove blob after sidecar error: {}",
                        cleanup
                    );
                }
            }
            return Err(e);
        }

        let relative_path = self
            .resolver
            .relative_path(&hash, extension);
        Ok(StoredBlob {
            hash,
            extension: extension.clone(),
            size,
            path: final_path,
            relative_path,
            deduplicated,
            created: !existed,
        })
    }

    /// Stages `reader` and commits it in one call.
    ///
    /// When `expected` is given the computed digest must match it.
    pub async fn save<R>(
        &self,
        reader: R,
        extension: &FileExtension,
        entry: SidecarEntry,
        expected: Option<&ContentHash>,
        overwrite: bool,
    ) -> FilesResult<StoredBlob>
    where
        R: AsyncRead + Unpin,
    {
        let staged = self.stage_stream(reader).await?;
        if let Some(expected) = expected {
            staged.ensure_hash(expected)?;
        }
        self.commit(staged, extension, entry, overwrite).await
    }

    /// Opens a blob for reading.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::NotFound` if no such blob exists.
    pub async fn open(
        &self,
        hash: &ContentHash,
        extension: &FileExtension,
    ) -> FilesResult<tokio::fs::File> {
        self.open_path(&self.resolver.full_path(hash, extension))
            .await
    }

    /// Opens a blob by absolute path, as returned by the resolver.
    pub async fn open_path(&self, path: &Path) -> FilesResult<tokio::fs::File> {
        match tokio::fs::File::open(path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FilesError::NotFound(
                format!("blob not found: {}", path.display()),
            )),
            Err(e) => Err(FilesError::Io(e)),
        }
    }

    pub async fn exists(&self, hash: &ContentHash, extension: &FileExtension) -> FilesResult<bool> {
        Ok(tokio::fs::try_exists(self.resolver.full_path(hash, extension)).await?)
    }

    /// Undoes a successful [`ContentStore::commit`] whose caller could not record it.
    ///
    /// Removes the sidecar entry for `ref_id`. A blob the commit created is removed as well
    /// once no other entry refers to it; a blob that was already there is left alone.
    pub async fn retract(&self, stored: &StoredBlob, ref_id: VaultId) -> FilesResult<()> {
        let guard = self.locks.lock(&stored.path).await;
        let remaining = self.sidecar.remove_entry_locked(&guard, ref_id).await?;
        if stored.created && remaining.is_empty() {
            match tokio::fs::remove_file(&stored.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(FilesError::Io(e)),
            }
        }
        tracing::debug!(
            path = %stored.path.display(),
            ref_id = %ref_id,
            blob_removed = stored.created && remaining.is_empty(),
            "commit retracted"
        );
        Ok(())
    }

    /// Removes a blob and its sidecar. Absent blobs are not an error.
    pub async fn delete(&self, hash: &ContentHash, extension: &FileExtension) -> FilesResult<()> {
        let path = self.resolver.full_path(hash, extension);
        let guard = self.locks.lock(&path).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::info!(path = %path.display(), "blob deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(FilesError::Io(e)),
        }
        self.sidecar.remove_locked(&guard).await
    }
}

/// Renames a temp file over its final name.
///
/// Both paths are under the storage root, so this is a same-volume rename. Windows cannot
/// rename over an existing file reliably, so the target is deleted first there.
async fn promote(temp: TempPath, target: PathBuf) -> FilesResult<()> {
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        #[cfg(windows)]
        if target.exists() {
            std::fs::remove_file(&target)?;
        }
        temp.persist(&target).map_err(|e| e.error)
    })
    .await
    .map_err(|e| std::io::Error::other(format!("promote task failed: {e}")))??;
    Ok(())
}
