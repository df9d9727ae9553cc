//! JSON sidecars listing the logical files that share a blob.
//!
//! A sidecar sits next to its blob as `<blob>.meta.json` and holds a JSON array:
//!
//! ```json
//! [
//!   { "refId": "…", "accessGroupId": "…", "publicDownload": false }
//! ]
//! ```
//!
//! Entries are appended in call order and only removed again when the save that added them
//! is rolled back. The whole array is rewritten through a temp file and rename on each
//! change, so a reader sees either the old or the new array.

use crate::locks::{PathLockGuard, PathLocks};
use crate::paths::PathResolver;
use crate::{FilesError, FilesResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use vault_uuid::VaultId;

/// One logical file's claim on a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarEntry {
    pub ref_id: VaultId,
    pub access_group_id: VaultId,
    pub public_download: bool,
}

impl SidecarEntry {
    pub fn new(ref_id: VaultId, access_group_id: VaultId, public_download: bool) -> Self {
        Self {
            ref_id,
            access_group_id,
            public_download,
        }
    }
}

/// Reads and appends sidecars, serialising writers per blob path.
#[derive(Debug, Clone)]
pub struct MetadataSidecar {
    locks: Arc<PathLocks>,
}

impl MetadataSidecar {
    pub fn new(locks: Arc<PathLocks>) -> Self {
        Self { locks }
    }

    /// Appends `entry` to the sidecar of `blob_path`, taking the blob's lock.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::CorruptSidecar` if the existing file cannot be parsed (it is left
    /// untouched), or `FilesError::Io` if reading or writing fails.
    pub async fn append(&self, blob_path: &Path, entry: SidecarEntry) -> FilesResult<()> {
        let guard = self.locks.lock(blob_path).await;
        self.append_locked(&guard, entry).await
    }

    /// Appends while the caller already holds the lock for the guarded blob path.
    pub async fn append_locked(
        &self,
        guard: &PathLockGuard,
        entry: SidecarEntry,
    ) -> FilesResult<()> {
        let blob_path = guard.path();
        let mut entries = self.entries(blob_path).await?;
        entries.push(entry);
        write_atomic(PathResolver::sidecar_path(blob_path), &entries).await?;
        tracing::debug!(
            blob = %blob_path.display(),
            count = entries.len(),
            "sidecar entry appended"
        );
        Ok(())
    }

    /// All entries for `blob_path` in append order. A missing sidecar yields an empty list.
    pub async fn entries(&self, blob_path: &Path) -> FilesResult<Vec<SidecarEntry>> {
        let path = PathResolver::sidecar_path(blob_path);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(FilesError::Io(e)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&raw).map_err(|source| FilesError::CorruptSidecar { path, source })
    }

    /// Returns the ref id of the first entry that is publicly downloadable or whose access
    /// group is in `caller_groups`.
    ///
    /// # Errors
    ///
    /// `FilesError::NotFound` when the sidecar is missing or empty, `FilesError::Unauthorized`
    /// when it has entries but none match.
    pub async fn resolve_access(
        &self,
        blob_path: &Path,
        caller_groups: &HashSet<VaultId>,
    ) -> FilesResult<VaultId> {
        self.resolve_with(blob_path, |entry| {
            entry.public_download || caller_groups.contains(&entry.access_group_id)
        })
        .await
    }

    /// Like [`MetadataSidecar::resolve_access`] with a caller-provided predicate.
    pub async fn resolve_with<F>(&self, blob_path: &Path, mut allow: F) -> FilesResult<VaultId>
    where
        F: FnMut(&SidecarEntry) -> bool,
    {
        let entries = self.entries(blob_path).await?;
        if entries.is_empty() {
            return Err(FilesError::NotFound(format!(
                "no metadata for {}",
                blob_path.display()
            )));
        }
        entries
            .iter()
            .find(|entry| allow(entry))
            .map(|entry| entry.ref_id)
            .ok_or_else(|| {
                FilesError::Unauthorized(format!(
                    "no entry for {} grants access",
                    blob_path.display()
                ))
            })
    }

    /// Drops every entry for `ref_id` while the caller holds the blob's lock and returns the
    /// entries that remain. The sidecar file is deleted once nothing remains.
    pub async fn remove_entry_locked(
        &self,
        guard: &PathLockGuard,
        ref_id: VaultId,
    ) -> FilesResult<Vec<SidecarEntry>> {
        let blob_path = guard.path();
        let mut entries = self.entries(blob_path).await?;
        let before = entries.len();
        entries.retain(|entry| entry.ref_id != ref_id);
        if entries.len() == before {
            return Ok(entries);
        }
        if entries.is_empty() {
            self.remove_locked(guard).await?;
        } else {
            write_atomic(PathResolver::sidecar_path(blob_path), &entries).await?;
        }
        tracing::debug!(
            blob = %blob_path.display(),
            ref_id = %ref_id,
            remaining = entries.len(),
            "sidecar entry removed"
        );
        Ok(entries)
    }

    /// Deletes the sidecar while the caller holds the blob's lock. Absent files are ignored.
    pub async fn remove_locked(&self, guard: &PathLockGuard) -> FilesResult<()> {
        match tokio::fs::remove_file(PathResolver::sidecar_path(guard.path())).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FilesError::Io(e)),
        }
    }
}

async fn write_atomic(path: PathBuf, entries: &[SidecarEntry]) -> FilesResult<()> {
    let bytes = serde_json::to_vec_pretty(entries).map_err(std::io::Error::other)?;
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| std::io::Error::other("sidecar path has no parent"))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".meta-")
            .tempfile_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::other(format!("sidecar write task failed: {e}")))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, MetadataSidecar) {
        let temp = TempDir::new().unwrap();
        let blob = temp.path().join("blob.txt");
        fs::write(&blob, "content").unwrap();
        let sidecar = MetadataSidecar::new(Arc::new(PathLocks::new()));
        (temp, blob, sidecar)
    }

    #[tokio::test]
    async fn test_appended_entries_read_back_in_order() {
        let (_temp, blob, sidecar) = setup();
        let entries: Vec<_> = (0..3)
            .map(|i| SidecarEntry::new(VaultId::new(), VaultId::new(), i == 1))
            .collect();
        for entry in &entries {
            sidecar.append(&blob, entry.clone()).await.unwrap();
        }
        assert_eq!(sidecar.entries(&blob).await.unwrap(), entries);
    }

    #[tokio::test]
    async fn test_on_disk_format_uses_camel_case() {
        let (_temp, blob, sidecar) = setup();
        let entry = SidecarEntry::new(VaultId::new(), VaultId::new(), true);
        sidecar.append(&blob, entry.clone()).await.unwrap();

        let raw = fs::read_to_string(PathResolver::sidecar_path(&blob)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[0]["refId"], entry.ref_id.to_string());
        assert_eq!(json[0]["accessGroupId"], entry.access_group_id.to_string());
        assert_eq!(json[0]["publicDownload"], true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_lose_nothing() {
        let (_temp, blob, sidecar) = setup();
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let sidecar = sidecar.clone();
            let blob = blob.clone();
            tasks.push(tokio::spawn(async move {
                sidecar
                    .append(&blob, SidecarEntry::new(VaultId::new(), VaultId::new(), false))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(sidecar.entries(&blob).await.unwrap().len(), 32);
    }

    #[tokio::test]
    async fn test_resolve_access_rules() {
        let (_temp, blob, sidecar) = setup();
        let caller_groups: HashSet<VaultId> = HashSet::new();

        let missing = sidecar.resolve_access(&blob, &caller_groups).await;
        assert!(matches!(missing, Err(FilesError::NotFound(_))));

        let group = VaultId::new();
        let private = SidecarEntry::new(VaultId::new(), group, false);
        sidecar.append(&blob, private.clone()).await.unwrap();

        let denied = sidecar.resolve_access(&blob, &caller_groups).await;
        assert!(matches!(denied, Err(FilesError::Unauthorized(_))));

        let member: HashSet<VaultId> = [group].into_iter().collect();
        assert_eq!(
            sidecar.resolve_access(&blob, &member).await.unwrap(),
            private.ref_id
        );

        let public = SidecarEntry::new(VaultId::new(), VaultId::new(), true);
        sidecar.append(&blob, public.clone()).await.unwrap();
        assert_eq!(
            sidecar.resolve_access(&blob, &caller_groups).await.unwrap(),
            public.ref_id
        );
    }

    #[tokio::test]
    async fn test_empty_sidecar_is_not_found() {
        let (_temp, blob, sidecar) = setup();
        fs::write(PathResolver::sidecar_path(&blob), "[]").unwrap();
        let result = sidecar.resolve_access(&blob, &HashSet::new()).await;
        assert!(matches!(result, Err(FilesError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_entry_keeps_the_others() {
        let (_temp, blob, _) = setup();
        let locks = Arc::new(PathLocks::new());
        let sidecar = MetadataSidecar::new(locks.clone());
        let first = SidecarEntry::new(VaultId::new(), VaultId::new(), false);
        let second = SidecarEntry::new(VaultId::new(), VaultId::new(), true);
        sidecar.append(&blob, first.clone()).await.unwrap();
        sidecar.append(&blob, second.clone()).await.unwrap();

        let guard = locks.lock(&blob).await;
        let remaining = sidecar
            .remove_entry_locked(&guard, second.ref_id)
            .await
            .unwrap();
        drop(guard);

        assert_eq!(remaining, vec![first.clone()]);
        assert_eq!(sidecar.entries(&blob).await.unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn test_removing_last_entry_deletes_the_sidecar() {
        let (_temp, blob, _) = setup();
        let locks = Arc::new(PathLocks::new());
        let sidecar = MetadataSidecar::new(locks.clone());
        let only = SidecarEntry::new(VaultId::new(), VaultId::new(), false);
        sidecar.append(&blob, only.clone()).await.unwrap();

        let guard = locks.lock(&blob).await;
        let unknown = sidecar
            .remove_entry_locked(&guard, VaultId::new())
            .await
            .unwrap();
        assert_eq!(unknown.len(), 1);
        let remaining = sidecar.remove_entry_locked(&guard, only.ref_id).await.unwrap();
        drop(guard);

        assert!(remaining.is_empty());
        assert!(!PathResolver::sidecar_path(&blob).exists());
        assert!(blob.exists());
    }

    #[tokio::test]
    async fn test_corrupt_sidecar_is_reported_and_preserved() {
        let (_temp, blob, sidecar) = setup();
        let path = PathResolver::sidecar_path(&blob);
        fs::write(&path, "{not json").unwrap();

        let result = sidecar
            .append(&blob, SidecarEntry::new(VaultId::new(), VaultId::new(), false))
            .await;
        assert!(matches!(result, Err(FilesError::CorruptSidecar { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }
}
