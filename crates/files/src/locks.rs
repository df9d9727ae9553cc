//! Per-blob write serialisation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of async mutexes keyed by blob path.
///
/// Sidecars are rewritten whole on every append, so two writers for the same blob must never
/// overlap. Writers for different blobs proceed independently. Entries are dropped from the
/// registry once no guard or waiter holds them.
#[derive(Debug, Default)]
pub struct PathLocks {
    inner: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

/// Held for the duration of a blob write. Releases on drop.
#[derive(Debug)]
pub struct PathLockGuard {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
}

impl PathLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `path`.
    pub async fn lock(&self, path: &Path) -> PathLockGuard {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        PathLockGuard {
            path: path.to_path_buf(),
            _guard: mutex.lock_owned().await,
        }
    }

    /// Number of paths currently tracked.
    pub fn tracked(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_path_is_exclusive() {
        let locks = Arc::new(PathLocks::new());
        let path = PathBuf::from("/vault/ab/cd/blob.txt");

        let first = locks.lock(&path).await;
        let contender = {
            let locks = Arc::clone(&locks);
            let path = path.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&path).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(5), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_paths_do_not_block() {
        let locks = PathLocks::new();
        let _a = locks.lock(Path::new("/vault/a")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.lock(Path::new("/vault/b")))
            .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = PathLocks::new();
        {
            let guard = locks.lock(Path::new("/vault/a")).await;
            assert_eq!(guard.path(), Path::new("/vault/a"));
        }
        let _b = locks.lock(Path::new("/vault/b")).await;
        assert_eq!(locks.tracked(), 1);
    }
}
