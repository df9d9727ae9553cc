//! Path derivation and traversal checks for the storage root.

use crate::constants::{SIDECAR_SUFFIX, TEMP_DIR_NAME};
use crate::{FilesError, FilesResult};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use vault_types::{ContentHash, FileExtension};

/// Maps blob identities and caller-supplied names onto paths under one storage root.
///
/// The root is canonicalised at construction so every derived path, and every comparison
/// against the root, works on the resolved location rather than on whatever symlinks the
/// configured path contained.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Creates a resolver for an existing storage root directory.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::InvalidRootDirectory` if the path does not exist, is not a
    /// directory, or cannot be canonicalised.
    pub fn new(root: &Path) -> FilesResult<Self> {
        if !root.exists() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Directory does not exist: {}",
                root.display()
            )));
        }

        if !root.is_dir() {
            return Err(FilesError::InvalidRootDirectory(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        let root = root.canonicalize().map_err(|e| {
            FilesError::InvalidRootDirectory(format!(
                "Cannot canonicalize path {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for staged uploads. Lives under the root so promotion is a same-volume rename.
    pub fn temp_dir(&self) -> PathBuf {
        self.root.join(TEMP_DIR_NAME)
    }

    /// Blob path relative to the root: `ab/cd/<hash>.<ext>`.
    ///
    /// This is the public "file path" handed to clients, and the form accepted back by
    /// [`PathResolver::full_path_if_safe`].
    pub fn relative_path(&self, hash: &ContentHash, extension: &FileExtension) -> PathBuf {
        let (s1, s2) = hash.shards();
        PathBuf::from(s1)
            .join(s2)
            .join(format!("{}.{}", hash.as_str(), extension.as_str()))
    }

    /// Absolute blob path for a `(hash, extension)` pair.
    ///
    /// Pure; performs no I/O. Both inputs are validated types whose characters cannot form a
    /// separator or a relative component, so the result always lies under the root.
    pub fn full_path(&self, hash: &ContentHash, extension: &FileExtension) -> PathBuf {
        self.root.join(self.relative_path(hash, extension))
    }

    /// Resolves a caller-supplied relative path under the root.
    ///
    /// The candidate is normalised lexically first (`.` dropped, `..` popped, backslashes
    /// treated as separators). Absolute paths, drive prefixes and any `..` that would climb
    /// above the root are rejected. If the resolved path, or its nearest existing ancestor,
    /// exists on disk it is canonicalised and must still sit under the root, which rules out
    /// escapes through symlinks planted inside the storage tree.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::PathTraversal` for any candidate that does not resolve to a strict
    /// descendant of the root, and `FilesError::Io` if a filesystem check fails.
    pub fn full_path_if_safe(&self, candidate: &str) -> FilesResult<PathBuf> {
        let normalised = normalise_relative(candidate)?;
        let path = self.root.join(&normalised);

        let mut probe = path.as_path();
        loop {
            match std::fs::symlink_metadata(probe) {
                Ok(_) => {
                    let canonical = probe.canonicalize().map_err(|_| {
                        FilesError::PathTraversal(format!(
                            "unresolvable link in path: {}",
                            candidate
                        ))
                    })?;
                    if !canonical.starts_with(&self.root) {
                        return Err(FilesError::PathTraversal(candidate.to_owned()));
                    }
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(FilesError::Io(err)),
            }
            match probe.parent() {
                Some(parent) if parent.starts_with(&self.root) => probe = parent,
                _ => break,
            }
        }

        Ok(path)
    }

    /// Path of the sidecar belonging to `blob_path`.
    pub fn sidecar_path(blob_path: &Path) -> PathBuf {
        let mut name: OsString = blob_path.as_os_str().to_owned();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    /// Strips the root prefix, yielding the public relative path.
    pub fn relative_to_root<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }
}

fn normalise_relative(candidate: &str) -> FilesResult<PathBuf> {
    let unified = candidate.replace('\\', "/");
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(FilesError::PathTraversal(candidate.to_owned()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(FilesError::PathTraversal(candidate.to_owned()));
            }
        }
    }

    if parts.is_empty() {
        return Err(FilesError::PathTraversal(candidate.to_owned()));
    }

    Ok(parts.iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn resolver() -> (TempDir, PathResolver) {
        let temp = TempDir::new().unwrap();
        let resolver = PathResolver::new(temp.path()).unwrap();
        (temp, resolver)
    }

    #[test]
    fn test_new_rejects_missing_root() {
        let temp = TempDir::new().unwrap();
        let result = PathResolver::new(&temp.path().join("missing"));
        assert!(matches!(result, Err(FilesError::InvalidRootDirectory(_))));
    }

    #[test]
    fn test_new_rejects_file_root() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("file.txt");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            PathResolver::new(&file),
            Err(FilesError::InvalidRootDirectory(_))
        ));
    }

    #[test]
    fn test_full_path_is_sharded_and_distinct_per_extension() {
        let (_temp, resolver) = resolver();
        let hash = ContentHash::from_digest(&[0x12; 32]);
        let mp4 = resolver.full_path(&hash, &FileExtension::new("mp4").unwrap());
        let webm = resolver.full_path(&hash, &FileExtension::new("webm").unwrap());

        assert_ne!(mp4, webm);
        assert!(mp4.starts_with(resolver.root()));
        let relative = resolver.relative_to_root(&mp4).unwrap();
        assert_eq!(
            relative,
            Path::new("12").join("12").join(format!("{}.mp4", hash))
        );
    }

    #[test]
    fn test_traversal_attempts_are_rejected() {
        let (_temp, resolver) = resolver();
        for candidate in [
            "../../etc/passwd",
            "a/../../b",
            "/etc/passwd",
            "..\\..\\secret",
            "",
            ".",
            "a/..",
        ] {
            assert!(
                matches!(
                    resolver.full_path_if_safe(candidate),
                    Err(FilesError::PathTraversal(_))
                ),
                "expected traversal error for {candidate:?}"
            );
        }
    }

    #[test]
    fn test_safe_names_resolve_under_root() {
        let (_temp, resolver) = resolver();
        let path = resolver.full_path_if_safe("valid-name.mp4").unwrap();
        assert_eq!(path, resolver.root().join("valid-name.mp4"));

        let nested = resolver.full_path_if_safe("ab/./cd/../cd/file.txt").unwrap();
        assert_eq!(nested, resolver.root().join("ab").join("cd").join("file.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let (temp, resolver) = resolver();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), "s").unwrap();
        std::os::unix::fs::symlink(outside.path(), temp.path().join("link")).unwrap();

        assert!(matches!(
            resolver.full_path_if_safe("link/secret.txt"),
            Err(FilesError::PathTraversal(_))
        ));
        assert!(matches!(
            resolver.full_path_if_safe("link/not-yet-there.txt"),
            Err(FilesError::PathTraversal(_))
        ));
    }

    #[test]
    fn test_sidecar_path_appends_suffix() {
        let blob = Path::new("/srv/ab/cd/hash.mp4");
        assert_eq!(
            PathResolver::sidecar_path(blob),
            PathBuf::from("/srv/ab/cd/hash.mp4.meta.json")
        );
    }
}
