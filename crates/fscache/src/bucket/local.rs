//! Local directory bucket.
//!
//! Serves a real directory as the remote side of a mirror, with path
//! security to prevent escaping the root directory.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::Bucket;
use crate::error::{CacheError, CacheResult};
use crate::types::FileRecord;

/// Bucket backed by a local directory.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/assets`, then `read("img/logo.png")` reads
/// `/srv/assets/img/logo.png`.
///
/// Path security is enforced: attempts to escape via `..` or symlinks
/// pointing outside the root are blocked.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    root: PathBuf,
}

impl LocalBucket {
    /// Create a bucket rooted at the given path.
    ///
    /// The root is canonicalized at construction time to handle symlinks
    /// (e.g. macOS `/tmp` → `/private/tmp`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self { root }
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path to an absolute path within the root.
    ///
    /// Returns an error if the path escapes the root.
    fn resolve(&self, path: &Path) -> CacheResult<PathBuf> {
        let path = path.strip_prefix("/").unwrap_or(path);
        if path.as_os_str().is_empty() {
            return Ok(self.root.clone());
        }
        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(CacheError::path_escapes_root(path.display().to_string()));
        }

        let full = self.root.join(path);
        let canonical = dunce::canonicalize(&full)
            .map_err(|e| CacheError::local(path.display().to_string(), e))?;
        if !canonical.starts_with(&self.root) {
            return Err(CacheError::path_escapes_root(format!(
                "{} is not under {}",
                canonical.display(),
                self.root.display()
            )));
        }
        Ok(canonical)
    }
}

fn not_found_or(path: &Path, e: std::io::Error) -> CacheError {
    if e.kind() == std::io::ErrorKind::NotFound {
        CacheError::not_found(path.display().to_string())
    } else {
        CacheError::local(path.display().to_string(), e)
    }
}

#[async_trait]
impl Bucket for LocalBucket {
    async fn stat(&self, path: &Path) -> CacheResult<FileRecord> {
        let full_path = self.resolve(path).map_err(|e| match e {
            CacheError::Local { source, .. } => not_found_or(path, source),
            other => other,
        })?;
        let meta = fs::metadata(&full_path).await.map_err(|e| not_found_or(path, e))?;
        let name = full_path
            .file_name()
            .filter(|_| full_path != self.root)
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(FileRecord::from_metadata(name, &meta))
    }

    async fn readdir(&self, path: &Path) -> CacheResult<Vec<FileRecord>> {
        let full_path = self.resolve(path)?;
        let meta = fs::metadata(&full_path).await.map_err(|e| not_found_or(path, e))?;
        if !meta.is_dir() {
            return Err(CacheError::not_a_directory(path.display().to_string()));
        }

        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full_path).await?;
        while let Some(entry) = dir.next_entry().await? {
            // Dangling links are skipped.
            let Ok(meta) = fs::metadata(entry.path()).await else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(FileRecord::from_metadata(name, &meta));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> CacheResult<Vec<u8>> {
        let full_path = self.resolve(path)?;
        let mut file = fs::File::open(&full_path)
            .await
            .map_err(|e| not_found_or(path, e))?;
        if file.metadata().await?.is_dir() {
            return Err(CacheError::is_a_directory(path.display().to_string()));
        }

        file.seek(std::io::SeekFrom::Start(offset)).await?;

        let mut buffer = Vec::with_capacity(size as usize);
        (&mut file).take(size as u64).read_to_end(&mut buffer).await?;
        Ok(buffer)
    }
}
