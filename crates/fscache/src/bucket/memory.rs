//! In-memory bucket.
//!
//! Used for testing and demos. All data is ephemeral. Every remote call is
//! counted so tests can assert that a path was served without the remote.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use super::Bucket;
use crate::error::{CacheError, CacheResult};
use crate::types::FileRecord;

/// Entry in the memory bucket.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Vec<u8>, record: FileRecord },
    Directory { record: FileRecord },
}

impl Entry {
    fn record(&self) -> &FileRecord {
        match self {
            Entry::File { record, .. } => record,
            Entry::Directory { record } => record,
        }
    }
}

/// Number of remote operations served so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketCalls {
    pub stat: usize,
    pub readdir: usize,
    pub read: usize,
}

impl BucketCalls {
    /// Total of all operations.
    pub fn total(&self) -> usize {
        self.stat + self.readdir + self.read
    }
}

/// In-memory bucket.
///
/// Thread-safe via internal `RwLock`.
#[derive(Debug)]
pub struct MemoryBucket {
    entries: RwLock<HashMap<PathBuf, Entry>>,
    stats: AtomicUsize,
    readdirs: AtomicUsize,
    reads: AtomicUsize,
}

impl Default for MemoryBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBucket {
    /// Create a bucket holding only an empty root directory.
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            PathBuf::new(),
            Entry::Directory {
                record: FileRecord::directory("", SystemTime::now()),
            },
        );
        Self {
            entries: RwLock::new(entries),
            stats: AtomicUsize::new(0),
            readdirs: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    /// Normalize a path: remove leading `/`, resolve `.` and `..`.
    fn normalize(path: &Path) -> PathBuf {
        let mut result = PathBuf::new();
        for component in path.components() {
            match component {
                Component::ParentDir => {
                    result.pop();
                }
                Component::Normal(s) => result.push(s),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        result
    }

    fn base_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Add a file with the given content and modification time.
    ///
    /// Missing parent directories are created. Replaces any existing file.
    pub fn insert_file(
        &self,
        path: impl AsRef<Path>,
        data: impl Into<Vec<u8>>,
        mtime: SystemTime,
    ) -> CacheResult<FileRecord> {
        let normalized = Self::normalize(path.as_ref());
        if normalized.as_os_str().is_empty() {
            return Err(CacheError::is_a_directory("/"));
        }
        let data = data.into();
        let record = FileRecord::file(Self::base_name(&normalized), data.len() as i64, mtime);

        let mut entries = self.lock_write()?;
        Self::ensure_parents(&mut entries, &normalized, mtime);
        if let Some(Entry::Directory { .. }) = entries.get(&normalized) {
            return Err(CacheError::is_a_directory(normalized.display().to_string()));
        }
        entries.insert(
            normalized,
            Entry::File {
                data,
                record: record.clone(),
            },
        );
        Ok(record)
    }

    /// Add a directory (and any missing parents).
    pub fn insert_dir(&self, path: impl AsRef<Path>, mtime: SystemTime) -> CacheResult<FileRecord> {
        let normalized = Self::normalize(path.as_ref());
        let mut entries = self.lock_write()?;
        Self::ensure_parents(&mut entries, &normalized, mtime);
        match entries.get(&normalized) {
            Some(Entry::Directory { record }) => Ok(record.clone()),
            Some(Entry::File { .. }) => Err(CacheError::not_a_directory(
                normalized.display().to_string(),
            )),
            None => {
                let record = FileRecord::directory(Self::base_name(&normalized), mtime);
                entries.insert(
                    normalized,
                    Entry::Directory {
                        record: record.clone(),
                    },
                );
                Ok(record)
            }
        }
    }

    /// Remove a path and everything below it.
    pub fn remove(&self, path: impl AsRef<Path>) -> CacheResult<()> {
        let normalized = Self::normalize(path.as_ref());
        if normalized.as_os_str().is_empty() {
            return Err(CacheError::invalid_path("cannot remove root"));
        }
        let mut entries = self.lock_write()?;
        if entries.remove(&normalized).is_none() {
            return Err(CacheError::not_found(normalized.display().to_string()));
        }
        entries.retain(|k, _| !k.starts_with(&normalized));
        Ok(())
    }

    /// Remote operations served so far.
    pub fn calls(&self) -> BucketCalls {
        BucketCalls {
            stat: self.stats.load(Ordering::SeqCst),
            readdir: self.readdirs.load(Ordering::SeqCst),
            read: self.reads.load(Ordering::SeqCst),
        }
    }

    fn ensure_parents(entries: &mut HashMap<PathBuf, Entry>, path: &Path, mtime: SystemTime) {
        let mut current = PathBuf::new();
        for component in path.parent().into_iter().flat_map(|p| p.components()) {
            if let Component::Normal(s) = component {
                current.push(s);
                entries.entry(current.clone()).or_insert_with(|| Entry::Directory {
                    record: FileRecord::directory(s.to_string_lossy(), mtime),
                });
            }
        }
    }

    fn lock_write(&self) -> CacheResult<std::sync::RwLockWriteGuard<'_, HashMap<PathBuf, Entry>>> {
        self.entries
            .write()
            .map_err(|_| CacheError::other("lock poisoned"))
    }

    fn lock_read(&self) -> CacheResult<std::sync::RwLockReadGuard<'_, HashMap<PathBuf, Entry>>> {
        self.entries
            .read()
            .map_err(|_| CacheError::other("lock poisoned"))
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    async fn stat(&self, path: &Path) -> CacheResult<FileRecord> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        let normalized = Self::normalize(path);
        let entries = self.lock_read()?;
        entries
            .get(&normalized)
            .map(|e| e.record().clone())
            .ok_or_else(|| CacheError::not_found(path.display().to_string()))
    }

    async fn readdir(&self, path: &Path) -> CacheResult<Vec<FileRecord>> {
        self.readdirs.fetch_add(1, Ordering::SeqCst);
        let normalized = Self::normalize(path);
        let entries = self.lock_read()?;

        match entries.get(&normalized) {
            Some(Entry::Directory { .. }) => {}
            Some(Entry::File { .. }) => {
                return Err(CacheError::not_a_directory(path.display().to_string()));
            }
            None => return Err(CacheError::not_found(path.display().to_string())),
        }

        let mut result: Vec<FileRecord> = entries
            .iter()
            .filter(|(entry_path, _)| {
                entry_path.parent() == Some(normalized.as_path()) && **entry_path != normalized
            })
            .map(|(_, entry)| entry.record().clone())
            .collect();

        // Sort for consistent ordering
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn read(&self, path: &Path, offset: u64, size: u32) -> CacheResult<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let normalized = Self::normalize(path);
        let entries = self.lock_read()?;

        match entries.get(&normalized) {
            Some(Entry::File { data, .. }) => {
                let start = (offset as usize).min(data.len());
                let end = (start + size as usize).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(Entry::Directory { .. }) => {
                Err(CacheError::is_a_directory(path.display().to_string()))
            }
            None => Err(CacheError::not_found(path.display().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[tokio::test]
    async fn test_insert_and_read() {
        let bucket = MemoryBucket::new();
        bucket.insert_file("test.txt", "hello world", UNIX_EPOCH).unwrap();

        let data = bucket.read(Path::new("test.txt"), 0, 100).await.unwrap();
        assert_eq!(data, b"hello world");

        let data = bucket.read(Path::new("/test.txt"), 6, 5).await.unwrap();
        assert_eq!(data, b"world");

        assert_eq!(bucket.read_all(Path::new("test.txt")).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_readdir() {
        let bucket = MemoryBucket::new();
        bucket.insert_dir("d/sub", UNIX_EPOCH).unwrap();
        bucket.insert_file("d/a.txt", "abc", UNIX_EPOCH).unwrap();
        bucket.insert_file("top.txt", "", UNIX_EPOCH).unwrap();

        let root = bucket.readdir(Path::new("/")).await.unwrap();
        let names: Vec<_> = root.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["d", "top.txt"]);

        let d = bucket.readdir(Path::new("/d")).await.unwrap();
        assert_eq!(d.len(), 2);
        assert_eq!(d[0].name, "a.txt");
        assert_eq!(d[0].size, 3);
        assert!(d[1].is_dir());
    }

    #[tokio::test]
    async fn test_stat_and_errors() {
        let bucket = MemoryBucket::new();
        bucket.insert_file("a/b/c.txt", "x", UNIX_EPOCH).unwrap();

        assert!(bucket.stat(Path::new("a/b")).await.unwrap().is_dir());
        assert_eq!(bucket.stat(Path::new("a/./b/../b/c.txt")).await.unwrap().size, 1);
        assert!(bucket.stat(Path::new("missing")).await.unwrap_err().is_not_found());
        assert!(matches!(
            bucket.readdir(Path::new("a/b/c.txt")).await,
            Err(CacheError::NotADirectory(_))
        ));
        assert!(matches!(
            bucket.read(Path::new("a"), 0, 1).await,
            Err(CacheError::IsADirectory(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_subtree() {
        let bucket = MemoryBucket::new();
        bucket.insert_file("d/a.txt", "x", UNIX_EPOCH).unwrap();
        bucket.remove("d").unwrap();
        assert!(bucket.stat(Path::new("d/a.txt")).await.is_err());
        assert!(bucket.readdir(Path::new("")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_call_counting() {
        let bucket = MemoryBucket::new();
        bucket.insert_file("a.txt", "abc", UNIX_EPOCH).unwrap();
        assert_eq!(bucket.calls().total(), 0);

        bucket.stat(Path::new("a.txt")).await.unwrap();
        bucket.readdir(Path::new("")).await.unwrap();
        bucket.read(Path::new("a.txt"), 0, 10).await.unwrap();
        assert_eq!(
            bucket.calls(),
            BucketCalls {
                stat: 1,
                readdir: 1,
                read: 1
            }
        );
    }
}
