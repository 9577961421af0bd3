//! Remote bucket contract.
//!
//! A bucket is the opaque remote storage the cache mirrors. The trait is
//! path based (no handle state) with explicit offset/size reads, so a
//! bucket can sit behind any RPC transport. Handles with a cursor are built
//! on top of it by [`crate::CachedFile`].
//!
//! Backends:
//!
//! - [`MemoryBucket`] - in-memory tree (tests, demos)
//! - [`LocalBucket`] - a directory on disk serving as the remote

use async_trait::async_trait;
use std::path::Path;

use crate::error::CacheResult;
use crate::types::FileRecord;

mod local;
mod memory;

pub use local::LocalBucket;
pub use memory::{BucketCalls, MemoryBucket};

/// Default chunk size for whole-file transfers.
pub const READ_CHUNK: u32 = 256 * 1024;

/// Remote storage operations.
///
/// Paths are relative to the bucket root; a leading `/` is ignored and the
/// empty path names the root directory.
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Metadata of one path.
    async fn stat(&self, path: &Path) -> CacheResult<FileRecord>;

    /// Children of a directory (no pagination).
    async fn readdir(&self, path: &Path) -> CacheResult<Vec<FileRecord>>;

    /// Read up to `size` bytes starting at `offset`.
    ///
    /// Returns fewer bytes if EOF is reached.
    async fn read(&self, path: &Path, offset: u64, size: u32) -> CacheResult<Vec<u8>>;

    /// Returns true if the bucket rejects writes.
    fn read_only(&self) -> bool {
        true
    }

    /// Read entire file contents.
    async fn read_all(&self, path: &Path) -> CacheResult<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let chunk = self.read(path, data.len() as u64, READ_CHUNK).await?;
            if chunk.is_empty() {
                return Ok(data);
            }
            data.extend_from_slice(&chunk);
        }
    }
}
