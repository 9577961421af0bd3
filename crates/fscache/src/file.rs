//! Handles returned by [`CachedFs::open`](crate::CachedFs::open).

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::bucket::{Bucket, READ_CHUNK};
use crate::cached::download_file;
use crate::error::{CacheError, CacheResult};
use crate::remote::{NotifyFile, Population};
use crate::types::FileRecord;

/// An open file or directory.
///
/// Depending on where the answer came from, reads are served from a
/// materialized local file or through the remote bucket. Directory
/// listings are always fully resolved at open time.
#[derive(Debug)]
pub struct CachedFile {
    name: String,
    record: FileRecord,
    inner: Inner,
}

#[derive(Debug)]
enum Inner {
    Local(fs::File),
    Dir {
        entries: Vec<FileRecord>,
        population: Option<Population>,
    },
    Remote(RemoteFile),
}

/// Where a fetched file is materialized on close.
pub(crate) struct Persist {
    pub(crate) local_file: PathBuf,
    pub(crate) notify: Option<Arc<dyn NotifyFile>>,
}

struct RemoteFile {
    bucket: Arc<dyn Bucket>,
    path: PathBuf,
    pos: u64,
    persist: Option<Persist>,
}

impl std::fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFile")
            .field("path", &self.path)
            .field("pos", &self.pos)
            .field("persist", &self.persist.as_ref().map(|p| &p.local_file))
            .finish()
    }
}

impl CachedFile {
    pub(crate) fn local_file(name: impl Into<String>, record: FileRecord, file: fs::File) -> Self {
        Self {
            name: name.into(),
            record,
            inner: Inner::Local(file),
        }
    }

    pub(crate) fn dir(
        name: impl Into<String>,
        record: FileRecord,
        entries: Vec<FileRecord>,
        population: Option<Population>,
    ) -> Self {
        Self {
            name: name.into(),
            record,
            inner: Inner::Dir {
                entries,
                population,
            },
        }
    }

    pub(crate) fn remote_file(
        name: impl Into<String>,
        record: FileRecord,
        bucket: Arc<dyn Bucket>,
        path: impl Into<PathBuf>,
        persist: Option<Persist>,
    ) -> Self {
        Self {
            name: name.into(),
            record,
            inner: Inner::Remote(RemoteFile {
                bucket,
                path: path.into(),
                pos: 0,
                persist,
            }),
        }
    }

    /// Caller-visible name this handle was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metadata of the opened path.
    pub fn stat(&self) -> &FileRecord {
        &self.record
    }

    /// Returns true if this handle is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self.inner, Inner::Dir { .. })
    }

    /// Returns true if reads go to the remote bucket.
    pub fn is_remote(&self) -> bool {
        matches!(self.inner, Inner::Remote(_))
    }

    /// Read into `buf` at the current position, returning bytes read (0 at EOF).
    pub async fn read(&mut self, buf: &mut [u8]) -> CacheResult<usize> {
        match &mut self.inner {
            Inner::Local(file) => file
                .read(buf)
                .await
                .map_err(|e| CacheError::local(&self.name, e)),
            Inner::Dir { .. } => Err(CacheError::is_a_directory(&self.name)),
            Inner::Remote(remote) => {
                let want = buf.len().min(u32::MAX as usize) as u32;
                let data = remote.bucket.read(&remote.path, remote.pos, want).await?;
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                remote.pos += n as u64;
                Ok(n)
            }
        }
    }

    /// Read from the current position to EOF.
    pub async fn read_to_end(&mut self) -> CacheResult<Vec<u8>> {
        let mut data = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK as usize];
        loop {
            let n = self.read(&mut chunk).await?;
            if n == 0 {
                return Ok(data);
            }
            data.extend_from_slice(&chunk[..n]);
        }
    }

    /// Move the read position; returns the new offset from the start.
    pub async fn seek(&mut self, pos: SeekFrom) -> CacheResult<u64> {
        match &mut self.inner {
            Inner::Local(file) => file
                .seek(pos)
                .await
                .map_err(|e| CacheError::local(&self.name, e)),
            Inner::Dir { .. } => match pos {
                SeekFrom::Start(0) => Ok(0),
                _ => Err(CacheError::is_a_directory(&self.name)),
            },
            Inner::Remote(remote) => {
                let size = self.record.size.max(0) as u64;
                let target = match pos {
                    SeekFrom::Start(offset) => Some(offset),
                    SeekFrom::Current(delta) => remote.pos.checked_add_signed(delta),
                    SeekFrom::End(delta) => size.checked_add_signed(delta),
                };
                let target = target.ok_or_else(|| {
                    CacheError::invalid_path(format!("{}: seek before start", self.name))
                })?;
                remote.pos = target;
                Ok(target)
            }
        }
    }

    /// All entries of a directory.
    pub async fn readdir(&mut self) -> CacheResult<Vec<FileRecord>> {
        match &self.inner {
            Inner::Dir { entries, .. } => Ok(entries.clone()),
            _ => Err(CacheError::not_a_directory(&self.name)),
        }
    }

    /// Take the background stub population started when this directory was
    /// synced from the remote, if any.
    pub fn population(&mut self) -> Option<Population> {
        match &mut self.inner {
            Inner::Dir { population, .. } => population.take(),
            _ => None,
        }
    }

    /// Close the handle.
    ///
    /// A file fetched from the remote is materialized first when file
    /// caching is enabled; if that fails nothing is left under the final
    /// name and the error is returned.
    pub async fn close(mut self) -> CacheResult<()> {
        let persist = match &mut self.inner {
            Inner::Remote(remote) => remote.persist.take(),
            _ => None,
        };
        let Some(persist) = persist else {
            return Ok(());
        };

        if let Err(e) = download_file(&persist.local_file, &mut self).await {
            warn!(name = %self.name, error = %e, "caching file failed");
            return Err(e);
        }
        debug!(name = %self.name, local = %persist.local_file.display(), "file materialized");

        if let Some(notify) = &persist.notify {
            notify.notify_file(&self.name, &self.record);
        }
        Ok(())
    }
}
