//! Remote adapter.
//!
//! The [`Remote`] trait is the seam between the cache façade and whatever
//! stands behind it. [`BucketRemote`] is the default implementation over a
//! [`Bucket`]: it answers local lookups, synthesizes listings from the
//! mirror, and on a remote directory open fans the listing out into local
//! stubs in a background task.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs::{self, ReadDir};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use crate::bucket::Bucket;
use crate::cached::local_path;
use crate::entry::{self, DOWNLOAD_SUFFIX, LocalEntry};
use crate::error::{CacheError, CacheResult};
use crate::file::{CachedFile, Persist};
use crate::types::FileRecord;

/// Operations the cache façade needs from the remote side.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Prepare the local root before the first open.
    ///
    /// A remote with nothing to prepare may do nothing. [`BucketRemote`]
    /// creates the root directory so the first population or download
    /// always has a parent.
    async fn init(&self, local: &Path, offline: bool) -> CacheResult<()>;

    /// Metadata of a local path and whether serving it needs the remote.
    ///
    /// Missing paths surface as a not-found error.
    async fn lstat(&self, local_file: &Path) -> CacheResult<(FileRecord, bool)>;

    /// Listing of a materialized local directory.
    ///
    /// Offline, stubs are omitted: only content that can actually be served
    /// is listed. Errors not tied to one entry may come back as bare
    /// [`CacheError::Io`]; the façade names them.
    async fn readdir_all(
        &self,
        local_dir: &Path,
        dir: ReadDir,
        offline: bool,
    ) -> CacheResult<Vec<FileRecord>>;

    /// Metadata of a name the local mirror has no entry for.
    async fn sync_lstat(&self, local: &Path, name: &str) -> CacheResult<FileRecord>;

    /// Open a name through the remote. `record` is what the mirror knows.
    async fn sync_open(
        &self,
        local: &Path,
        name: &str,
        record: &FileRecord,
    ) -> CacheResult<CachedFile>;
}

/// Hook called after a file has been materialized locally.
pub trait NotifyFile: Send + Sync {
    fn notify_file(&self, name: &str, record: &FileRecord);
}

/// Outcome of one background stub population.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulationReport {
    /// Children represented locally (newly written or already present).
    pub written: usize,
    /// Children that could not be represented.
    pub failed: usize,
    /// Whether the listing marker was written.
    pub marked: bool,
}

/// Handle to a background stub population.
///
/// Dropping it detaches the task; it still runs to completion.
#[derive(Debug)]
pub struct Population {
    handle: JoinHandle<PopulationReport>,
}

impl Population {
    /// Wait for the population to finish.
    pub async fn wait(self) -> CacheResult<PopulationReport> {
        self.handle
            .await
            .map_err(|e| CacheError::other(format!("population task failed: {e}")))
    }
}

/// Default [`Remote`] over a [`Bucket`].
pub struct BucketRemote {
    bucket: Arc<dyn Bucket>,
    notify: Option<Arc<dyn NotifyFile>>,
    cache_file: bool,
    tasks: TaskTracker,
}

impl std::fmt::Debug for BucketRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketRemote")
            .field("cache_file", &self.cache_file)
            .field("notify", &self.notify.is_some())
            .field("pending", &self.tasks.len())
            .finish()
    }
}

impl BucketRemote {
    /// Adapter that materializes fetched files.
    pub fn new(bucket: Arc<dyn Bucket>) -> Self {
        Self {
            bucket,
            notify: None,
            cache_file: true,
            tasks: TaskTracker::new(),
        }
    }

    /// Call `notify` after each materialized file.
    pub fn with_notify(mut self, notify: Arc<dyn NotifyFile>) -> Self {
        self.notify = Some(notify);
        self
    }

    /// When false, fetched file content is never written locally. Listings
    /// are still mirrored as stubs.
    pub fn with_cache_file(mut self, cache_file: bool) -> Self {
        self.cache_file = cache_file;
        self
    }

    pub fn bucket(&self) -> &Arc<dyn Bucket> {
        &self.bucket
    }

    pub fn cache_file(&self) -> bool {
        self.cache_file
    }

    /// Wait until every population spawned so far has finished.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    fn spawn_population(
        &self,
        base: PathBuf,
        mtime: SystemTime,
        children: Vec<FileRecord>,
    ) -> Population {
        let handle = self.tasks.spawn(populate(base, mtime, children));
        Population { handle }
    }
}

#[async_trait]
impl Remote for BucketRemote {
    async fn init(&self, local: &Path, _offline: bool) -> CacheResult<()> {
        fs::create_dir_all(local)
            .await
            .map_err(|e| CacheError::local(local.display().to_string(), e))
    }

    async fn lstat(&self, local_file: &Path) -> CacheResult<(FileRecord, bool)> {
        let entry = LocalEntry::load(local_file).await?;
        let flagged = entry.is_flagged_remote();
        Ok((entry.into_record(), flagged))
    }

    async fn readdir_all(
        &self,
        local_dir: &Path,
        mut dir: ReadDir,
        offline: bool,
    ) -> CacheResult<Vec<FileRecord>> {
        let mut records = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let name = item.file_name().to_string_lossy().into_owned();
            if entry::is_internal_name(&name) || name.ends_with(DOWNLOAD_SUFFIX) {
                continue;
            }

            let meta = match fs::symlink_metadata(item.path()).await {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(CacheError::local(name, e)),
            };

            if meta.file_type().is_symlink() {
                if offline {
                    continue;
                }
                let record = match entry::read_stub(&local_dir.join(&name)).await {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(name = %name, error = %e, "malformed stub in listing");
                        FileRecord::from_metadata(name, &meta).into_remote()
                    }
                };
                records.push(record);
                continue;
            }

            records.push(FileRecord::from_metadata(name, &meta));
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    async fn sync_lstat(&self, _local: &Path, name: &str) -> CacheResult<FileRecord> {
        let record = self
            .bucket
            .stat(Path::new(name))
            .await
            .inspect_err(|e| error!(name, error = %e, "bucket stat failed"))?;
        debug!(name, size = record.size, "bucket stat");
        Ok(record.into_remote())
    }

    async fn sync_open(
        &self,
        local: &Path,
        name: &str,
        record: &FileRecord,
    ) -> CacheResult<CachedFile> {
        let remote_path = Path::new(name);
        let local_file = local_path(local, name)?;

        if record.is_dir() {
            let children: Vec<FileRecord> = self
                .bucket
                .readdir(remote_path)
                .await
                .inspect_err(|e| error!(name, error = %e, "bucket readdir failed"))?
                .into_iter()
                .filter(|child| !entry::is_internal_name(&child.name))
                .map(|child| if child.is_dir() { child } else { child.into_remote() })
                .collect();
            debug!(name, items = children.len(), "bucket readdir");

            let population = self.spawn_population(local_file, record.mtime, children.clone());
            let dir_record = record.clone().with_name(base_name(name)).into_local();
            return Ok(CachedFile::dir(name, dir_record, children, Some(population)));
        }

        let fresh = self
            .bucket
            .stat(remote_path)
            .await
            .inspect_err(|e| error!(name, error = %e, "bucket open failed"))?;
        debug!(name, size = fresh.size, "bucket open");

        if fresh.is_dir() {
            // The stub went stale: the remote now holds a directory.
            remove_stale_stub(&local_file).await?;
            return self.sync_open(local, name, &fresh).await;
        }

        let persist = self.cache_file.then(|| Persist {
            local_file,
            notify: self.notify.clone(),
        });
        Ok(CachedFile::remote_file(
            name,
            fresh,
            self.bucket.clone(),
            remote_path,
            persist,
        ))
    }
}

fn base_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Remove a stub standing where a directory has to go.
async fn remove_stale_stub(local_file: &Path) -> CacheResult<()> {
    let is_link = match fs::symlink_metadata(local_file).await {
        Ok(meta) => meta.file_type().is_symlink(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(CacheError::local(local_file.display().to_string(), e)),
    };
    if !is_link {
        return Ok(());
    }
    debug!(path = %local_file.display(), "removing stale stub");
    match fs::remove_file(local_file).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            Err(CacheError::local(local_file.display().to_string(), e))
        }
        _ => Ok(()),
    }
}

fn is_valid_child(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

/// Represent every child of `base` locally, then mark the listing complete
/// only if all of them succeeded. `base` ends up with `mtime`.
async fn populate(base: PathBuf, mtime: SystemTime, children: Vec<FileRecord>) -> PopulationReport {
    let mut report = PopulationReport::default();

    if let Err(e) = fs::create_dir_all(&base).await {
        warn!(dir = %base.display(), error = %e, "cannot create directory for stubs");
        report.failed = children.len().max(1);
        return report;
    }

    for child in &children {
        if !is_valid_child(&child.name) {
            warn!(dir = %base.display(), name = %child.name, "invalid child name");
            report.failed += 1;
            continue;
        }
        match write_child(&base.join(&child.name), child).await {
            Ok(()) => report.written += 1,
            Err(e) => {
                warn!(dir = %base.display(), name = %child.name, error = %e, "writing stub failed");
                report.failed += 1;
            }
        }
    }

    if report.failed > 0 {
        warn!(
            dir = %base.display(),
            failed = report.failed,
            "stub population incomplete, listing stays remote"
        );
    } else {
        match entry::touch_dir_cached(&base).await {
            Ok(()) => report.marked = true,
            Err(e) => warn!(dir = %base.display(), error = %e, "writing listing marker failed"),
        }
    }

    // Writing stubs and the marker touched the directory.
    if let Err(e) = entry::set_mtime(&base, mtime).await {
        debug!(dir = %base.display(), error = %e, "cannot restore directory mtime");
    }
    debug!(
        dir = %base.display(),
        written = report.written,
        marked = report.marked,
        "stubs populated"
    );
    report
}

/// An existing entry of the same kind counts as represented.
async fn write_child(path: &Path, record: &FileRecord) -> io::Result<()> {
    match entry::write_stub(path, record).await {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            let existing = fs::symlink_metadata(path).await?;
            if existing.is_dir() == record.is_dir() {
                Ok(())
            } else {
                Err(e)
            }
        }
        other => other,
    }
}
