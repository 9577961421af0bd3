//! Cache façade.
//!
//! [`CachedFs`] answers `open` from the local mirror and falls back to the
//! [`Remote`] only for what the mirror does not have.

use std::fs::Permissions;
use std::io::{self, SeekFrom};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempPath};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::bucket::{Bucket, LocalBucket, READ_CHUNK};
use crate::config::{self, CacheConfig};
use crate::entry::{self, DOWNLOAD_SUFFIX};
use crate::error::{CacheError, CacheResult};
use crate::file::CachedFile;
use crate::remote::{BucketRemote, Remote};
use crate::types::{CacheOptions, FileRecord};

/// Read-only view of a remote tree, mirrored under a local directory.
pub struct CachedFs {
    local: PathBuf,
    remote: Arc<dyn Remote>,
    offline: bool,
}

impl std::fmt::Debug for CachedFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFs")
            .field("local", &self.local)
            .field("offline", &self.offline)
            .finish()
    }
}

impl CachedFs {
    /// Create a façade over `remote`, initializing the local root.
    pub async fn new(
        local: impl Into<PathBuf>,
        remote: Arc<dyn Remote>,
        offline: bool,
    ) -> CacheResult<Self> {
        let local = local.into();
        remote.init(&local, offline).await?;
        Ok(Self {
            local,
            remote,
            offline,
        })
    }

    /// Create a façade over `bucket` with the default adapter.
    pub async fn with_bucket(
        local: impl Into<PathBuf>,
        bucket: Arc<dyn Bucket>,
        options: CacheOptions,
    ) -> CacheResult<Self> {
        let remote = BucketRemote::new(bucket).with_cache_file(options.cache_file);
        Self::new(local, Arc::new(remote), options.offline).await
    }

    /// Open a mirror described by the config file in `local`.
    pub async fn open_dir(local: impl Into<PathBuf>, offline: bool) -> CacheResult<Self> {
        let local = local.into();
        let conf = config::read_config(&local).await?;
        let bucket = bucket_for(&conf)?;
        debug!(local = %local.display(), base = %conf.base, offline, "opening mirror");
        Self::with_bucket(
            local,
            bucket,
            CacheOptions {
                offline,
                cache_file: conf.cache_file,
            },
        )
        .await
    }

    /// The remote adapter.
    pub fn remote(&self) -> &Arc<dyn Remote> {
        &self.remote
    }

    /// Returns true if the remote is never consulted.
    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Root of the local mirror.
    pub fn local_root(&self) -> &Path {
        &self.local
    }

    /// Open `name` (a `/`-separated path relative to the root).
    pub async fn open(&self, name: &str) -> CacheResult<CachedFile> {
        let local_file = local_path(&self.local, name)?;

        let (record, flagged) = match self.remote.lstat(&local_file).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => {
                if self.offline {
                    return Err(CacheError::Offline);
                }
                let record = self.remote.sync_lstat(&self.local, name).await?;
                let flagged = record.is_remote();
                (record, flagged)
            }
            Err(e) => return Err(e),
        };

        if flagged {
            if self.offline {
                return Err(CacheError::Offline);
            }
            return self.remote.sync_open(&self.local, name, &record).await;
        }

        if record.is_dir() {
            let dir = fs::read_dir(&local_file)
                .await
                .map_err(|e| CacheError::local(name, e))?;
            let entries = self
                .remote
                .readdir_all(&local_file, dir, self.offline)
                .await
                .map_err(|e| e.with_name(name))?;
            return Ok(CachedFile::dir(name, record, entries, None));
        }

        let file = fs::File::open(&local_file)
            .await
            .map_err(|e| CacheError::local(name, e))?;
        Ok(CachedFile::local_file(name, record, file))
    }

    /// Metadata of `name` without opening it.
    pub async fn stat(&self, name: &str) -> CacheResult<FileRecord> {
        Ok(self.open(name).await?.stat().clone())
    }
}

fn bucket_for(conf: &CacheConfig) -> CacheResult<Arc<dyn Bucket>> {
    let base = conf.base.strip_prefix("file://").unwrap_or(&conf.base);
    if base.is_empty() {
        return Err(CacheError::Config("base is empty".into()));
    }
    if let Some((scheme, _)) = base.split_once("://") {
        return Err(CacheError::Config(format!("unsupported base scheme: {scheme}")));
    }
    Ok(Arc::new(LocalBucket::new(base)))
}

/// Map a caller name onto the local mirror.
///
/// Leading `/` and `.` components are ignored; `..` is rejected.
pub fn local_path(root: &Path, name: &str) -> CacheResult<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(CacheError::path_escapes_root(name));
            }
        }
    }
    Ok(path)
}

/// Stream `file` from the start into `local_file`.
///
/// Content goes to a temporary `<name>.<random>.download~` next to
/// `local_file`, unique per call so concurrent downloads of one path never
/// share it. The temporary gets the record's mtime and is then renamed over
/// whatever `local_file` was (usually its stub). On failure the temporary is
/// removed.
pub async fn download_file(local_file: &Path, file: &mut CachedFile) -> CacheResult<()> {
    let parent = local_file
        .parent()
        .ok_or_else(|| CacheError::invalid_path(local_file.display().to_string()))?;
    fs::create_dir_all(parent)
        .await
        .map_err(|e| CacheError::local(parent.display().to_string(), e))?;
    let parent_mtime = fs::metadata(parent).await.and_then(|m| m.modified()).ok();

    let perm = match file.stat().mode.perm() {
        0 => 0o644,
        perm => perm,
    };
    let tmp = create_download(parent, local_file).await?;
    let tmp_err = |e: io::Error| CacheError::local(tmp.display().to_string(), e);

    // Dropping `tmp` on any early return removes it.
    write_download(&tmp, file).await?;
    fs::set_permissions(&tmp, Permissions::from_mode(perm))
        .await
        .map_err(tmp_err)?;
    entry::set_mtime(&tmp, file.stat().mtime)
        .await
        .map_err(tmp_err)?;
    tmp.persist(local_file)
        .map_err(|e| CacheError::local(local_file.display().to_string(), e.error))?;

    // Creating and renaming the temporary touched the parent.
    if let Some(mtime) = parent_mtime {
        if let Err(e) = entry::set_mtime(parent, mtime).await {
            debug!(dir = %parent.display(), error = %e, "cannot restore directory mtime");
        }
    }
    Ok(())
}

async fn create_download(parent: &Path, local_file: &Path) -> CacheResult<TempPath> {
    let prefix = match local_file.file_name() {
        Some(name) => format!("{}.", name.to_string_lossy()),
        None => String::from("."),
    };
    let dir = parent.to_path_buf();
    tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(DOWNLOAD_SUFFIX)
            .tempfile_in(&dir)
            .map(NamedTempFile::into_temp_path)
    })
    .await
    .map_err(|e| CacheError::other(format!("temporary file task failed: {e}")))?
    .map_err(|e| CacheError::local(parent.display().to_string(), e))
}

async fn write_download(tmp: &Path, file: &mut CachedFile) -> CacheResult<()> {
    let tmp_err = |e: io::Error| CacheError::local(tmp.display().to_string(), e);

    file.seek(SeekFrom::Start(0)).await?;
    let mut out = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(tmp)
        .await
        .map_err(tmp_err)?;
    let mut buf = vec![0u8; READ_CHUNK as usize];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await.map_err(tmp_err)?;
    }
    out.sync_all().await.map_err(tmp_err)
}
