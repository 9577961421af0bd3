//! Local mirror entries.
//!
//! Every path under the local root is one of:
//!
//! - a materialized file (real content),
//! - a materialized directory, optionally carrying the listing marker
//!   [`DIR_CACHED_MARKER`] once all of its children exist locally,
//! - a stub: a symbolic link whose target is the base64url encoding of one
//!   [`FileRecord`]. Only files are ever stubs.
//!
//! [`LocalEntry::load`] classifies a path; the `write_*`/`touch_*` helpers
//! are the only functions that create stubs and markers.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use filetime::FileTime;
use std::fs::Permissions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::SystemTime;
use tokio::fs;
use tracing::warn;

use crate::codec;
use crate::error::CodecResult;
use crate::types::{FileMode, FileRecord};

/// Prefix reserved for the cache's own files.
pub const SYS_FILE_PREFIX: &str = ".fscache.";

/// Zero-length marker: the directory's listing is fully mirrored.
pub const DIR_CACHED_MARKER: &str = ".fscache.ls";

/// Suffix of the temporary file a download is streamed into.
pub const DOWNLOAD_SUFFIX: &str = ".download~";

/// Returns true for names the cache reserves for itself.
pub fn is_internal_name(name: &str) -> bool {
    name.starts_with(SYS_FILE_PREFIX)
}

/// State of one path in the local mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEntry {
    /// Placeholder holding the remote's metadata; content not fetched.
    Stub(FileRecord),
    /// Fully downloaded file.
    File(FileRecord),
    /// Real directory; `cached` when the listing marker is present.
    Dir { record: FileRecord, cached: bool },
}

impl LocalEntry {
    /// Classify `path` without following symbolic links.
    ///
    /// A stub whose target fails to decode falls back to the raw link
    /// metadata, still flagged remote.
    pub async fn load(path: &Path) -> io::Result<Self> {
        let meta = fs::symlink_metadata(path).await?;
        let name = base_name(path);
        let file_type = meta.file_type();

        if file_type.is_dir() {
            let cached = is_dir_cached(path).await;
            let record = FileRecord::from_metadata(name, &meta);
            return Ok(LocalEntry::Dir { record, cached });
        }

        if file_type.is_symlink() {
            let record = match read_stub(path).await {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "malformed stub, using link metadata"
                    );
                    FileRecord::from_metadata(name, &meta).into_remote()
                }
            };
            return Ok(LocalEntry::Stub(record));
        }

        Ok(LocalEntry::File(FileRecord::from_metadata(name, &meta)))
    }

    /// The entry's metadata.
    pub fn record(&self) -> &FileRecord {
        match self {
            LocalEntry::Stub(record) => record,
            LocalEntry::File(record) => record,
            LocalEntry::Dir { record, .. } => record,
        }
    }

    /// Returns true if serving this entry needs the remote.
    pub fn is_flagged_remote(&self) -> bool {
        match self {
            LocalEntry::Stub(_) => true,
            LocalEntry::File(_) => false,
            LocalEntry::Dir { cached, .. } => !cached,
        }
    }

    /// The entry's metadata, with the remote flag set when it is flagged remote.
    pub fn into_record(self) -> FileRecord {
        match self {
            LocalEntry::Stub(record) => record.into_remote(),
            LocalEntry::File(record) => record,
            LocalEntry::Dir { record, cached } => {
                if cached {
                    record
                } else {
                    record.into_remote()
                }
            }
        }
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Symbolic-link target that encodes `record` as a stub.
pub fn stub_target(record: &FileRecord) -> String {
    let mut record = record.clone();
    record.mode = record.mode.with_remote();
    URL_SAFE.encode(codec::encode_one(&record))
}

/// Decode a stub's symbolic-link target.
pub fn parse_stub_target(target: &str) -> CodecResult<FileRecord> {
    let bytes = URL_SAFE.decode(target)?;
    codec::decode_one(&bytes)
}

/// Read and decode the stub at `path`.
pub async fn read_stub(path: &Path) -> crate::CacheResult<FileRecord> {
    let target = fs::read_link(path).await?;
    Ok(parse_stub_target(&target.to_string_lossy())?)
}

/// Represent `record` locally at `path` without fetching content.
///
/// Directories become real (empty) directories carrying the remote
/// permissions and mtime; files become stubs.
pub async fn write_stub(path: &Path, record: &FileRecord) -> io::Result<()> {
    if record.mode.is_dir() {
        return create_dir(path, record.mode, record.mtime).await;
    }
    fs::symlink(stub_target(record), path).await
}

async fn create_dir(path: &Path, mode: FileMode, mtime: SystemTime) -> io::Result<()> {
    let perm = match mode.perm() {
        0 => 0o755,
        perm => perm,
    };
    fs::DirBuilder::new().mode(perm).create(path).await?;
    // DirBuilder is subject to the umask.
    fs::set_permissions(path, Permissions::from_mode(perm)).await?;
    set_mtime(path, mtime).await
}

/// Set the modification time of `path`, following symlinks.
pub async fn set_mtime(path: &Path, mtime: SystemTime) -> io::Result<()> {
    let path = path.to_path_buf();
    let mtime = FileTime::from_system_time(mtime);
    tokio::task::spawn_blocking(move || filetime::set_file_mtime(&path, mtime))
        .await
        .map_err(io::Error::other)?
}

/// Returns true if `dir` carries the listing marker.
pub async fn is_dir_cached(dir: &Path) -> bool {
    fs::symlink_metadata(dir.join(DIR_CACHED_MARKER)).await.is_ok()
}

/// Write the listing marker into `dir`.
pub async fn touch_dir_cached(dir: &Path) -> io::Result<()> {
    fs::write(dir.join(DIR_CACHED_MARKER), b"").await
}
