//! Core cache types.
//!
//! [`FileRecord`] is the metadata the cache persists for every remote path,
//! and [`FileMode`] is its bit field. The mode bit positions follow the
//! conventional `io/fs` layout so stubs written by other mirror tools decode
//! the same way.

use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::os::unix::fs::PermissionsExt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// File mode bit field: type flags plus Unix permission bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMode(u32);

impl FileMode {
    /// Directory flag.
    pub const DIR: u32 = 1 << 31;
    /// Symbolic link flag.
    pub const SYMLINK: u32 = 1 << 27;
    /// Irregular file flag.
    pub const IRREGULAR: u32 = 1 << 19;
    /// Content or listing not yet synced locally.
    pub const REMOTE: u32 = Self::SYMLINK | Self::IRREGULAR;
    /// Unix permission bits.
    pub const PERM: u32 = 0o777;

    const TYPE: u32 = Self::DIR | Self::SYMLINK | Self::IRREGULAR;

    /// Wrap raw mode bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Mode of a regular file with the given permissions.
    pub const fn file(perm: u32) -> Self {
        Self(perm & Self::PERM)
    }

    /// Mode of a directory with the given permissions.
    pub const fn directory(perm: u32) -> Self {
        Self(Self::DIR | (perm & Self::PERM))
    }

    /// Raw mode bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Permission bits only.
    pub const fn perm(self) -> u32 {
        self.0 & Self::PERM
    }

    /// Returns true if the directory flag is set.
    pub const fn is_dir(self) -> bool {
        self.0 & Self::DIR != 0
    }

    /// Returns true if both remote flag bits are set.
    pub const fn is_remote(self) -> bool {
        self.0 & Self::REMOTE == Self::REMOTE
    }

    /// Returns true for regular files, whether materialized or still remote.
    pub const fn is_regular(self) -> bool {
        let kind = self.0 & Self::TYPE;
        kind == 0 || kind == Self::REMOTE
    }

    /// Returns true for a plain symbolic link (not a remote marker).
    pub const fn is_symlink(self) -> bool {
        self.0 & Self::TYPE == Self::SYMLINK
    }

    /// The same mode with the remote flag set.
    pub const fn with_remote(self) -> Self {
        Self(self.0 | Self::REMOTE)
    }

    /// The same mode with the remote flag cleared.
    pub const fn without_remote(self) -> Self {
        Self(self.0 & !Self::REMOTE)
    }
}

impl From<u32> for FileMode {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

/// Metadata for one path, as reported by the remote or read from the mirror.
///
/// `mtime` has microsecond resolution: every constructor truncates it so a
/// record survives an encode/decode cycle unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Base name (no directory components).
    pub name: String,
    /// Size in bytes; meaningful only for regular files.
    pub size: i64,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Type flags and permissions.
    pub mode: FileMode,
    /// Opaque caller-defined tag, never interpreted by the cache.
    pub user_tag: u64,
}

impl FileRecord {
    /// Record for a regular file (permissions 0o644).
    pub fn file(name: impl Into<String>, size: i64, mtime: SystemTime) -> Self {
        Self {
            name: name.into(),
            size,
            mtime: truncate_micros(mtime),
            mode: FileMode::file(0o644),
            user_tag: 0,
        }
    }

    /// Record for a directory (permissions 0o755).
    pub fn directory(name: impl Into<String>, mtime: SystemTime) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mtime: truncate_micros(mtime),
            mode: FileMode::directory(0o755),
            user_tag: 0,
        }
    }

    /// Build a record from local metadata (as returned by a link-stat).
    ///
    /// Directories report size 0, as buckets do.
    pub fn from_metadata(name: impl Into<String>, meta: &Metadata) -> Self {
        let file_type = meta.file_type();
        let perm = meta.permissions().mode() & FileMode::PERM;
        let mode = if file_type.is_dir() {
            FileMode::directory(perm)
        } else if file_type.is_symlink() {
            FileMode::from_bits(FileMode::SYMLINK | perm)
        } else if file_type.is_file() {
            FileMode::file(perm)
        } else {
            FileMode::from_bits(FileMode::IRREGULAR | perm)
        };
        Self {
            name: name.into(),
            size: if file_type.is_dir() { 0 } else { meta.len() as i64 },
            mtime: truncate_micros(meta.modified().unwrap_or(UNIX_EPOCH)),
            mode,
            user_tag: 0,
        }
    }

    /// Set the permission bits, keeping the type flags.
    pub fn with_perm(mut self, perm: u32) -> Self {
        let bits = (self.mode.bits() & !FileMode::PERM) | (perm & FileMode::PERM);
        self.mode = FileMode::from_bits(bits);
        self
    }

    /// Set the user tag.
    pub fn with_user_tag(mut self, user_tag: u64) -> Self {
        self.user_tag = user_tag;
        self
    }

    /// Replace the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The same record with the remote flag set.
    pub fn into_remote(mut self) -> Self {
        self.mode = self.mode.with_remote();
        self
    }

    /// The same record with the remote flag cleared.
    pub fn into_local(mut self) -> Self {
        self.mode = self.mode.without_remote();
        self
    }

    /// Modification time as microseconds since the Unix epoch.
    pub fn mtime_micros(&self) -> i64 {
        to_micros(self.mtime)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    /// Returns true if the remote flag is set.
    pub fn is_remote(&self) -> bool {
        self.mode.is_remote()
    }
}

/// Microseconds since the Unix epoch, negative before it.
pub(crate) fn to_micros(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_micros() as i64,
        Err(e) => -(e.duration().as_micros() as i64),
    }
}

pub(crate) fn from_micros(us: i64) -> SystemTime {
    if us >= 0 {
        UNIX_EPOCH + Duration::from_micros(us as u64)
    } else {
        UNIX_EPOCH - Duration::from_micros(us.unsigned_abs())
    }
}

fn truncate_micros(t: SystemTime) -> SystemTime {
    from_micros(to_micros(t))
}

/// Options fixed when a cache is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Never contact the remote.
    pub offline: bool,
    /// Persist fetched file content on close.
    pub cache_file: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            offline: false,
            cache_file: true,
        }
    }
}

impl CacheOptions {
    /// Online, with file caching.
    pub fn online() -> Self {
        Self::default()
    }

    /// Offline: only the local mirror is consulted.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Default::default()
        }
    }

    /// Set whether fetched file content is persisted.
    pub fn with_cache_file(mut self, cache_file: bool) -> Self {
        self.cache_file = cache_file;
        self
    }
}
