//! Cache error types.

use std::io;
use thiserror::Error;

/// Errors from decoding stub and listing blobs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The collection magic tag did not match.
    #[error("cache file tag unmatched")]
    TagUnmatched,

    /// Buffer shorter than the collection header.
    #[error("cache file header too short")]
    HeaderTooShort,

    /// Buffer shorter than an entry header.
    #[error("cache entry header too short")]
    EntryTooShort,

    /// Buffer shorter than an entry's declared name.
    #[error("cache entry data too short")]
    DataTooShort,

    /// Entry name is not valid UTF-8.
    #[error("cache entry name is not valid UTF-8")]
    InvalidName,

    /// Stub link target is not valid base64url.
    #[error("invalid stub target: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Cache error type.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Path absent locally and, when checked, remotely.
    #[error("not found: {0}")]
    NotFound(String),

    /// Content or listing needed but the cache is offline.
    #[error("remote filesystem is offline")]
    Offline,

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Path escapes root (security violation).
    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Malformed stub or listing blob.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Local I/O error, reported against the caller-visible name.
    #[error("{name}: {source}")]
    Local {
        name: String,
        #[source]
        source: io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bad mirror configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Config (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl CacheError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a PathEscapesRoot error.
    pub fn path_escapes_root(path: impl Into<String>) -> Self {
        Self::PathEscapesRoot(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Annotate a local I/O error with the caller-visible name.
    pub fn local(name: impl Into<String>, source: io::Error) -> Self {
        Self::Local {
            name: name.into(),
            source,
        }
    }

    /// Attach `name` to a bare I/O error; other variants pass through.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        match self {
            Self::Io(source) => Self::local(name, source),
            other => other,
        }
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns true for not-found conditions, local or remote.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            Self::Local { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Returns true if the cache refused because it is offline.
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }
}

/// Convert CacheError to std::io::Error for compatibility.
impl From<CacheError> for io::Error {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            CacheError::Offline => {
                io::Error::new(io::ErrorKind::NotConnected, "remote filesystem is offline")
            }
            CacheError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            CacheError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            CacheError::PathEscapesRoot(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            CacheError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            CacheError::Codec(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            CacheError::Local { name, source } => {
                io::Error::new(source.kind(), format!("{name}: {source}"))
            }
            CacheError::Io(e) => e,
            CacheError::Config(msg) => io::Error::new(io::ErrorKind::InvalidData, msg),
            CacheError::Json(e) => io::Error::new(io::ErrorKind::InvalidData, e),
            CacheError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// Cache result type.
pub type CacheResult<T> = Result<T, CacheError>;
