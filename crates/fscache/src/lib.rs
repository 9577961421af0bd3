//! # fscache
//!
//! A read-only local mirror of a remote file tree.
//!
//! The mirror is an ordinary directory. Every remote path the cache has
//! seen is represented there in one of three states:
//!
//! - a **stub**: a symbolic link whose target encodes the remote's metadata
//!   for a file whose content has not been fetched,
//! - a **materialized file** with the remote's content and mtime,
//! - a **directory**, carrying the `.fscache.ls` marker once every child is
//!   represented locally.
//!
//! [`CachedFs::open`] serves from the mirror whenever it can. Stubs,
//! unmarked directories and unknown names go to the [`Remote`]; opening a
//! remote directory populates stubs for its children in the background, and
//! closing a fetched file materializes it.
//!
//! ```no_run
//! # async fn demo() -> fscache::CacheResult<()> {
//! use std::sync::Arc;
//! use fscache::{CacheOptions, CachedFs, LocalBucket};
//!
//! let bucket = Arc::new(LocalBucket::new("/srv/assets"));
//! let fs = CachedFs::with_bucket("/var/cache/assets", bucket, CacheOptions::online()).await?;
//! let mut file = fs.open("/img/logo.png").await?;
//! let data = file.read_to_end().await?;
//! file.close().await?;
//! # let _ = data;
//! # Ok(())
//! # }
//! ```

pub mod bucket;
pub mod cached;
pub mod codec;
pub mod config;
pub mod entry;
pub mod error;
pub mod file;
pub mod remote;
pub mod types;

pub use bucket::{Bucket, BucketCalls, LocalBucket, MemoryBucket};
pub use cached::{CachedFs, download_file};
pub use config::{CONFIG_FILE, CacheConfig};
pub use entry::LocalEntry;
pub use error::{CacheError, CacheResult, CodecError, CodecResult};
pub use file::CachedFile;
pub use remote::{BucketRemote, NotifyFile, Population, PopulationReport, Remote};
pub use types::{CacheOptions, FileMode, FileRecord};
