//! Mirror configuration stored in the local root.
//!
//! ```json
//! {
//!   "base": "/srv/assets",
//!   "cacheFile": true
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{CacheError, CacheResult};

/// File name of the config inside the local root.
pub const CONFIG_FILE: &str = ".fscache.conf";

/// Where a mirror's remote lives and how it is cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Remote root: a directory path, optionally `file://`-prefixed.
    pub base: String,
    /// Persist fetched file content.
    #[serde(default = "default_cache_file")]
    pub cache_file: bool,
}

fn default_cache_file() -> bool {
    true
}

impl CacheConfig {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            cache_file: true,
        }
    }
}

/// Path of the config file for the mirror rooted at `local`.
pub fn config_path(local: &Path) -> PathBuf {
    local.join(CONFIG_FILE)
}

/// Read the config of the mirror rooted at `local`.
pub async fn read_config(local: &Path) -> CacheResult<CacheConfig> {
    let path = config_path(local);
    let data = fs::read(&path).await.map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            CacheError::Config(format!("{} not found", path.display()))
        } else {
            CacheError::local(path.display().to_string(), e)
        }
    })?;
    Ok(serde_json::from_slice(&data)?)
}

/// Write `conf` into `local`, creating the directory if needed.
pub async fn write_config(local: &Path, conf: &CacheConfig) -> CacheResult<()> {
    fs::create_dir_all(local)
        .await
        .map_err(|e| CacheError::local(local.display().to_string(), e))?;
    let data = serde_json::to_vec_pretty(conf)?;
    let path = config_path(local);
    fs::write(&path, data)
        .await
        .map_err(|e| CacheError::local(path.display().to_string(), e))
}
