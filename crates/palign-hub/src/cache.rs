//! Local cache management.

use palign_core::Result;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache location.
pub const CACHE_DIR_ENV: &str = "PALIGN_CACHE";

/// Get the cache directory used for Hub downloads.
pub fn cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CACHE_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::cache_dir()
        .map(|p| p.join("palign"))
        .unwrap_or_else(|| PathBuf::from(".cache/palign"))
}

/// Remove the download cache.
pub fn clear_cache() -> Result<()> {
    let cache = cache_dir();
    if cache.exists() {
        std::fs::remove_dir_all(&cache)?;
        tracing::info!("Removed cache at {}", cache.display());
    }
    Ok(())
}

/// Get the cache size in bytes.
pub fn cache_size() -> Result<u64> {
    dir_size(&cache_dir())
}

/// Total size of the regular files under `dir`.
pub fn dir_size(dir: &Path) -> Result<u64> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut size = 0u64;
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            size += entry.metadata().map_err(std::io::Error::from)?.len();
        }
    }
    Ok(size)
}
