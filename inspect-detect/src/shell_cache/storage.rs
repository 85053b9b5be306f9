//! Named cache storage backends
//!
//! - [`MemoryCacheStorage`] - process lifetime only
//! - [`DiskCacheStorage`] - one directory per cache, survives restarts so a
//!   tablet rebooted without network still has its shell

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use inspect_common::config::is_valid_cache_name;

use crate::error::CacheError;
use crate::shell_cache::AssetResponse;

/// Versioned, named caches keyed by request URL
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Names of every existing cache
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    async fn has(&self, cache: &str) -> Result<bool, CacheError> {
        Ok(self.keys().await?.iter().any(|k| k == cache))
    }

    /// Store all entries in one step, creating the cache if needed
    ///
    /// Entries already in the cache stay unless overwritten. A reader never
    /// sees a partly written batch; on disk a lookup racing the final swap
    /// may briefly miss.
    async fn put_all(&self, cache: &str, entries: Vec<(String, AssetResponse)>) -> Result<(), CacheError>;

    async fn lookup(&self, cache: &str, url: &str) -> Result<Option<AssetResponse>, CacheError>;

    /// URLs stored in one cache, sorted
    async fn urls(&self, cache: &str) -> Result<Vec<String>, CacheError>;

    /// Delete a cache; `false` when it did not exist
    async fn delete(&self, cache: &str) -> Result<bool, CacheError>;

    /// Look the URL up across every cache
    async fn match_any(&self, url: &str) -> Result<Option<AssetResponse>, CacheError> {
        for cache in self.keys().await? {
            if let Some(hit) = self.lookup(&cache, url).await? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// In-memory cache storage
#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<BTreeMap<String, BTreeMap<String, AssetResponse>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn put_all(&self, cache: &str, entries: Vec<(String, AssetResponse)>) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        caches.entry(cache.to_string()).or_default().extend(entries);
        Ok(())
    }

    async fn lookup(&self, cache: &str, url: &str) -> Result<Option<AssetResponse>, CacheError> {
        Ok(self
            .caches
            .read()
            .await
            .get(cache)
            .and_then(|entries| entries.get(url))
            .cloned())
    }

    async fn urls(&self, cache: &str) -> Result<Vec<String>, CacheError> {
        Ok(self
            .caches
            .read()
            .await
            .get(cache)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete(&self, cache: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(cache).is_some())
    }
}

// ============================================================================
// On-disk
// ============================================================================

/// Serialized form of one cached response
#[derive(Serialize, Deserialize)]
struct DiskEntry {
    url: String,
    status: u16,
    content_type: Option<String>,
    /// base64
    body: String,
}

/// Directory-backed cache storage
///
/// Layout: `<root>/<cache-name>/<sha256(url)>.json`. Cache names are
/// restricted to ASCII alphanumerics, `.`, `-` and `_`.
pub struct DiskCacheStorage {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl DiskCacheStorage {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, cache: &str) -> Result<PathBuf, CacheError> {
        if !is_valid_cache_name(cache) {
            return Err(CacheError::Storage(format!("invalid cache name '{}'", cache)));
        }
        Ok(self.root.join(cache))
    }

    fn entry_file(url: &str) -> String {
        format!("{:x}.json", Sha256::digest(url.as_bytes()))
    }

    /// Replace `target` with the fully written `staging` directory
    ///
    /// Existing entries not present in `staging` are carried over first, then
    /// the old directory is renamed aside and `staging` renamed into place.
    async fn swap_in(&self, staging: &Path, target: &Path, cache: &str) -> Result<(), CacheError> {
        let mut existing = match tokio::fs::read_dir(target).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::rename(staging, target).await?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = existing.next_entry().await? {
            let staged = staging.join(entry.file_name());
            if tokio::fs::metadata(&staged).await.is_err() {
                tokio::fs::copy(entry.path(), &staged).await?;
            }
        }

        let retired = self.root.join(format!(".retired-{}-{}", cache, uuid::Uuid::new_v4()));
        tokio::fs::rename(target, &retired).await?;
        if let Err(e) = tokio::fs::rename(staging, target).await {
            // Put the previous contents back
            let _ = tokio::fs::rename(&retired, target).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::remove_dir_all(&retired).await {
            warn!(dir = %retired.display(), error = %e, "Failed to remove retired cache directory");
        }
        Ok(())
    }

    async fn read_entry(path: &Path) -> Result<Option<DiskEntry>, CacheError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| CacheError::Storage(format!("corrupt entry {}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        let mut names = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            // Skips staging dirs and foreign dirs such as `lost+found`
            match entry.file_name().to_str() {
                Some(name) if is_valid_cache_name(name) => names.push(name.to_string()),
                _ => {}
            }
        }
        names.sort();
        Ok(names)
    }

    async fn put_all(&self, cache: &str, entries: Vec<(String, AssetResponse)>) -> Result<(), CacheError> {
        let target = self.cache_dir(cache)?;
        let _guard = self.write_lock.lock().await;

        let staging = self.root.join(format!(".staging-{}-{}", cache, uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&staging).await?;

        let staged = async {
            for (url, response) in &entries {
                let record = DiskEntry {
                    url: url.clone(),
                    status: response.status,
                    content_type: response.content_type.clone(),
                    body: BASE64.encode(&response.body),
                };
                let json = serde_json::to_vec(&record)
                    .map_err(|e| CacheError::Storage(format!("serialize {}: {}", url, e)))?;
                tokio::fs::write(staging.join(Self::entry_file(url)), json).await?;
            }
            Ok::<(), CacheError>(())
        }
        .await;

        if let Err(e) = staged {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        if let Err(e) = self.swap_in(&staging, &target, cache).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        debug!(cache = cache, entries = entries.len(), root = %self.root.display(), "Cache entries written");
        Ok(())
    }

    async fn lookup(&self, cache: &str, url: &str) -> Result<Option<AssetResponse>, CacheError> {
        let path = self.cache_dir(cache)?.join(Self::entry_file(url));
        let Some(entry) = Self::read_entry(&path).await? else {
            return Ok(None);
        };
        if entry.url != url {
            return Ok(None);
        }
        let body = BASE64
            .decode(entry.body)
            .map_err(|e| CacheError::Storage(format!("corrupt body for {}: {}", url, e)))?;
        Ok(Some(AssetResponse {
            status: entry.status,
            content_type: entry.content_type,
            body: body.into(),
        }))
    }

    async fn urls(&self, cache: &str) -> Result<Vec<String>, CacheError> {
        let dir_path = self.cache_dir(cache)?;
        let mut dir = match tokio::fs::read_dir(&dir_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut urls = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if let Some(record) = Self::read_entry(&entry.path()).await? {
                urls.push(record.url);
            }
        }
        urls.sort();
        Ok(urls)
    }

    async fn delete(&self, cache: &str) -> Result<bool, CacheError> {
        let path = self.cache_dir(cache)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
