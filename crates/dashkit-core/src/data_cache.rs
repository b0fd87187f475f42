//! Remote Data Cache - TTL cache for remote JSON with stale fallback
//!
//! Features:
//! - Logical `data/...` paths mirrored under a local cache root
//! - Fresh entries are served without touching the network
//! - Stale entries are refreshed; a failed refresh serves the stale copy
//! - Missing entries block on the network and propagate its failure

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

use crate::vfs::normalize;

/// Cached data is considered fresh for 12 hours
pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Where logical `data/...` paths are fetched from
pub const DATA_BASE_URL: &str = "https://raw.githubusercontent.com/bridge-core/editor-packages/main/";

/// Strip the leading `data/` (or `data\`) of a logical path
pub fn strip_data_prefix(data_path: &str) -> &str {
    data_path
        .strip_prefix("data/")
        .or_else(|| data_path.strip_prefix("data\\"))
        .unwrap_or(data_path)
}

/// Origin of remote JSON documents
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_json(&self, data_path: &str) -> Result<Value>;
}

/// Fetches logical data paths over HTTP
pub struct HttpDataSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDataSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn url_for(&self, data_path: &str) -> String {
        let relative = strip_data_prefix(data_path).replace('\\', "/");
        format!("{}/{}", self.base_url.trim_end_matches('/'), relative)
    }
}

impl Default for HttpDataSource {
    fn default() -> Self {
        Self::new(DATA_BASE_URL)
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch_json(&self, data_path: &str) -> Result<Value> {
        let url = self.url_for(data_path);
        debug!("Fetching {}", url);
        let value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("invalid JSON from {url}"))?;
        Ok(value)
    }
}

/// Time source, swappable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Freshness of one cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Missing,
    Fresh,
    Stale,
}

/// TTL cache in front of a `DataSource`
pub struct DataCache {
    cache_dir: PathBuf,
    ttl: Duration,
    source: Arc<dyn DataSource>,
    clock: Arc<dyn Clock>,
}

impl DataCache {
    pub fn new(cache_dir: impl AsRef<Path>, source: Arc<dyn DataSource>) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            ttl: DEFAULT_TTL,
            source,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Local file backing a logical data path
    pub fn cached_path(&self, data_path: &str) -> Result<PathBuf> {
        let relative = normalize(strip_data_prefix(data_path));
        if relative == "." || relative.starts_with("..") || relative.starts_with('/') {
            bail!("data path {data_path} escapes the cache directory");
        }
        Ok(self.cache_dir.join(relative))
    }

    /// Classify the cache entry for `data_path`
    pub async fn state(&self, data_path: &str) -> Result<CacheState> {
        let cached_path = self.cached_path(data_path)?;
        let metadata = match tokio::fs::metadata(&cached_path).await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CacheState::Missing),
            Err(e) => return Err(e.into()),
        };

        let modified = metadata.modified().unwrap_or(UNIX_EPOCH);
        let age = self
            .clock
            .now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);

        Ok(if age < self.ttl {
            CacheState::Fresh
        } else {
            CacheState::Stale
        })
    }

    /// Get the JSON for a logical data path
    pub async fn fetch(&self, data_path: &str) -> Result<Value> {
        let cached_path = self.cached_path(data_path)?;

        match self.state(data_path).await? {
            CacheState::Missing => self.refresh(data_path, &cached_path).await,
            CacheState::Fresh => read_cached(&cached_path).await,
            CacheState::Stale => match self.refresh(data_path, &cached_path).await {
                Ok(value) => Ok(value),
                Err(e) => {
                    error!("{:#}", e);
                    warn!("Failed to update cached value for {}", data_path);
                    warn!("Using stale content for {}", data_path);
                    read_cached(&cached_path).await
                }
            },
        }
    }

    async fn refresh(&self, data_path: &str, cached_path: &Path) -> Result<Value> {
        let value = self
            .source
            .fetch_json(data_path)
            .await
            .map_err(|e| anyhow!("failed to fetch {data_path}: {e:#}"))?;

        if let Some(parent) = cached_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(cached_path, serde_json::to_string(&value)?).await?;
        debug!("Cached {} at {:?}", data_path, cached_path);
        Ok(value)
    }
}

async fn read_cached(path: &Path) -> Result<Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read cached data {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("corrupt cached data {}", path.display()))
}
