//! On-disk cache of each broker's instrument list.
//!
//! Listing every tradable asset is slow on most brokers, so the result is
//! kept in `{dir}/{broker}_assets.json` and reused until it is older than the
//! configured TTL. A cache file that cannot be read back is treated as
//! missing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Result;
use crate::models::BrokerId;
use crate::models::asset::Asset;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    fetched_at: DateTime<Utc>,
    assets: Vec<Asset>,
}

/// Directory-backed asset list cache.
#[derive(Debug, Clone)]
pub struct AssetCache {
    dir: PathBuf,
    ttl: Duration,
}

impl AssetCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file of `broker`.
    pub fn path(&self, broker: &BrokerId) -> PathBuf {
        self.dir.join(format!("{broker}_assets.json"))
    }

    /// Returns the cached assets of `broker` if present and fresh.
    pub fn load(&self, broker: &BrokerId) -> Option<Vec<Asset>> {
        self.load_at(broker, Utc::now())
    }

    fn load_at(&self, broker: &BrokerId, now: DateTime<Utc>) -> Option<Vec<Asset>> {
        let path = self.path(broker);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(%broker, "no asset cache");
                return None;
            }
            Err(e) => {
                warn!(%broker, path = %path.display(), error = %e, "failed to read asset cache");
                return None;
            }
        };

        let file: CacheFile = match serde_json::from_str(&content) {
            Ok(file) => file,
            Err(e) => {
                warn!(%broker, path = %path.display(), error = %e, "ignoring malformed asset cache");
                return None;
            }
        };

        let age = now.signed_duration_since(file.fetched_at);
        let expired = age.to_std().is_ok_and(|age| age > self.ttl);
        if expired {
            info!(%broker, fetched_at = %file.fetched_at, "asset cache expired");
            return None;
        }

        debug!(%broker, assets = file.assets.len(), "loaded asset cache");
        Some(file.assets)
    }

    /// Writes `assets` as the current list of `broker`, creating the cache
    /// directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O or JSON error if the file cannot be written.
    pub fn store(&self, broker: &BrokerId, assets: &[Asset]) -> Result<()> {
        self.store_at(broker, assets, Utc::now())
    }

    fn store_at(&self, broker: &BrokerId, assets: &[Asset], now: DateTime<Utc>) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let file = CacheFile {
            fetched_at: now,
            assets: assets.to_vec(),
        };
        let content = serde_json::to_string_pretty(&file)?;

        // Write to a sibling file first so readers never see a partial list.
        let path = self.path(broker);
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &path)?;

        info!(%broker, assets = assets.len(), path = %path.display(), "stored asset cache");
        Ok(())
    }
}
