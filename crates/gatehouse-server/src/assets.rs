//! Content-hashed asset URLs for cache busting.

use std::path::{Component, Path, PathBuf};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::config::AppConfig;

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("invalid asset path [{0}]")]
    InvalidPath(String),

    #[error("read [{asset}] : {source}")]
    Read {
        asset: String,
        #[source]
        source: std::io::Error,
    },
}

/// Appends `?id=<sha256 of the content>` to asset paths so browsers refetch
/// an asset exactly when it changes.
///
/// Hashes are computed once per asset and kept for the lifetime of the
/// process. When response caching is disabled, paths are returned unchanged.
#[derive(Debug, Default)]
pub struct AssetCache {
    root: Option<PathBuf>,
    ids: DashMap<String, String>,
}

impl AssetCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ids: DashMap::new(),
        }
    }

    /// Passthrough cache returning every path unchanged.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AppConfig) -> Self {
        match (&config.assets.dir, config.cache.enabled) {
            (Some(dir), true) => Self::new(dir),
            _ => Self::disabled(),
        }
    }

    /// Returns the cache-busting URL of `asset`, a path relative to the
    /// asset directory such as `/js/app.js`.
    pub async fn asset(&self, asset: &str) -> Result<String, AssetError> {
        let Some(root) = &self.root else {
            return Ok(asset.to_string());
        };

        if let Some(id) = self.ids.get(asset) {
            return Ok(format!("{asset}?id={}", id.value()));
        }

        let path = resolve(root, asset)?;
        let contents = tokio::fs::read(&path).await.map_err(|source| AssetError::Read {
            asset: asset.to_string(),
            source,
        })?;
        let id = hex::encode(Sha256::digest(&contents));

        tracing::debug!(asset, id = %id, "asset fingerprinted");
        let url = format!("{asset}?id={id}");
        self.ids.insert(asset.to_string(), id);
        Ok(url)
    }
}

/// Joins `asset` under `root`, refusing anything that could leave it.
fn resolve(root: &Path, asset: &str) -> Result<PathBuf, AssetError> {
    let relative = Path::new(asset.trim_start_matches('/'));
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes || relative.as_os_str().is_empty() {
        return Err(AssetError::InvalidPath(asset.to_string()));
    }
    Ok(root.join(relative))
}
