//! Durable origin tier backed by a directory tree.
//!
//! Layout: `<root>/<NAMESPACE>/<path>`. The origin is read-only from the resolver's
//! point of view; objects are uploaded out of band.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use super::error::TierError;
use super::store::TierStore;
use super::types::{CacheEntry, CacheKey, Tier, TierLookup};
use crate::constants::FALLBACK_CONTENT_TYPE;

/// Infers a content type from the key's extension, falling back to
/// `application/octet-stream`.
pub fn infer_content_type(key: &CacheKey) -> String {
    key.extension()
        .and_then(|ext| mime_guess::from_ext(&ext).first())
        .map(|mime| mime.essence_str().to_string())
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

#[derive(Debug, Clone)]
pub struct FsOriginStore {
    root: PathBuf,
}

impl FsOriginStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves the on-disk path for `key`, rejecting traversal outside the root.
    pub fn object_path(&self, key: &CacheKey) -> Option<PathBuf> {
        let rel = sanitize_object_key(&key.origin_key())?;
        Some(self.root.join(rel))
    }
}

fn sanitize_object_key(object_key: &str) -> Option<PathBuf> {
    if object_key.is_empty() {
        return None;
    }

    let mut out = PathBuf::new();
    for c in Path::new(object_key).components() {
        match c {
            Component::Normal(seg) => out.push(seg),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

#[async_trait]
impl TierStore for FsOriginStore {
    fn tier(&self) -> Tier {
        Tier::Origin
    }

    async fn get(&self, key: &CacheKey) -> Result<TierLookup, TierError> {
        let Some(path) = self.object_path(key) else {
            warn!(key = %key, "Rejected invalid origin key (path traversal?)");
            return Ok(TierLookup::Miss);
        };

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(TierLookup::Miss),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TierLookup::Miss),
            Err(e) => return Err(TierError::transient(Tier::Origin, e.to_string())),
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TierLookup::Miss),
            Err(e) => return Err(TierError::transient(Tier::Origin, e.to_string())),
        };

        Ok(TierLookup::Hit(CacheEntry {
            content_length: bytes.len() as u64,
            bytes: bytes.into(),
            content_type: infer_content_type(key),
            cached_at: Utc::now(),
        }))
    }
}
