//! Distributed key/value tier.
//!
//! Values are opaque blobs with a side metadata map. The entry's content type and
//! length travel in that map (`content-type`, `content-length`) so a hit never has to
//! re-derive them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use moka::Expiry;
use moka::sync::Cache;

use super::error::TierError;
use super::store::{TierStore, WritableTierStore};
use super::types::{CacheEntry, CacheKey, Tier, TierLookup};
use crate::constants::{META_CONTENT_LENGTH, META_CONTENT_TYPE};

/// Metadata stored next to a value.
pub type KvMetadata = HashMap<String, String>;

#[derive(Debug, Clone)]
struct KvRecord {
    value: Bytes,
    metadata: KvMetadata,
    ttl: Duration,
}

struct KvExpiry;

impl Expiry<String, KvRecord> for KvExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &KvRecord,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &KvRecord,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-memory key/value store with per-key TTL, used as the distributed tier.
///
/// Keys are namespaced under `prefix` (`<prefix>/IMAGES/cat.png`).
pub struct MemoryKvStore {
    prefix: String,
    records: Cache<String, KvRecord>,
}

impl MemoryKvStore {
    const DEFAULT_CAPACITY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_capacity_bytes(prefix, Self::DEFAULT_CAPACITY_BYTES)
    }

    pub fn with_capacity_bytes(prefix: impl Into<String>, capacity: u64) -> Self {
        Self {
            prefix: prefix.into(),
            records: Cache::builder()
                .max_capacity(capacity)
                .weigher(|_key, record: &KvRecord| {
                    u32::try_from(record.value.len()).unwrap_or(u32::MAX).max(1)
                })
                .expire_after(KvExpiry)
                .build(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Raw read: value plus metadata.
    pub fn get_with_metadata(&self, key: &str) -> Option<(Bytes, KvMetadata)> {
        self.records
            .get(key)
            .map(|record| (record.value, record.metadata))
    }

    /// Raw write. Replaces any existing value and metadata.
    pub fn put_with_metadata(&self, key: &str, value: Bytes, metadata: KvMetadata, ttl: Duration) {
        self.records.insert(
            key.to_string(),
            KvRecord {
                value,
                metadata,
                ttl,
            },
        );
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.records.entry_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.entry_count() == 0
    }

    #[inline]
    pub fn run_pending_tasks(&self) {
        self.records.run_pending_tasks();
    }
}

impl std::fmt::Debug for MemoryKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryKvStore")
            .field("prefix", &self.prefix)
            .field("records", &self.records.entry_count())
            .finish()
    }
}

/// Builds the metadata map written alongside an entry.
pub fn entry_metadata(entry: &CacheEntry) -> KvMetadata {
    let mut metadata = KvMetadata::with_capacity(2);
    metadata.insert(META_CONTENT_TYPE.to_string(), entry.content_type.clone());
    metadata.insert(
        META_CONTENT_LENGTH.to_string(),
        entry.content_length.to_string(),
    );
    metadata
}

/// Rebuilds an entry from a stored value and its metadata.
///
/// A missing content type is a corrupt record; a missing length falls back to the
/// value size.
pub fn entry_from_record(
    key: &str,
    value: Bytes,
    metadata: &KvMetadata,
) -> Result<CacheEntry, TierError> {
    let content_type = metadata
        .get(META_CONTENT_TYPE)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| TierError::Corrupt {
            tier: Tier::Distributed,
            key: key.to_string(),
            reason: format!("missing {} metadata", META_CONTENT_TYPE),
        })?;

    let content_length = match metadata.get(META_CONTENT_LENGTH) {
        Some(raw) => raw.parse::<u64>().map_err(|e| TierError::Corrupt {
            tier: Tier::Distributed,
            key: key.to_string(),
            reason: format!("invalid {} '{}': {}", META_CONTENT_LENGTH, raw, e),
        })?,
        None => value.len() as u64,
    };

    Ok(CacheEntry {
        bytes: value,
        content_type,
        content_length,
        cached_at: Utc::now(),
    })
}

#[async_trait]
impl TierStore for MemoryKvStore {
    fn tier(&self) -> Tier {
        Tier::Distributed
    }

    async fn get(&self, key: &CacheKey) -> Result<TierLookup, TierError> {
        let kv_key = key.distributed_key(&self.prefix);
        match self.get_with_metadata(&kv_key) {
            Some((value, metadata)) => {
                entry_from_record(&kv_key, value, &metadata).map(TierLookup::Hit)
            }
            None => Ok(TierLookup::Miss),
        }
    }
}

#[async_trait]
impl WritableTierStore for MemoryKvStore {
    async fn put(&self, key: &CacheKey, entry: CacheEntry, ttl: Duration) -> Result<(), TierError> {
        let kv_key = key.distributed_key(&self.prefix);
        let metadata = entry_metadata(&entry);
        self.put_with_metadata(&kv_key, entry.bytes, metadata, ttl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::types::Namespace;

    #[tokio::test]
    async fn test_put_writes_prefixed_key_with_metadata() {
        let store = MemoryKvStore::new("cascade-content");
        let key = CacheKey::new(Namespace::Images, "/cat.png");
        let entry = CacheEntry::new(b"meow".to_vec(), "image/png");

        store
            .put(&key, entry, Duration::from_secs(60))
            .await
            .expect("put");

        let (value, metadata) = store
            .get_with_metadata("cascade-content/IMAGES/cat.png")
            .expect("raw record");
        assert_eq!(&value[..], b"meow");
        assert_eq!(metadata.get("content-type").map(String::as_str), Some("image/png"));
        assert_eq!(metadata.get("content-length").map(String::as_str), Some("4"));
    }

    #[tokio::test]
    async fn test_get_carries_metadata_verbatim() {
        let store = MemoryKvStore::new("p");
        let key = CacheKey::new(Namespace::Downloads, "/setup.bin");
        let mut metadata = KvMetadata::new();
        metadata.insert("content-type".to_string(), "application/x-custom".to_string());
        metadata.insert("content-length".to_string(), "3".to_string());
        store.put_with_metadata(
            "p/DOWNLOADS/setup.bin",
            Bytes::from_static(b"abc"),
            metadata,
            Duration::from_secs(60),
        );

        match store.get(&key).await.expect("get") {
            TierLookup::Hit(entry) => {
                assert_eq!(entry.content_type, "application/x-custom");
                assert_eq!(entry.content_length, 3);
            }
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_content_type_is_corrupt() {
        let store = MemoryKvStore::new("p");
        store.put_with_metadata(
            "p/IMAGES/x.png",
            Bytes::from_static(b"abc"),
            KvMetadata::new(),
            Duration::from_secs(60),
        );

        let err = store
            .get(&CacheKey::new(Namespace::Images, "/x.png"))
            .await
            .expect_err("should be corrupt");
        assert!(matches!(err, TierError::Corrupt { .. }));
    }

    #[test]
    fn test_missing_length_falls_back_to_value_size() {
        let mut metadata = KvMetadata::new();
        metadata.insert("content-type".to_string(), "text/plain".to_string());

        let entry =
            entry_from_record("k", Bytes::from_static(b"hello"), &metadata).expect("entry");
        assert_eq!(entry.content_length, 5);
    }

    #[tokio::test]
    async fn test_miss_for_unknown_key() {
        let store = MemoryKvStore::new("p");
        let lookup = store
            .get(&CacheKey::new(Namespace::Images, "/nope"))
            .await
            .expect("get");
        assert_eq!(lookup, TierLookup::Miss);
    }
}
