//! Local edge tier (in-process, per node).
//!
//! Keyed by the BLAKE3 digest of the [`CacheKey`]. Each record carries its own expiry,
//! and records are weighed by payload size so the capacity is a byte budget.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use moka::sync::Cache;

use super::error::TierError;
use super::store::{TierStore, WritableTierStore};
use super::types::{CacheDirective, CacheEntry, CacheKey, Tier, TierLookup};

const NEGATIVE_RECORD_WEIGHT: u32 = 64;

#[derive(Debug, Clone)]
enum LocalRecord {
    Entry {
        entry: CacheEntry,
        ttl: Duration,
    },
    Negative {
        stored_at: Instant,
        fresh_for: Duration,
        retain_for: Duration,
    },
}

impl LocalRecord {
    fn retention(&self) -> Duration {
        match self {
            LocalRecord::Entry { ttl, .. } => *ttl,
            LocalRecord::Negative { retain_for, .. } => *retain_for,
        }
    }

    fn weight(&self) -> u32 {
        match self {
            LocalRecord::Entry { entry, .. } => {
                u32::try_from(entry.bytes.len()).unwrap_or(u32::MAX).max(1)
            }
            LocalRecord::Negative { .. } => NEGATIVE_RECORD_WEIGHT,
        }
    }
}

struct RecordExpiry;

impl Expiry<[u8; 32], LocalRecord> for RecordExpiry {
    fn expire_after_create(
        &self,
        _key: &[u8; 32],
        value: &LocalRecord,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.retention())
    }

    fn expire_after_update(
        &self,
        _key: &[u8; 32],
        value: &LocalRecord,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.retention())
    }
}

/// In-memory edge cache holding entries and negative records.
pub struct LocalCache {
    records: Cache<[u8; 32], LocalRecord>,
}

impl LocalCache {
    const DEFAULT_CAPACITY_BYTES: u64 = 1024 * 1024 * 1024;

    /// Creates a cache with the default byte budget.
    #[inline]
    pub fn new() -> Self {
        Self::with_capacity_bytes(Self::DEFAULT_CAPACITY_BYTES)
    }

    /// Creates a cache bounded by total payload bytes.
    pub fn with_capacity_bytes(capacity: u64) -> Self {
        Self {
            records: Cache::builder()
                .max_capacity(capacity)
                .weigher(|_key, record: &LocalRecord| record.weight())
                .expire_after(RecordExpiry)
                .build(),
        }
    }

    /// Returns the number of records (entries and negatives).
    #[inline]
    pub fn len(&self) -> u64 {
        self.records.entry_count()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.entry_count() == 0
    }

    /// Returns the total weight of all records.
    #[inline]
    pub fn weighted_size(&self) -> u64 {
        self.records.weighted_size()
    }

    #[inline]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.records.contains_key(&key.digest())
    }

    /// Clears all records.
    #[inline]
    pub fn clear(&self) {
        self.records.invalidate_all();
    }

    /// Runs any pending maintenance tasks in the underlying cache.
    #[inline]
    pub fn run_pending_tasks(&self) {
        self.records.run_pending_tasks();
    }

    fn lookup(&self, key: &CacheKey) -> TierLookup {
        match self.records.get(&key.digest()) {
            Some(LocalRecord::Entry { entry, .. }) => TierLookup::Hit(entry),
            Some(LocalRecord::Negative {
                stored_at,
                fresh_for,
                ..
            }) => TierLookup::Negative {
                stale: stored_at.elapsed() >= fresh_for,
            },
            None => TierLookup::Miss,
        }
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("records", &self.records.entry_count())
            .field("weighted_size", &self.records.weighted_size())
            .finish()
    }
}

#[async_trait]
impl TierStore for LocalCache {
    fn tier(&self) -> Tier {
        Tier::Local
    }

    async fn get(&self, key: &CacheKey) -> Result<TierLookup, TierError> {
        Ok(self.lookup(key))
    }
}

#[async_trait]
impl WritableTierStore for LocalCache {
    async fn put(&self, key: &CacheKey, entry: CacheEntry, ttl: Duration) -> Result<(), TierError> {
        self.records
            .insert(key.digest(), LocalRecord::Entry { entry, ttl });
        Ok(())
    }

    async fn put_negative(
        &self,
        key: &CacheKey,
        directive: CacheDirective,
    ) -> Result<(), TierError> {
        self.records.insert(
            key.digest(),
            LocalRecord::Negative {
                stored_at: Instant::now(),
                fresh_for: directive.max_age,
                retain_for: directive.retention(),
            },
        );
        Ok(())
    }
}
