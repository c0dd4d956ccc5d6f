//! In-memory tier store with failure injection, usable in any tier role.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::error::TierError;
use super::store::{TierStore, WritableTierStore};
use super::types::{CacheDirective, CacheEntry, CacheKey, Tier, TierLookup};

/// A write observed by a [`MockTierStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPut {
    pub key: CacheKey,
    pub size: u64,
    pub ttl: Duration,
}

#[derive(Debug)]
pub struct MockTierStore {
    tier: Tier,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    negatives: RwLock<HashMap<CacheKey, bool>>,
    puts: RwLock<Vec<RecordedPut>>,
    fail_next_gets: AtomicU32,
    get_calls: AtomicU32,
    negative_puts: AtomicU32,
}

impl MockTierStore {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            entries: RwLock::new(HashMap::new()),
            negatives: RwLock::new(HashMap::new()),
            puts: RwLock::new(Vec::new()),
            fail_next_gets: AtomicU32::new(0),
            get_calls: AtomicU32::new(0),
            negative_puts: AtomicU32::new(0),
        }
    }

    /// Seeds an entry without recording a put.
    pub fn insert(&self, key: &CacheKey, entry: CacheEntry) {
        self.entries.write().insert(key.clone(), entry);
    }

    /// Seeds a negative record. `stale` controls how it reads back.
    pub fn insert_negative(&self, key: &CacheKey, stale: bool) {
        self.negatives.write().insert(key.clone(), stale);
    }

    /// Makes the next `n` calls to `get` fail with a transient error.
    pub fn fail_next_gets(&self, n: u32) {
        self.fail_next_gets.store(n, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> Vec<RecordedPut> {
        self.puts.read().clone()
    }

    pub fn negative_puts(&self) -> u32 {
        self.negative_puts.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn has_negative(&self, key: &CacheKey) -> bool {
        self.negatives.read().contains_key(key)
    }

    fn take_failure(&self) -> bool {
        self.fail_next_gets
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TierStore for MockTierStore {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn get(&self, key: &CacheKey) -> Result<TierLookup, TierError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        if self.take_failure() {
            return Err(TierError::transient(self.tier, "injected failure"));
        }

        if let Some(entry) = self.entries.read().get(key) {
            return Ok(TierLookup::Hit(entry.clone()));
        }
        if let Some(stale) = self.negatives.read().get(key) {
            return Ok(TierLookup::Negative { stale: *stale });
        }
        Ok(TierLookup::Miss)
    }
}

#[async_trait]
impl WritableTierStore for MockTierStore {
    async fn put(&self, key: &CacheKey, entry: CacheEntry, ttl: Duration) -> Result<(), TierError> {
        if self.tier == Tier::Origin {
            return Err(TierError::ReadOnly { tier: self.tier });
        }
        self.puts.write().push(RecordedPut {
            key: key.clone(),
            size: entry.size(),
            ttl,
        });
        self.negatives.write().remove(key);
        self.entries.write().insert(key.clone(), entry);
        Ok(())
    }

    async fn put_negative(
        &self,
        key: &CacheKey,
        _directive: CacheDirective,
    ) -> Result<(), TierError> {
        self.negative_puts.fetch_add(1, Ordering::SeqCst);
        self.negatives.write().insert(key.clone(), false);
        Ok(())
    }
}
