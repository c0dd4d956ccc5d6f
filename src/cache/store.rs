use std::time::Duration;

use async_trait::async_trait;

use super::error::TierError;
use super::types::{CacheDirective, CacheEntry, CacheKey, Tier, TierLookup};

/// Read capability shared by every tier.
///
/// Implementations must be safe to call concurrently; the resolver never locks around
/// them. `get` must be idempotent because it runs under retries.
#[async_trait]
pub trait TierStore: Send + Sync {
    /// Role this store plays in the hierarchy.
    fn tier(&self) -> Tier;

    /// Looks up `key`. `Ok(TierLookup::Miss)` means the tier does not hold it;
    /// `Err` means the tier could not answer.
    async fn get(&self, key: &CacheKey) -> Result<TierLookup, TierError>;
}

/// Write capability of the cache tiers (local and distributed).
#[async_trait]
pub trait WritableTierStore: TierStore {
    /// Stores `entry`, fully replacing any previous value. `ttl` bounds how long the
    /// tier may serve it.
    async fn put(&self, key: &CacheKey, entry: CacheEntry, ttl: Duration) -> Result<(), TierError>;

    /// Records that `key` is absent. Tiers that do not negative-cache ignore this.
    async fn put_negative(
        &self,
        _key: &CacheKey,
        _directive: CacheDirective,
    ) -> Result<(), TierError> {
        Ok(())
    }
}
