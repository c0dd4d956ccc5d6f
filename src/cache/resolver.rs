//! Tiered resolution: local, then distributed, then origin.
//!
//! ```text
//! CheckLocal --hit--> Serve
//!     | miss
//! CheckDistributed --hit--> PromoteLocal + Serve
//!     | miss
//! CheckOrigin --hit--> PromoteDistributed + PromoteLocal + Serve
//!     | miss
//! CacheNegative + NotFound
//! ```
//!
//! Every tier read runs under the [`RetryExecutor`]; exhaustion at a tier is a miss at
//! that tier. Promotions and negative-cache writes are handed to the
//! [`BackgroundScheduler`] and never delay the response.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use serde::Serialize;
use serde_json::json;
use tracing::{Span, debug, info, instrument, warn};

use super::error::TierError;
use super::retry::{FailedAttempt, FailedAttemptHook, RetryExecutor, RetryOutcome, RetryPolicy};
use super::store::{TierStore, WritableTierStore};
use super::types::{
    CacheDirective, CacheEntry, CacheKey, CacheStatus, Tier, TierLookup, TierResult,
};
use crate::background::{BackgroundScheduler, task};
use crate::constants::{
    DISTRIBUTED_MAX_ENTRY_BYTES, DISTRIBUTED_TTL, LOCAL_MAX_ENTRY_BYTES, LOCAL_TTL,
};
use crate::hashing::hash_to_u64;
use crate::telemetry::{RequestContext, error_fields};

#[cfg(any(test, feature = "mock"))]
use super::mock::MockTierStore;

/// Size ceilings and TTLs for promotion writes.
///
/// The two ceilings are independent: an entry over the distributed ceiling can still
/// be promoted into the local tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionPolicy {
    pub local_max_bytes: u64,
    pub distributed_max_bytes: u64,
    pub local_ttl: Duration,
    pub distributed_ttl: Duration,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        Self {
            local_max_bytes: LOCAL_MAX_ENTRY_BYTES,
            distributed_max_bytes: DISTRIBUTED_MAX_ENTRY_BYTES,
            local_ttl: LOCAL_TTL,
            distributed_ttl: DISTRIBUTED_TTL,
        }
    }
}

impl PromotionPolicy {
    /// Whether an entry of `size` bytes may be written into `tier`. The origin never
    /// admits writes.
    pub fn admits(&self, tier: Tier, size: u64) -> bool {
        match tier {
            Tier::Local => size <= self.local_max_bytes,
            Tier::Distributed => size <= self.distributed_max_bytes,
            Tier::Origin => false,
        }
    }

    pub fn max_bytes(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Local => self.local_max_bytes,
            Tier::Distributed => self.distributed_max_bytes,
            Tier::Origin => 0,
        }
    }

    pub fn ttl(&self, tier: Tier) -> Duration {
        match tier {
            Tier::Local => self.local_ttl,
            Tier::Distributed | Tier::Origin => self.distributed_ttl,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    pub retry: RetryPolicy,
    pub promotion: PromotionPolicy,
    pub positive: CacheDirective,
    pub negative: CacheDirective,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            promotion: PromotionPolicy::default(),
            positive: CacheDirective::positive(),
            negative: CacheDirective::negative(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Found(CacheEntry),
    NotFound,
}

/// Hit/miss flags handed to request telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    pub local_hit: bool,
    pub distributed_hit: bool,
    pub origin_hit: bool,
    pub cache_hit: bool,
    pub served_by_tier: Option<Tier>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub resolved: Resolved,
    pub status: CacheStatus,
    pub directive: CacheDirective,
    pub outcome: ResolutionOutcome,
}

impl Resolution {
    /// Builds the response view of a tier walk that ended at `result`.
    pub fn from_tier_result(result: TierResult, config: &ResolverConfig) -> Self {
        match result {
            TierResult::Hit { entry, tier } => Self::found(entry, tier, config.positive),
            TierResult::Miss => Self::miss(config.negative),
        }
    }

    fn found(entry: CacheEntry, tier: Tier, directive: CacheDirective) -> Self {
        let status = match tier {
            Tier::Local => CacheStatus::HitLocal,
            Tier::Distributed => CacheStatus::HitDistributed,
            Tier::Origin => CacheStatus::HitOrigin,
        };
        Self {
            resolved: Resolved::Found(entry),
            status,
            directive,
            outcome: ResolutionOutcome {
                local_hit: tier == Tier::Local,
                distributed_hit: tier == Tier::Distributed,
                origin_hit: tier == Tier::Origin,
                cache_hit: status.is_cache_hit(),
                served_by_tier: Some(tier),
            },
        }
    }

    fn negative_hit(directive: CacheDirective) -> Self {
        Self {
            resolved: Resolved::NotFound,
            status: CacheStatus::NegativeHit,
            directive,
            outcome: ResolutionOutcome {
                local_hit: true,
                cache_hit: true,
                served_by_tier: Some(Tier::Local),
                ..ResolutionOutcome::default()
            },
        }
    }

    fn miss(directive: CacheDirective) -> Self {
        Self {
            resolved: Resolved::NotFound,
            status: CacheStatus::Miss,
            directive,
            outcome: ResolutionOutcome::default(),
        }
    }

    #[inline]
    pub fn is_found(&self) -> bool {
        matches!(self.resolved, Resolved::Found(_))
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        match &self.resolved {
            Resolved::Found(entry) => Some(entry),
            Resolved::NotFound => None,
        }
    }

    #[inline]
    pub fn served_by(&self) -> Option<Tier> {
        self.outcome.served_by_tier
    }
}

pub struct CacheResolver<L, D, O>
where
    L: WritableTierStore + 'static,
    D: WritableTierStore + 'static,
    O: TierStore + 'static,
{
    local: Arc<L>,
    distributed: Arc<D>,
    origin: Arc<O>,
    retry: RetryExecutor,
    config: ResolverConfig,
    scheduler: Arc<dyn BackgroundScheduler>,
    /// Keys with a revalidation scheduled or running.
    revalidating: Arc<Mutex<HashSet<CacheKey>>>,
}

impl<L, D, O> std::fmt::Debug for CacheResolver<L, D, O>
where
    L: WritableTierStore + 'static,
    D: WritableTierStore + 'static,
    O: TierStore + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheResolver")
            .field("retry", &self.retry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<L, D, O> CacheResolver<L, D, O>
where
    L: WritableTierStore + 'static,
    D: WritableTierStore + 'static,
    O: TierStore + 'static,
{
    pub fn new(
        local: Arc<L>,
        distributed: Arc<D>,
        origin: Arc<O>,
        scheduler: Arc<dyn BackgroundScheduler>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            local,
            distributed,
            origin,
            retry: RetryExecutor::new(config.retry.clone()),
            config,
            scheduler,
            revalidating: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn local(&self) -> &L {
        &self.local
    }

    pub fn distributed(&self) -> &D {
        &self.distributed
    }

    pub fn origin(&self) -> &O {
        &self.origin
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Number of keys whose stale negative record is being revalidated.
    pub fn revalidations_in_flight(&self) -> usize {
        self.revalidating.lock().len()
    }

    #[instrument(skip(self, ctx), fields(key = %key, key_hash = tracing::field::Empty))]
    pub async fn resolve(&self, key: &CacheKey, ctx: &RequestContext) -> Resolution {
        Span::current().record("key_hash", hash_to_u64(&key.digest()));

        debug!("Checking local tier");
        match self.check(self.local.as_ref(), key, ctx).await {
            TierLookup::Hit(entry) => {
                info!(size = entry.size(), "Local tier hit");
                return Resolution::from_tier_result(
                    TierResult::Hit {
                        entry,
                        tier: Tier::Local,
                    },
                    &self.config,
                );
            }
            TierLookup::Negative { stale } => {
                debug!(stale, "Local tier holds negative record");
                if stale {
                    self.schedule_revalidation(key, ctx);
                }
                return Resolution::negative_hit(self.config.negative);
            }
            TierLookup::Miss => {}
        }

        debug!("Local miss, checking distributed tier");
        if let TierLookup::Hit(entry) = self.check(self.distributed.as_ref(), key, ctx).await {
            info!(size = entry.size(), "Distributed tier hit");
            self.schedule_promotion(&self.local, key, &entry, ctx);
            return Resolution::from_tier_result(
                TierResult::Hit {
                    entry,
                    tier: Tier::Distributed,
                },
                &self.config,
            );
        }

        debug!("Distributed miss, checking origin");
        if let TierLookup::Hit(entry) = self.check(self.origin.as_ref(), key, ctx).await {
            info!(size = entry.size(), "Origin hit");
            self.schedule_promotion(&self.distributed, key, &entry, ctx);
            self.schedule_promotion(&self.local, key, &entry, ctx);
            return Resolution::from_tier_result(
                TierResult::Hit {
                    entry,
                    tier: Tier::Origin,
                },
                &self.config,
            );
        }

        info!("Not found in any tier");
        self.schedule_negative(key, ctx);
        Resolution::from_tier_result(TierResult::Miss, &self.config)
    }

    /// Reads one tier under retry. Exhaustion degrades to a miss.
    async fn check<S>(&self, store: &S, key: &CacheKey, ctx: &RequestContext) -> TierLookup
    where
        S: TierStore + ?Sized,
    {
        let tier = store.tier();
        let on_failed_attempt = |failed: &FailedAttempt<'_, TierError>| {
            log_failed_read(ctx, tier, failed);
        };

        let hook: FailedAttemptHook<'_, TierError> = &on_failed_attempt;

        match self.retry.execute(|| store.get(key), Some(hook)).await
        {
            RetryOutcome::Success { value, .. } => value,
            RetryOutcome::ExhaustedRetries {
                last_error,
                attempts,
            } => {
                warn!(%tier, attempts, error = %last_error, "Tier read retries exhausted; treating as miss");
                TierLookup::Miss
            }
        }
    }

    fn schedule_promotion<T>(
        &self,
        store: &Arc<T>,
        key: &CacheKey,
        entry: &CacheEntry,
        ctx: &RequestContext,
    ) where
        T: WritableTierStore + 'static,
    {
        let tier = store.tier();
        let size = entry.size();
        let policy = &self.config.promotion;

        if !policy.admits(tier, size) {
            debug!(%tier, size, max = policy.max_bytes(tier), "Skipping promotion, entry too large");
            ctx.info(
                format!("Not caching in {} tier because size is too big", tier),
                Some(json!({ "size": size, "maxSize": policy.max_bytes(tier) })),
            );
            return;
        }

        let store = Arc::clone(store);
        let key = key.clone();
        let entry = entry.clone();
        let ttl = policy.ttl(tier);
        let ctx = ctx.clone();
        self.scheduler.schedule(task(async move {
            match store.put(&key, entry, ttl).await {
                Ok(()) => debug!(%tier, key = %key, "Promoted entry"),
                Err(e) => {
                    warn!(%tier, key = %key, error = %e, "Promotion write failed");
                    ctx.error_with(format!("Failed to cache in {} tier", tier), &e, None);
                }
            }
        }));
    }

    fn schedule_negative(&self, key: &CacheKey, ctx: &RequestContext) {
        let local = Arc::clone(&self.local);
        let key = key.clone();
        let directive = self.config.negative;
        let ctx = ctx.clone();
        self.scheduler.schedule(task(async move {
            if let Err(e) = local.put_negative(&key, directive).await {
                warn!(key = %key, error = %e, "Negative cache write failed");
                ctx.error_with("Failed to cache not-found result", &e, None);
            }
        }));
    }

    /// Re-checks the origin for a key whose negative record went stale. At most one
    /// revalidation per key is outstanding at a time.
    fn schedule_revalidation(&self, key: &CacheKey, ctx: &RequestContext) {
        let Some(claim) = RevalidationClaim::acquire(&self.revalidating, key) else {
            debug!(key = %key, "Revalidation already in flight");
            return;
        };

        let local = Arc::clone(&self.local);
        let distributed = Arc::clone(&self.distributed);
        let origin = Arc::clone(&self.origin);
        let retry = self.retry.clone();
        let config = self.config.clone();
        let key = key.clone();
        let ctx = ctx.clone();

        self.scheduler.schedule(task(async move {
            let _claim = claim;
            let on_failed_attempt = |failed: &FailedAttempt<'_, TierError>| {
                log_failed_read(&ctx, Tier::Origin, failed);
            };
            let hook: FailedAttemptHook<'_, TierError> = &on_failed_attempt;

            let found = match retry.execute(|| origin.get(&key), Some(hook)).await {
                RetryOutcome::Success {
                    value: TierLookup::Hit(entry),
                    ..
                } => Some(entry),
                _ => None,
            };

            let Some(entry) = found else {
                if let Err(e) = local.put_negative(&key, config.negative).await {
                    warn!(key = %key, error = %e, "Negative cache refresh failed");
                }
                return;
            };

            info!(key = %key, size = entry.size(), "Revalidation found object at origin");
            ctx.info(
                "Negative cache revalidated, object now present",
                Some(json!({ "key": key.to_string(), "size": entry.size() })),
            );

            let policy = &config.promotion;
            if policy.admits(Tier::Distributed, entry.size()) {
                if let Err(e) = distributed
                    .put(&key, entry.clone(), policy.distributed_ttl)
                    .await
                {
                    warn!(key = %key, error = %e, "Revalidation write to distributed tier failed");
                }
            }
            if policy.admits(Tier::Local, entry.size()) {
                if let Err(e) = local.put(&key, entry, policy.local_ttl).await {
                    warn!(key = %key, error = %e, "Revalidation write to local tier failed");
                }
            }
        }));
    }
}

fn log_failed_read(ctx: &RequestContext, tier: Tier, failed: &FailedAttempt<'_, TierError>) {
    ctx.warn(
        format!("{} read failed", tier),
        Some(json!({
            "attemptNumber": failed.attempt_number,
            "retriesLeft": failed.retries_left,
            "error": error_fields(failed.error),
        })),
    );
}

/// Marks a key as being revalidated; released on drop, including when the
/// background task is abandoned before it runs.
struct RevalidationClaim {
    set: Arc<Mutex<HashSet<CacheKey>>>,
    key: CacheKey,
}

impl RevalidationClaim {
    fn acquire(set: &Arc<Mutex<HashSet<CacheKey>>>, key: &CacheKey) -> Option<Self> {
        if !set.lock().insert(key.clone()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            key: key.clone(),
        })
    }
}

impl Drop for RevalidationClaim {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

#[cfg(any(test, feature = "mock"))]
pub type MockCacheResolver = CacheResolver<MockTierStore, MockTierStore, MockTierStore>;

#[cfg(any(test, feature = "mock"))]
impl CacheResolver<MockTierStore, MockTierStore, MockTierStore> {
    /// Resolver over three mock stores with zero-delay retries.
    pub fn new_mock(scheduler: Arc<dyn BackgroundScheduler>) -> Self {
        Self::new_mock_with_config(
            scheduler,
            ResolverConfig {
                retry: RetryPolicy::immediate(crate::constants::DEFAULT_TIER_RETRIES),
                ..ResolverConfig::default()
            },
        )
    }

    pub fn new_mock_with_config(
        scheduler: Arc<dyn BackgroundScheduler>,
        config: ResolverConfig,
    ) -> Self {
        Self::new(
            Arc::new(MockTierStore::new(Tier::Local)),
            Arc::new(MockTierStore::new(Tier::Distributed)),
            Arc::new(MockTierStore::new(Tier::Origin)),
            scheduler,
            config,
        )
    }
}
