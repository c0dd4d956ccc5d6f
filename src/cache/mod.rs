//! Tier stores and the resolver that walks them.

pub mod distributed;
pub mod error;
pub mod local;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod origin;
pub mod resolver;
pub mod retry;
pub mod store;
pub mod types;

#[cfg(test)]
mod resolver_tests;

pub use distributed::{KvMetadata, MemoryKvStore};
pub use error::TierError;
pub use local::LocalCache;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockTierStore, RecordedPut};
pub use origin::{FsOriginStore, infer_content_type};
#[cfg(any(test, feature = "mock"))]
pub use resolver::MockCacheResolver;
pub use resolver::{
    CacheResolver, PromotionPolicy, Resolution, ResolutionOutcome, Resolved, ResolverConfig,
};
pub use retry::{FailedAttempt, FailedAttemptHook, RetryExecutor, RetryOutcome, RetryPolicy};
pub use store::{TierStore, WritableTierStore};
pub use types::{
    CacheDirective, CacheEntry, CacheKey, CacheStatus, Namespace, Tier, TierLookup, TierResult,
};
