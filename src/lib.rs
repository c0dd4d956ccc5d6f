//! Cascade library crate (used by the server and integration tests).
//!
//! # Public API Surface
//!
//! ## Core Types
//! - [`Config`], [`ConfigError`] - Server configuration
//! - [`CacheKey`], [`CacheEntry`], [`CacheDirective`] - What is cached and for how long
//! - [`CacheResolver`] - Walks local, distributed and origin tiers, promoting on the way back
//! - [`LocalCache`], [`MemoryKvStore`], [`FsOriginStore`] - Tier stores
//!
//! ## Telemetry
//! - [`TelemetryBatcher`] - Process-wide event queue with count and time triggers
//! - [`RequestContext`] - Per-request view tagging events with an invocation id
//! - [`HttpSink`], [`TracingSink`] - Delivery targets
//!
//! ## Test/Mock Support
//! Mock implementations are available behind `#[cfg(any(test, feature = "mock"))]`.

pub mod background;
pub mod cache;
pub mod config;
pub mod constants;
pub mod gateway;
pub mod hashing;
pub mod telemetry;

pub use background::{BackgroundScheduler, BackgroundTask, TokioScheduler};
#[cfg(any(test, feature = "mock"))]
pub use background::ManualScheduler;

pub use cache::{
    CacheDirective, CacheEntry, CacheKey, CacheResolver, CacheStatus, FsOriginStore, LocalCache,
    MemoryKvStore, Namespace, PromotionPolicy, Resolution, ResolutionOutcome, Resolved,
    ResolverConfig, RetryPolicy, Tier, TierError, TierLookup, TierStore, WritableTierStore,
};
#[cfg(any(test, feature = "mock"))]
pub use cache::{MockCacheResolver, MockTierStore};

pub use config::{Config, ConfigError};

pub use telemetry::{
    BatcherConfig, FlushOutcome, HttpSink, LogEvent, LogLevel, RequestContext, TelemetryBatcher,
    TelemetrySink, TracingSink, TransportError,
};
#[cfg(any(test, feature = "mock"))]
pub use telemetry::RecordingSink;

pub use hashing::{hash_cache_key, hash_to_u64};
