//! Cross-cutting, shared constants.
//!
//! Prefer deriving secondary constants (e.g. durations from seconds) from primary ones to
//! avoid drift.
//!
//! # Size ceilings
//!
//! The two promotion ceilings are evaluated independently: an entry too large for the
//! distributed tier can still be promoted into the local tier.

use std::time::Duration;

const MIB: u64 = 1024 * 1024;

/// Largest entry eligible for promotion into the local edge tier.
pub const LOCAL_MAX_ENTRY_BYTES: u64 = 500 * MIB;
/// Largest entry eligible for promotion into the distributed key/value tier.
pub const DISTRIBUTED_MAX_ENTRY_BYTES: u64 = 25 * MIB;

/// Freshness of positive responses (30 days). Content at a key never changes.
pub const POSITIVE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;
/// Freshness of negative (not found) responses.
pub const NEGATIVE_MAX_AGE_SECS: u64 = 60;
/// Window in which a stale negative response may still be served while revalidating.
pub const NEGATIVE_STALE_WHILE_REVALIDATE_SECS: u64 = 600;

/// TTL applied to entries written into the distributed tier.
pub const DISTRIBUTED_TTL: Duration = Duration::from_secs(POSITIVE_MAX_AGE_SECS);
/// TTL applied to entries promoted into the local tier.
pub const LOCAL_TTL: Duration = Duration::from_secs(POSITIVE_MAX_AGE_SECS);

/// Attempts per tier access before the tier is treated as a miss.
pub const DEFAULT_TIER_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_MIN_DELAY: Duration = Duration::from_millis(50);
pub const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_RETRY_FACTOR: f64 = 2.0;

/// Telemetry count trigger (N).
pub const DEFAULT_FLUSH_AFTER_EVENTS: usize = 100;
/// Telemetry time trigger (T).
pub const DEFAULT_FLUSH_AFTER: Duration = Duration::from_secs(15);

/// How long shutdown waits for background writes and flushes to finish.
pub const SHUTDOWN_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Metadata keys carried alongside distributed-tier blobs.
pub const META_CONTENT_TYPE: &str = "content-type";
pub const META_CONTENT_LENGTH: &str = "content-length";

pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

pub const CASCADE_STATUS_HEADER: &str = "X-Cascade-Status";
