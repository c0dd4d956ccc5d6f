use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;

use super::resolver::{MockCacheResolver, PromotionPolicy, Resolved};
use super::types::{CacheDirective, CacheEntry, CacheKey, CacheStatus, Namespace, Tier};
use crate::background::ManualScheduler;
use crate::constants::{DISTRIBUTED_TTL, LOCAL_TTL};
use crate::telemetry::{BatcherConfig, RecordingSink, RequestContext, TelemetryBatcher};

const MB: u64 = 1_000_000;
const MIB: u64 = 1024 * 1024;

struct Harness {
    resolver: MockCacheResolver,
    scheduler: Arc<ManualScheduler>,
    batcher: TelemetryBatcher,
    sink: Arc<RecordingSink>,
}

impl Harness {
    fn new() -> Self {
        let scheduler = Arc::new(ManualScheduler::new());
        let sink = Arc::new(RecordingSink::new());
        let batcher = TelemetryBatcher::new(
            sink.clone(),
            Arc::new(ManualScheduler::new()),
            BatcherConfig {
                flush_after_events: 10_000,
                ..BatcherConfig::default()
            },
        );
        Self {
            resolver: MockCacheResolver::new_mock(scheduler.clone()),
            scheduler,
            batcher,
            sink,
        }
    }

    fn ctx(&self) -> RequestContext {
        RequestContext::with_invocation_id(self.batcher.clone(), "test-invocation")
    }

    async fn messages(&self) -> Vec<String> {
        self.batcher.flush(false).await;
        self.sink
            .events()
            .iter()
            .map(|e| e.message().to_string())
            .collect()
    }
}

fn key(path: &str) -> CacheKey {
    CacheKey::new(Namespace::Images, path)
}

/// Entry that reports `size` bytes without allocating them.
fn entry_of_size(size: u64) -> CacheEntry {
    CacheEntry {
        bytes: Bytes::from_static(b"payload"),
        content_type: "image/png".to_string(),
        content_length: size,
        cached_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_origin_hit_then_promoted_hit() {
    let h = Harness::new();
    let k = key("/cat.png");
    h.resolver
        .origin()
        .insert(&k, CacheEntry::new(b"meow".to_vec(), "image/png"));

    let first = h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(first.status, CacheStatus::HitOrigin);
    assert_eq!(first.served_by(), Some(Tier::Origin));
    assert_eq!(first.directive, CacheDirective::positive());
    assert_eq!(&first.entry().expect("entry").bytes[..], b"meow");

    // Promotion is not awaited by resolve.
    assert!(h.resolver.local().puts().is_empty());
    assert_eq!(h.scheduler.pending(), 2);

    h.scheduler.run_all().await;

    let second = h.resolver.resolve(&k, &h.ctx()).await;
    assert!(matches!(
        second.served_by(),
        Some(Tier::Local) | Some(Tier::Distributed)
    ));
    assert_eq!(second.status, CacheStatus::HitLocal);
    let entry = second.entry().expect("entry");
    assert_eq!(&entry.bytes[..], b"meow");
    assert_eq!(entry.content_type, "image/png");
    assert_eq!(h.resolver.origin().get_calls(), 1);
}

#[tokio::test]
async fn test_distributed_hit_promotes_to_local_only() {
    let h = Harness::new();
    let k = key("/dog.jpg");
    h.resolver
        .distributed()
        .insert(&k, CacheEntry::new(b"woof".to_vec(), "image/jpeg"));

    let resolution = h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(resolution.status, CacheStatus::HitDistributed);
    assert!(resolution.outcome.cache_hit);
    assert!(resolution.outcome.distributed_hit);
    assert!(!resolution.outcome.local_hit);

    h.scheduler.run_all().await;

    let puts = h.resolver.local().puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].ttl, LOCAL_TTL);
    assert!(h.resolver.distributed().puts().is_empty());
    assert_eq!(h.resolver.origin().get_calls(), 0);
}

#[tokio::test]
async fn test_absent_key_is_negative_cached() {
    let h = Harness::new();
    let k = key("/missing.png");

    let first = h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(first.resolved, Resolved::NotFound);
    assert_eq!(first.status, CacheStatus::Miss);
    assert_eq!(first.directive, CacheDirective::negative());
    assert!(!first.outcome.cache_hit);
    assert_eq!(first.served_by(), None);

    h.scheduler.run_all().await;
    assert!(h.resolver.local().has_negative(&k));
    assert_eq!(h.resolver.local().negative_puts(), 1);

    let second = h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(second.resolved, Resolved::NotFound);
    assert_eq!(second.status, CacheStatus::NegativeHit);
    assert!(second.outcome.cache_hit);
    assert_eq!(h.resolver.origin().get_calls(), 1);
    assert_eq!(h.resolver.distributed().get_calls(), 1);
}

#[tokio::test]
async fn test_small_object_promoted_to_both_tiers() {
    let h = Harness::new();
    let k = key("/small.png");
    h.resolver.origin().insert(&k, entry_of_size(10 * MB));

    h.resolver.resolve(&k, &h.ctx()).await;
    h.scheduler.run_all().await;

    let local = h.resolver.local().puts();
    let distributed = h.resolver.distributed().puts();
    assert_eq!(local.len(), 1);
    assert_eq!(distributed.len(), 1);
    assert_eq!(distributed[0].size, 10 * MB);
    assert_eq!(distributed[0].ttl, DISTRIBUTED_TTL);
}

#[tokio::test]
async fn test_medium_object_promoted_to_local_only() {
    let h = Harness::new();
    let k = key("/medium.png");
    h.resolver.origin().insert(&k, entry_of_size(100 * MB));

    h.resolver.resolve(&k, &h.ctx()).await;
    h.scheduler.run_all().await;

    assert_eq!(h.resolver.local().puts().len(), 1);
    assert!(h.resolver.distributed().puts().is_empty());
    assert!(
        h.messages()
            .await
            .contains(&"Not caching in distributed tier because size is too big".to_string())
    );
}

#[tokio::test]
async fn test_large_object_promoted_nowhere() {
    let h = Harness::new();
    let k = key("/large.bin");
    h.resolver.origin().insert(&k, entry_of_size(600 * MB));

    let resolution = h.resolver.resolve(&k, &h.ctx()).await;
    assert!(resolution.is_found());
    assert_eq!(h.scheduler.pending(), 0);

    assert!(h.resolver.local().puts().is_empty());
    assert!(h.resolver.distributed().puts().is_empty());
}

#[test]
fn test_ceilings_are_inclusive_and_independent() {
    let policy = PromotionPolicy::default();
    assert!(policy.admits(Tier::Distributed, 25 * MIB));
    assert!(!policy.admits(Tier::Distributed, 25 * MIB + 1));
    assert!(policy.admits(Tier::Local, 25 * MIB + 1));
    assert!(policy.admits(Tier::Local, 500 * MIB));
    assert!(!policy.admits(Tier::Local, 500 * MIB + 1));
    assert!(!policy.admits(Tier::Origin, 1));
}

#[tokio::test]
async fn test_local_failures_then_distributed_hit() {
    let h = Harness::new();
    let k = key("/flaky.png");
    h.resolver.local().fail_next_gets(3);
    h.resolver
        .distributed()
        .insert(&k, CacheEntry::new(b"data".to_vec(), "image/png"));

    let resolution = h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(resolution.served_by(), Some(Tier::Distributed));
    assert_eq!(h.resolver.local().get_calls(), 3);

    h.batcher.flush(false).await;
    let failures: Vec<_> = h
        .sink
        .events()
        .into_iter()
        .filter(|e| e.message() == "local read failed")
        .collect();
    assert_eq!(failures.len(), 3);

    let attempts: Vec<(u64, u64)> = failures
        .iter()
        .map(|e| {
            let data = e.data().expect("data");
            (
                data["attemptNumber"].as_u64().expect("attempt"),
                data["retriesLeft"].as_u64().expect("left"),
            )
        })
        .collect();
    assert_eq!(attempts, vec![(1, 2), (2, 1), (3, 0)]);
    assert!(
        failures[0]
            .data()
            .and_then(|d| d.get("error"))
            .and_then(|e| e.get("message"))
            .is_some()
    );
}

#[tokio::test]
async fn test_transient_failure_recovers_within_budget() {
    let h = Harness::new();
    let k = key("/retry.png");
    h.resolver.local().fail_next_gets(2);
    h.resolver
        .local()
        .insert(&k, CacheEntry::new(b"ok".to_vec(), "image/png"));

    let resolution = h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(resolution.status, CacheStatus::HitLocal);
    assert_eq!(h.resolver.local().get_calls(), 3);
    assert_eq!(h.resolver.distributed().get_calls(), 0);
}

#[tokio::test]
async fn test_origin_exhaustion_is_not_found() {
    let h = Harness::new();
    let k = key("/down.png");
    h.resolver.origin().fail_next_gets(3);
    h.resolver
        .origin()
        .insert(&k, CacheEntry::new(b"unreachable".to_vec(), "image/png"));

    let resolution = h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(resolution.resolved, Resolved::NotFound);
    assert_eq!(resolution.status, CacheStatus::Miss);

    h.scheduler.run_all().await;
    assert!(h.resolver.local().has_negative(&k));
}

#[tokio::test]
async fn test_stale_negative_is_served_and_revalidated() {
    let h = Harness::new();
    let k = key("/late-upload.png");
    h.resolver.local().insert_negative(&k, true);
    h.resolver
        .origin()
        .insert(&k, CacheEntry::new(b"fresh".to_vec(), "image/png"));

    let resolution = h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(resolution.status, CacheStatus::NegativeHit);
    assert_eq!(resolution.directive, CacheDirective::negative());
    assert_eq!(h.resolver.origin().get_calls(), 0);

    h.scheduler.run_all().await;
    assert_eq!(h.resolver.origin().get_calls(), 1);
    assert!(h.resolver.local().contains(&k));
    assert!(!h.resolver.local().has_negative(&k));
    assert!(h.resolver.distributed().contains(&k));

    let next = h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(next.status, CacheStatus::HitLocal);
}

#[tokio::test]
async fn test_stale_negative_still_absent_is_refreshed() {
    let h = Harness::new();
    let k = key("/still-missing.png");
    h.resolver.local().insert_negative(&k, true);

    h.resolver.resolve(&k, &h.ctx()).await;
    h.scheduler.run_all().await;

    assert_eq!(h.resolver.local().negative_puts(), 1);
    assert!(h.resolver.local().has_negative(&k));
}

#[tokio::test]
async fn test_stale_negative_revalidates_once_per_key() {
    let h = Harness::new();
    let k = key("/hot-missing.png");
    h.resolver.local().insert_negative(&k, true);

    for _ in 0..3 {
        let resolution = h.resolver.resolve(&k, &h.ctx()).await;
        assert_eq!(resolution.status, CacheStatus::NegativeHit);
    }
    assert_eq!(h.scheduler.pending(), 1);
    assert_eq!(h.resolver.revalidations_in_flight(), 1);

    h.scheduler.run_all().await;
    assert_eq!(h.resolver.origin().get_calls(), 1);
    assert_eq!(h.resolver.revalidations_in_flight(), 0);
}

#[tokio::test]
async fn test_abandoned_revalidation_releases_key() {
    let h = Harness::new();
    let k = key("/abandoned.png");
    h.resolver.local().insert_negative(&k, true);

    h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(h.scheduler.abandon_all(), 1);
    assert_eq!(h.resolver.revalidations_in_flight(), 0);

    h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(h.scheduler.pending(), 1);
}

#[tokio::test]
async fn test_revalidation_read_failures_are_logged() {
    let h = Harness::new();
    let k = key("/origin-down.png");
    h.resolver.local().insert_negative(&k, true);
    h.resolver.origin().fail_next_gets(3);

    h.resolver.resolve(&k, &h.ctx()).await;
    h.scheduler.run_all().await;

    assert_eq!(h.resolver.origin().get_calls(), 3);
    let failures = h
        .messages()
        .await
        .into_iter()
        .filter(|m| m == "origin read failed")
        .count();
    assert_eq!(failures, 3);
    assert!(h.resolver.local().has_negative(&k));
}

#[tokio::test]
async fn test_fresh_negative_does_not_revalidate() {
    let h = Harness::new();
    let k = key("/gone.png");
    h.resolver.local().insert_negative(&k, false);

    let resolution = h.resolver.resolve(&k, &h.ctx()).await;
    assert_eq!(resolution.status, CacheStatus::NegativeHit);
    assert_eq!(h.scheduler.scheduled(), 0);
}

#[tokio::test]
async fn test_outcome_serializes_camel_case() {
    let h = Harness::new();
    let k = key("/cat.png");
    h.resolver
        .origin()
        .insert(&k, CacheEntry::new(b"meow".to_vec(), "image/png"));

    let resolution = h.resolver.resolve(&k, &h.ctx()).await;
    let value = serde_json::to_value(resolution.outcome).expect("serialize");

    assert_eq!(
        value,
        serde_json::json!({
            "localHit": false,
            "distributedHit": false,
            "originHit": true,
            "cacheHit": false,
            "servedByTier": "origin",
        })
    );
}
