//! Router-level tests for the content handler and request logging.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{Router, body::Body, http::Request, http::StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use crate::background::ManualScheduler;
use crate::cache::{CacheEntry, CacheKey, MockCacheResolver, MockTierStore, Namespace};
use crate::config::Config;
use crate::constants::CASCADE_STATUS_HEADER;
use crate::gateway::create_router_with_state;
use crate::gateway::handler::validate_path;
use crate::gateway::state::HandlerState;
use crate::telemetry::{
    BatcherConfig, INVOCATION_ID_TAG, LogEvent, RecordingSink, TelemetryBatcher,
};

struct TestApp {
    router: Router,
    state: HandlerState<MockTierStore, MockTierStore, MockTierStore>,
    scheduler: Arc<ManualScheduler>,
    sink: Arc<RecordingSink>,
}

fn setup_test_app() -> TestApp {
    let scheduler = Arc::new(ManualScheduler::new());
    let sink = Arc::new(RecordingSink::new());

    let mut host_namespaces = HashMap::new();
    host_namespaces.insert("downloads.example.com".to_string(), Namespace::Downloads);
    let config = Config {
        host_namespaces,
        ..Config::default()
    };

    // Timer tasks land on their own queue so draining `scheduler` never sleeps.
    let batcher = TelemetryBatcher::new(
        sink.clone(),
        Arc::new(ManualScheduler::new()),
        BatcherConfig {
            flush_after_events: 10_000,
            ..config.batcher_config()
        },
    );
    let resolver = Arc::new(MockCacheResolver::new_mock(scheduler.clone()));
    let state = HandlerState::new(resolver, Arc::new(config), batcher, scheduler.clone());

    TestApp {
        router: create_router_with_state(state.clone()),
        state,
        scheduler,
        sink,
    }
}

async fn get(router: &Router, uri: &str, host: Option<&str>) -> axum::response::Response {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(host) = host {
        builder = builder.header("Host", host);
    }
    let request = builder.body(Body::empty()).unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn header<'a>(response: &'a axum::response::Response, name: &str) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

fn request_events(sink: &RecordingSink) -> Vec<LogEvent> {
    sink.events()
        .into_iter()
        .filter(|e| e.message().starts_with("HTTP "))
        .collect()
}

/// The `msc` field is shipped pre-serialized; decode it back into an object.
fn outcome_of(data: &serde_json::Map<String, serde_json::Value>) -> serde_json::Value {
    serde_json::from_str(data["msc"].as_str().unwrap()).unwrap()
}

mod content_handler_tests {
    use super::*;

    #[tokio::test]
    async fn test_origin_object_is_served_with_positive_headers() {
        let app = setup_test_app();
        let key = CacheKey::new(Namespace::Images, "/cat.png");
        app.state
            .resolver
            .origin()
            .insert(&key, CacheEntry::new(b"meow".to_vec(), "image/png"));

        let response = get(&app.router, "/cat.png", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, CASCADE_STATUS_HEADER), "HIT_ORIGIN");
        assert_eq!(header(&response, "content-type"), "image/png");
        assert_eq!(header(&response, "content-length"), "4");
        assert!(header(&response, "cache-control").starts_with("public, max-age=2592000"));
        assert_eq!(body_bytes(response).await.as_ref(), b"meow");
    }

    #[tokio::test]
    async fn test_second_request_hits_local_after_promotion() {
        let app = setup_test_app();
        let key = CacheKey::new(Namespace::Images, "/dog.png");
        app.state
            .resolver
            .origin()
            .insert(&key, CacheEntry::new(b"woof".to_vec(), "image/png"));

        let first = get(&app.router, "/dog.png", None).await;
        assert_eq!(header(&first, CASCADE_STATUS_HEADER), "HIT_ORIGIN");

        app.scheduler.run_all().await;

        let second = get(&app.router, "/dog.png", None).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(header(&second, CASCADE_STATUS_HEADER), "HIT_LOCAL");
        assert_eq!(app.state.resolver.origin().get_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_object_returns_plain_not_found() {
        let app = setup_test_app();

        let response = get(&app.router, "/missing.png", None).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(header(&response, CASCADE_STATUS_HEADER), "MISS");
        assert_eq!(header(&response, "content-type"), "text/plain");
        assert_eq!(
            header(&response, "cache-control"),
            "public, max-age=60, stale-while-revalidate=600"
        );
        assert_eq!(body_bytes(response).await.as_ref(), b"not found");
    }

    #[tokio::test]
    async fn test_repeat_miss_is_negative_hit() {
        let app = setup_test_app();

        get(&app.router, "/gone.zip", None).await;
        app.scheduler.run_all().await;
        let response = get(&app.router, "/gone.zip", None).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(header(&response, CASCADE_STATUS_HEADER), "NEGATIVE_HIT");
        assert_eq!(app.state.resolver.origin().get_calls(), 1);
    }

    #[tokio::test]
    async fn test_host_selects_namespace() {
        let app = setup_test_app();
        let key = CacheKey::new(Namespace::Downloads, "/setup.exe");
        app.state.resolver.origin().insert(
            &key,
            CacheEntry::new(b"MZ".to_vec(), "application/octet-stream"),
        );

        let images = get(&app.router, "/setup.exe", Some("images.example.com")).await;
        assert_eq!(images.status(), StatusCode::NOT_FOUND);

        let downloads = get(
            &app.router,
            "/setup.exe",
            Some("Downloads.Example.com:443"),
        )
        .await;
        assert_eq!(downloads.status(), StatusCode::OK);
        assert_eq!(body_bytes(downloads).await.as_ref(), b"MZ");
    }

    #[tokio::test]
    async fn test_parent_segment_is_rejected() {
        let app = setup_test_app();

        let response = get(&app.router, "/a/../etc/passwd", None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(header(&response, CASCADE_STATUS_HEADER), "INVALID_REQUEST");
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["code"], 400);
        assert_eq!(app.state.resolver.local().get_calls(), 0);
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/a/b/c.png").is_ok());
        assert!(validate_path("/a..b.png").is_ok());
        assert!(validate_path("/..").is_err());
        assert!(validate_path("/a\0b").is_err());
    }
}

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_healthz() {
        let app = setup_test_app();

        let response = get(&app.router, "/healthz", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["status"], "ok");
    }
}

mod request_logging_tests {
    use super::*;

    #[tokio::test]
    async fn test_request_event_carries_outcome_and_invocation_id() {
        let app = setup_test_app();
        let key = CacheKey::new(Namespace::Images, "/cat.png");
        app.state
            .resolver
            .origin()
            .insert(&key, CacheEntry::new(b"meow".to_vec(), "image/png"));

        let request = Request::builder()
            .method("GET")
            .uri("/cat.png")
            .header("x-real-ip", "203.0.113.9")
            .body(Body::empty())
            .unwrap();
        app.router.clone().oneshot(request).await.unwrap();

        // The middleware schedules a flush after the response is built.
        app.scheduler.run_all().await;

        let events = request_events(&app.sink);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.message(), "HTTP GET /cat.png");
        assert!(event.tags().contains_key(INVOCATION_ID_TAG));
        assert!(event.tags().contains_key("server"));

        let data = event.data().unwrap();
        assert_eq!(data["request"]["method"], "GET");
        assert_eq!(data["request"]["path"], "/cat.png");
        assert_eq!(data["request"]["ip"], "203.0.113.9");
        assert_eq!(data["status"], 200);
        assert!(data["msc"].is_string());
        let msc = outcome_of(data);
        assert_eq!(msc["originHit"], true);
        assert_eq!(msc["cacheHit"], false);
        assert_eq!(msc["servedByTier"], "origin");
    }

    #[tokio::test]
    async fn test_each_request_gets_its_own_invocation_id() {
        let app = setup_test_app();

        get(&app.router, "/a.png", None).await;
        get(&app.router, "/b.png", None).await;
        app.scheduler.run_all().await;

        let events = request_events(&app.sink);
        assert_eq!(events.len(), 2);
        assert_ne!(
            events[0].tags().get(INVOCATION_ID_TAG),
            events[1].tags().get(INVOCATION_ID_TAG)
        );
    }

    #[tokio::test]
    async fn test_rejected_request_is_still_logged() {
        let app = setup_test_app();

        get(&app.router, "/../secret", None).await;
        app.scheduler.run_all().await;

        let events = request_events(&app.sink);
        assert_eq!(events.len(), 1);
        let data = events[0].data().unwrap();
        assert_eq!(data["status"], 400);
        let msc = outcome_of(data);
        assert_eq!(msc["cacheHit"], false);
        assert!(msc["servedByTier"].is_null());
    }
}
