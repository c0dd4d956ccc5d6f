use std::time::{Duration, Instant};

use serde_json::Value;
use uuid::Uuid;

use super::batcher::{TelemetryBatcher, error_event};
use super::event::{LogEvent, LogLevel};

/// Tag carrying the per-request invocation id.
pub const INVOCATION_ID_TAG: &str = "invocationId";

/// Immutable per-request context.
///
/// Every event logged through it carries the request's invocation id. Cloning shares
/// the underlying batcher.
#[derive(Debug, Clone)]
pub struct RequestContext {
    invocation_id: String,
    started: Instant,
    batcher: TelemetryBatcher,
}

impl RequestContext {
    pub fn new(batcher: TelemetryBatcher) -> Self {
        Self::with_invocation_id(batcher, Uuid::new_v4().to_string())
    }

    pub fn with_invocation_id(batcher: TelemetryBatcher, invocation_id: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            started: Instant::now(),
            batcher,
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn batcher(&self) -> &TelemetryBatcher {
        &self.batcher
    }

    pub fn record(&self, event: LogEvent) {
        self.batcher
            .record(event.with_tag(INVOCATION_ID_TAG, self.invocation_id.as_str()));
    }

    pub fn log(&self, level: LogLevel, message: impl Into<String>, data: Option<Value>) {
        self.record(LogEvent::new(message, level, data));
    }

    pub fn debug(&self, message: impl Into<String>, data: Option<Value>) {
        self.log(LogLevel::Debug, message, data);
    }

    pub fn info(&self, message: impl Into<String>, data: Option<Value>) {
        self.log(LogLevel::Info, message, data);
    }

    pub fn warn(&self, message: impl Into<String>, data: Option<Value>) {
        self.log(LogLevel::Warning, message, data);
    }

    pub fn error(&self, message: impl Into<String>, data: Option<Value>) {
        self.log(LogLevel::Error, message, data);
    }

    pub fn error_with(
        &self,
        message: impl Into<String>,
        err: &(dyn std::error::Error + 'static),
        data: Option<Value>,
    ) {
        self.record(error_event(message, err, data));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::background::ManualScheduler;
    use crate::telemetry::batcher::BatcherConfig;
    use crate::telemetry::event::TagValue;
    use crate::telemetry::sink::RecordingSink;

    #[tokio::test]
    async fn test_events_carry_invocation_id() {
        let sink = Arc::new(RecordingSink::new());
        let batcher = TelemetryBatcher::new(
            sink.clone(),
            Arc::new(ManualScheduler::new()),
            BatcherConfig::default(),
        );

        let ctx = RequestContext::with_invocation_id(batcher.clone(), "inv-42");
        ctx.info("one", None);
        ctx.clone().warn("two", None);
        batcher.flush(false).await;

        let events = sink.events();
        assert_eq!(events.len(), 2);
        for event in &events {
            assert_eq!(
                event.tags().get(INVOCATION_ID_TAG),
                Some(&TagValue::from("inv-42"))
            );
        }
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let batcher = TelemetryBatcher::new(
            Arc::new(RecordingSink::new()),
            Arc::new(ManualScheduler::new()),
            BatcherConfig::default(),
        );
        let a = RequestContext::new(batcher.clone());
        let b = RequestContext::new(batcher);
        assert_ne!(a.invocation_id(), b.invocation_id());
        assert_eq!(a.invocation_id().len(), 36);
    }
}
