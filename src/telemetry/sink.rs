//! Destinations for telemetry batches.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::event::{LogEvent, LogLevel};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("telemetry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telemetry sink returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("telemetry sink unavailable: {0}")]
    Unavailable(String),
}

/// Accepts a batch of events in one call.
///
/// A sink either accepts the whole batch or fails; there is no partial acceptance.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send(&self, events: &[LogEvent]) -> Result<(), TransportError>;
}

/// Posts batches as a JSON array to an ingest endpoint with bearer auth.
///
/// The endpoint is `<base_url>/v1/datasets/<dataset>/ingest`.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpSink {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(
        base_url: &str,
        dataset: &str,
        api_key: impl Into<String>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, base_url, dataset, api_key))
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: &str,
        dataset: &str,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: format!(
                "{}/v1/datasets/{}/ingest",
                base_url.trim_end_matches('/'),
                dataset
            ),
            api_key: api_key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    async fn send(&self, events: &[LogEvent]) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(events)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(count = events.len(), "Exported telemetry batch");
        Ok(())
    }
}

/// Writes each event to the process log. Used when no remote sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl TelemetrySink for TracingSink {
    async fn send(&self, events: &[LogEvent]) -> Result<(), TransportError> {
        for event in events {
            let tags = serde_json::to_string(event.tags()).unwrap_or_default();
            let data = event
                .data()
                .map(|d| serde_json::Value::Object(d.clone()).to_string())
                .unwrap_or_default();
            match event.level() {
                LogLevel::Debug => debug!(target: "cascade::telemetry", %tags, %data, "{}", event.message()),
                LogLevel::Info => info!(target: "cascade::telemetry", %tags, %data, "{}", event.message()),
                LogLevel::Warning => warn!(target: "cascade::telemetry", %tags, %data, "{}", event.message()),
                LogLevel::Error => error!(target: "cascade::telemetry", %tags, %data, "{}", event.message()),
            }
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "mock"))]
pub use mock::RecordingSink;

#[cfg(any(test, feature = "mock"))]
mod mock {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::{TelemetrySink, TransportError};
    use crate::telemetry::event::LogEvent;

    /// Sink that records every accepted batch. Can be told to fail or to stall.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        batches: Mutex<Vec<Vec<LogEvent>>>,
        failing: AtomicBool,
        calls: AtomicUsize,
        delay: Mutex<Option<Duration>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Makes every `send` sleep for `delay` before answering.
        pub fn set_delay(&self, delay: Option<Duration>) {
            *self.delay.lock() = delay;
        }

        /// Accepted batches, in delivery order.
        pub fn batches(&self) -> Vec<Vec<LogEvent>> {
            self.batches.lock().clone()
        }

        /// Every accepted event, flattened.
        pub fn events(&self) -> Vec<LogEvent> {
            self.batches.lock().iter().flatten().cloned().collect()
        }

        /// Number of `send` calls, including failed ones.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TelemetrySink for RecordingSink {
        async fn send(&self, events: &[LogEvent]) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if self.failing.load(Ordering::SeqCst) {
                return Err(TransportError::Unavailable("recording sink set to fail".into()));
            }

            self.batches.lock().push(events.to_vec());
            Ok(())
        }
    }
}
