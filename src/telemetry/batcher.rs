//! Batched, asynchronous shipping of [`LogEvent`]s.
//!
//! Events are appended to an in-memory queue and flushed to a [`TelemetrySink`] by
//! whichever trigger fires first: the count trigger (queue length reaches
//! `flush_after_events`) or the time trigger (one pending timer of `flush_after`).
//!
//! Flushes are single-flight. Each flush snapshots the queue length before the
//! network call and, on success, evicts exactly that prefix, so events recorded
//! during the round trip are kept for the next cycle. On failure nothing is evicted
//! and the events wait for the next natural trigger.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

use super::event::{ERROR_FIELD, LogEvent, LogLevel, TagValue, Tags, error_fields};
use super::sink::TelemetrySink;
use crate::background::{BackgroundScheduler, task};
use crate::constants::{DEFAULT_FLUSH_AFTER, DEFAULT_FLUSH_AFTER_EVENTS};

#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Time trigger (T).
    pub flush_after: Duration,
    /// Count trigger (N). Values below 1 are treated as 1.
    pub flush_after_events: usize,
    /// Tags merged into every event that does not set them itself.
    pub base_tags: Tags,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_after: DEFAULT_FLUSH_AFTER,
            flush_after_events: DEFAULT_FLUSH_AFTER_EVENTS,
            base_tags: Tags::new(),
        }
    }
}

impl BatcherConfig {
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.base_tags.insert(name.into(), value.into());
        self
    }
}

/// What a call to [`TelemetryBatcher::flush`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush was in flight and the caller asked to skip.
    Skipped,
    /// Nothing was queued.
    Empty,
    Sent { events: usize },
    /// The sink rejected the batch; it stays queued.
    Failed { events: usize },
}

#[derive(Default)]
struct TimerState {
    generation: u64,
    cancel: Option<Arc<Notify>>,
}

struct Inner {
    queue: Mutex<Vec<LogEvent>>,
    flush_gate: tokio::sync::Mutex<()>,
    in_flight: AtomicBool,
    timer: Mutex<TimerState>,
    sink: Arc<dyn TelemetrySink>,
    scheduler: Arc<dyn BackgroundScheduler>,
    config: BatcherConfig,
}

/// Cheap to clone; clones share one queue.
#[derive(Clone)]
pub struct TelemetryBatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TelemetryBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryBatcher")
            .field("pending", &self.pending())
            .field("in_flight", &self.inner.in_flight.load(Ordering::SeqCst))
            .field("config", &self.inner.config)
            .finish()
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl TelemetryBatcher {
    pub fn new(
        sink: Arc<dyn TelemetrySink>,
        scheduler: Arc<dyn BackgroundScheduler>,
        mut config: BatcherConfig,
    ) -> Self {
        config.flush_after_events = config.flush_after_events.max(1);
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(Vec::new()),
                flush_gate: tokio::sync::Mutex::new(()),
                in_flight: AtomicBool::new(false),
                timer: Mutex::new(TimerState::default()),
                sink,
                scheduler,
                config,
            }),
        }
    }

    pub fn config(&self) -> &BatcherConfig {
        &self.inner.config
    }

    /// Events recorded but not yet accepted by the sink.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether a time trigger is currently armed.
    pub fn timer_armed(&self) -> bool {
        self.inner.timer.lock().cancel.is_some()
    }

    /// Appends an event. Never blocks on I/O and never fails.
    pub fn record(&self, mut event: LogEvent) {
        event.merge_base_tags(&self.inner.config.base_tags);

        let len = {
            let mut queue = self.inner.queue.lock();
            queue.push(event);
            queue.len()
        };

        if len >= self.inner.config.flush_after_events {
            self.cancel_timer();
            self.schedule_flush();
        } else {
            self.arm_timer();
        }
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

    /// Records an error-level event with `err` flattened into the `error` field.
    pub fn error_with(
        &self,
        message: impl Into<String>,
        err: &(dyn std::error::Error + 'static),
        data: Option<Value>,
    ) {
        self.record(error_event(message, err, data));
    }

    /// Sends the queued events.
    ///
    /// With `skip_if_in_progress`, returns [`FlushOutcome::Skipped`] when another
    /// flush holds the gate; otherwise waits for it and then flushes.
    #[instrument(skip(self), level = "debug")]
    pub async fn flush(&self, skip_if_in_progress: bool) -> FlushOutcome {
        let outcome = self.flush_once(skip_if_in_progress).await;
        self.after_flush(outcome);
        outcome
    }

    /// Cancels the time trigger and sends whatever is queued, waiting for any
    /// in-flight flush first.
    pub async fn shutdown(&self) -> FlushOutcome {
        self.cancel_timer();
        self.flush_once(false).await
    }

    async fn flush_once(&self, skip_if_in_progress: bool) -> FlushOutcome {
        let _gate = if skip_if_in_progress {
            match self.inner.flush_gate.try_lock() {
                Ok(gate) => gate,
                Err(_) => {
                    debug!("Telemetry flush already in progress; skipping");
                    return FlushOutcome::Skipped;
                }
            }
        } else {
            self.inner.flush_gate.lock().await
        };

        self.inner.in_flight.store(true, Ordering::SeqCst);
        let _in_flight = InFlightGuard(&self.inner.in_flight);

        let batch: Vec<LogEvent> = self.inner.queue.lock().clone();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        let count = batch.len();

        match self.inner.sink.send(&batch).await {
            Ok(()) => {
                let mut queue = self.inner.queue.lock();
                let evict = count.min(queue.len());
                queue.drain(..evict);
                debug!(events = count, remaining = queue.len(), "Flushed telemetry batch");
                FlushOutcome::Sent { events: count }
            }
            Err(e) => {
                warn!(events = count, error = %e, "Failed to flush telemetry batch; keeping events queued");
                FlushOutcome::Failed { events: count }
            }
        }
    }

    fn after_flush(&self, outcome: FlushOutcome) {
        let remaining = self.pending();
        if remaining == 0 {
            return;
        }

        match outcome {
            FlushOutcome::Sent { .. } if remaining >= self.inner.config.flush_after_events => {
                self.cancel_timer();
                self.schedule_flush();
            }
            FlushOutcome::Skipped => {}
            _ => self.arm_timer(),
        }
    }

    fn schedule_flush(&self) {
        let batcher = self.clone();
        self.inner.scheduler.schedule(task(async move {
            batcher.flush(true).await;
        }));
    }

    fn arm_timer(&self) {
        if self.inner.in_flight.load(Ordering::SeqCst) {
            return;
        }

        let (generation, cancel) = {
            let mut timer = self.inner.timer.lock();
            if timer.cancel.is_some() {
                return;
            }
            timer.generation += 1;
            let cancel = Arc::new(Notify::new());
            timer.cancel = Some(Arc::clone(&cancel));
            (timer.generation, cancel)
        };

        let batcher = self.clone();
        let delay = self.inner.config.flush_after;
        self.inner.scheduler.schedule(task(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.notified() => return,
            }
            if batcher.disarm(generation) {
                batcher.flush(true).await;
            }
        }));
    }

    fn cancel_timer(&self) {
        let mut timer = self.inner.timer.lock();
        if let Some(cancel) = timer.cancel.take() {
            timer.generation += 1;
            cancel.notify_one();
        }
    }

    /// Clears the armed timer if it is still the one identified by `generation`.
    fn disarm(&self, generation: u64) -> bool {
        let mut timer = self.inner.timer.lock();
        if timer.generation == generation && timer.cancel.is_some() {
            timer.cancel = None;
            true
        } else {
            false
        }
    }
}

pub(crate) fn error_event(
    message: impl Into<String>,
    err: &(dyn std::error::Error + 'static),
    data: Option<Value>,
) -> LogEvent {
    let mut map = match data {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
        None => Map::new(),
    };
    map.insert(ERROR_FIELD.to_string(), error_fields(err));
    LogEvent::new(message, LogLevel::Error, Some(Value::Object(map)))
}
