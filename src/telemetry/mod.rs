//! Request telemetry: structured events, batching, and sinks.

pub mod batcher;
pub mod context;
pub mod event;
pub mod sink;


pub use batcher::{BatcherConfig, FlushOutcome, TelemetryBatcher};
pub use context::{INVOCATION_ID_TAG, RequestContext};
pub use event::{LogEvent, LogLevel, TagValue, Tags, error_fields};
#[cfg(any(test, feature = "mock"))]
pub use sink::RecordingSink;
pub use sink::{HttpSink, TelemetrySink, TracingSink, TransportError};
