use std::sync::Arc;

use crate::background::BackgroundScheduler;
use crate::cache::{CacheResolver, TierStore, WritableTierStore};
use crate::config::Config;
use crate::telemetry::TelemetryBatcher;

pub struct HandlerState<L, D, O>
where
    L: WritableTierStore + 'static,
    D: WritableTierStore + 'static,
    O: TierStore + 'static,
{
    pub resolver: Arc<CacheResolver<L, D, O>>,

    pub config: Arc<Config>,

    /// Process-wide telemetry queue. Requests log through a `RequestContext` built on it.
    pub batcher: TelemetryBatcher,

    pub scheduler: Arc<dyn BackgroundScheduler>,
}

impl<L, D, O> Clone for HandlerState<L, D, O>
where
    L: WritableTierStore + 'static,
    D: WritableTierStore + 'static,
    O: TierStore + 'static,
{
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            config: Arc::clone(&self.config),
            batcher: self.batcher.clone(),
            scheduler: Arc::clone(&self.scheduler),
        }
    }
}

impl<L, D, O> HandlerState<L, D, O>
where
    L: WritableTierStore + 'static,
    D: WritableTierStore + 'static,
    O: TierStore + 'static,
{
    pub fn new(
        resolver: Arc<CacheResolver<L, D, O>>,
        config: Arc<Config>,
        batcher: TelemetryBatcher,
        scheduler: Arc<dyn BackgroundScheduler>,
    ) -> Self {
        Self {
            resolver,
            config,
            batcher,
            scheduler,
        }
    }
}
