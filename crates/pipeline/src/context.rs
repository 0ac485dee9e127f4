use std::sync::Arc;

use photochanger_core::clock::Clock;
use photochanger_events::EventBus;
use photochanger_providers::ProviderRegistry;

use crate::media::MediaStore;
use crate::queue::JobQueue;
use crate::slots::SlotDirectory;
use crate::stats::StatsCache;

/// Collaborators shared by the ingest gateway, workers and the sweeper.
#[derive(Clone)]
pub struct PipelineContext {
    pub queue: Arc<dyn JobQueue>,
    pub slots: Arc<dyn SlotDirectory>,
    pub providers: Arc<ProviderRegistry>,
    pub media: Arc<dyn MediaStore>,
    pub stats: Arc<StatsCache>,
    pub events: Arc<EventBus>,
    pub clock: Arc<dyn Clock>,
}
