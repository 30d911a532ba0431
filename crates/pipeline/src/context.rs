//! Shared state for the dispatch and poll loops.

use std::sync::Arc;

use inkstone_db::DbPool;
use inkstone_events::EventBus;
use inkstone_providers::AdapterRegistry;

use crate::config::PipelineConfig;
use crate::coordinator::OrderCoordinator;
use crate::storage::MediaStore;

/// Everything a worker loop needs, cheap to clone.
#[derive(Clone)]
pub struct PipelineContext {
    pub pool: DbPool,
    pub registry: Arc<AdapterRegistry>,
    pub store: Arc<MediaStore>,
    pub coordinator: Arc<OrderCoordinator>,
    pub bus: Arc<EventBus>,
    pub config: Arc<PipelineConfig>,
}
