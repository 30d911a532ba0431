use std::sync::Arc;

use inkstone_pipeline::OrderCoordinator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`. Cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: inkstone_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// The order state machine.
    pub coordinator: Arc<OrderCoordinator>,
    /// Centralized event bus.
    pub event_bus: Arc<inkstone_events::EventBus>,
}
