//! Per-task-type polling tuning.

use inkstone_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `polling_configs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PollingConfig {
    pub id: DbId,
    pub task_type: String,
    /// Tick cadence when no task is running.
    pub poll_interval_idle_secs: i64,
    /// Tick cadence while at least one task is running.
    pub poll_interval_busy_secs: i64,
    /// Tasks younger than this are skipped (provider-side propagation delay).
    pub initial_wait_secs: i64,
    /// Absolute budget from task start before a forced timeout failure.
    pub timeout_secs: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PollingConfig {
    /// Built-in defaults used when the row is missing.
    pub fn fallback(task_type: &str) -> PollingConfig {
        let now = chrono::Utc::now();
        PollingConfig {
            id: 0,
            task_type: task_type.to_string(),
            poll_interval_idle_secs: 30,
            poll_interval_busy_secs: 5,
            initial_wait_secs: 30,
            timeout_secs: 1200,
            created_at: now,
            updated_at: now,
        }
    }
}
