//! Repository for the `polling_configs` table.

use sqlx::PgPool;
use tracing::warn;

use crate::models::polling::PollingConfig;

const COLUMNS: &str = "\
    id, task_type, poll_interval_idle_secs, poll_interval_busy_secs, \
    initial_wait_secs, timeout_secs, created_at, updated_at";

/// Read access to poller tuning, with built-in fallbacks.
pub struct PollingRepo;

impl PollingRepo {
    /// Tuning for a task type. A missing row falls back to defaults so
    /// the poll loop never stalls on configuration.
    pub async fn get(pool: &PgPool, task_type: &str) -> Result<PollingConfig, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM polling_configs WHERE task_type = $1");
        let row = sqlx::query_as::<_, PollingConfig>(&query)
            .bind(task_type)
            .fetch_optional(pool)
            .await?;
        Ok(row.unwrap_or_else(|| {
            warn!(task_type, "no polling config row, using defaults");
            PollingConfig::fallback(task_type)
        }))
    }
}
