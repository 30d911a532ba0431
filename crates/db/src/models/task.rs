//! Generation-task entity model and DTOs.

use inkstone_core::types::{DbId, Timestamp};
use inkstone_core::TaskStatus;
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `ai_tasks` table: one generation attempt.
///
/// Invariant: once terminal, exactly one of `output_image_path` and
/// `error_message` is set. Rows are never deleted after dispatch.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AiTask {
    pub id: DbId,
    pub order_id: DbId,
    pub provider_config_id: Option<DbId>,
    pub template_id: DbId,
    pub provider_task_id: Option<String>,
    #[serde(rename = "status")]
    pub status_raw: String,
    pub input_refs: serde_json::Value,
    pub request_params: serde_json::Value,
    pub response_log: Option<serde_json::Value>,
    pub output_image_path: Option<String>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub retry_of_task_id: Option<DbId>,
    pub lease_until: Option<Timestamp>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl AiTask {
    pub fn status(&self) -> Option<TaskStatus> {
        TaskStatus::parse(&self.status_raw)
    }

    /// Ordered input image refs as plain strings.
    pub fn input_ref_list(&self) -> Vec<String> {
        self.input_refs
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parameters for creating a fresh task row.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub order_id: DbId,
    pub template_id: DbId,
    pub provider_config_id: Option<DbId>,
    pub input_refs: Vec<String>,
    pub request_params: serde_json::Value,
    /// Lineage pointer when this row re-dispatches a failed attempt.
    pub retry_of_task_id: Option<DbId>,
}
