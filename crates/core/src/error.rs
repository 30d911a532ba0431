//! Domain error taxonomy.
//!
//! Inside the pipeline, errors are data: [`CoreError`] for request-level
//! failures and [`TaskErrorKind`] for terminal generation-task failures
//! recorded on the task row. The HTTP layer maps [`CoreError`] variants
//! to status codes; task error kinds never leave the database except as
//! sanitized user-facing text.

use serde::{Deserialize, Serialize};

use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// No API template is bound to the requested product/style pair.
    #[error("No generation template for product {product_id} (style {style_id:?})")]
    TemplateMissing {
        product_id: DbId,
        style_id: Option<DbId>,
    },

    /// The template references more input images than the order supplied.
    #[error("Template inputs incomplete: {0}")]
    TemplateInputsIncomplete(String),

    /// No active default provider is configured and the task carries none.
    #[error("No AI provider available")]
    NoProviderAvailable,

    /// An event arrived for an order in a state that does not accept it.
    /// Webhook replays hit this path; callers log and drop.
    #[error("Order {order_id} in state '{state}' cannot accept event '{event}'")]
    StateConflict {
        order_id: DbId,
        state: String,
        event: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Terminal failure classification for a generation task.
///
/// Stored as text in `ai_tasks.error_kind`. The wire strings are stable;
/// the admin console filters on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    /// The provider rejected the submission (invalid prompt, auth, billing).
    ProviderRejected,
    /// Transport to the submit endpoint failed three times.
    DispatchExhausted,
    /// `started_at + timeout` elapsed before the provider finished.
    Timeout,
    /// The provider reported a failed generation.
    ProviderError,
    /// The provider no longer knows the task id (past the grace window).
    ProviderLost,
    /// The result image could not be fetched.
    DownloadFailed,
    /// The fetched bytes were not a decodable image.
    DecodeFailed,
}

impl TaskErrorKind {
    /// Stable wire string, matching the `serde` representation.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskErrorKind::ProviderRejected => "provider_rejected",
            TaskErrorKind::DispatchExhausted => "dispatch_exhausted",
            TaskErrorKind::Timeout => "timeout",
            TaskErrorKind::ProviderError => "provider_error",
            TaskErrorKind::ProviderLost => "provider_lost",
            TaskErrorKind::DownloadFailed => "download_failed",
            TaskErrorKind::DecodeFailed => "decode_failed",
        }
    }
}

impl std::fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_wire_strings_are_snake_case() {
        assert_eq!(TaskErrorKind::ProviderLost.as_str(), "provider_lost");
        assert_eq!(
            serde_json::to_value(TaskErrorKind::DispatchExhausted).unwrap(),
            serde_json::json!("dispatch_exhausted"),
        );
    }

    #[test]
    fn state_conflict_message_names_order_and_event() {
        let err = CoreError::StateConflict {
            order_id: 9,
            state: "paid".into(),
            event: "logistics_received".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("9"));
        assert!(msg.contains("logistics_received"));
    }
}
