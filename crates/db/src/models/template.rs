//! API template model: the provider-agnostic description of what to
//! generate for a product + style.

use inkstone_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `api_templates` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ApiTemplate {
    pub id: DbId,
    pub product_id: DbId,
    pub style_id: Option<DbId>,
    /// Preferred provider; overrides the default when set.
    pub provider_config_id: Option<DbId>,
    /// Restricts which adapter kinds may run this template.
    pub provider_kind_required: Option<String>,
    /// List of prompt strings, possibly multi-variant.
    pub prompts: serde_json::Value,
    /// Pre-rendered structure the provider expects (node graph, knobs).
    pub workflow_params: serde_json::Value,
    pub expected_output_count: i32,
    pub watermark_required: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ApiTemplate {
    /// Prompt strings as a plain vector.
    pub fn prompt_list(&self) -> Vec<String> {
        self.prompts
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}
