//! Order entity model and DTOs.

use inkstone_core::types::{DbId, Timestamp};
use inkstone_core::OrderStatus;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `orders` table.
///
/// `status` is stored as text; use [`Order::status`] to get the parsed
/// enum with legacy values mapped forward.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Order {
    pub id: DbId,
    pub order_number: String,
    #[serde(rename = "status")]
    pub status_raw: String,
    pub product_id: DbId,
    pub style_id: Option<DbId>,
    pub customer_contact: String,
    pub openid: String,
    pub price_fen: i64,
    pub paid_at: Option<Timestamp>,
    pub payment_method: Option<String>,
    pub selected_image_id: Option<DbId>,
    pub final_image_path: Option<String>,
    pub final_image_path_clean: Option<String>,
    pub shipping_address: serde_json::Value,
    pub logistics: Option<serde_json::Value>,
    pub shipped_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub franchisee_id: Option<DbId>,
    pub promotion_code: Option<String>,
    pub input_refs: serde_json::Value,
    pub product_code: Option<String>,
    pub size_code: Option<String>,
    pub generation_retries: i32,
    pub print_attempts: i32,
    pub print_external_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Order {
    /// Parsed status with legacy vocabulary normalized forward.
    pub fn status(&self) -> Option<OrderStatus> {
        OrderStatus::parse(&self.status_raw)
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

/// DTO for `POST /api/miniprogram/orders`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    pub openid: String,
    pub product_id: DbId,
    pub style_id: Option<DbId>,
    pub customer_contact: String,
    pub price_fen: i64,
    /// Ordered list of uploaded input image refs (paths or URLs).
    pub input_refs: Vec<String>,
    pub shipping_address: serde_json::Value,
    pub product_code: Option<String>,
    pub size_code: Option<String>,
    pub franchisee_id: Option<DbId>,
    pub promotion_code: Option<String>,
}
