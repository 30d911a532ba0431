//! Payment endpoints.
//!
//! The payment provider is treated as an opaque gateway: `create`
//! returns the parameters the mini-program hands to the provider SDK,
//! and `notify` is the provider's server-to-server confirmation.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use inkstone_core::CoreError;
use inkstone_db::repositories::OrderRepo;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_number: String,
}

/// Opaque parameters forwarded to the payment provider SDK.
#[derive(Debug, Serialize)]
pub struct PaymentIntent {
    pub order_number: String,
    pub amount_fen: i64,
    pub currency: &'static str,
    pub timestamp: i64,
}

/// `POST /api/payment/create`
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> AppResult<Json<DataResponse<PaymentIntent>>> {
    let order = OrderRepo::find_by_order_number(&state.pool, &request.order_number)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "order",
            id: 0,
        })?;
    Ok(Json(DataResponse {
        data: PaymentIntent {
            order_number: order.order_number,
            amount_fen: order.price_fen,
            currency: "CNY",
            timestamp: Utc::now().timestamp(),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct PaymentNotify {
    pub order_number: String,
    #[serde(default = "default_method")]
    pub payment_method: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

fn default_method() -> String {
    "wechat".to_string()
}

/// `POST /api/payment/notify`
///
/// Provider retries until it sees `{"code": "SUCCESS"}`, so a replayed
/// notification for an already paid order must also succeed.
pub async fn payment_notify(
    State(state): State<AppState>,
    Json(notify): Json<PaymentNotify>,
) -> AppResult<Json<serde_json::Value>> {
    let order = OrderRepo::find_by_order_number(&state.pool, &notify.order_number)
        .await?
        .ok_or(CoreError::NotFound {
            entity: "order",
            id: 0,
        })?;

    match state
        .coordinator
        .record_payment(order.id, &notify.payment_method)
        .await
    {
        Ok(applied) => {
            if !applied.fresh {
                tracing::info!(
                    order_id = order.id,
                    order_number = %notify.order_number,
                    "replayed payment notification"
                );
            }
        }
        Err(err) if err.is_state_conflict() => {
            tracing::warn!(
                order_id = order.id,
                order_number = %notify.order_number,
                error = %err,
                "payment notification for order past created"
            );
        }
        Err(err) => return Err(err.into()),
    }

    Ok(Json(json!({ "code": "SUCCESS", "message": "ok" })))
}
