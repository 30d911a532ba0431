//! Print-service webhook.

use axum::extract::State;
use axum::Json;
use serde_json::json;

use inkstone_pipeline::print::PrintCallback;

use crate::error::AppResult;
use crate::state::AppState;

/// `POST /api/print/callback`
///
/// Logistics notification from the print partner. Unknown order
/// numbers 404 so the partner can spot misrouted callbacks.
pub async fn print_callback(
    State(state): State<AppState>,
    Json(callback): Json<PrintCallback>,
) -> AppResult<Json<serde_json::Value>> {
    state.coordinator.handle_print_callback(&callback).await?;
    Ok(Json(json!({ "status": "ok" })))
}
