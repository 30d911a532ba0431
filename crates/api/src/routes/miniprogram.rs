use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::orders;
use crate::state::AppState;

/// Mount mini-program order routes under `/miniprogram`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", post(orders::create_order))
        .route("/orders/{order_id}/status", put(orders::update_status))
        .route("/order/{order_number}", get(orders::get_order))
}
