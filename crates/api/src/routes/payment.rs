use axum::routing::post;
use axum::Router;

use crate::handlers::payment;
use crate::state::AppState;

/// Mount payment routes under `/payment`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/create", post(payment::create_payment))
        .route("/notify", post(payment::payment_notify))
}
