use axum::routing::post;
use axum::Router;

use crate::handlers::print;
use crate::state::AppState;

/// Mount print webhook routes under `/print`.
pub fn router() -> Router<AppState> {
    Router::new().route("/callback", post(print::print_callback))
}
