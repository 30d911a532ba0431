pub mod health;
pub mod miniprogram;
pub mod payment;
pub mod print;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /miniprogram/orders                      create order (POST)
/// /miniprogram/orders/{order_id}/status    advance order (PUT)
/// /miniprogram/order/{order_number}        order detail (GET)
///
/// /payment/create                          payment parameters (POST)
/// /payment/notify                          payment webhook (POST)
///
/// /print/callback                          logistics webhook (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/miniprogram", miniprogram::router())
        .nest("/payment", payment::router())
        .nest("/print", print::router())
}
