//! Transition guard rows.

use inkstone_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `order_transitions` idempotency table.
///
/// One row exists per `(order_id, from_state, to_state, attempt)`; the
/// insert shares a transaction with the order's status update, so a
/// replayed event loses the insert and performs no side effects. The
/// `attempt` discriminator is 0 except on the repeatable print edges,
/// which carry the order's print-attempt counter so a resubmission
/// cycle gets a fresh guard.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OrderTransition {
    pub id: DbId,
    pub order_id: DbId,
    pub from_state: String,
    pub to_state: String,
    pub event: String,
    pub attempt: i32,
    pub created_at: Timestamp,
}
