//! Repository for the `order_transitions` guard table.

use sqlx::{PgConnection, PgPool};

use inkstone_core::types::DbId;

use crate::models::transition::OrderTransition;

const COLUMNS: &str = "id, order_id, from_state, to_state, event, attempt, created_at";

/// Provides the at-most-once insert backing order transitions.
pub struct TransitionRepo;

impl TransitionRepo {
    /// Insert the guard row for a transition.
    ///
    /// Returns `false` when the `(order_id, from_state, to_state,
    /// attempt)` row already exists, meaning a concurrent or replayed
    /// event won the race and this caller must skip the transition's
    /// side effects. `attempt` is 0 for one-shot edges and the order's
    /// print-attempt counter for the repeatable print cycle.
    pub async fn try_insert(
        conn: &mut PgConnection,
        order_id: DbId,
        from_state: &str,
        to_state: &str,
        event: &str,
        attempt: i32,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO order_transitions (order_id, from_state, to_state, event, attempt) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (order_id, from_state, to_state, attempt) DO NOTHING",
        )
        .bind(order_id)
        .bind(from_state)
        .bind(to_state)
        .bind(event)
        .bind(attempt)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// The order's transition history, oldest first.
    pub async fn list_for_order(
        pool: &PgPool,
        order_id: DbId,
    ) -> Result<Vec<OrderTransition>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM order_transitions \
             WHERE order_id = $1 ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, OrderTransition>(&query)
            .bind(order_id)
            .fetch_all(pool)
            .await
    }
}
