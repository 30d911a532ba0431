//! Repository for the `ai_tasks` table.
//!
//! Claim methods hand a row to exactly one worker at a time: the row is
//! selected `FOR UPDATE SKIP LOCKED` and stamped with a `lease_until`
//! in the same statement, so a second claimer skips it until the lease
//! expires. Terminal updates are compare-and-set on the previously
//! observed status; a late provider reply that lost the race changes
//! nothing.

use sqlx::PgPool;

use inkstone_core::types::DbId;
use inkstone_core::{TaskErrorKind, TaskStatus};

use crate::models::task::{AiTask, NewTask};

/// Column list for `ai_tasks` queries.
const COLUMNS: &str = "\
    id, order_id, provider_config_id, template_id, provider_task_id, \
    status, input_refs, request_params, response_log, \
    output_image_path, error_kind, error_message, \
    retry_count, retry_of_task_id, lease_until, \
    created_at, started_at, completed_at";

/// Provides claim and transition operations for generation tasks.
pub struct TaskRepo;

impl TaskRepo {
    /// Create a queued task row.
    pub async fn create(pool: &PgPool, input: &NewTask) -> Result<AiTask, sqlx::Error> {
        let query = format!(
            "INSERT INTO ai_tasks \
                 (order_id, template_id, provider_config_id, input_refs, \
                  request_params, retry_of_task_id, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AiTask>(&query)
            .bind(input.order_id)
            .bind(input.template_id)
            .bind(input.provider_config_id)
            .bind(serde_json::json!(input.input_refs))
            .bind(&input.request_params)
            .bind(input.retry_of_task_id)
            .bind(TaskStatus::Queued.as_str())
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the next queued task for a dispatcher worker.
    ///
    /// The claimed row becomes invisible to other claimers for
    /// `lease_secs` seconds.
    pub async fn claim_next_queued(
        pool: &PgPool,
        lease_secs: i64,
    ) -> Result<Option<AiTask>, sqlx::Error> {
        Self::claim(pool, TaskStatus::Queued, lease_secs).await
    }

    /// Atomically claim the next running task that is due for a poll.
    pub async fn claim_next_running(
        pool: &PgPool,
        lease_secs: i64,
    ) -> Result<Option<AiTask>, sqlx::Error> {
        Self::claim(pool, TaskStatus::Running, lease_secs).await
    }

    async fn claim(
        pool: &PgPool,
        status: TaskStatus,
        lease_secs: i64,
    ) -> Result<Option<AiTask>, sqlx::Error> {
        let query = format!(
            "UPDATE ai_tasks \
             SET lease_until = NOW() + $2 * interval '1 second' \
             WHERE id = ( \
                 SELECT id FROM ai_tasks \
                 WHERE status = $1 \
                   AND (lease_until IS NULL OR lease_until < NOW()) \
                 ORDER BY created_at ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AiTask>(&query)
            .bind(status.as_str())
            .bind(lease_secs)
            .fetch_optional(pool)
            .await
    }

    /// Release a lease without changing status (claim produced no work).
    pub async fn release_lease(pool: &PgPool, task_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE ai_tasks SET lease_until = NULL WHERE id = $1")
            .bind(task_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Transition queued → running after the provider accepted the task.
    ///
    /// Returns `false` when the row was no longer queued.
    pub async fn mark_running(
        pool: &PgPool,
        task_id: DbId,
        provider_config_id: DbId,
        provider_task_id: Option<&str>,
        response_log: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE ai_tasks \
             SET status = $2, provider_config_id = $3, provider_task_id = $4, \
                 response_log = $5, started_at = NOW(), lease_until = NULL \
             WHERE id = $1 AND status = $6",
        )
        .bind(task_id)
        .bind(TaskStatus::Running.as_str())
        .bind(provider_config_id)
        .bind(provider_task_id)
        .bind(response_log)
        .bind(TaskStatus::Queued.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Statuses a terminal write may apply from. A task the timeout
    /// sweep already failed stays failed; late completions lose.
    const LIVE_STATUSES: [TaskStatus; 2] = [TaskStatus::Queued, TaskStatus::Running];

    /// Terminal success. Compare-and-set: a task already failed (for
    /// example by the timeout sweep) stays failed and the caller must
    /// discard the downloaded result.
    pub async fn mark_completed(
        pool: &PgPool,
        task_id: DbId,
        output_image_path: &str,
        response_log: &serde_json::Value,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE ai_tasks \
             SET status = $2, output_image_path = $3, response_log = $4, \
                 error_kind = NULL, error_message = NULL, \
                 started_at = COALESCE(started_at, NOW()), \
                 completed_at = NOW(), lease_until = NULL \
             WHERE id = $1 AND status IN ($5, $6)",
        )
        .bind(task_id)
        .bind(TaskStatus::Completed.as_str())
        .bind(output_image_path)
        .bind(response_log)
        .bind(Self::LIVE_STATUSES[0].as_str())
        .bind(Self::LIVE_STATUSES[1].as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Terminal failure with a classified error kind.
    pub async fn mark_failed(
        pool: &PgPool,
        task_id: DbId,
        kind: TaskErrorKind,
        message: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE ai_tasks \
             SET status = $2, error_kind = $3, error_message = $4, \
                 completed_at = NOW(), lease_until = NULL \
             WHERE id = $1 AND status IN ($5, $6)",
        )
        .bind(task_id)
        .bind(TaskStatus::Failed.as_str())
        .bind(kind.as_str())
        .bind(message)
        .bind(Self::LIVE_STATUSES[0].as_str())
        .bind(Self::LIVE_STATUSES[1].as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a transient dispatch failure: bump `retry_count`, release
    /// the lease, leave the task queued for the next claim.
    pub async fn record_dispatch_retry(
        pool: &PgPool,
        task_id: DbId,
    ) -> Result<i32, sqlx::Error> {
        let (count,): (i32,) = sqlx::query_as(
            "UPDATE ai_tasks \
             SET retry_count = retry_count + 1, lease_until = NULL \
             WHERE id = $1 \
             RETURNING retry_count",
        )
        .bind(task_id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    /// Record the request body actually sent to the provider.
    pub async fn update_request_params(
        pool: &PgPool,
        task_id: DbId,
        request_params: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE ai_tasks SET request_params = $2 WHERE id = $1")
            .bind(task_id)
            .bind(request_params)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Attach the latest raw provider reply for debugging.
    pub async fn update_response_log(
        pool: &PgPool,
        task_id: DbId,
        response_log: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE ai_tasks SET response_log = $2 WHERE id = $1")
            .bind(task_id)
            .bind(response_log)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Cancel every queued task of a cancelled order. Running tasks are
    /// left to reach a terminal state; their results are dropped.
    pub async fn cancel_queued_for_order(
        pool: &PgPool,
        order_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE ai_tasks SET status = $2, completed_at = NOW(), lease_until = NULL \
             WHERE order_id = $1 AND status = $3",
        )
        .bind(order_id)
        .bind(TaskStatus::Cancelled.as_str())
        .bind(TaskStatus::Queued.as_str())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Find a task by its ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<AiTask>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM ai_tasks WHERE id = $1");
        sqlx::query_as::<_, AiTask>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All tasks for an order, oldest first.
    pub async fn list_for_order(
        pool: &PgPool,
        order_id: DbId,
    ) -> Result<Vec<AiTask>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM ai_tasks WHERE order_id = $1 ORDER BY created_at ASC");
        sqlx::query_as::<_, AiTask>(&query)
            .bind(order_id)
            .fetch_all(pool)
            .await
    }

    /// Latest task for an order, if any.
    pub async fn latest_for_order(
        pool: &PgPool,
        order_id: DbId,
    ) -> Result<Option<AiTask>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM ai_tasks WHERE order_id = $1 \
             ORDER BY created_at DESC LIMIT 1"
        );
        sqlx::query_as::<_, AiTask>(&query)
            .bind(order_id)
            .fetch_optional(pool)
            .await
    }

    /// Whether any task is currently running (drives the poll cadence).
    pub async fn any_running(pool: &PgPool) -> Result<bool, sqlx::Error> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS (SELECT 1 FROM ai_tasks WHERE status = $1)")
                .bind(TaskStatus::Running.as_str())
                .fetch_one(pool)
                .await?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_writes_apply_from_exactly_the_live_statuses() {
        // The CAS predicate must cover every non-terminal status and no
        // terminal one, or a timed-out task could be resurrected by a
        // late provider reply.
        let all = [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ];
        let live: Vec<TaskStatus> = all.iter().copied().filter(|s| !s.is_terminal()).collect();
        assert_eq!(live.as_slice(), TaskRepo::LIVE_STATUSES.as_slice());
    }
}
