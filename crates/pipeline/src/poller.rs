//! Poll loop: running tasks are advanced by querying their provider.
//!
//! Cadence is database-tuned: a busy interval while anything is
//! running, an idle interval otherwise. Tasks younger than the
//! provider's propagation window are skipped, and a task past its
//! absolute timeout is failed no matter what the provider claims.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use inkstone_core::TaskErrorKind;
use inkstone_db::models::polling::PollingConfig;
use inkstone_db::models::task::AiTask;
use inkstone_db::repositories::{PollingRepo, ProviderRepo, TaskRepo, TemplateRepo};
use inkstone_providers::{ImageRef, NormalizedEnvelope};

use crate::context::PipelineContext;
use crate::dispatcher::{complete_task, fail_task};

/// Polling tuning row consulted each tick.
const TASK_TYPE: &str = "api_task";

/// Run the poll loop until `cancel` is triggered.
pub async fn run(ctx: PipelineContext, cancel: CancellationToken) {
    info!("poll loop started");
    loop {
        let config = match PollingRepo::get(&ctx.pool, TASK_TYPE).await {
            Ok(config) => config,
            Err(err) => {
                error!(error = %err, "polling config read failed");
                PollingConfig::fallback(TASK_TYPE)
            }
        };

        drain_running(&ctx, &config).await;

        let busy = TaskRepo::any_running(&ctx.pool).await.unwrap_or(false);
        let delay = if busy {
            config.poll_interval_busy_secs
        } else {
            config.poll_interval_idle_secs
        };
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("poll loop stopping");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(delay.max(1) as u64)) => {}
        }
    }
}

async fn drain_running(ctx: &PipelineContext, config: &PollingConfig) {
    loop {
        match TaskRepo::claim_next_running(&ctx.pool, ctx.config.claim_lease_secs).await {
            Ok(Some(task)) => {
                let task_id = task.id;
                if let Err(err) = poll_one(ctx, config, task).await {
                    error!(task_id, error = %err, "poll pass failed");
                }
            }
            Ok(None) => break,
            Err(err) => {
                error!(error = %err, "running claim failed");
                break;
            }
        }
    }
}

/// What to do with a running task after one poll.
#[derive(Debug, PartialEq)]
enum PollAction {
    KeepRunning,
    Complete(Vec<ImageRef>),
    Fail(TaskErrorKind, String),
}

/// Decide from a normalized envelope. `past_initial_wait` gates the
/// not-found sentinel: early on it is provider-side propagation delay,
/// later it means the provider genuinely lost the task.
fn decide(envelope: NormalizedEnvelope, past_initial_wait: bool) -> PollAction {
    match envelope {
        NormalizedEnvelope::Running { .. } => PollAction::KeepRunning,
        NormalizedEnvelope::Completed { refs } => PollAction::Complete(refs),
        NormalizedEnvelope::Failed { kind, message } => PollAction::Fail(kind, message),
        NormalizedEnvelope::NotFound => {
            if past_initial_wait {
                PollAction::Fail(
                    TaskErrorKind::ProviderLost,
                    "provider no longer knows the task".to_string(),
                )
            } else {
                PollAction::KeepRunning
            }
        }
    }
}

async fn poll_one(
    ctx: &PipelineContext,
    config: &PollingConfig,
    task: AiTask,
) -> Result<(), sqlx::Error> {
    let started_at = task.started_at.unwrap_or(task.created_at);
    let age_secs = (Utc::now() - started_at).num_seconds();

    if age_secs < config.initial_wait_secs {
        TaskRepo::release_lease(&ctx.pool, task.id).await?;
        return Ok(());
    }
    if age_secs > config.timeout_secs {
        fail_task(
            ctx,
            &task,
            TaskErrorKind::Timeout,
            &format!("no result after {age_secs}s (budget {}s)", config.timeout_secs),
        )
        .await;
        return Ok(());
    }

    let provider = match task.provider_config_id {
        Some(id) => ProviderRepo::find_by_id(&ctx.pool, id).await?,
        None => None,
    };
    let Some(provider) = provider else {
        fail_task(
            ctx,
            &task,
            TaskErrorKind::ProviderLost,
            "provider config vanished under a running task",
        )
        .await;
        return Ok(());
    };
    let Ok(adapter) = ctx.registry.adapter_for(&provider.api_kind) else {
        fail_task(
            ctx,
            &task,
            TaskErrorKind::ProviderLost,
            &format!("no adapter for provider kind {:?}", provider.api_kind),
        )
        .await;
        return Ok(());
    };
    let Some(provider_task_id) = task.provider_task_id.clone() else {
        // Never got an id; nothing to poll. The timeout sweep will
        // settle it.
        warn!(task_id = task.id, "running task has no provider task id");
        TaskRepo::release_lease(&ctx.pool, task.id).await?;
        return Ok(());
    };

    let reply = match adapter.poll(&provider, &provider_task_id).await {
        Ok(reply) => reply,
        Err(err) => {
            warn!(task_id = task.id, provider = %provider.name, error = %err, "poll failed");
            TaskRepo::release_lease(&ctx.pool, task.id).await?;
            return Ok(());
        }
    };
    TaskRepo::update_response_log(&ctx.pool, task.id, &reply.raw).await?;

    match decide(reply.envelope, age_secs >= config.initial_wait_secs) {
        PollAction::KeepRunning => {
            TaskRepo::release_lease(&ctx.pool, task.id).await?;
        }
        PollAction::Complete(refs) => {
            let watermark_required = TemplateRepo::find_by_id(&ctx.pool, task.template_id)
                .await?
                .map_or(true, |t| t.watermark_required);
            complete_task(ctx, &task, &refs, watermark_required, &reply.raw).await?;
        }
        PollAction::Fail(kind, message) => {
            fail_task(ctx, &task, kind, &message).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_envelope_keeps_running() {
        assert_eq!(
            decide(NormalizedEnvelope::Running { progress: Some(0.5) }, true),
            PollAction::KeepRunning
        );
    }

    #[test]
    fn completed_envelope_completes() {
        let refs = vec![ImageRef::Url("https://cdn/a.png".into())];
        assert_eq!(
            decide(NormalizedEnvelope::Completed { refs: refs.clone() }, true),
            PollAction::Complete(refs)
        );
    }

    #[test]
    fn not_found_within_grace_window_keeps_running() {
        assert_eq!(
            decide(NormalizedEnvelope::NotFound, false),
            PollAction::KeepRunning
        );
    }

    #[test]
    fn not_found_past_grace_window_is_provider_lost() {
        assert!(matches!(
            decide(NormalizedEnvelope::NotFound, true),
            PollAction::Fail(TaskErrorKind::ProviderLost, _)
        ));
    }

    #[test]
    fn failed_envelope_carries_kind_and_message() {
        assert_eq!(
            decide(
                NormalizedEnvelope::Failed {
                    kind: TaskErrorKind::ProviderError,
                    message: "nsfw".into()
                },
                true
            ),
            PollAction::Fail(TaskErrorKind::ProviderError, "nsfw".into())
        );
    }
}
