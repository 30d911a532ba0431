//! Dispatch loop: queued tasks go to their provider.
//!
//! One claimed task at a time; a transient submit failure releases the
//! claim and bumps `retry_count`, so the next tick tries again until
//! the budget is spent. Permanent rejections fail the task immediately.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use inkstone_core::hashing::sha256_hex;
use inkstone_core::TaskErrorKind;
use inkstone_db::models::provider::ProviderConfig;
use inkstone_db::models::task::AiTask;
use inkstone_db::repositories::{TaskRepo, TemplateRepo, UploadedRefRepo};
use inkstone_providers::adapter::{ProviderAdapter, ProviderError, SubmitOutcome};
use inkstone_providers::{ImageRef, ResolveError};

use crate::context::PipelineContext;
use crate::resolver;

/// Pause between drain passes over the queue.
const DISPATCH_TICK: Duration = Duration::from_secs(2);

/// Run the dispatch loop until `cancel` is triggered.
pub async fn run(ctx: PipelineContext, cancel: CancellationToken) {
    info!(tick_secs = DISPATCH_TICK.as_secs(), "dispatch loop started");
    let mut interval = tokio::time::interval(DISPATCH_TICK);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("dispatch loop stopping");
                break;
            }
            _ = interval.tick() => {
                drain_queue(&ctx).await;
            }
        }
    }
}

/// Claim and dispatch queued tasks until the queue is empty.
async fn drain_queue(ctx: &PipelineContext) {
    loop {
        match TaskRepo::claim_next_queued(&ctx.pool, ctx.config.claim_lease_secs).await {
            Ok(Some(task)) => {
                let task_id = task.id;
                if let Err(err) = dispatch_one(ctx, task).await {
                    error!(task_id, error = %err, "dispatch pass failed");
                }
            }
            Ok(None) => break,
            Err(err) => {
                error!(error = %err, "queue claim failed");
                break;
            }
        }
    }
}

/// What to do after a failed submit attempt.
#[derive(Debug, PartialEq)]
enum DispatchAction {
    /// Leave the task queued for the next tick.
    RetryLater,
    /// The transient budget is spent.
    Exhausted,
    /// Non-retryable; fail with the given kind.
    FailPermanent(TaskErrorKind),
}

fn failure_action(transient: bool, retry_count: i32, max_retries: i32) -> DispatchAction {
    if !transient {
        DispatchAction::FailPermanent(TaskErrorKind::ProviderError)
    } else if retry_count >= max_retries {
        DispatchAction::Exhausted
    } else {
        DispatchAction::RetryLater
    }
}

/// Whether a provider-resolution failure is terminal for the task.
///
/// `None` means the task must stay queued under its lease: a missing
/// provider is an operator condition, not a task defect, so it never
/// spends the retry budget.
fn permanent_resolution_failure(err: &ResolveError) -> Option<TaskErrorKind> {
    match err {
        ResolveError::UnknownKind(_) => Some(TaskErrorKind::ProviderRejected),
        ResolveError::NoProvider | ResolveError::Db(_) => None,
    }
}

async fn dispatch_one(ctx: &PipelineContext, task: AiTask) -> Result<(), sqlx::Error> {
    let Some(template) = TemplateRepo::find_by_id(&ctx.pool, task.template_id).await? else {
        fail_task(
            ctx,
            &task,
            TaskErrorKind::ProviderRejected,
            &format!("template {} does not exist", task.template_id),
        )
        .await;
        return Ok(());
    };

    let provider = match ctx.registry.resolve_provider(&ctx.pool, &task, &template).await {
        Ok(provider) => provider,
        Err(ResolveError::Db(err)) => return Err(err),
        Err(err) => {
            match permanent_resolution_failure(&err) {
                Some(kind) => fail_task(ctx, &task, kind, &err.to_string()).await,
                None => {
                    // The claim lease is kept, so the task stays queued
                    // and invisible until the lease expires; the retry
                    // budget is untouched while an admin configures a
                    // provider.
                    warn!(task_id = task.id, "no provider available, task stays queued");
                }
            }
            return Ok(());
        }
    };
    let adapter = match ctx.registry.adapter_for(&provider.api_kind) {
        Ok(adapter) => adapter,
        Err(_) => {
            fail_task(
                ctx,
                &task,
                TaskErrorKind::ProviderRejected,
                &format!("no adapter for provider kind {:?}", provider.api_kind),
            )
            .await;
            return Ok(());
        }
    };

    let refs = match ensure_remote_refs(ctx, adapter, &provider, task.input_ref_list()).await {
        Ok(refs) => refs,
        Err(err) if err.is_transient() => {
            warn!(task_id = task.id, error = %err, "input upload failed");
            handle_transient(ctx, &task, &err.to_string()).await?;
            return Ok(());
        }
        Err(err) => {
            fail_task(ctx, &task, TaskErrorKind::ProviderRejected, &err.to_string()).await;
            return Ok(());
        }
    };

    let resolved = match resolver::resolve(&template, &refs) {
        Ok(resolved) => resolved,
        Err(err) => {
            fail_task(ctx, &task, TaskErrorKind::ProviderRejected, &err.to_string()).await;
            return Ok(());
        }
    };
    TaskRepo::update_request_params(&ctx.pool, task.id, &resolved.request_params).await?;

    match adapter.submit(&provider, &resolved.request_params).await {
        Ok(SubmitOutcome::Sync { refs, raw }) => {
            complete_task(ctx, &task, &refs, resolved.watermark_required, &raw).await?;
        }
        Ok(SubmitOutcome::Accepted {
            provider_task_id,
            raw,
        }) => {
            let moved = TaskRepo::mark_running(
                &ctx.pool,
                task.id,
                provider.id,
                provider_task_id.as_deref(),
                &raw,
            )
            .await?;
            if moved {
                info!(
                    task_id = task.id,
                    provider = %provider.name,
                    provider_task_id = provider_task_id.as_deref().unwrap_or("<none>"),
                    "task dispatched"
                );
            } else {
                warn!(task_id = task.id, "task left queued state mid-dispatch");
            }
        }
        Ok(SubmitOutcome::Rejected { message, raw }) => {
            TaskRepo::update_response_log(&ctx.pool, task.id, &raw).await?;
            fail_task(ctx, &task, TaskErrorKind::ProviderRejected, &message).await;
        }
        Err(err) => {
            warn!(task_id = task.id, provider = %provider.name, error = %err, "submit failed");
            match failure_action(err.is_transient(), task.retry_count, ctx.config.dispatch_max_retries)
            {
                DispatchAction::RetryLater | DispatchAction::Exhausted => {
                    handle_transient(ctx, &task, &err.to_string()).await?;
                }
                DispatchAction::FailPermanent(kind) => {
                    fail_task(ctx, &task, kind, &err.to_string()).await;
                }
            }
        }
    }
    Ok(())
}

/// Make every input ref fetchable by the provider.
///
/// Local paths are uploaded through the provider's upload endpoint; a
/// content-hash cache avoids pushing the same photo twice. Providers
/// without uploads keep the refs untouched.
async fn ensure_remote_refs(
    ctx: &PipelineContext,
    adapter: &dyn ProviderAdapter,
    provider: &ProviderConfig,
    input_refs: Vec<String>,
) -> Result<Vec<String>, ProviderError> {
    let mut out = Vec::with_capacity(input_refs.len());
    for input in input_refs {
        if input.starts_with("http://") || input.starts_with("https://") {
            out.push(input);
            continue;
        }
        let bytes = std::fs::read(&input)
            .map_err(|err| ProviderError::Malformed(format!("unreadable input {input}: {err}")))?;
        let digest = sha256_hex(&bytes);
        if let Ok(Some(url)) = UploadedRefRepo::find(&ctx.pool, provider.id, &digest).await {
            out.push(url);
            continue;
        }
        let filename = std::path::Path::new(&input)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input.png".to_string());
        match adapter.upload(provider, bytes, &filename).await {
            Ok(url) => {
                if let Err(err) = UploadedRefRepo::record(&ctx.pool, provider.id, &digest, &url).await
                {
                    warn!(error = %err, "upload cache write failed");
                }
                out.push(url);
            }
            Err(ProviderError::Unsupported(_)) => out.push(input),
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

/// Materialize result refs and complete the task. Shared with the
/// poller.
pub(crate) async fn complete_task(
    ctx: &PipelineContext,
    task: &AiTask,
    refs: &[ImageRef],
    watermark_required: bool,
    raw: &Value,
) -> Result<(), sqlx::Error> {
    let mut outputs = Vec::with_capacity(refs.len());
    for (sequence, image) in refs.iter().enumerate() {
        match ctx
            .store
            .store_output(task.id, sequence, image, watermark_required)
            .await
        {
            Ok(output) => outputs.push(output),
            Err(err) => {
                fail_task(ctx, task, err.task_error_kind(), &err.to_string()).await;
                return Ok(());
            }
        }
    }
    let Some(first) = outputs.first() else {
        fail_task(
            ctx,
            task,
            TaskErrorKind::ProviderError,
            "provider reported success with zero results",
        )
        .await;
        return Ok(());
    };
    let output_path = first.display_path().display().to_string();
    let won = TaskRepo::mark_completed(&ctx.pool, task.id, &output_path, raw).await?;
    if !won {
        // A timeout sweep beat the completion; the files stay for the
        // audit trail but the order does not advance on them.
        warn!(task_id = task.id, "completion lost the race to a terminal state");
        return Ok(());
    }
    info!(task_id = task.id, order_id = task.order_id, output_path, "task completed");
    if let Err(err) = ctx.coordinator.on_task_completed(task).await {
        error!(task_id = task.id, error = %err, "order advance failed after completion");
    }
    Ok(())
}

/// Bump the transient-failure counter; exhausts into a terminal failure.
async fn handle_transient(
    ctx: &PipelineContext,
    task: &AiTask,
    message: &str,
) -> Result<(), sqlx::Error> {
    let count = TaskRepo::record_dispatch_retry(&ctx.pool, task.id).await?;
    if count >= ctx.config.dispatch_max_retries {
        fail_task(ctx, task, TaskErrorKind::DispatchExhausted, message).await;
    }
    Ok(())
}

/// Fail the task and let the coordinator decide the order's fate.
pub(crate) async fn fail_task(
    ctx: &PipelineContext,
    task: &AiTask,
    kind: TaskErrorKind,
    message: &str,
) {
    match TaskRepo::mark_failed(&ctx.pool, task.id, kind, message).await {
        Ok(true) => {
            warn!(task_id = task.id, kind = %kind, message, "task failed");
            if let Err(err) = ctx.coordinator.on_task_failed(task).await {
                error!(task_id = task.id, error = %err, "order advance failed after task failure");
            }
        }
        Ok(false) => {
            warn!(task_id = task.id, kind = %kind, "task already terminal, failure dropped");
        }
        Err(err) => {
            error!(task_id = task.id, error = %err, "failed to record task failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_retry_until_the_budget_is_spent() {
        assert_eq!(failure_action(true, 0, 3), DispatchAction::RetryLater);
        assert_eq!(failure_action(true, 2, 3), DispatchAction::RetryLater);
        assert_eq!(failure_action(true, 3, 3), DispatchAction::Exhausted);
    }

    #[test]
    fn permanent_failures_never_retry() {
        assert_eq!(
            failure_action(false, 0, 3),
            DispatchAction::FailPermanent(TaskErrorKind::ProviderError)
        );
    }

    #[test]
    fn missing_provider_keeps_the_task_queued() {
        // No budget is spent and no terminal state is chosen; the task
        // waits out its lease until a provider is configured.
        assert_eq!(
            permanent_resolution_failure(&ResolveError::NoProvider),
            None
        );
    }

    #[test]
    fn unknown_adapter_kind_is_a_permanent_rejection() {
        assert_eq!(
            permanent_resolution_failure(&ResolveError::UnknownKind("comfy_dreams".into())),
            Some(TaskErrorKind::ProviderRejected)
        );
    }
}
