//! The order state machine.
//!
//! Every transition runs in one transaction: the order row is locked,
//! the guard row for `(order_id, from_state, to_state)` is inserted,
//! and the status plus companion fields are written together. Side
//! effects run only after the commit, and only for the caller that won
//! the guard insert; a replayed payment callback or a duplicated
//! logistics webhook changes nothing and triggers nothing twice.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use inkstone_core::order_number;
use inkstone_core::order_status::next_status;
use inkstone_core::types::DbId;
use inkstone_core::{CoreError, OrderEvent, OrderStatus, TaskStatus};
use inkstone_db::models::order::Order;
use inkstone_db::models::task::{AiTask, NewTask};
use inkstone_db::repositories::{OrderRepo, TaskRepo, TemplateRepo, TransitionRepo};
use inkstone_db::DbPool;
use inkstone_events::{DomainEvent, EventBus, SubscribeMessageSender};

use crate::config::PipelineConfig;
use crate::print::{backoff_secs, PrintCallback, PrintError, PrintGateway};
use crate::storage::{MediaStore, StorageError, StoredOutput};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Print(#[from] PrintError),
}

impl CoordinatorError {
    /// True when the order is in a state that refuses this event.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, Self::Core(CoreError::StateConflict { .. }))
    }
}

/// Result of one applied transition.
pub struct Applied {
    pub order: Order,
    pub to: OrderStatus,
    /// Whether this caller won the transition guard. Replays see `false`
    /// and must skip side effects.
    pub fresh: bool,
}

struct SelectionPaths {
    display: String,
    clean: String,
}

/// Drives orders through their lifecycle.
pub struct OrderCoordinator {
    pool: DbPool,
    bus: Arc<EventBus>,
    store: Arc<MediaStore>,
    print: PrintGateway,
    notifier: Option<SubscribeMessageSender>,
    config: PipelineConfig,
}

impl OrderCoordinator {
    pub fn new(
        pool: DbPool,
        bus: Arc<EventBus>,
        store: Arc<MediaStore>,
        print: PrintGateway,
        notifier: Option<SubscribeMessageSender>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            pool,
            bus,
            store,
            print,
            notifier,
            config,
        }
    }

    /// Payment callback verified: created -> paid, then kick off
    /// generation.
    pub async fn record_payment(
        &self,
        order_id: DbId,
        method: &str,
    ) -> Result<Applied, CoordinatorError> {
        let applied = self
            .transition(
                order_id,
                &OrderEvent::PaymentReceived {
                    method: method.to_string(),
                },
                None,
            )
            .await?;
        if applied.fresh {
            self.publish("order.paid", &applied.order, None);
            self.notify(
                &applied.order.openid,
                &self.config.notify_template_paid,
                serde_json::json!({
                    "order_number": { "value": applied.order.order_number },
                }),
            )
            .await;
            self.start_generation(order_id).await?;
        }
        Ok(applied)
    }

    /// paid -> processing; creates the generation task row.
    pub async fn start_generation(&self, order_id: DbId) -> Result<Applied, CoordinatorError> {
        let applied = self
            .transition(order_id, &OrderEvent::GenerationStarted, None)
            .await?;
        if applied.fresh {
            let order = &applied.order;
            match TemplateRepo::find_for_product(&self.pool, order.product_id, order.style_id)
                .await?
            {
                Some(template) => {
                    // One task per expected output; the user later picks
                    // among the completed tasks' images.
                    for _ in 0..generation_fanout(template.expected_output_count) {
                        let task = TaskRepo::create(
                            &self.pool,
                            &NewTask {
                                order_id,
                                template_id: template.id,
                                provider_config_id: template.provider_config_id,
                                input_refs: order.input_ref_list(),
                                request_params: serde_json::json!({}),
                                retry_of_task_id: None,
                            },
                        )
                        .await?;
                        info!(order_id, task_id = task.id, "generation task queued");
                        self.publish("task.queued", order, Some(task.id));
                    }
                }
                None => {
                    error!(
                        order_id,
                        product_id = order.product_id,
                        "no template bound to product, failing generation"
                    );
                    self.transition(order_id, &OrderEvent::GenerationFailed, None)
                        .await?;
                }
            }
        }
        Ok(applied)
    }

    /// A task reached `completed`. Advances the order once every task is
    /// terminal; auto-selects when the template yields a single image.
    pub async fn on_task_completed(&self, task: &AiTask) -> Result<(), CoordinatorError> {
        if self.any_task_live(task.order_id).await? {
            return Ok(());
        }
        let applied = match self
            .transition(task.order_id, &OrderEvent::GenerationCompleted, None)
            .await
        {
            Ok(applied) => applied,
            Err(CoordinatorError::Core(CoreError::StateConflict { .. })) => {
                warn!(task_id = task.id, "late completion for a settled order");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if !applied.fresh {
            return Ok(());
        }
        self.publish("order.results_ready", &applied.order, Some(task.id));
        self.notify(
            &applied.order.openid,
            &self.config.notify_template_ready,
            serde_json::json!({
                "order_number": { "value": applied.order.order_number },
            }),
        )
        .await;

        let template = TemplateRepo::find_by_id(&self.pool, task.template_id).await?;
        if template.map_or(false, |t| t.expected_output_count == 1) {
            self.select_image(task.order_id, task.id).await?;
        }
        Ok(())
    }

    /// A task failed terminally. Re-dispatches within the retry budget,
    /// otherwise parks the order in `generation_failed`.
    pub async fn on_task_failed(&self, task: &AiTask) -> Result<(), CoordinatorError> {
        if self.any_task_live(task.order_id).await? {
            return Ok(());
        }
        let retries = OrderRepo::increment_generation_retries(&self.pool, task.order_id).await?;
        if retries <= self.config.generation_max_retries {
            // Fresh row against the default provider; the failed row is
            // kept for the audit trail.
            let retry = TaskRepo::create(
                &self.pool,
                &NewTask {
                    order_id: task.order_id,
                    template_id: task.template_id,
                    provider_config_id: None,
                    input_refs: task.input_ref_list(),
                    request_params: serde_json::json!({}),
                    retry_of_task_id: Some(task.id),
                },
            )
            .await?;
            warn!(
                order_id = task.order_id,
                failed_task_id = task.id,
                retry_task_id = retry.id,
                retries,
                "generation failed, re-dispatching"
            );
            return Ok(());
        }
        match self
            .transition(task.order_id, &OrderEvent::GenerationFailed, None)
            .await
        {
            Ok(applied) if applied.fresh => {
                self.publish("order.generation_failed", &applied.order, Some(task.id));
            }
            Ok(_) => {}
            Err(CoordinatorError::Core(CoreError::StateConflict { .. })) => {
                warn!(task_id = task.id, "late failure for a settled order");
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// User (or auto-selection) pins one generated image.
    ///
    /// `image_id` is the id of the completed task whose output is
    /// chosen. The chosen files are copied into the order's final slots
    /// before the transition commits them.
    pub async fn select_image(
        &self,
        order_id: DbId,
        image_id: DbId,
    ) -> Result<Applied, CoordinatorError> {
        let task = TaskRepo::find_by_id(&self.pool, image_id)
            .await?
            .filter(|t| t.order_id == order_id)
            .ok_or(CoreError::NotFound {
                entity: "generated image",
                id: image_id,
            })?;
        if task.status() != Some(TaskStatus::Completed) {
            return Err(CoreError::Conflict(format!(
                "task {image_id} has no completed output"
            ))
            .into());
        }
        let display_path = task
            .output_image_path
            .as_deref()
            .ok_or_else(|| CoreError::Internal(format!("task {image_id} lacks an output path")))?;

        let mut output = stored_output_from(display_path);
        if let Some(wm) = &output.watermarked_path {
            // A lost or damaged preview is rebuilt from the clean
            // original before the final copies are made.
            if !wm.exists() {
                output.watermarked_path = Some(self.store.rewatermark(&output.clean_path)?);
            }
        }
        let order = OrderRepo::find_by_id(&self.pool, order_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "order",
                id: order_id,
            })?;
        // Idempotent copies; harmless if the transition is later refused.
        let (final_display, final_clean) =
            self.store.promote_selection(&order.order_number, &output)?;
        let paths = SelectionPaths {
            display: final_display.display().to_string(),
            clean: final_clean.display().to_string(),
        };

        let applied = self
            .transition(order_id, &OrderEvent::UserSelected { image_id }, Some(&paths))
            .await?;
        if applied.fresh {
            self.publish("order.selected", &applied.order, Some(image_id));
        }
        Ok(applied)
    }

    /// selected/print_failed -> printing; submission with backoff runs
    /// after the transition commits.
    pub async fn submit_to_print(
        self: &Arc<Self>,
        order_id: DbId,
    ) -> Result<Applied, CoordinatorError> {
        let applied = self
            .transition(order_id, &OrderEvent::SubmittedToPrint, None)
            .await?;
        if applied.fresh {
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(err) = coordinator.run_print_submission(order_id).await {
                    error!(order_id, error = %err, "print submission task failed");
                }
            });
        }
        Ok(applied)
    }

    /// Logistics webhook from the print service.
    ///
    /// Unknown order numbers error (the handler 404s); an order not in
    /// `printing` is logged and ignored, which also makes duplicate
    /// callbacks idempotent.
    pub async fn handle_print_callback(
        &self,
        callback: &PrintCallback,
    ) -> Result<(), CoordinatorError> {
        if !order_number::is_valid(&callback.order_number) {
            return Err(CoreError::Validation(format!(
                "malformed order number {:?}",
                callback.order_number
            ))
            .into());
        }
        let order = OrderRepo::find_by_order_number(&self.pool, &callback.order_number)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "order",
                id: 0,
            })?;
        let event = OrderEvent::LogisticsReceived {
            logistics: callback.logistics_value(),
        };
        match self.transition(order.id, &event, None).await {
            Ok(applied) if applied.fresh => {
                // Commission settlement is a collaborator concern; the
                // event carries what it needs.
                self.bus.publish(
                    DomainEvent::new("order.shipped")
                        .with_order(applied.order.id)
                        .with_payload(serde_json::json!({
                            "order_number": applied.order.order_number,
                            "franchisee_id": applied.order.franchisee_id,
                            "promotion_code": applied.order.promotion_code,
                            "price_fen": applied.order.price_fen,
                        })),
                );
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(CoordinatorError::Core(CoreError::StateConflict { state, .. })) => {
                warn!(
                    order_number = %callback.order_number,
                    state,
                    "logistics callback outside printing, ignored"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Client confirms receipt: shipped -> delivered.
    pub async fn confirm_delivery(&self, order_id: DbId) -> Result<Applied, CoordinatorError> {
        let applied = self
            .transition(order_id, &OrderEvent::DeliveryConfirmed, None)
            .await?;
        if applied.fresh {
            self.publish("order.delivered", &applied.order, None);
        }
        Ok(applied)
    }

    /// Administrative cancel from any live state.
    pub async fn cancel(&self, order_id: DbId) -> Result<Applied, CoordinatorError> {
        let applied = self
            .transition(order_id, &OrderEvent::AdminCancel, None)
            .await?;
        if applied.fresh {
            let cancelled = TaskRepo::cancel_queued_for_order(&self.pool, order_id).await?;
            if cancelled > 0 {
                info!(order_id, cancelled, "queued tasks cancelled with order");
            }
            self.publish("order.cancelled", &applied.order, None);
        }
        Ok(applied)
    }

    /// The single transition primitive; see the module docs.
    async fn transition(
        &self,
        order_id: DbId,
        event: &OrderEvent,
        selection: Option<&SelectionPaths>,
    ) -> Result<Applied, CoordinatorError> {
        let mut tx = self.pool.begin().await?;
        let order = OrderRepo::lock_by_id(&mut tx, order_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "order",
                id: order_id,
            })?;
        let from = order.status().ok_or_else(|| {
            CoreError::Internal(format!(
                "order {order_id} carries unknown status {:?}",
                order.status_raw
            ))
        })?;
        let to = next_status(from, event).ok_or_else(|| CoreError::StateConflict {
            order_id,
            state: from.as_str().to_string(),
            event: event.as_str().to_string(),
        })?;

        let fresh = TransitionRepo::try_insert(
            &mut tx,
            order_id,
            from.as_str(),
            to.as_str(),
            event.as_str(),
            guard_attempt(event, order.print_attempts),
        )
        .await?;
        if fresh {
            OrderRepo::set_status(&mut tx, order_id, to.as_str()).await?;
            match event {
                OrderEvent::PaymentReceived { method } => {
                    OrderRepo::set_paid_fields(&mut tx, order_id, method, Utc::now()).await?;
                }
                OrderEvent::UserSelected { image_id } => {
                    if let Some(paths) = selection {
                        OrderRepo::set_selection_fields(
                            &mut tx,
                            order_id,
                            *image_id,
                            &paths.display,
                            &paths.clean,
                        )
                        .await?;
                    }
                }
                OrderEvent::LogisticsReceived { logistics } => {
                    OrderRepo::set_shipped_fields(&mut tx, order_id, logistics).await?;
                }
                OrderEvent::DeliveryConfirmed => {
                    OrderRepo::set_completed_at(&mut tx, order_id).await?;
                }
                _ => {}
            }
        }
        tx.commit().await?;
        info!(
            order_id,
            from = from.as_str(),
            to = to.as_str(),
            event = event.as_str(),
            fresh,
            "order transition"
        );
        let order = if fresh { with_status(order, to) } else { order };
        Ok(Applied { order, to, fresh })
    }

    /// Print submission with exponential backoff. Exhaustion parks the
    /// order in `print_failed`.
    async fn run_print_submission(&self, order_id: DbId) -> Result<(), CoordinatorError> {
        loop {
            let order = OrderRepo::find_by_id(&self.pool, order_id)
                .await?
                .ok_or(CoreError::NotFound {
                    entity: "order",
                    id: order_id,
                })?;
            if order.status() != Some(OrderStatus::Printing) {
                return Ok(());
            }
            let clean_path = order.final_image_path_clean.clone().ok_or_else(|| {
                CoreError::Internal(format!("order {order_id} has no fulfillment image"))
            })?;
            let image_url = self.store.public_url(Path::new(&clean_path));

            let attempt = OrderRepo::increment_print_attempts(&self.pool, order_id).await?;
            match self.print.submit(&order, &image_url).await {
                Ok(external_id) => {
                    OrderRepo::set_print_external_id(&self.pool, order_id, &external_id).await?;
                    info!(order_id, external_id, "print submission accepted");
                    self.publish("order.print_submitted", &order, None);
                    return Ok(());
                }
                Err(err) if attempt < self.config.print_max_attempts => {
                    let delay = backoff_secs(attempt);
                    warn!(order_id, attempt, delay, error = %err, "print submission failed, backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                }
                Err(err) => {
                    error!(order_id, attempt, error = %err, "print submission exhausted");
                    let applied = self
                        .transition(order_id, &OrderEvent::PrintFailed, None)
                        .await?;
                    if applied.fresh {
                        self.publish("order.print_failed", &applied.order, None);
                    }
                    return Ok(());
                }
            }
        }
    }

    async fn any_task_live(&self, order_id: DbId) -> Result<bool, sqlx::Error> {
        let tasks = TaskRepo::list_for_order(&self.pool, order_id).await?;
        Ok(tasks
            .iter()
            .any(|t| t.status().map_or(false, |s| !s.is_terminal())))
    }

    fn publish(&self, event_type: &str, order: &Order, task_id: Option<DbId>) {
        let mut event = DomainEvent::new(event_type).with_order(order.id).with_payload(
            serde_json::json!({ "order_number": order.order_number, "status": order.status_raw }),
        );
        if let Some(task_id) = task_id {
            event = event.with_task(task_id);
        }
        self.bus.publish(event);
    }

    /// Best-effort subscribe message; failures are logged, never fatal.
    async fn notify(&self, openid: &str, template_id: &str, data: serde_json::Value) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        if template_id.is_empty() {
            return;
        }
        if let Err(err) = notifier.send(openid, template_id, &data).await {
            warn!(template_id, error = %err, "notification delivery failed");
        }
    }
}

/// How many generation tasks an order fans out into. Each task yields
/// one selectable image; a corrupt zero or negative count still gets
/// one task.
fn generation_fanout(expected_output_count: i32) -> usize {
    expected_output_count.max(1) as usize
}

/// Guard discriminator for the transition insert.
///
/// One-shot edges use 0. The print submit/fail cycle may legally
/// repeat, so its edges carry the print-attempt counter; each
/// resubmission cycle has advanced the counter and gets a fresh guard
/// row.
fn guard_attempt(event: &OrderEvent, print_attempts: i32) -> i32 {
    match event {
        OrderEvent::SubmittedToPrint | OrderEvent::PrintFailed => print_attempts,
        _ => 0,
    }
}

/// The row as it reads after a committed transition; [`Applied`] must
/// never carry the pre-transition status into side effects.
fn with_status(mut order: Order, to: OrderStatus) -> Order {
    order.status_raw = to.as_str().to_string();
    order
}

/// Rebuild a [`StoredOutput`] from a task's recorded display path. The
/// clean original sits next to the watermarked file, minus the prefix.
fn stored_output_from(display_path: &str) -> StoredOutput {
    let path = PathBuf::from(display_path);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_prefix("watermarked_") {
        Some(clean_name) => StoredOutput {
            clean_path: path.with_file_name(clean_name),
            watermarked_path: Some(path.clone()),
        },
        None => StoredOutput {
            clean_path: path,
            watermarked_path: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn order_fixture(status: &str) -> Order {
        let now = Utc::now();
        Order {
            id: 7,
            order_number: "PO20260826120000123456".to_string(),
            status_raw: status.to_string(),
            product_id: 1,
            style_id: None,
            customer_contact: "13800000000".to_string(),
            openid: "o-test".to_string(),
            price_fen: 9900,
            paid_at: None,
            payment_method: None,
            selected_image_id: None,
            final_image_path: None,
            final_image_path_clean: None,
            shipping_address: serde_json::json!({}),
            logistics: None,
            shipped_at: None,
            completed_at: None,
            franchisee_id: None,
            promotion_code: None,
            input_refs: serde_json::json!([]),
            product_code: None,
            size_code: None,
            generation_retries: 0,
            print_attempts: 0,
            print_external_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// In-memory stand-in for the `order_transitions` guard table: the
    /// same decision the transition primitive makes, minus the
    /// database.
    struct GuardLedger(HashSet<(&'static str, &'static str, i32)>);

    impl GuardLedger {
        fn new() -> Self {
            Self(HashSet::new())
        }

        fn apply(
            &mut self,
            from: OrderStatus,
            event: &OrderEvent,
            print_attempts: i32,
        ) -> Option<(OrderStatus, bool)> {
            let to = next_status(from, event)?;
            let fresh =
                self.0
                    .insert((from.as_str(), to.as_str(), guard_attempt(event, print_attempts)));
            Some((to, fresh))
        }
    }

    #[test]
    fn replayed_payment_loses_the_guard() {
        let mut ledger = GuardLedger::new();
        let payment = OrderEvent::PaymentReceived {
            method: "wechat".into(),
        };
        let (to, fresh) = ledger.apply(OrderStatus::Created, &payment, 0).unwrap();
        assert_eq!(to, OrderStatus::Paid);
        assert!(fresh);
        // Duplicate callback racing the first commit: same edge, same
        // guard key, side effects must not run again.
        let (_, fresh) = ledger.apply(OrderStatus::Created, &payment, 0).unwrap();
        assert!(!fresh);
    }

    #[test]
    fn replayed_payment_after_commit_is_refused_by_the_state_machine() {
        let payment = OrderEvent::PaymentReceived {
            method: "wechat".into(),
        };
        assert_eq!(next_status(OrderStatus::Paid, &payment), None);
    }

    #[test]
    fn each_print_cycle_gets_its_own_guard_row() {
        let mut ledger = GuardLedger::new();

        let (_, fresh) = ledger
            .apply(OrderStatus::Selected, &OrderEvent::SubmittedToPrint, 0)
            .unwrap();
        assert!(fresh);
        // Exhaustion after three attempts, then an admin resubmission,
        // then a second exhaustion. Every occurrence is a new edge.
        let (_, fresh) = ledger
            .apply(OrderStatus::Printing, &OrderEvent::PrintFailed, 3)
            .unwrap();
        assert!(fresh);
        let (_, fresh) = ledger
            .apply(OrderStatus::PrintFailed, &OrderEvent::SubmittedToPrint, 3)
            .unwrap();
        assert!(fresh);
        let (_, fresh) = ledger
            .apply(OrderStatus::Printing, &OrderEvent::PrintFailed, 6)
            .unwrap();
        assert!(fresh);

        // A replay of one occurrence still collides.
        let (_, fresh) = ledger
            .apply(OrderStatus::PrintFailed, &OrderEvent::SubmittedToPrint, 3)
            .unwrap();
        assert!(!fresh);
    }

    #[test]
    fn one_shot_edges_use_a_zero_discriminator() {
        let events = [
            OrderEvent::PaymentReceived {
                method: "wechat".into(),
            },
            OrderEvent::GenerationStarted,
            OrderEvent::UserSelected { image_id: 3 },
            OrderEvent::DeliveryConfirmed,
            OrderEvent::AdminCancel,
        ];
        for event in &events {
            assert_eq!(guard_attempt(event, 5), 0, "{}", event.as_str());
        }
        assert_eq!(guard_attempt(&OrderEvent::SubmittedToPrint, 5), 5);
        assert_eq!(guard_attempt(&OrderEvent::PrintFailed, 5), 5);
    }

    #[test]
    fn fanout_is_one_task_per_expected_output() {
        assert_eq!(generation_fanout(4), 4);
        assert_eq!(generation_fanout(1), 1);
        // Corrupt template rows still produce a single task.
        assert_eq!(generation_fanout(0), 1);
        assert_eq!(generation_fanout(-2), 1);
    }

    #[test]
    fn applied_order_carries_the_committed_status() {
        let order = with_status(order_fixture("created"), OrderStatus::Paid);
        assert_eq!(order.status_raw, "paid");
        assert_eq!(order.status(), Some(OrderStatus::Paid));
    }

    #[test]
    fn stored_output_splits_watermarked_display_path() {
        let output = stored_output_from("/data/outputs/watermarked_task9_x_0.png");
        assert_eq!(
            output.clean_path,
            PathBuf::from("/data/outputs/task9_x_0.png")
        );
        assert_eq!(
            output.watermarked_path,
            Some(PathBuf::from("/data/outputs/watermarked_task9_x_0.png"))
        );
    }

    #[test]
    fn stored_output_without_prefix_is_clean_only() {
        let output = stored_output_from("/data/outputs/task9_x_0.jpg");
        assert_eq!(output.clean_path, PathBuf::from("/data/outputs/task9_x_0.jpg"));
        assert!(output.watermarked_path.is_none());
    }
}
