//! The order state machine as pure data.
//!
//! [`next_status`] is the single source of truth for which event advances
//! which state. The coordinator persists transitions; this module only
//! decides them. Any status write that does not come out of
//! [`next_status`] is a bug (admin override excepted).

use serde::{Deserialize, Serialize};

use crate::types::DbId;

/// Order lifecycle status. Stored as text in `orders.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created by the mini-program, awaiting payment.
    Created,
    /// Payment callback verified.
    Paid,
    /// Generation tasks dispatched and running.
    Processing,
    /// All tasks terminal with results; waiting for the user to pick one.
    AwaitingSelection,
    /// An image is pinned; ready for print submission.
    Selected,
    /// Submitted to the print service.
    Printing,
    /// Logistics callback received.
    Shipped,
    /// Delivery confirmed by the client.
    Delivered,
    /// Generation retry budget exhausted.
    GenerationFailed,
    /// Print submission retry budget exhausted; parked for admin.
    PrintFailed,
    /// Administrative cancel.
    Cancelled,
}

/// An event that may advance an order through the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    PaymentReceived { method: String },
    GenerationStarted,
    /// All generation tasks for the order reached a successful terminal state.
    GenerationCompleted,
    /// All generation tasks failed and the retry budget is spent.
    GenerationFailed,
    UserSelected { image_id: DbId },
    SubmittedToPrint,
    PrintFailed,
    LogisticsReceived { logistics: serde_json::Value },
    DeliveryConfirmed,
    AdminCancel,
}

impl OrderStatus {
    /// Stable wire string, matching the `serde` representation.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::AwaitingSelection => "awaiting_selection",
            OrderStatus::Selected => "selected",
            OrderStatus::Printing => "printing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::GenerationFailed => "generation_failed",
            OrderStatus::PrintFailed => "print_failed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a stored status value, mapping legacy names forward.
    ///
    /// Rows imported from the previous system carry overlapping status
    /// vocabularies (`pending`, `ai_processing`, `hd_ready`, ...). They are
    /// normalized on read; nothing ever writes a legacy value back.
    pub fn parse(raw: &str) -> Option<OrderStatus> {
        let canonical = normalize_legacy(raw);
        match canonical {
            "created" => Some(OrderStatus::Created),
            "paid" => Some(OrderStatus::Paid),
            "processing" => Some(OrderStatus::Processing),
            "awaiting_selection" => Some(OrderStatus::AwaitingSelection),
            "selected" => Some(OrderStatus::Selected),
            "printing" => Some(OrderStatus::Printing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "generation_failed" => Some(OrderStatus::GenerationFailed),
            "print_failed" => Some(OrderStatus::PrintFailed),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether the order can no longer advance.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::GenerationFailed
        )
    }
}

impl OrderEvent {
    /// Stable name recorded in the `order_transitions` guard table.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderEvent::PaymentReceived { .. } => "payment_received",
            OrderEvent::GenerationStarted => "generation_started",
            OrderEvent::GenerationCompleted => "generation_completed",
            OrderEvent::GenerationFailed => "generation_failed",
            OrderEvent::UserSelected { .. } => "user_selected",
            OrderEvent::SubmittedToPrint => "submitted_to_print",
            OrderEvent::PrintFailed => "print_failed",
            OrderEvent::LogisticsReceived { .. } => "logistics_received",
            OrderEvent::DeliveryConfirmed => "delivery_confirmed",
            OrderEvent::AdminCancel => "admin_cancel",
        }
    }
}

/// Map a legacy status value onto the canonical vocabulary.
///
/// Unknown values pass through unchanged (and then fail to parse, which
/// surfaces the bad row instead of guessing).
pub fn normalize_legacy(raw: &str) -> &str {
    match raw {
        "unpaid" => "created",
        "pending" => "paid",
        "shooting" | "retouching" | "ai_processing" => "processing",
        "hd_ready" | "pending_selection" => "awaiting_selection",
        "selection_completed" | "completed" => "selected",
        "manufacturing" | "pending_shipment" => "printing",
        "refunded" => "cancelled",
        other => other,
    }
}

/// Decide the successor state for `event` arriving in `from`.
///
/// Returns `None` when the event is not accepted in that state; callers
/// treat that as a [`crate::CoreError::StateConflict`] (logged and dropped
/// for replayed webhooks).
pub fn next_status(from: OrderStatus, event: &OrderEvent) -> Option<OrderStatus> {
    use OrderEvent as E;
    use OrderStatus as S;

    // Cancel is accepted from any non-terminal state.
    if matches!(event, E::AdminCancel) {
        return (!from.is_terminal()).then_some(S::Cancelled);
    }

    match (from, event) {
        (S::Created, E::PaymentReceived { .. }) => Some(S::Paid),
        (S::Paid, E::GenerationStarted) => Some(S::Processing),
        (S::Processing, E::GenerationCompleted) => Some(S::AwaitingSelection),
        (S::Processing, E::GenerationFailed) => Some(S::GenerationFailed),
        (S::AwaitingSelection, E::UserSelected { .. }) => Some(S::Selected),
        (S::Selected, E::SubmittedToPrint) => Some(S::Printing),
        // Submission exhausted its retry budget; parked for admin.
        (S::Printing, E::PrintFailed) => Some(S::PrintFailed),
        // Admin can re-drive a parked order through print submission.
        (S::PrintFailed, E::SubmittedToPrint) => Some(S::Printing),
        (S::Printing, E::LogisticsReceived { .. }) => Some(S::Shipped),
        (S::Shipped, E::DeliveryConfirmed) => Some(S::Delivered),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_advances_through_the_dag() {
        let mut state = OrderStatus::Created;
        let events = [
            OrderEvent::PaymentReceived {
                method: "wechat".into(),
            },
            OrderEvent::GenerationStarted,
            OrderEvent::GenerationCompleted,
            OrderEvent::UserSelected { image_id: 1 },
            OrderEvent::SubmittedToPrint,
            OrderEvent::LogisticsReceived {
                logistics: serde_json::json!({"tracking_number": "SF1"}),
            },
            OrderEvent::DeliveryConfirmed,
        ];
        for event in &events {
            state = next_status(state, event).expect("event accepted");
        }
        assert_eq!(state, OrderStatus::Delivered);
    }

    #[test]
    fn replayed_payment_is_rejected_in_paid_state() {
        assert_eq!(
            next_status(
                OrderStatus::Paid,
                &OrderEvent::PaymentReceived {
                    method: "wechat".into()
                }
            ),
            None
        );
    }

    #[test]
    fn logistics_outside_printing_is_rejected() {
        let logistics = OrderEvent::LogisticsReceived {
            logistics: serde_json::Value::Null,
        };
        assert_eq!(next_status(OrderStatus::Paid, &logistics), None);
        assert_eq!(next_status(OrderStatus::Shipped, &logistics), None);
    }

    #[test]
    fn no_backward_edges_exist() {
        // A shipped order can never re-enter generation.
        assert_eq!(
            next_status(OrderStatus::Shipped, &OrderEvent::GenerationStarted),
            None
        );
        assert_eq!(
            next_status(OrderStatus::Delivered, &OrderEvent::UserSelected { image_id: 1 }),
            None
        );
    }

    #[test]
    fn cancel_allowed_from_any_live_state() {
        for s in [
            OrderStatus::Created,
            OrderStatus::Paid,
            OrderStatus::Processing,
            OrderStatus::Printing,
            OrderStatus::Shipped,
        ] {
            assert_eq!(
                next_status(s, &OrderEvent::AdminCancel),
                Some(OrderStatus::Cancelled)
            );
        }
    }

    #[test]
    fn cancel_rejected_on_terminal_states() {
        assert_eq!(
            next_status(OrderStatus::Delivered, &OrderEvent::AdminCancel),
            None
        );
        assert_eq!(
            next_status(OrderStatus::Cancelled, &OrderEvent::AdminCancel),
            None
        );
    }

    #[test]
    fn print_failed_can_be_resubmitted() {
        assert_eq!(
            next_status(OrderStatus::Printing, &OrderEvent::PrintFailed),
            Some(OrderStatus::PrintFailed)
        );
        assert_eq!(
            next_status(OrderStatus::PrintFailed, &OrderEvent::SubmittedToPrint),
            Some(OrderStatus::Printing)
        );
    }

    #[test]
    fn legacy_values_normalize_forward() {
        assert_eq!(OrderStatus::parse("ai_processing"), Some(OrderStatus::Processing));
        assert_eq!(OrderStatus::parse("hd_ready"), Some(OrderStatus::AwaitingSelection));
        assert_eq!(OrderStatus::parse("manufacturing"), Some(OrderStatus::Printing));
        assert_eq!(OrderStatus::parse("completed"), Some(OrderStatus::Selected));
        assert_eq!(OrderStatus::parse("unpaid"), Some(OrderStatus::Created));
        assert_eq!(OrderStatus::parse("refunded"), Some(OrderStatus::Cancelled));
    }

    #[test]
    fn unknown_status_fails_to_parse() {
        assert_eq!(OrderStatus::parse("teleported"), None);
    }

    #[test]
    fn wire_strings_round_trip() {
        for s in [
            OrderStatus::Created,
            OrderStatus::AwaitingSelection,
            OrderStatus::PrintFailed,
        ] {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
    }
}
