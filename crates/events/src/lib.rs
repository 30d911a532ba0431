//! Event bus and outbound notification channels.
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`DomainEvent`] — the canonical event envelope.
//! - [`notify`] — mini-program subscribe-message delivery.

pub mod bus;
pub mod notify;

pub use bus::{DomainEvent, EventBus};
pub use notify::{NotifyError, SubscribeMessageSender};
