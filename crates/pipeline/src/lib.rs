//! The generation and fulfillment pipeline.
//!
//! - [`resolver`] — template to request-params transformation (pure).
//! - [`storage`] — result download, decode, watermark, public URLs.
//! - [`dispatcher`] — queued task submission to providers.
//! - [`poller`] — running task advancement.
//! - [`coordinator`] — the order state machine with transactional
//!   transition guards.
//! - [`print`] — print service submission and callback types.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod dispatcher;
pub mod poller;
pub mod print;
pub mod resolver;
pub mod storage;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use coordinator::{CoordinatorError, OrderCoordinator};
pub use storage::MediaStore;
