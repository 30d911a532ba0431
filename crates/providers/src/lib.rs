//! Provider adapters: one module per upstream generation API.
//!
//! Every adapter reduces its provider's wire format to the same two
//! currencies: a [`SubmitOutcome`] at dispatch time and a
//! [`NormalizedEnvelope`] at poll time. Everything downstream (poller,
//! coordinator) is provider-agnostic.

pub mod adapter;
pub mod adapters;
pub mod envelope;
pub mod http;
pub mod registry;

pub use adapter::{PollReply, ProviderAdapter, ProviderError, SubmitOutcome};
pub use envelope::{ImageRef, NormalizedEnvelope};
pub use registry::{AdapterRegistry, ResolveError};
