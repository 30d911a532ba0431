//! The adapter contract every provider module implements.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use inkstone_db::models::provider::ProviderConfig;

use crate::envelope::{ImageRef, NormalizedEnvelope};

/// Errors crossing the provider boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unusable provider response: {0}")]
    Malformed(String),
    #[error("provider has no {0} endpoint")]
    MissingEndpoint(&'static str),
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("{0} is not supported by this provider")]
    Unsupported(&'static str),
}

impl ProviderError {
    /// Transient errors leave the task queued for another dispatch
    /// attempt; the rest fail it outright.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport(_) | ProviderError::Transient(_) => true,
            ProviderError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// What a submit call produced.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// The response already carries the final image(s).
    Sync { refs: Vec<ImageRef>, raw: Value },
    /// The provider accepted the task; poll later. A missing id is
    /// tolerated: the poller resolves ambiguous responses.
    Accepted {
        provider_task_id: Option<String>,
        raw: Value,
    },
    /// Non-retryable rejection (bad prompt, auth, billing).
    Rejected { message: String, raw: Value },
}

/// A poll result together with the raw body for the task's response log.
#[derive(Debug)]
pub struct PollReply {
    pub envelope: NormalizedEnvelope,
    pub raw: Value,
}

/// One upstream generation API.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// The `api_kind` tag this adapter serves.
    fn api_kind(&self) -> &'static str;

    /// Push a local file to the provider, returning a fetchable URL.
    async fn upload(
        &self,
        provider: &ProviderConfig,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String, ProviderError>;

    /// Submit a generation request.
    async fn submit(
        &self,
        provider: &ProviderConfig,
        request_params: &Value,
    ) -> Result<SubmitOutcome, ProviderError>;

    /// Query the state of a previously submitted task.
    async fn poll(
        &self,
        provider: &ProviderConfig,
        provider_task_id: &str,
    ) -> Result<PollReply, ProviderError>;
}
