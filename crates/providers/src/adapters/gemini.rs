//! Adapter for the candidate-envelope image model. Always synchronous:
//! the submit reply embeds the image as base64 `inlineData`.

use async_trait::async_trait;
use serde_json::Value;

use inkstone_db::models::provider::ProviderConfig;

use crate::adapter::{PollReply, ProviderAdapter, ProviderError, SubmitOutcome};
use crate::envelope::{self, NormalizedEnvelope};
use crate::http;

pub struct GeminiAdapter {
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn api_kind(&self) -> &'static str {
        "gemini"
    }

    async fn upload(
        &self,
        _provider: &ProviderConfig,
        _bytes: Vec<u8>,
        _filename: &str,
    ) -> Result<String, ProviderError> {
        // Inputs travel inline in the request, never as hosted files.
        Err(ProviderError::Unsupported("upload"))
    }

    async fn submit(
        &self,
        provider: &ProviderConfig,
        request_params: &Value,
    ) -> Result<SubmitOutcome, ProviderError> {
        let raw = http::post_json(&self.client, provider, &provider.submit_url(), request_params)
            .await?;
        if let Some(message) = raw.pointer("/error/message").and_then(Value::as_str) {
            return Ok(SubmitOutcome::Rejected {
                message: message.to_string(),
                raw,
            });
        }
        match envelope::parse_candidates(&raw) {
            Some(NormalizedEnvelope::Completed { refs }) => Ok(SubmitOutcome::Sync { refs, raw }),
            _ => Ok(SubmitOutcome::Rejected {
                message: "response carries no image candidate".to_string(),
                raw,
            }),
        }
    }

    async fn poll(
        &self,
        _provider: &ProviderConfig,
        _provider_task_id: &str,
    ) -> Result<PollReply, ProviderError> {
        Err(ProviderError::Unsupported("poll"))
    }
}
