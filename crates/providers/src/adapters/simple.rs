//! Adapter for the flat `{status, url}` envelope.

use async_trait::async_trait;
use serde_json::Value;

use inkstone_db::models::provider::ProviderConfig;

use crate::adapter::{PollReply, ProviderAdapter, ProviderError, SubmitOutcome};
use crate::envelope::{self, NormalizedEnvelope};
use crate::http;

pub struct SimpleAdapter {
    client: reqwest::Client,
}

impl SimpleAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for SimpleAdapter {
    fn api_kind(&self) -> &'static str {
        "simple"
    }

    async fn upload(
        &self,
        provider: &ProviderConfig,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String, ProviderError> {
        http::upload_multipart(&self.client, provider, bytes, filename).await
    }

    async fn submit(
        &self,
        provider: &ProviderConfig,
        request_params: &Value,
    ) -> Result<SubmitOutcome, ProviderError> {
        let raw = http::post_json(&self.client, provider, &provider.submit_url(), request_params)
            .await?;
        match envelope::parse_flat(&raw) {
            Some(NormalizedEnvelope::Completed { refs }) if !refs.is_empty() => {
                Ok(SubmitOutcome::Sync { refs, raw })
            }
            Some(NormalizedEnvelope::Failed { message, .. }) => {
                Ok(SubmitOutcome::Rejected { message, raw })
            }
            _ => {
                let provider_task_id = envelope::extract_task_id(&raw);
                Ok(SubmitOutcome::Accepted {
                    provider_task_id,
                    raw,
                })
            }
        }
    }

    async fn poll(
        &self,
        provider: &ProviderConfig,
        provider_task_id: &str,
    ) -> Result<PollReply, ProviderError> {
        let (envelope, raw) = http::poll_with_id_keys(
            &self.client,
            provider,
            provider_task_id,
            envelope::parse_flat,
        )
        .await?;
        Ok(PollReply { envelope, raw })
    }
}
