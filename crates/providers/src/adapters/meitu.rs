//! Adapter for the synchronous retouch service.
//!
//! The service either returns the retouched image in the submit reply
//! or misbehaves; any non-2xx is treated as transient so the dispatch
//! retry budget absorbs its flakiness.

use async_trait::async_trait;
use serde_json::Value;

use inkstone_db::models::provider::ProviderConfig;

use crate::adapter::{PollReply, ProviderAdapter, ProviderError, SubmitOutcome};
use crate::envelope;
use crate::http;

pub struct MeituAdapter {
    client: reqwest::Client,
}

impl MeituAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for MeituAdapter {
    fn api_kind(&self) -> &'static str {
        "meitu_retouch"
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
            .await
            .map_err(|err| match err {
                ProviderError::Status { status, body } => {
                    ProviderError::Transient(format!("retouch HTTP {status}: {body}"))
                }
                other => other,
            })?;
        let refs = envelope::extract_submit_refs(&raw);
        if refs.is_empty() {
            return Ok(SubmitOutcome::Rejected {
                message: "retouch reply carries no image".to_string(),
                raw,
            });
        }
        Ok(SubmitOutcome::Sync { refs, raw })
    }

    async fn poll(
        &self,
        _provider: &ProviderConfig,
        _provider_task_id: &str,
    ) -> Result<PollReply, ProviderError> {
        Err(ProviderError::Unsupported("poll"))
    }
}
