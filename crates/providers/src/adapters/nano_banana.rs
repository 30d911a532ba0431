//! Adapter for providers speaking the nested `{code, data}` envelope.

use async_trait::async_trait;
use serde_json::Value;

use inkstone_db::models::provider::ProviderConfig;

use crate::adapter::{PollReply, ProviderAdapter, ProviderError, SubmitOutcome};
use crate::envelope::{self, TASK_NOT_FOUND_CODE};
use crate::http;

pub struct NanoBananaAdapter {
    client: reqwest::Client,
}

impl NanoBananaAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProviderAdapter for NanoBananaAdapter {
    fn api_kind(&self) -> &'static str {
        "nano_banana"
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
        let code = raw.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 && code != TASK_NOT_FOUND_CODE {
            let message = raw
                .get("message")
                .or_else(|| raw.get("msg"))
                .and_then(Value::as_str)
                .unwrap_or("submit rejected")
                .to_string();
            return Ok(SubmitOutcome::Rejected { message, raw });
        }
        let refs = envelope::extract_submit_refs(&raw);
        if !refs.is_empty() {
            return Ok(SubmitOutcome::Sync { refs, raw });
        }
        let provider_task_id = envelope::extract_task_id(&raw);
        Ok(SubmitOutcome::Accepted {
            provider_task_id,
            raw,
        })
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
            envelope::parse_nested,
        )
        .await?;
        Ok(PollReply { envelope, raw })
    }
}
