//! Shared HTTP plumbing for adapters.

use serde_json::Value;
use tracing::{debug, warn};

use inkstone_db::models::provider::ProviderConfig;

use crate::adapter::ProviderError;
use crate::envelope::NormalizedEnvelope;

/// Poll body id keys, tried in this order until a parser recognizes the
/// reply. Providers are inconsistent about the key's name and casing.
pub const POLL_ID_KEYS: [&str; 3] = ["Id", "task_id", "id"];

/// POST a JSON body with the provider's bearer credentials.
///
/// Non-2xx is an error; the body is captured for diagnostics but never
/// the credentials.
pub async fn post_json(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    url: &str,
    body: &Value,
) -> Result<Value, ProviderError> {
    let response = client
        .post(url)
        .bearer_auth(&provider.credentials)
        .json(body)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: truncate(&body, 512),
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|err| ProviderError::Malformed(err.to_string()))
}

/// Multipart upload to the provider's upload endpoint. The reply's URL
/// may sit at the root or under `data`.
pub async fn upload_multipart(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    bytes: Vec<u8>,
    filename: &str,
) -> Result<String, ProviderError> {
    let url = provider
        .upload_url()
        .ok_or(ProviderError::MissingEndpoint("upload"))?;
    let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
    let form = reqwest::multipart::Form::new().part("file", part);
    let response = client
        .post(&url)
        .bearer_auth(&provider.credentials)
        .multipart(form)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            status: status.as_u16(),
            body: truncate(&body, 512),
        });
    }
    let raw: Value = response
        .json()
        .await
        .map_err(|err| ProviderError::Malformed(err.to_string()))?;
    for scope in [&raw, raw.get("data").unwrap_or(&Value::Null)] {
        if let Some(url) = scope.get("url").and_then(Value::as_str) {
            return Ok(url.to_string());
        }
    }
    Err(ProviderError::Malformed(
        "upload response carries no url".to_string(),
    ))
}

/// POST-style poll that retries the id key variants until a parser
/// recognizes the reply. All variants unrecognized means the task is
/// still treated as running; the raw body is kept for the log.
pub async fn poll_with_id_keys(
    client: &reqwest::Client,
    provider: &ProviderConfig,
    provider_task_id: &str,
    parse: fn(&Value) -> Option<NormalizedEnvelope>,
) -> Result<(NormalizedEnvelope, Value), ProviderError> {
    let url = provider.poll_url();
    let mut last_raw = Value::Null;
    for key in POLL_ID_KEYS {
        let body = serde_json::json!({ key: provider_task_id });
        let raw = post_json(client, provider, &url, &body).await?;
        if let Some(envelope) = parse(&raw) {
            debug!(provider = %provider.name, id_key = key, "poll envelope recognized");
            return Ok((envelope, raw));
        }
        last_raw = raw;
    }
    warn!(
        provider = %provider.name,
        provider_task_id,
        "unrecognized poll envelope, treating as running"
    );
    Ok((NormalizedEnvelope::Running { progress: None }, last_raw))
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "日本語のエラー本文";
        let cut = truncate(text, 7);
        assert!(cut.len() <= 7);
        assert!(text.starts_with(&cut));
    }

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("short", 512), "short");
    }
}
