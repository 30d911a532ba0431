//! Provider configuration model.

use inkstone_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `provider_configs` table.
///
/// `credentials` is skipped during serialization so it can never leak
/// through an API response or a debug dump of a response body.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProviderConfig {
    pub id: DbId,
    pub name: String,
    /// Free-form tag selecting the adapter (`nano_banana`, `gemini`, ...).
    pub api_kind: String,
    pub host: String,
    pub submit_endpoint: String,
    pub poll_endpoint: String,
    pub upload_endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub credentials: String,
    pub is_active: bool,
    pub is_default: bool,
    /// When true, the submit response already carries the final image.
    pub is_sync: bool,
    pub priority: i32,
    pub model_name: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ProviderConfig {
    /// Full submit URL (endpoint may already be absolute).
    pub fn submit_url(&self) -> String {
        join_url(&self.host, &self.submit_endpoint)
    }

    /// Full poll URL.
    pub fn poll_url(&self) -> String {
        join_url(&self.host, &self.poll_endpoint)
    }

    /// Full upload URL, when the provider has one.
    pub fn upload_url(&self) -> Option<String> {
        self.upload_endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(|e| join_url(&self.host, e))
    }
}

fn join_url(host: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http") {
        endpoint.to_string()
    } else {
        format!("{}{}", host.trim_end_matches('/'), endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::join_url;

    #[test]
    fn relative_endpoint_joins_host() {
        assert_eq!(
            join_url("https://api.example.com/", "/v1/draw"),
            "https://api.example.com/v1/draw"
        );
    }

    #[test]
    fn absolute_endpoint_wins() {
        assert_eq!(
            join_url("https://api.example.com", "https://other/v1/draw"),
            "https://other/v1/draw"
        );
    }
}
