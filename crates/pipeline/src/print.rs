//! Print service submission and callback types.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use inkstone_db::models::order::Order;

#[derive(Debug, Error)]
pub enum PrintError {
    #[error("print submission not configured")]
    NotConfigured,
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("print service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("print reply carries no order id")]
    NoExternalId,
}

/// Exponential backoff before retry `attempt` (1-based): 2, 4, 8... secs.
pub fn backoff_secs(attempt: i32) -> u64 {
    1u64 << attempt.clamp(1, 10)
}

/// Submits orders to the external print service.
pub struct PrintGateway {
    client: reqwest::Client,
    submit_url: String,
    api_key: String,
    callback_url: String,
}

impl PrintGateway {
    pub fn new(
        client: reqwest::Client,
        submit_url: String,
        api_key: String,
        callback_url: String,
    ) -> Self {
        Self {
            client,
            submit_url,
            api_key,
            callback_url,
        }
    }

    /// Submit one order for printing. `image_url` must be externally
    /// fetchable. Returns the print service's external id.
    pub async fn submit(&self, order: &Order, image_url: &str) -> Result<String, PrintError> {
        if self.submit_url.is_empty() {
            return Err(PrintError::NotConfigured);
        }
        let body = serde_json::json!({
            "order_number": order.order_number,
            "product_code": order.product_code,
            "size_code": order.size_code,
            "image_url": image_url,
            "shipping": shipping_object(&order.shipping_address),
            "callback_url": self.callback_url,
        });
        let response = self
            .client
            .post(&self.submit_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PrintError::Status {
                status: status.as_u16(),
                body: body.chars().take(512).collect(),
            });
        }
        let raw: Value = response.json().await?;
        extract_external_id(&raw).ok_or_else(|| {
            warn!(order_number = %order.order_number, "print reply missing id");
            PrintError::NoExternalId
        })
    }
}

/// Flatten the stored shipping blob into the `{name, phone, address}`
/// object the print service expects. Orders created through the
/// mini-program may carry older key spellings; those map forward here.
fn shipping_object(stored: &Value) -> Value {
    let pick = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| stored.get(k).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    };
    serde_json::json!({
        "name": pick(&["name", "receiver_name", "receiver"]),
        "phone": pick(&["phone", "phone_number", "mobile"]),
        "address": pick(&["address", "full_address", "detail"]),
    })
}

fn extract_external_id(raw: &Value) -> Option<String> {
    for scope in [raw, raw.get("data").unwrap_or(&Value::Null)] {
        for key in ["order_id", "external_id", "id"] {
            match scope.get(key) {
                Some(Value::String(id)) if !id.is_empty() => return Some(id.clone()),
                Some(Value::Number(n)) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}

/// Webhook payload from the print service. Unknown extra fields are
/// ignored; only these four matter.
#[derive(Debug, Clone, Deserialize)]
pub struct PrintCallback {
    pub order_number: String,
    #[serde(default)]
    pub logistics_company: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl PrintCallback {
    /// The logistics blob persisted on the order.
    pub fn logistics_value(&self) -> Value {
        serde_json::json!({
            "logistics_company": self.logistics_company,
            "tracking_number": self.tracking_number,
            "status": self.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 4);
        assert_eq!(backoff_secs(5), 32);
        // Clamped so a corrupt counter cannot sleep for years.
        assert_eq!(backoff_secs(40), 1024);
    }

    #[test]
    fn external_id_found_at_root_or_under_data() {
        assert_eq!(
            extract_external_id(&json!({"order_id": "P-99"})),
            Some("P-99".into())
        );
        assert_eq!(
            extract_external_id(&json!({"data": {"id": 1234}})),
            Some("1234".into())
        );
        assert_eq!(extract_external_id(&json!({"ok": true})), None);
    }

    #[test]
    fn callback_tolerates_unknown_fields() {
        let payload = json!({
            "order_number": "PO20250101120000000001",
            "logistics_company": "SF",
            "tracking_number": "SF123",
            "status": "shipped",
            "warehouse": "SZ-1",
            "operator": 77
        });
        let cb: PrintCallback = serde_json::from_value(payload).unwrap();
        assert_eq!(cb.order_number, "PO20250101120000000001");
        assert_eq!(cb.logistics_value()["tracking_number"], "SF123");
    }

    #[test]
    fn callback_requires_order_number() {
        let payload = json!({"status": "shipped"});
        assert!(serde_json::from_value::<PrintCallback>(payload).is_err());
    }

    #[test]
    fn shipping_object_carries_name_phone_address() {
        let stored = json!({
            "name": "张三",
            "phone": "13800000000",
            "address": "广东省深圳市南山区 1 号"
        });
        assert_eq!(
            shipping_object(&stored),
            json!({
                "name": "张三",
                "phone": "13800000000",
                "address": "广东省深圳市南山区 1 号"
            })
        );
    }

    #[test]
    fn shipping_object_maps_legacy_key_spellings() {
        let stored = json!({
            "receiver_name": "李四",
            "mobile": "13911111111",
            "detail": "朝阳区 2 号"
        });
        let shipping = shipping_object(&stored);
        assert_eq!(shipping["name"], "李四");
        assert_eq!(shipping["phone"], "13911111111");
        assert_eq!(shipping["address"], "朝阳区 2 号");
    }

    #[test]
    fn shipping_object_defaults_missing_fields_to_empty() {
        let shipping = shipping_object(&json!({}));
        assert_eq!(shipping["name"], "");
        assert_eq!(shipping["phone"], "");
        assert_eq!(shipping["address"], "");
    }
}
