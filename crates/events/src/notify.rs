//! Mini-program subscribe-message delivery with exponential-backoff
//! retry.
//!
//! Notifications are best-effort: the order tables are the source of
//! truth, so a delivery that exhausts its retries is logged and
//! dropped, never resurfaced as an order failure.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The user declined this message category; not worth retrying.
const ERRCODE_USER_REFUSED: i64 = 43101;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("token endpoint returned no access_token")]
    NoAccessToken,

    #[error("message API returned errcode {0}")]
    ErrCode(i64),
}

/// Sends subscribe messages through the mini-program platform API.
pub struct SubscribeMessageSender {
    client: reqwest::Client,
    api_base: String,
    app_id: String,
    app_secret: String,
}

impl SubscribeMessageSender {
    pub fn new(api_base: String, app_id: String, app_secret: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base,
            app_id,
            app_secret,
        }
    }

    /// Deliver one subscribe message, retrying transient failures.
    ///
    /// A refusal by the user (they opted out of the category) counts as
    /// delivered.
    pub async fn send(
        &self,
        openid: &str,
        template_id: &str,
        data: &Value,
    ) -> Result<(), NotifyError> {
        let mut last_err: Option<NotifyError> = None;

        for delay_secs in RETRY_DELAYS_SECS {
            match self.try_send(openid, template_id, data).await {
                Ok(()) => return Ok(()),
                Err(NotifyError::ErrCode(code)) if code == ERRCODE_USER_REFUSED => {
                    warn!(openid, template_id, "user opted out of this message");
                    return Ok(());
                }
                Err(err) => {
                    warn!(openid, template_id, error = %err, "delivery attempt failed, retrying");
                    last_err = Some(err);
                    tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                }
            }
        }

        match self.try_send(openid, template_id, data).await {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::error!(openid, template_id, error = %err, "delivery failed after all retries");
                Err(last_err.unwrap_or(err))
            }
        }
    }

    async fn try_send(
        &self,
        openid: &str,
        template_id: &str,
        data: &Value,
    ) -> Result<(), NotifyError> {
        let token = self.fetch_access_token().await?;
        let url = format!(
            "{}/cgi-bin/message/subscribe/send?access_token={token}",
            self.api_base.trim_end_matches('/')
        );
        let body = serde_json::json!({
            "touser": openid,
            "template_id": template_id,
            "data": data,
        });
        let reply: Value = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        match reply.get("errcode").and_then(Value::as_i64).unwrap_or(0) {
            0 => Ok(()),
            code => Err(NotifyError::ErrCode(code)),
        }
    }

    async fn fetch_access_token(&self) -> Result<String, NotifyError> {
        let url = format!(
            "{}/cgi-bin/token?grant_type=client_credential&appid={}&secret={}",
            self.api_base.trim_end_matches('/'),
            self.app_id,
            self.app_secret
        );
        let reply: Value = self.client.get(&url).send().await?.json().await?;
        reply
            .get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(NotifyError::NoAccessToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errcode_display() {
        assert_eq!(
            NotifyError::ErrCode(40003).to_string(),
            "message API returned errcode 40003"
        );
    }

    #[test]
    fn new_does_not_panic() {
        let _sender = SubscribeMessageSender::new(
            "https://api.weixin.qq.com".into(),
            "wx0000".into(),
            "secret".into(),
        );
    }
}
