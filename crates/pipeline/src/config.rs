//! Pipeline configuration loaded from environment variables.

use std::path::PathBuf;

/// Tunables shared by the dispatcher, poller and coordinator.
///
/// All fields have defaults suitable for local development; override
/// via environment variables in production.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory for generated result images.
    pub output_dir: PathBuf,
    /// Watermark overlay image.
    pub watermark_path: PathBuf,
    /// Watermark blend opacity, 0.0..=1.0.
    pub watermark_opacity: f32,
    /// Public URL prefix under which `output_dir` is served.
    pub public_base_url: String,
    /// Print service submission URL.
    pub print_submit_url: String,
    /// Print service API key.
    pub print_api_key: String,
    /// Public URL the print service posts logistics callbacks to.
    pub print_callback_url: String,
    /// Claim lease length for dispatch/poll workers, seconds.
    pub claim_lease_secs: i64,
    /// Transient dispatch failures tolerated before `dispatch_exhausted`.
    pub dispatch_max_retries: i32,
    /// Failed generations re-dispatched per order before `generation_failed`.
    pub generation_max_retries: i32,
    /// Print submissions attempted before the order parks in `print_failed`.
    pub print_max_attempts: i32,
    /// Mini-program platform API base, for notifications.
    pub notify_api_base: String,
    /// Mini-program app id; notifications are disabled when empty.
    pub notify_app_id: String,
    /// Mini-program app secret.
    pub notify_app_secret: String,
    /// Subscribe-message template ids keyed by purpose.
    pub notify_template_paid: String,
    pub notify_template_ready: String,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                      |
    /// |--------------------------|------------------------------|
    /// | `OUTPUT_DIR`             | `./data/outputs`             |
    /// | `WATERMARK_PATH`         | `./assets/watermark.png`     |
    /// | `WATERMARK_OPACITY`      | `0.25`                       |
    /// | `PUBLIC_BASE_URL`        | `http://localhost:3000/files`|
    /// | `PRINT_SUBMIT_URL`       | `` (submission disabled)     |
    /// | `PRINT_API_KEY`          | ``                           |
    /// | `PRINT_CALLBACK_URL`     | ``                           |
    /// | `CLAIM_LEASE_SECS`       | `60`                         |
    /// | `DISPATCH_MAX_RETRIES`   | `3`                          |
    /// | `GENERATION_MAX_RETRIES` | `2`                          |
    /// | `PRINT_MAX_ATTEMPTS`     | `5`                          |
    /// | `NOTIFY_API_BASE`        | `https://api.weixin.qq.com`  |
    /// | `NOTIFY_APP_ID`          | `` (notifications disabled)  |
    /// | `NOTIFY_APP_SECRET`      | ``                           |
    /// | `NOTIFY_TEMPLATE_PAID`   | ``                           |
    /// | `NOTIFY_TEMPLATE_READY`  | ``                           |
    pub fn from_env() -> Self {
        Self {
            output_dir: env_or("OUTPUT_DIR", "./data/outputs").into(),
            watermark_path: env_or("WATERMARK_PATH", "./assets/watermark.png").into(),
            watermark_opacity: env_or("WATERMARK_OPACITY", "0.25")
                .parse()
                .expect("WATERMARK_OPACITY must be a valid f32"),
            public_base_url: env_or("PUBLIC_BASE_URL", "http://localhost:3000/files"),
            print_submit_url: env_or("PRINT_SUBMIT_URL", ""),
            print_api_key: env_or("PRINT_API_KEY", ""),
            print_callback_url: env_or("PRINT_CALLBACK_URL", ""),
            claim_lease_secs: env_or("CLAIM_LEASE_SECS", "60")
                .parse()
                .expect("CLAIM_LEASE_SECS must be a valid i64"),
            dispatch_max_retries: env_or("DISPATCH_MAX_RETRIES", "3")
                .parse()
                .expect("DISPATCH_MAX_RETRIES must be a valid i32"),
            generation_max_retries: env_or("GENERATION_MAX_RETRIES", "2")
                .parse()
                .expect("GENERATION_MAX_RETRIES must be a valid i32"),
            print_max_attempts: env_or("PRINT_MAX_ATTEMPTS", "5")
                .parse()
                .expect("PRINT_MAX_ATTEMPTS must be a valid i32"),
            notify_api_base: env_or("NOTIFY_API_BASE", "https://api.weixin.qq.com"),
            notify_app_id: env_or("NOTIFY_APP_ID", ""),
            notify_app_secret: env_or("NOTIFY_APP_SECRET", ""),
            notify_template_paid: env_or("NOTIFY_TEMPLATE_PAID", ""),
            notify_template_ready: env_or("NOTIFY_TEMPLATE_READY", ""),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}
