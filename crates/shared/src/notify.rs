use std::future::Future;
use std::pin::Pin;

use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("push delivery failed transiently: {0}")]
    Transient(String),
    #[error("push delivery rejected: {0}")]
    Permanent(String),
}

/// Outbound message capability. Both the webhook path and the reminder sweep
/// push through this; delivery order per user follows call order.
pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, user_id: &'a str, message: &'a str) -> NotifyFuture<'a>;
}

#[derive(Debug, Clone)]
pub struct LineNotifierConfig {
    pub push_url: String,
    pub channel_access_token: String,
}

#[derive(Clone)]
pub struct LineNotifier {
    client: reqwest::Client,
    config: LineNotifierConfig,
}

impl LineNotifier {
    pub fn new(config: LineNotifierConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

impl Notifier for LineNotifier {
    fn notify<'a>(&'a self, user_id: &'a str, message: &'a str) -> NotifyFuture<'a> {
        Box::pin(async move {
            let body = json!({
                "to": user_id,
                "messages": [{ "type": "text", "text": message }],
            });

            let response = self
                .client
                .post(&self.config.push_url)
                .bearer_auth(&self.config.channel_access_token)
                .json(&body)
                .send()
                .await
                .map_err(|err| {
                    warn!("push request did not reach the messaging endpoint: {err}");
                    NotifyError::Transient(err.to_string())
                })?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            let detail = response.text().await.unwrap_or_default();
            if status.is_server_error() || status.as_u16() == 429 {
                warn!(%status, "push delivery failed transiently: {detail}");
                Err(NotifyError::Transient(format!("{status}: {detail}")))
            } else {
                error!(%status, "push delivery rejected: {detail}");
                Err(NotifyError::Permanent(format!("{status}: {detail}")))
            }
        })
    }
}
