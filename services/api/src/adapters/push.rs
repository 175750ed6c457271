//! services/api/src/adapters/push.rs
//!
//! Adapters for the `NotificationService` port.

use async_trait::async_trait;
use reading_log_core::domain::PushMessage;
use reading_log_core::ports::{NotificationService, PortError, PortResult};
use serde_json::json;
use tracing::info;

use crate::config::PushConfig;

//=========================================================================================
// HTTP Push Gateway
//=========================================================================================

/// Delivers notifications by POSTing them to a push gateway as JSON.
#[derive(Clone)]
pub struct HttpPushAdapter {
    client: reqwest::Client,
    config: PushConfig,
}

impl HttpPushAdapter {
    pub fn new(client: reqwest::Client, config: PushConfig) -> Self {
        Self { client, config }
    }

    /// Builds the adapter with a client whose requests give up after
    /// `config.timeout`.
    pub fn from_config(config: PushConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()?;
        Ok(Self::new(client, config))
    }
}

#[async_trait]
impl NotificationService for HttpPushAdapter {
    async fn send(&self, message: &PushMessage) -> PortResult<()> {
        let body = json!({
            "to": message.token,
            "notification": {
                "title": message.title,
                "body": message.body,
            },
            "data": message.data,
        });

        let response = self
            .client
            .post(&self.config.endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("key={}", self.config.server_key),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("Push request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "Push gateway returned {status}: {text}"
            )));
        }
        Ok(())
    }
}

//=========================================================================================
// Log-only Fallback
//=========================================================================================

/// Used when no push gateway is configured: messages are logged and dropped.
#[derive(Clone, Copy, Default)]
pub struct LogOnlyPushAdapter;

#[async_trait]
impl NotificationService for LogOnlyPushAdapter {
    async fn send(&self, message: &PushMessage) -> PortResult<()> {
        info!(title = %message.title, body = %message.body, "Push delivery disabled, dropping notification");
        Ok(())
    }
}
