//! HTTP delivery service messenger.
//!
//! POSTs `{username, message_type, message, subject, asset_path}` as JSON.
//! Any transport error or non-2xx answer is a delivery failure.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use subflow_core::error::{Result, SubflowError};
use subflow_core::traits::Messenger;
use subflow_core::types::{OutboundMessage, Receipt};

pub struct WebhookMessenger {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookMessenger {
    pub fn new(url: &str, timeout_secs: u64) -> Self {
        Self {
            url: url.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Messenger for WebhookMessenger {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<Receipt> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "username": message.recipient,
                "message_type": message.message_type,
                "message": message.body,
                "subject": message.subject,
                "asset_path": message.asset_path,
            }))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SubflowError::Delivery(format!("Webhook send failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SubflowError::Delivery(format!(
                "Webhook error {status}: {body}"
            )));
        }

        // Reference is whatever id the service hands back, if any.
        let reference = resp
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| {
                v.get("id")
                    .or_else(|| v.get("message_id"))
                    .map(|id| match id {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
            });
        tracing::info!("✅ {} message delivered to {}", message.message_type, message.recipient);
        Ok(Receipt {
            channel: "webhook".into(),
            recipient: message.recipient.clone(),
            reference,
            sent_at: Utc::now(),
        })
    }
}
