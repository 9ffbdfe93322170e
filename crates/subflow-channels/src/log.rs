//! Messenger that only logs. Never fails.

use async_trait::async_trait;
use chrono::Utc;
use subflow_core::error::Result;
use subflow_core::traits::Messenger;
use subflow_core::types::{OutboundMessage, Receipt};

#[derive(Debug, Default)]
pub struct LogMessenger;

impl LogMessenger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Messenger for LogMessenger {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<Receipt> {
        tracing::info!(
            "📨 [{}] to {}{}: {}",
            message.message_type,
            message.recipient,
            message
                .subject
                .as_deref()
                .map(|s| format!(" ({s})"))
                .unwrap_or_default(),
            message.body
        );
        if let Some(asset) = &message.asset_path {
            tracing::info!("📎 Attachment: {asset}");
        }
        Ok(Receipt {
            channel: "log".into(),
            recipient: message.recipient.clone(),
            reference: Some(uuid::Uuid::new_v4().to_string()),
            sent_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_messenger_acknowledges() {
        let messenger = LogMessenger::new();
        let receipt = messenger
            .send(&OutboundMessage {
                recipient: "ann@example.com".into(),
                message_type: "Welcome".into(),
                subject: None,
                body: "Hi Ann".into(),
                asset_path: None,
            })
            .await
            .unwrap();
        assert_eq!(receipt.channel, "log");
        assert_eq!(receipt.recipient, "ann@example.com");
        assert!(receipt.reference.is_some());
    }
}
