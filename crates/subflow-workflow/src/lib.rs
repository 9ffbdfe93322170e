//! # Subflow Workflow
//!
//! Lifecycle workflows over a single subscriber:
//!
//! ```text
//! classify ──► template ──► persist ──► send ──► log
//! ```
//!
//! - Onboarding: segment must be "New".
//! - Retention: segment must be "At-Risk". Also runs as a nightly scan.
//! - Churn: batch over subscribers inactive longer than the cutoff.
//! - Upgrade: tier recompute, persist, notify.
//!
//! A MessageLog entry is written only after the messenger accepted the send.
//! Interactive calls return the first error; batch runs collect failures per
//! subscriber in a [`BatchReport`] and keep going.

pub mod churn;
pub mod onboarding;
pub mod retention;
pub mod upgrade;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use subflow_core::config::WorkflowConfig;
use subflow_core::error::{Result, SubflowError};
use subflow_core::traits::{AssetProvider, Messenger, SubscriberStore};
use subflow_core::types::{
    Fields, MessageLog, OutboundMessage, Receipt, Subscriber, display_name, subscriber_id,
};
use subflow_rules::ConfigBundle;
use subflow_templates::TemplateStore;

pub const NEW_SEGMENT: &str = "New";
pub const AT_RISK_SEGMENT: &str = "At-Risk";

pub const ONBOARDING_LOG: &str = "Onboarding welcome sent";
pub const RETENTION_LOG: &str = "Retention offer sent";
pub const CHURN_LOG: &str = "Churn warning sent";
pub const UPGRADE_LOG: &str = "Upgrade notice sent";

/// Result of a single-subscriber workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    /// Message rendered, persisted, sent and logged.
    Sent {
        subscriber_id: String,
        message: String,
    },
    /// Precondition not met; nothing was written.
    Skipped { segment: String },
}

impl WorkflowOutcome {
    /// Rendered message text, if one was sent.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Sent { message, .. } => Some(message),
            Self::Skipped { .. } => None,
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent { .. })
    }
}

/// Per-subscriber failure inside a batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    pub subscriber_id: String,
    pub error: String,
}

/// Summary of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    /// Candidates examined.
    pub scanned: usize,
    /// Subscribers that received a message.
    pub sent: Vec<String>,
    /// Candidates the workflow did not apply to.
    pub skipped: usize,
    pub failed: Vec<RecordFailure>,
}

impl BatchReport {
    pub(crate) fn fail(&mut self, subscriber_id: &str, error: &SubflowError) {
        tracing::warn!("⚠️ Subscriber {subscriber_id} failed: {error}");
        self.failed.push(RecordFailure {
            subscriber_id: subscriber_id.to_string(),
            error: error.to_string(),
        });
    }
}

/// Workflow engine: rule engine + templates + store + messenger.
pub struct WorkflowEngine {
    store: Arc<dyn SubscriberStore>,
    config: ConfigBundle,
    templates: TemplateStore,
    messenger: Arc<dyn Messenger>,
    assets: Option<Arc<dyn AssetProvider>>,
    settings: WorkflowConfig,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn SubscriberStore>,
        config: ConfigBundle,
        templates: TemplateStore,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self {
            store,
            config,
            templates,
            messenger,
            assets: None,
            settings: WorkflowConfig::default(),
        }
    }

    pub fn with_settings(mut self, settings: WorkflowConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_assets(mut self, assets: Arc<dyn AssetProvider>) -> Self {
        self.assets = Some(assets);
        self
    }

    pub fn store(&self) -> &Arc<dyn SubscriberStore> {
        &self.store
    }

    pub fn config(&self) -> &ConfigBundle {
        &self.config
    }

    pub fn settings(&self) -> &WorkflowConfig {
        &self.settings
    }

    /// Re-read rules and tiers from their files.
    pub fn reload_config(&mut self) -> Result<()> {
        self.config.reload()?;
        tracing::info!("🔄 Rules and tiers reloaded");
        Ok(())
    }

    pub(crate) fn segment_of(&self, record: &Fields) -> Result<String> {
        Ok(self.config.rule_set().assign_segment(record)?.to_string())
    }

    /// Id carried by the payload, else the stored subscriber with the
    /// payload's name.
    pub(crate) fn resolve_id(&self, payload: &Fields) -> Result<String> {
        if let Some(id) = subscriber_id(payload) {
            return Ok(id);
        }
        let name = display_name(payload)
            .ok_or_else(|| SubflowError::NotFound("payload carries no id or name".into()))?;
        self.store
            .find_by_username(name)?
            .map(|s| s.id)
            .ok_or_else(|| SubflowError::NotFound(name.to_string()))
    }

    /// Best-effort asset path. Never fails the caller.
    pub(crate) async fn attachment(&self) -> Option<String> {
        if !self.settings.attach_assets {
            return None;
        }
        let provider = self.assets.as_ref()?;
        if let Err(e) = provider.trigger_generation("").await {
            tracing::warn!("⚠️ Asset generation failed, sending without attachment: {e}");
            return None;
        }
        match provider.latest_asset().await {
            Ok(Some(asset)) => asset.image_path,
            Ok(None) => {
                tracing::info!("No asset available, sending without attachment");
                None
            }
            Err(e) => {
                tracing::warn!("⚠️ Asset lookup failed, sending without attachment: {e}");
                None
            }
        }
    }

    /// Message addressed to `subscriber`, with an attachment when enabled.
    pub(crate) async fn outbound(
        &self,
        subscriber: &Subscriber,
        payload: Option<&Fields>,
        message_type: &str,
        subject: Option<String>,
        body: &str,
    ) -> OutboundMessage {
        OutboundMessage {
            recipient: recipient_for(subscriber, payload),
            message_type: message_type.to_string(),
            subject,
            body: body.to_string(),
            asset_path: self.attachment().await,
        }
    }

    pub(crate) fn log_sent(&self, subscriber: &Subscriber, log_message: &str) -> Result<()> {
        self.store
            .append_log(&MessageLog::now(&subscriber.id, log_message))
    }

    /// A `log_message` entry exists for `subscriber` newer than their last
    /// activity (any entry at all if they were never active).
    pub(crate) fn logged_since_activity(
        &self,
        subscriber: &Subscriber,
        log_message: &str,
    ) -> Result<bool> {
        let since = subscriber.last_active;
        Ok(self
            .store
            .message_log(&subscriber.id)?
            .iter()
            .any(|entry| entry.message == log_message && since.is_none_or(|t| entry.sent_at > t)))
    }

    /// Send one message, then log it. Nothing is logged if the send fails.
    pub(crate) async fn deliver(
        &self,
        subscriber: &Subscriber,
        payload: Option<&Fields>,
        message_type: &str,
        subject: Option<String>,
        body: &str,
        log_message: &str,
    ) -> Result<Receipt> {
        let outbound = self
            .outbound(subscriber, payload, message_type, subject, body)
            .await;
        let receipt = self.messenger.send(&outbound).await?;
        self.log_sent(subscriber, log_message)?;
        tracing::info!(
            "✉️ {message_type} sent to {} via {}",
            outbound.recipient,
            self.messenger.name()
        );
        Ok(receipt)
    }
}

/// Email, then username, then the payload's name, then the id.
fn recipient_for(subscriber: &Subscriber, payload: Option<&Fields>) -> String {
    let stored = subscriber.recipient();
    if !stored.is_empty() {
        return stored.to_string();
    }
    payload
        .and_then(display_name)
        .map(str::to_string)
        .unwrap_or_else(|| subscriber.id.clone())
}

/// Copy of `payload` with the segment written to `tags`.
pub(crate) fn tagged(payload: &Fields, segment: &str) -> Fields {
    let mut record = payload.clone();
    record.insert("tags".into(), Value::String(segment.to_string()));
    record
}
