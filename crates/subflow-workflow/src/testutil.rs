//! Test doubles and a scratch workspace for the workflow tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use subflow_core::error::{Result, SubflowError};
use subflow_core::traits::{AssetProvider, Messenger, SubscriberStore};
use subflow_core::types::{Asset, OutboundMessage, Receipt, SegmentRule, TierDefinition};
use subflow_rules::ConfigBundle;
use subflow_store::{DocumentStore, SqliteStore};
use subflow_templates::{
    CHURN_TEMPLATE, PREMIUM_WELCOME_TEMPLATE, RETENTION_TEMPLATE, TemplateStore, WELCOME_TEMPLATE,
};

use crate::WorkflowEngine;

/// Records every message; fails for the listed recipients.
#[derive(Default)]
pub struct RecordingMessenger {
    pub sent: Mutex<Vec<OutboundMessage>>,
    pub fail_for: Vec<String>,
}

impl RecordingMessenger {
    pub fn failing_for(recipients: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_for: recipients.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<Receipt> {
        if self.fail_for.contains(&message.recipient) {
            return Err(SubflowError::Delivery(format!(
                "refused {}",
                message.recipient
            )));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(Receipt {
            channel: "recording".into(),
            recipient: message.recipient.clone(),
            reference: None,
            sent_at: Utc::now(),
        })
    }
}

/// Asset provider returning a fixed asset, or failing.
pub struct StaticAssets {
    image: Option<String>,
    fail: bool,
}

impl StaticAssets {
    pub fn with_image(path: &str) -> Self {
        Self {
            image: Some(path.to_string()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            image: None,
            fail: true,
        }
    }
}

#[async_trait]
impl AssetProvider for StaticAssets {
    async fn trigger_generation(&self, _prompt_set: &str) -> Result<serde_json::Value> {
        if self.fail {
            return Err(SubflowError::Delivery("generator offline".into()));
        }
        Ok(serde_json::json!({"status": "ok"}))
    }

    async fn latest_asset(&self) -> Result<Option<Asset>> {
        Ok(self.image.as_ref().map(|p| Asset {
            image_path: Some(p.clone()),
            extra: Default::default(),
        }))
    }
}

/// Temp templates + store + recording messenger.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub store: Arc<dyn SubscriberStore>,
    pub messenger: Arc<RecordingMessenger>,
}

impl Harness {
    /// Document backend.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::new(
            &dir.path().join("subscribers_db.json"),
            &dir.path().join("message_log.jsonl"),
        );
        Self::with_store(dir, Arc::new(store))
    }

    /// Relational backend.
    pub fn sqlite() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        Self::with_store(dir, Arc::new(store))
    }

    fn with_store(dir: tempfile::TempDir, store: Arc<dyn SubscriberStore>) -> Self {
        store.init().unwrap();
        let templates = dir.path().join("templates");
        std::fs::create_dir_all(&templates).unwrap();
        for (name, body) in [
            (WELCOME_TEMPLATE, "Welcome, {{subscriber_name}}!"),
            (PREMIUM_WELCOME_TEMPLATE, "VIP welcome, {{subscriber_name}}"),
            (RETENTION_TEMPLATE, "We miss you, {{subscriber_name}}"),
            (CHURN_TEMPLATE, "Still there, {{subscriber_name}}?"),
        ] {
            std::fs::write(templates.join(name), body).unwrap();
        }
        Self {
            dir,
            store,
            messenger: Arc::new(RecordingMessenger::default()),
        }
    }

    pub fn failing_for(mut self, recipients: &[&str]) -> Self {
        self.messenger = Arc::new(RecordingMessenger::failing_for(recipients));
        self
    }

    pub fn engine(&self) -> WorkflowEngine {
        let config = ConfigBundle::from_parts(
            vec![
                SegmentRule::new("New", &[("days_subscribed", "<7")]),
                SegmentRule::new("At-Risk", &[("no_activity_days", ">14")]),
            ],
            vec![
                TierDefinition::named("Basic"),
                TierDefinition::named("VIP"),
                TierDefinition::named("Ultra"),
            ],
        )
        .unwrap();
        WorkflowEngine::new(
            self.store.clone(),
            config,
            TemplateStore::new(&self.dir.path().join("templates")),
            self.messenger.clone(),
        )
    }
}
