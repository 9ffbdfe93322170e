//! Upgrade: recompute the tier from the payload and announce it. Not a
//! segment transition, so no segment precondition.

use serde_json::Value;
use subflow_core::error::Result;
use subflow_core::types::Fields;
use subflow_rules::assign_tier;
use subflow_templates::personalize;

use crate::{UPGRADE_LOG, WorkflowEngine, WorkflowOutcome};

impl WorkflowEngine {
    pub async fn upgrade(&self, payload: &Fields) -> Result<WorkflowOutcome> {
        let id = self.resolve_id(payload)?;
        let tier = assign_tier(payload, self.config.tiers())?;
        let template = self.templates.load_template(&tier)?;
        let message = personalize(&template, payload);

        let mut patch = Fields::new();
        patch.insert("tier".into(), Value::String(tier.clone()));
        let subscriber = self.store.update(&id, &patch)?;
        tracing::info!("⬆️ Subscriber {id} now {tier}");

        self.deliver(
            &subscriber,
            Some(payload),
            "Upgrade",
            Some(format!("Welcome to {tier}")),
            &message,
            UPGRADE_LOG,
        )
        .await?;

        Ok(WorkflowOutcome::Sent {
            subscriber_id: subscriber.id,
            message,
        })
    }
}
