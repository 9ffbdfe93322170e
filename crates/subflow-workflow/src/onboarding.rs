//! Onboarding: welcome a subscriber whose segment is "New".

use chrono::Utc;
use serde_json::Value;
use subflow_core::error::{Result, SubflowError};
use subflow_core::types::{Fields, Subscriber, display_name, subscriber_id};
use subflow_rules::assign_tier;
use subflow_templates::personalize;

use crate::{NEW_SEGMENT, ONBOARDING_LOG, WorkflowEngine, WorkflowOutcome};

impl WorkflowEngine {
    /// Segment, tier, template, upsert by username, send, log.
    pub async fn onboard(&self, payload: &Fields) -> Result<WorkflowOutcome> {
        let segment = self.segment_of(payload)?;
        if segment != NEW_SEGMENT {
            tracing::info!(
                "⏭️ {} is not new (segment: {segment}), skipping onboarding",
                display_name(payload).unwrap_or("subscriber")
            );
            return Ok(WorkflowOutcome::Skipped { segment });
        }

        let tier = assign_tier(payload, self.config.tiers())?;
        let template = self.templates.load_template(&tier)?;
        let message = personalize(&template, payload);

        let subscriber = self.upsert_new(payload, &tier, &segment)?;
        tracing::info!("👋 Onboarding {} as {tier}", subscriber.username);
        self.deliver(
            &subscriber,
            Some(payload),
            "Welcome",
            None,
            &message,
            ONBOARDING_LOG,
        )
        .await?;

        Ok(WorkflowOutcome::Sent {
            subscriber_id: subscriber.id,
            message,
        })
    }

    /// Update the subscriber with the payload's username, or create one.
    fn upsert_new(&self, payload: &Fields, tier: &str, segment: &str) -> Result<Subscriber> {
        let username = display_name(payload).ok_or_else(|| SubflowError::InvalidField {
            field: "name".into(),
            reason: "new subscriber needs a name or username".into(),
        })?;
        let now = Utc::now();

        if let Some(existing) = self.store.find_by_username(username)? {
            let mut patch = Fields::new();
            patch.insert("tier".into(), Value::String(tier.to_string()));
            patch.insert("tags".into(), Value::String(segment.to_string()));
            patch.insert("last_active".into(), serde_json::json!(now));
            return self.store.update(&existing.id, &patch);
        }

        let id = subscriber_id(payload).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let email = payload.get("email").and_then(Value::as_str).unwrap_or("");
        let mut subscriber = Subscriber::new(&id, username, email);
        subscriber.phone = payload
            .get("phone")
            .and_then(Value::as_str)
            .map(str::to_string);
        subscriber.tier = tier.to_string();
        subscriber.tags = Some(segment.to_string());
        subscriber.last_active = Some(now);
        tracing::debug!("Creating subscriber {id} for {username}");
        self.store.insert(&subscriber)
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::Harness;
    use crate::*;
    use serde_json::json;
    use subflow_core::types::Fields;

    fn payload(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_onboard_new_subscriber() {
        let h = Harness::new();
        let outcome = h
            .engine()
            .onboard(&payload(json!({"name": "Ann", "days_subscribed": 0, "total_spend": 10})))
            .await
            .unwrap();
        assert_eq!(outcome.message(), Some("Welcome, Ann!"));

        let WorkflowOutcome::Sent { subscriber_id, .. } = outcome else {
            panic!("expected a send");
        };
        let stored = h.store.get(&subscriber_id).unwrap().unwrap();
        assert_eq!(stored.username, "Ann");
        assert_eq!(stored.tier, "Basic");
        assert_eq!(stored.tags.as_deref(), Some("New"));
        assert!(stored.last_active.is_some());

        let log = h.store.message_log(&subscriber_id).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, ONBOARDING_LOG);
        assert_eq!(h.messenger.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_high_spender_gets_premium_template() {
        let h = Harness::sqlite();
        let outcome = h
            .engine()
            .onboard(&payload(json!({"id": 3, "name": "Cy", "days_subscribed": 2, "total_spend": 150})))
            .await
            .unwrap();
        assert_eq!(outcome.message(), Some("VIP welcome, Cy"));
        assert_eq!(h.store.get("3").unwrap().unwrap().tier, "Ultra");
    }

    #[tokio::test]
    async fn test_non_new_subscriber_is_a_no_op() {
        let h = Harness::new();
        let outcome = h
            .engine()
            .onboard(&payload(json!({"id": "9", "name": "Dee", "days_subscribed": 30})))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WorkflowOutcome::Skipped {
                segment: "Unsegmented".into()
            }
        );
        assert!(h.store.message_log("9").unwrap().is_empty());
        assert!(h.store.get("9").unwrap().is_none());
        assert!(h.messenger.sent().is_empty());
    }

    #[tokio::test]
    async fn test_repeat_onboarding_updates_same_record() {
        let h = Harness::new();
        let engine = h.engine();
        let first = engine
            .onboard(&payload(json!({"name": "Eve", "days_subscribed": 1, "total_spend": 10})))
            .await
            .unwrap();
        let second = engine
            .onboard(&payload(json!({"name": "Eve", "days_subscribed": 3, "total_spend": 60})))
            .await
            .unwrap();

        let (WorkflowOutcome::Sent { subscriber_id: a, .. }, WorkflowOutcome::Sent { subscriber_id: b, .. }) =
            (first, second)
        else {
            panic!("expected two sends");
        };
        assert_eq!(a, b);
        assert_eq!(h.store.get(&a).unwrap().unwrap().tier, "VIP");
        assert_eq!(h.store.message_log(&a).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_send_writes_no_log() {
        let h = Harness::new().failing_for(&["Fay"]);
        let err = h
            .engine()
            .onboard(&payload(json!({"id": "6", "name": "Fay", "days_subscribed": 0})))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(h.store.message_log("6").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_template_propagates() {
        let h = Harness::new();
        std::fs::remove_file(
            h.dir
                .path()
                .join("templates")
                .join(subflow_templates::WELCOME_TEMPLATE),
        )
        .unwrap();
        let err = h
            .engine()
            .onboard(&payload(json!({"name": "Gus", "days_subscribed": 0})))
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(h.messenger.sent().is_empty());
    }
}
