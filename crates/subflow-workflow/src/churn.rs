//! Churn: warn subscribers inactive past the cutoff and mark them inactive.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use subflow_core::error::{Result, SubflowError};
use subflow_core::types::{Fields, Subscriber};
use subflow_templates::personalize;

use crate::{BatchReport, CHURN_LOG, WorkflowEngine};

impl WorkflowEngine {
    pub async fn run_churn(&self) -> Result<BatchReport> {
        self.run_churn_at(Utc::now()).await
    }

    /// Batch over active subscribers whose last activity is older than
    /// `churn_inactive_days` before `now`. Per subscriber: send, log,
    /// deactivate. A failed send leaves the subscriber active and unlogged for
    /// the next run. A subscriber already warned since their last activity is
    /// only deactivated, never warned twice.
    pub async fn run_churn_at(&self, now: DateTime<Utc>) -> Result<BatchReport> {
        let cutoff = churn_cutoff(now, self.settings.churn_inactive_days)?;
        let template = self.templates.load_churn_warning()?;
        let candidates = self.store.stale_subscribers(cutoff)?;
        let mut report = BatchReport {
            scanned: candidates.len(),
            ..BatchReport::default()
        };
        tracing::info!(
            "📉 Churn check: {} subscribers inactive since before {}",
            candidates.len(),
            cutoff.format("%Y-%m-%d")
        );

        for subscriber in candidates {
            match self.logged_since_activity(&subscriber, CHURN_LOG) {
                Ok(true) => {
                    tracing::info!(
                        "↩️ {} already warned, finishing deactivation",
                        subscriber.username
                    );
                    match self.deactivate(&subscriber) {
                        Ok(()) => report.skipped += 1,
                        Err(e) => report.fail(&subscriber.id, &e),
                    }
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    report.fail(&subscriber.id, &e);
                    continue;
                }
            }
            let message = personalize(&template, &subscriber.record_at(now));
            match self.churn_one(&subscriber, &message).await {
                Ok(()) => report.sent.push(subscriber.id),
                Err(e) => report.fail(&subscriber.id, &e),
            }
        }

        tracing::info!(
            "✅ Churn check done: {} warned, {} skipped, {} failed",
            report.sent.len(),
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    async fn churn_one(&self, subscriber: &Subscriber, message: &str) -> Result<()> {
        self.deliver(
            subscriber,
            None,
            "ChurnWarning",
            Some(self.settings.churn_subject.clone()),
            message,
            CHURN_LOG,
        )
        .await?;
        self.deactivate(subscriber)
    }

    fn deactivate(&self, subscriber: &Subscriber) -> Result<()> {
        let mut patch = Fields::new();
        patch.insert("is_active".into(), Value::Bool(false));
        self.store.update(&subscriber.id, &patch)?;
        tracing::info!("📭 {} marked inactive", subscriber.username);
        Ok(())
    }
}

/// `now` minus the configured inactivity window.
fn churn_cutoff(now: DateTime<Utc>, inactive_days: i64) -> Result<DateTime<Utc>> {
    if inactive_days < 0 {
        return Err(SubflowError::Config(format!(
            "churn_inactive_days must not be negative, got {inactive_days}"
        )));
    }
    Duration::try_days(inactive_days)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| {
            SubflowError::Config(format!(
                "churn_inactive_days {inactive_days} is out of range"
            ))
        })
}

#[cfg(test)]
mod tests {
    use crate::testutil::Harness;
    use crate::*;
    use chrono::{Duration, Utc};
    use subflow_core::config::WorkflowConfig;
    use subflow_core::types::{MessageLog, Subscriber};

    fn seed(h: &Harness, subs: &[(&str, &str, i64)]) {
        let now = Utc::now();
        for (id, name, idle) in subs {
            let mut sub = Subscriber::new(id, name, &format!("{name}@example.com"));
            sub.last_active = Some(now - Duration::days(*idle));
            h.store.insert(&sub).unwrap();
        }
    }

    #[tokio::test]
    async fn test_only_long_inactive_subscribers_churn() {
        for h in [Harness::new(), Harness::sqlite()] {
            seed(&h, &[("1", "old", 40), ("2", "recent", 5)]);
            let report = h.engine().run_churn().await.unwrap();

            assert_eq!(report.scanned, 1);
            assert_eq!(report.sent, vec!["1".to_string()]);
            assert!(!h.store.get("1").unwrap().unwrap().is_active);
            assert!(h.store.get("2").unwrap().unwrap().is_active);
            assert_eq!(h.store.message_log("1").unwrap().len(), 1);
            assert!(h.store.message_log("2").unwrap().is_empty());

            let sent = h.messenger.sent();
            assert_eq!(sent.len(), 1);
            assert_eq!(sent[0].recipient, "old@example.com");
            assert_eq!(sent[0].body, "Still there, old?");
            assert_eq!(sent[0].subject.as_deref(), Some("We're sorry to see you go"));
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_batch() {
        let h = Harness::sqlite().failing_for(&["b@example.com"]);
        seed(&h, &[("1", "a", 31), ("2", "b", 45), ("3", "c", 90)]);
        let report = h.engine().run_churn().await.unwrap();

        assert_eq!(report.scanned, 3);
        assert_eq!(report.sent, vec!["1".to_string(), "3".to_string()]);
        assert_eq!(report.failed[0].subscriber_id, "2");
        // Failed subscriber stays active and unlogged.
        assert!(h.store.get("2").unwrap().unwrap().is_active);
        assert!(h.store.message_log("2").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_run_is_finished_without_resending() {
        for h in [Harness::new(), Harness::sqlite()] {
            seed(&h, &[("1", "old", 40)]);
            // Warning went out and was logged, deactivation never happened.
            h.store.append_log(&MessageLog::now("1", CHURN_LOG)).unwrap();

            let report = h.engine().run_churn().await.unwrap();
            assert!(report.sent.is_empty());
            assert_eq!(report.skipped, 1);
            assert!(h.messenger.sent().is_empty());
            assert!(!h.store.get("1").unwrap().unwrap().is_active);
            assert_eq!(h.store.message_log("1").unwrap().len(), 1);
        }
    }

    #[tokio::test]
    async fn test_unusable_inactivity_window_is_config_error() {
        for days in [-1, i64::MAX] {
            let h = Harness::sqlite();
            seed(&h, &[("1", "old", 40)]);
            let settings = WorkflowConfig {
                churn_inactive_days: days,
                ..WorkflowConfig::default()
            };
            let err = h
                .engine()
                .with_settings(settings)
                .run_churn()
                .await
                .unwrap_err();
            assert!(err.is_configuration(), "{days}: {err:?}");
            assert!(h.messenger.sent().is_empty());
        }
    }

    #[tokio::test]
    async fn test_rerun_does_not_warn_twice() {
        let h = Harness::new();
        seed(&h, &[("1", "old", 40)]);
        let engine = h.engine();
        engine.run_churn().await.unwrap();
        let second = engine.run_churn().await.unwrap();
        assert_eq!(second.scanned, 0);
        assert_eq!(h.messenger.sent().len(), 1);
    }
}
