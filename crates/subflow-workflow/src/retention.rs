//! Retention: win back subscribers whose segment is "At-Risk".

use chrono::{DateTime, Utc};
use subflow_core::error::Result;
use subflow_core::types::{Fields, Subscriber, display_name};
use subflow_templates::personalize;

use crate::{AT_RISK_SEGMENT, BatchReport, RETENTION_LOG, WorkflowEngine, WorkflowOutcome, tagged};

impl WorkflowEngine {
    /// Event-driven retention for one subscriber payload. The payload must
    /// identify a stored subscriber (by id or name).
    pub async fn retain(&self, payload: &Fields) -> Result<WorkflowOutcome> {
        let segment = self.segment_of(payload)?;
        if segment != AT_RISK_SEGMENT {
            tracing::info!(
                "⏭️ {} is not at risk (segment: {segment}), skipping retention",
                display_name(payload).unwrap_or("subscriber")
            );
            return Ok(WorkflowOutcome::Skipped { segment });
        }

        let template = self.templates.load_retention()?;
        let message = personalize(&template, payload);
        let id = self.resolve_id(payload)?;
        let subscriber = self.store.update(&id, &tagged(payload, &segment))?;
        self.deliver(
            &subscriber,
            Some(payload),
            "Retention",
            None,
            &message,
            RETENTION_LOG,
        )
        .await?;

        Ok(WorkflowOutcome::Sent {
            subscriber_id: subscriber.id,
            message,
        })
    }

    /// Nightly scan over active subscribers.
    pub async fn run_retention_scan(&self) -> Result<BatchReport> {
        self.run_retention_scan_at(Utc::now()).await
    }

    /// Scan with day counters derived at `now`. Subscribers already offered
    /// retention since their last activity are skipped, so reruns do not
    /// repeat the offer.
    pub async fn run_retention_scan_at(&self, now: DateTime<Utc>) -> Result<BatchReport> {
        let template = self.templates.load_retention()?;
        let candidates = self.store.active_subscribers()?;
        let mut report = BatchReport {
            scanned: candidates.len(),
            ..BatchReport::default()
        };
        tracing::info!("🔍 Retention scan over {} active subscribers", candidates.len());

        for subscriber in candidates {
            let record = subscriber.record_at(now);
            let segment = match self.segment_of(&record) {
                Ok(segment) => segment,
                Err(e) => {
                    report.fail(&subscriber.id, &e);
                    continue;
                }
            };
            if segment != AT_RISK_SEGMENT {
                report.skipped += 1;
                continue;
            }
            match self.logged_since_activity(&subscriber, RETENTION_LOG) {
                Ok(true) => {
                    report.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    report.fail(&subscriber.id, &e);
                    continue;
                }
            }
            let message = personalize(&template, &record);
            match self.retain_record(&subscriber, &segment, &message).await {
                Ok(()) => report.sent.push(subscriber.id),
                Err(e) => report.fail(&subscriber.id, &e),
            }
        }

        tracing::info!(
            "✅ Retention scan done: {} sent, {} skipped, {} failed",
            report.sent.len(),
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }

    async fn retain_record(&self, subscriber: &Subscriber, segment: &str, message: &str) -> Result<()> {
        let subscriber = self.store.update(&subscriber.id, &tagged(&Fields::new(), segment))?;
        self.deliver(&subscriber, None, "Retention", None, message, RETENTION_LOG)
            .await?;
        Ok(())
    }

}
