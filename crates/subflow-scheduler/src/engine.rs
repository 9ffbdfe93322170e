//! Batch scheduler: fires the retention and churn scans on their cron
//! schedules. Uses tokio::interval for ticking (sleeps between checks).
//! Holds no subscriber state; each job runs against the workflow engine.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use subflow_core::config::ScheduleConfig;
use subflow_core::error::{Result, SubflowError};
use subflow_workflow::{BatchReport, WorkflowEngine};
use tokio::sync::Mutex;

use crate::cron::CronSchedule;

/// Periodic batch workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchJob {
    /// Nightly retention scan.
    Retention,
    /// Weekly churn check.
    Churn,
}

impl fmt::Display for BatchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retention => write!(f, "retention"),
            Self::Churn => write!(f, "churn"),
        }
    }
}

impl BatchJob {
    pub async fn run(self, engine: &WorkflowEngine, now: DateTime<Utc>) -> Result<BatchReport> {
        match self {
            Self::Retention => engine.run_retention_scan_at(now).await,
            Self::Churn => engine.run_churn_at(now).await,
        }
    }
}

/// A job with its schedule and run bookkeeping.
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub job: BatchJob,
    pub schedule: CronSchedule,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub run_count: u32,
}

/// Cron trigger for the batch jobs.
pub struct BatchScheduler {
    jobs: Vec<ScheduledJob>,
}

impl BatchScheduler {
    /// Build from config; next runs are computed from `now`.
    pub fn new(config: &ScheduleConfig, now: DateTime<Utc>) -> Result<Self> {
        let scheduled = |job: BatchJob, expression: &str| -> Result<ScheduledJob> {
            let schedule = CronSchedule::parse(expression).ok_or_else(|| {
                SubflowError::Config(format!("Invalid {job} schedule '{expression}'"))
            })?;
            let next_run = schedule.next_after(now).ok_or_else(|| {
                SubflowError::Config(format!("{job} schedule '{expression}' never fires"))
            })?;
            Ok(ScheduledJob {
                job,
                next_run: Some(next_run),
                schedule,
                last_run: None,
                run_count: 0,
            })
        };
        Ok(Self {
            jobs: vec![
                scheduled(BatchJob::Retention, &config.retention_cron)?,
                scheduled(BatchJob::Churn, &config.churn_cron)?,
            ],
        })
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Jobs due at `now`, in declaration order. Each due job is rescheduled
    /// to its next slot after `now`, so a missed window fires once, not once
    /// per missed slot.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<BatchJob> {
        let mut due = Vec::new();
        for entry in self.jobs.iter_mut() {
            if !entry.next_run.is_some_and(|next| next <= now) {
                continue;
            }
            tracing::info!("🔔 Batch job triggered: {}", entry.job);
            entry.last_run = Some(now);
            entry.run_count += 1;
            entry.next_run = entry.schedule.next_after(now);
            due.push(entry.job);
        }
        due
    }
}

/// Run whatever is due at `now`, one job at a time. A failing job is logged
/// and does not stop the others.
pub async fn run_due(
    scheduler: &Mutex<BatchScheduler>,
    engine: &WorkflowEngine,
    now: DateTime<Utc>,
) -> Vec<(BatchJob, Result<BatchReport>)> {
    let due = scheduler.lock().await.tick(now);
    let mut results = Vec::with_capacity(due.len());
    for job in due {
        let result = job.run(engine, now).await;
        match &result {
            Ok(report) => tracing::info!(
                "✅ {job} job: {} scanned, {} sent, {} failed",
                report.scanned,
                report.sent.len(),
                report.failed.len()
            ),
            Err(e) => tracing::error!("❌ {job} job failed: {e}"),
        }
        results.push((job, result));
    }
    results
}

/// Scheduler loop. Runs until the surrounding task is dropped or aborted.
pub async fn spawn_scheduler(
    scheduler: Arc<Mutex<BatchScheduler>>,
    engine: Arc<WorkflowEngine>,
    check_interval_secs: u64,
) {
    tracing::info!(
        "⏰ Scheduler started (check every {}s)",
        check_interval_secs
    );
    {
        let sched = scheduler.lock().await;
        for entry in sched.jobs() {
            tracing::info!(
                "📅 {} job '{}' next run: {}",
                entry.job,
                entry.schedule.expression(),
                entry
                    .next_run
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into())
            );
        }
    }

    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(check_interval_secs.max(1)));
    loop {
        interval.tick().await;
        run_due(&scheduler, &engine, Utc::now()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn monday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 23, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_default_schedules() {
        let sched = BatchScheduler::new(&ScheduleConfig::default(), monday_noon()).unwrap();
        let jobs = sched.jobs();
        assert_eq!(jobs[0].job, BatchJob::Retention);
        assert_eq!(
            jobs[0].next_run,
            Some(Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 0).unwrap())
        );
        assert_eq!(jobs[1].job, BatchJob::Churn);
        assert_eq!(
            jobs[1].next_run,
            Some(Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_invalid_schedule_is_config_error() {
        let config = ScheduleConfig {
            churn_cron: "every monday".into(),
            ..ScheduleConfig::default()
        };
        let err = BatchScheduler::new(&config, monday_noon()).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_weekday_list_out_of_range_is_config_error() {
        let config = ScheduleConfig {
            churn_cron: "0 1 * * 8,9".into(),
            ..ScheduleConfig::default()
        };
        let err = BatchScheduler::new(&config, monday_noon()).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_tick_fires_once_and_reschedules() {
        let start = monday_noon();
        let mut sched = BatchScheduler::new(&ScheduleConfig::default(), start).unwrap();
        assert!(sched.tick(start + Duration::hours(1)).is_empty());

        let midnight = Utc.with_ymd_and_hms(2026, 2, 24, 0, 0, 30).unwrap();
        assert_eq!(sched.tick(midnight), vec![BatchJob::Retention]);
        assert!(sched.tick(midnight + Duration::minutes(1)).is_empty());
        assert_eq!(sched.jobs()[0].run_count, 1);

        // Oversleeping a whole week fires each job once.
        let late = Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap();
        assert_eq!(sched.tick(late), vec![BatchJob::Retention, BatchJob::Churn]);
    }

    #[tokio::test]
    async fn test_run_due_executes_both_jobs() {
        let (_dir, engine) = crate::testutil::engine();
        let start = monday_noon();
        let scheduler = Mutex::new(BatchScheduler::new(&ScheduleConfig::default(), start).unwrap());

        assert!(run_due(&scheduler, &engine, start).await.is_empty());

        let late = start + Duration::days(8);
        let results = run_due(&scheduler, &engine, late).await;
        let jobs: Vec<_> = results.iter().map(|(job, _)| *job).collect();
        assert_eq!(jobs, vec![BatchJob::Retention, BatchJob::Churn]);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
    }
}
