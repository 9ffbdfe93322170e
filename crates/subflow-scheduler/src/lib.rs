//! # Subflow Scheduler
//!
//! Two ways work reaches the workflows:
//!
//! ```text
//! Event feed (JSON list) ──► EventRouter ──► in order, one at a time
//!   ├── new / new_subscription ──► onboarding
//!   ├── inactive / inactivity  ──► retention
//!   ├── upgrade                ──► tier recompute + notice
//!   └── churn_check            ──► churn batch
//!
//! BatchScheduler (tokio interval)
//!   ├── retention_cron "0 0 * * *" ──► retention scan
//!   └── churn_cron     "0 1 * * 1" ──► churn batch
//! ```

pub mod cron;
pub mod engine;
pub mod router;

#[cfg(test)]
mod testutil;

pub use cron::{CronSchedule, next_run_from_cron};
pub use engine::{BatchJob, BatchScheduler, ScheduledJob, run_due, spawn_scheduler};
pub use router::{Dispatch, EventRouter, RoutedEvent, RunReport, load_events, parse_events};
