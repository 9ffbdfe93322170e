//! Event router: reads the lifecycle event feed and dispatches each event
//! to its workflow, strictly in feed order, one at a time.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use subflow_core::error::{Result, SubflowError};
use subflow_core::types::LifecycleEvent;
use subflow_workflow::{BatchReport, WorkflowEngine, WorkflowOutcome};

/// What an event turned into.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dispatch {
    Workflow { outcome: WorkflowOutcome },
    Batch { report: BatchReport },
    /// Same idempotency key already handled in this run.
    Duplicate { key: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedEvent {
    pub index: usize,
    pub tag: &'static str,
    pub dispatch: Dispatch,
}

/// Everything a run did, in feed order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub events: Vec<RoutedEvent>,
}

impl RunReport {
    pub fn sent(&self) -> usize {
        self.events
            .iter()
            .map(|e| match &e.dispatch {
                Dispatch::Workflow { outcome } => usize::from(outcome.is_sent()),
                Dispatch::Batch { report } => report.sent.len(),
                Dispatch::Duplicate { .. } => 0,
            })
            .sum()
    }
}

/// Parse a whole feed. Accepts a JSON array or `{"events": [...]}`. Any bad
/// entry rejects the feed before anything runs.
pub fn parse_events(json: &str) -> Result<Vec<LifecycleEvent>> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| SubflowError::EventSource(format!("feed is not valid JSON: {e}")))?;
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(mut obj) => match obj.remove("events") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(SubflowError::EventSource(
                    "feed object has no 'events' array".into(),
                ));
            }
        },
        other => {
            return Err(SubflowError::EventSource(format!(
                "feed must be a list of events, got {other}"
            )));
        }
    };
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            LifecycleEvent::from_value(entry).map_err(|e| {
                SubflowError::EventSource(format!("event #{}: {e}", i + 1))
            })
        })
        .collect()
}

/// Read and validate a feed file.
pub fn load_events(path: &Path) -> Result<Vec<LifecycleEvent>> {
    let json = std::fs::read_to_string(path).map_err(|e| {
        SubflowError::EventSource(format!("cannot read {}: {e}", path.display()))
    })?;
    let events = parse_events(&json)?;
    tracing::info!("📥 Loaded {} events from {}", events.len(), path.display());
    Ok(events)
}

pub struct EventRouter {
    engine: Arc<WorkflowEngine>,
    dedupe: bool,
}

impl EventRouter {
    pub fn new(engine: Arc<WorkflowEngine>) -> Self {
        Self {
            engine,
            dedupe: false,
        }
    }

    /// Skip events whose idempotency key was already seen in the same run.
    pub fn with_dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    /// Route one event.
    pub async fn dispatch(&self, event: &LifecycleEvent) -> Result<Dispatch> {
        let engine = &self.engine;
        Ok(match event {
            LifecycleEvent::NewSubscription { subscriber, .. } => Dispatch::Workflow {
                outcome: engine.onboard(subscriber).await?,
            },
            LifecycleEvent::Inactive { subscriber, .. } => Dispatch::Workflow {
                outcome: engine.retain(subscriber).await?,
            },
            LifecycleEvent::Upgrade { subscriber, .. } => Dispatch::Workflow {
                outcome: engine.upgrade(subscriber).await?,
            },
            LifecycleEvent::ChurnCheck { .. } => Dispatch::Batch {
                report: engine.run_churn().await?,
            },
        })
    }

    /// Process events in order. The first failure stops the run and is
    /// returned unchanged; effects of earlier events stay persisted.
    pub async fn process(&self, events: &[LifecycleEvent]) -> Result<RunReport> {
        let mut report = RunReport::default();
        let mut seen = HashSet::new();

        for (index, event) in events.iter().enumerate() {
            if self.dedupe {
                let key = event.idempotency_key();
                if !seen.insert(key.clone()) {
                    tracing::info!("⏭️ Event #{} is a duplicate ({key})", index + 1);
                    report.events.push(RoutedEvent {
                        index,
                        tag: event.tag(),
                        dispatch: Dispatch::Duplicate { key },
                    });
                    continue;
                }
            }

            tracing::debug!("Event #{}: {}", index + 1, event.tag());
            let dispatch = self.dispatch(event).await.inspect_err(|e| {
                tracing::error!("❌ Event #{} ({}) failed: {e}", index + 1, event.tag());
            })?;
            report.events.push(RoutedEvent {
                index,
                tag: event.tag(),
                dispatch,
            });
        }

        tracing::info!(
            "✅ Processed {} events, {} messages sent",
            report.events.len(),
            report.sent()
        );
        Ok(report)
    }

    pub async fn process_file(&self, path: &Path) -> Result<RunReport> {
        let events = load_events(path)?;
        self.process(&events).await
    }
}
