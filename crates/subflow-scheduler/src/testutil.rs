//! Workflow engine over an in-memory database and scratch templates.

use std::sync::Arc;

use subflow_channels::LogMessenger;
use subflow_core::types::{SegmentRule, TierDefinition};
use subflow_rules::ConfigBundle;
use subflow_store::SqliteStore;
use subflow_templates::{
    CHURN_TEMPLATE, PREMIUM_WELCOME_TEMPLATE, RETENTION_TEMPLATE, TemplateStore, WELCOME_TEMPLATE,
};
use subflow_workflow::WorkflowEngine;

pub fn engine() -> (tempfile::TempDir, Arc<WorkflowEngine>) {
    let dir = tempfile::tempdir().unwrap();
    for (name, body) in [
        (WELCOME_TEMPLATE, "Welcome, {{subscriber_name}}!"),
        (PREMIUM_WELCOME_TEMPLATE, "VIP welcome, {{subscriber_name}}"),
        (RETENTION_TEMPLATE, "We miss you, {{subscriber_name}}"),
        (CHURN_TEMPLATE, "Still there, {{subscriber_name}}?"),
    ] {
        std::fs::write(dir.path().join(name), body).unwrap();
    }
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
    let engine = WorkflowEngine::new(
        Arc::new(SqliteStore::open_in_memory().unwrap()),
        config,
        TemplateStore::new(dir.path()),
        Arc::new(LogMessenger::new()),
    );
    (dir, Arc::new(engine))
}
