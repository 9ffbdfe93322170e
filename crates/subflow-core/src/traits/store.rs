//! Subscriber storage contract shared by the document and relational backends.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Fields, MessageLog, SegmentRule, Subscriber, TierDefinition};

/// Persistence for subscribers and their message log.
///
/// Both backends merge partial updates into the stored record and return
/// `Ok(None)` from `get` for unknown ids.
pub trait SubscriberStore: Send + Sync {
    /// Backend name ("json", "sqlite").
    fn name(&self) -> &str;

    /// Create tables / files. Safe to call more than once.
    fn init(&self) -> Result<()>;

    /// Fetch one subscriber by id.
    fn get(&self, id: &str) -> Result<Option<Subscriber>>;

    /// Merge `fields` into the stored record and return the result.
    fn update(&self, id: &str, fields: &Fields) -> Result<Subscriber>;

    /// Store a brand-new subscriber. Fails if the id is taken.
    fn insert(&self, subscriber: &Subscriber) -> Result<Subscriber>;

    fn find_by_username(&self, username: &str) -> Result<Option<Subscriber>>;

    /// All subscribers still flagged active.
    fn active_subscribers(&self) -> Result<Vec<Subscriber>>;

    /// Active subscribers whose last activity is older than `cutoff`.
    /// Subscribers that were never active are not included.
    fn stale_subscribers(&self, cutoff: DateTime<Utc>) -> Result<Vec<Subscriber>>;

    /// Append one message log entry.
    fn append_log(&self, entry: &MessageLog) -> Result<()>;

    /// Message log for one subscriber, oldest first.
    fn message_log(&self, subscriber_id: &str) -> Result<Vec<MessageLog>>;

    /// Rules/tiers cache capability. Only relational backends provide one.
    fn config_cache(&self) -> Option<&dyn ConfigCache> {
        None
    }
}

/// Rows inserted by a configuration seed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub rules_inserted: usize,
    pub tiers_inserted: usize,
}

/// Segmentation rules and tier definitions cached in storage.
pub trait ConfigCache {
    /// Insert-if-absent. Running it twice never duplicates rows.
    fn seed(&self, rules: &[SegmentRule], tiers: &[TierDefinition]) -> Result<SeedReport>;

    fn segment_rules(&self) -> Result<Vec<SegmentRule>>;

    fn tier_definitions(&self) -> Result<Vec<TierDefinition>>;

    /// Drop cached rows so the next seed re-reads the configuration files.
    fn clear(&self) -> Result<()>;
}
