//! SQLite backend: one row per subscriber, plus the message log and the
//! segmentation rule / tier definition cache.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use subflow_core::error::{Result, SubflowError};
use subflow_core::traits::{ConfigCache, SeedReport, SubscriberStore};
use subflow_core::types::{Fields, MessageLog, SegmentRule, Subscriber, TierDefinition};

const SUBSCRIBER_COLUMNS: &str =
    "id, username, email, phone, tier, is_active, joined_at, last_active, tags";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> SubflowError {
    SubflowError::Database(e.to_string())
}

/// Fixed-width UTC timestamps so text comparison orders correctly.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn row_to_subscriber(row: &Row<'_>) -> rusqlite::Result<Subscriber> {
    let joined_at: String = row.get(6)?;
    let last_active: Option<String> = row.get(7)?;
    Ok(Subscriber {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        tier: row.get(4)?,
        is_active: row.get::<_, i32>(5)? != 0,
        joined_at: parse_ts(&joined_at).unwrap_or_else(Utc::now),
        last_active: last_active.as_deref().and_then(parse_ts),
        tags: row.get(8)?,
        attributes: Fields::new(),
    })
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err)?;
        // WAL for concurrent readers alongside the single writer.
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SubflowError::Database(format!("Lock: {e}")))
    }

    /// Create tables.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS subscribers (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                email TEXT NOT NULL DEFAULT '',
                phone TEXT,
                tier TEXT NOT NULL DEFAULT 'Basic',
                is_active INTEGER NOT NULL DEFAULT 1,
                joined_at TEXT NOT NULL,
                last_active TEXT,
                tags TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_subscribers_username ON subscribers(username);
            CREATE INDEX IF NOT EXISTS idx_subscribers_last_active ON subscribers(is_active, last_active);

            -- Append-only: one row per successful send
            CREATE TABLE IF NOT EXISTS message_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscriber_id TEXT NOT NULL REFERENCES subscribers(id),
                sent_at TEXT NOT NULL,
                message TEXT NOT NULL
            );

            -- Config cache, seeded from the rules/tiers files
            CREATE TABLE IF NOT EXISTS segment_rule (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                segment TEXT NOT NULL,
                rule_json TEXT NOT NULL,      -- JSON: {field: condition}
                UNIQUE (segment, rule_json)
            );
            CREATE TABLE IF NOT EXISTS tier_definition (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                criteria TEXT NOT NULL DEFAULT ''
            );
            ",
        )
        .map_err(|e| SubflowError::Database(format!("Migration: {e}")))?;
        Ok(())
    }

    fn query_subscribers(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<Subscriber>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args, row_to_subscriber)
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }
}

impl SubscriberStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn init(&self) -> Result<()> {
        self.migrate()
    }

    fn get(&self, id: &str) -> Result<Option<Subscriber>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE id = ?1"),
            params![id],
            row_to_subscriber,
        )
        .optional()
        .map_err(db_err)
    }

    /// Applies recognised fields only, inside one transaction. Unknown ids are
    /// `NotFound`; this backend never upserts.
    fn update(&self, id: &str, fields: &Fields) -> Result<Subscriber> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let mut sub = tx
            .query_row(
                &format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE id = ?1"),
                params![id],
                row_to_subscriber,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| SubflowError::NotFound(id.to_string()))?;

        let ignored = sub.apply_fields(fields)?;
        if !ignored.is_empty() {
            tracing::debug!("Ignoring unrecognised fields for subscriber {id}: {ignored:?}");
        }

        tx.execute(
            "UPDATE subscribers SET username = ?2, email = ?3, phone = ?4, tier = ?5,
                 is_active = ?6, joined_at = ?7, last_active = ?8, tags = ?9
             WHERE id = ?1",
            params![
                sub.id,
                sub.username,
                sub.email,
                sub.phone,
                sub.tier,
                sub.is_active as i32,
                fmt_ts(sub.joined_at),
                sub.last_active.map(fmt_ts),
                sub.tags,
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        Ok(sub)
    }

    fn insert(&self, subscriber: &Subscriber) -> Result<Subscriber> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO subscribers ({SUBSCRIBER_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                subscriber.id,
                subscriber.username,
                subscriber.email,
                subscriber.phone,
                subscriber.tier,
                subscriber.is_active as i32,
                fmt_ts(subscriber.joined_at),
                subscriber.last_active.map(fmt_ts),
                subscriber.tags,
            ],
        )
        .map_err(|e| SubflowError::Database(format!("Insert subscriber {}: {e}", subscriber.id)))?;
        let mut stored = subscriber.clone();
        // Free-form attributes have no column here.
        stored.attributes = Fields::new();
        Ok(stored)
    }

    fn find_by_username(&self, username: &str) -> Result<Option<Subscriber>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE username = ?1
                 ORDER BY joined_at LIMIT 1"
            ),
            params![username],
            row_to_subscriber,
        )
        .optional()
        .map_err(db_err)
    }

    fn active_subscribers(&self) -> Result<Vec<Subscriber>> {
        self.query_subscribers(
            &format!("SELECT {SUBSCRIBER_COLUMNS} FROM subscribers WHERE is_active = 1 ORDER BY id"),
            [],
        )
    }

    fn stale_subscribers(&self, cutoff: DateTime<Utc>) -> Result<Vec<Subscriber>> {
        self.query_subscribers(
            &format!(
                "SELECT {SUBSCRIBER_COLUMNS} FROM subscribers
                 WHERE is_active = 1 AND last_active IS NOT NULL AND last_active < ?1
                 ORDER BY id"
            ),
            params![fmt_ts(cutoff)],
        )
    }

    fn append_log(&self, entry: &MessageLog) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO message_log (subscriber_id, sent_at, message) VALUES (?1, ?2, ?3)",
            params![entry.subscriber_id, fmt_ts(entry.sent_at), entry.message],
        )
        .map_err(|e| SubflowError::Database(format!("Append message log: {e}")))?;
        Ok(())
    }

    fn message_log(&self, subscriber_id: &str) -> Result<Vec<MessageLog>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT subscriber_id, sent_at, message FROM message_log
                 WHERE subscriber_id = ?1 ORDER BY id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![subscriber_id], |row| {
                let sent_at: String = row.get(1)?;
                Ok(MessageLog {
                    subscriber_id: row.get(0)?,
                    sent_at: parse_ts(&sent_at).unwrap_or_else(Utc::now),
                    message: row.get(2)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    fn config_cache(&self) -> Option<&dyn ConfigCache> {
        Some(self)
    }
}

impl ConfigCache for SqliteStore {
    /// Seeds each table only while it is empty; `INSERT OR IGNORE` keeps a
    /// racing second seeder from duplicating rows.
    fn seed(&self, rules: &[SegmentRule], tiers: &[TierDefinition]) -> Result<SeedReport> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let mut report = SeedReport::default();

        let rule_count: i64 = tx
            .query_row("SELECT COUNT(*) FROM segment_rule", [], |r| r.get(0))
            .map_err(db_err)?;
        if rule_count == 0 {
            for rule in rules {
                let rule_json = serde_json::to_string(&rule.conditions_map())?;
                report.rules_inserted += tx
                    .execute(
                        "INSERT OR IGNORE INTO segment_rule (segment, rule_json) VALUES (?1, ?2)",
                        params![rule.segment, rule_json],
                    )
                    .map_err(db_err)?;
            }
        }

        let tier_count: i64 = tx
            .query_row("SELECT COUNT(*) FROM tier_definition", [], |r| r.get(0))
            .map_err(db_err)?;
        if tier_count == 0 {
            for tier in tiers {
                report.tiers_inserted += tx
                    .execute(
                        "INSERT OR IGNORE INTO tier_definition (name, criteria) VALUES (?1, ?2)",
                        params![tier.name, tier.criteria],
                    )
                    .map_err(db_err)?;
            }
        }

        tx.commit().map_err(db_err)?;
        Ok(report)
    }

    fn segment_rules(&self) -> Result<Vec<SegmentRule>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT segment, rule_json FROM segment_rule ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        rows.into_iter()
            .map(|(segment, rule_json)| {
                let conditions: Fields = serde_json::from_str(&rule_json).map_err(|e| {
                    SubflowError::Corruption(format!("segment_rule '{segment}': {e}"))
                })?;
                SegmentRule::from_conditions(segment, conditions)
            })
            .collect()
    }

    fn tier_definitions(&self) -> Result<Vec<TierDefinition>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT name, criteria FROM tier_definition ORDER BY id")
            .map_err(db_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TierDefinition {
                    name: row.get(0)?,
                    criteria: row.get(1)?,
                })
            })
            .map_err(db_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err)?;
        Ok(rows)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch("DELETE FROM segment_rule; DELETE FROM tier_definition;")
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::{Value, json};

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn store_with(subs: &[Subscriber]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        for s in subs {
            store.insert(s).unwrap();
        }
        store
    }

    #[test]
    fn test_open_file_and_reinit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/subflow.db");
        let store = SqliteStore::open(&path).unwrap();
        store.init().unwrap();
        store.insert(&Subscriber::new("1", "ann", "")).unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.get("1").unwrap().unwrap().username, "ann");
    }

    #[test]
    fn test_update_unknown_id_is_not_found() {
        let store = store_with(&[]);
        let err = store.update("7", &fields(json!({"tier": "VIP"}))).unwrap_err();
        assert!(matches!(err, SubflowError::NotFound(id) if id == "7"));
        assert!(store.get("7").unwrap().is_none());
    }

    #[test]
    fn test_update_merges_recognised_fields() {
        let store = store_with(&[Subscriber::new("1", "bob", "bob@example.com")]);
        let updated = store
            .update("1", &fields(json!({"tier": "VIP", "shoe_size": 44})))
            .unwrap();
        assert_eq!(updated.tier, "VIP");
        assert_eq!(updated.email, "bob@example.com");
        assert!(updated.attributes.is_empty());

        let stored = store.get("1").unwrap().unwrap();
        assert_eq!(stored.tier, "VIP");
        assert_eq!(stored.username, "bob");
    }

    #[test]
    fn test_update_is_idempotent() {
        let store = store_with(&[Subscriber::new("1", "cat", "")]);
        let now = Utc::now();
        let patch = fields(json!({"tags": "At-Risk", "last_active": now}));
        store.update("1", &patch).unwrap();
        let first = store.get("1").unwrap().unwrap();
        store.update("1", &patch).unwrap();
        assert_eq!(store.get("1").unwrap().unwrap(), first);
    }

    #[test]
    fn test_round_trip_timestamps() {
        let now = Utc::now();
        let mut sub = Subscriber::new("1", "dan", "");
        sub.last_active = Some(now);
        let store = store_with(&[sub]);
        let stored = store.get("1").unwrap().unwrap();
        assert_eq!(
            stored.last_active.map(|t| t.timestamp_micros()),
            Some(now.timestamp_micros())
        );
    }

    #[test]
    fn test_stale_scan() {
        let now = Utc::now();
        let mut old = Subscriber::new("1", "old", "");
        old.last_active = Some(now - Duration::days(40));
        let mut recent = Subscriber::new("2", "recent", "");
        recent.last_active = Some(now - Duration::days(5));
        let never = Subscriber::new("3", "never", "");
        let store = store_with(&[old, recent, never]);

        let stale = store.stale_subscribers(now - Duration::days(30)).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].username, "old");

        store.update("1", &fields(json!({"is_active": false}))).unwrap();
        assert!(store.stale_subscribers(now - Duration::days(30)).unwrap().is_empty());
        assert_eq!(store.active_subscribers().unwrap().len(), 2);
    }

    #[test]
    fn test_message_log() {
        let store = store_with(&[Subscriber::new("1", "eve", "")]);
        store.append_log(&MessageLog::now("1", "Churn warning sent")).unwrap();
        let log = store.message_log("1").unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message, "Churn warning sent");
        // Foreign key: unknown subscribers cannot be logged against.
        assert!(store.append_log(&MessageLog::now("99", "x")).is_err());
    }

    #[test]
    fn test_seed_is_idempotent() {
        let store = store_with(&[]);
        let rules = vec![
            SegmentRule::new("New", &[("days_subscribed", "<7")]),
            SegmentRule::new("At-Risk", &[("no_activity_days", ">14")]),
        ];
        let tiers = vec![TierDefinition::named("Basic"), TierDefinition::named("VIP")];

        let first = store.seed(&rules, &tiers).unwrap();
        assert_eq!(first.rules_inserted, 2);
        assert_eq!(first.tiers_inserted, 2);

        let second = store.seed(&rules, &tiers).unwrap();
        assert_eq!(second, SeedReport::default());
        assert_eq!(store.segment_rules().unwrap(), rules);
        assert_eq!(store.tier_definitions().unwrap(), tiers);
    }

    #[test]
    fn test_cached_rule_keeps_condition_order() {
        let store = store_with(&[]);
        let rule = SegmentRule::new(
            "Whale",
            &[("total_spend", ">=500"), ("tier", "VIP"), ("days_subscribed", ">30")],
        );
        store.seed(std::slice::from_ref(&rule), &[]).unwrap();
        assert_eq!(store.segment_rules().unwrap(), vec![rule]);
    }

    #[test]
    fn test_cache_clear_allows_reseed() {
        let store = store_with(&[]);
        store
            .seed(&[SegmentRule::new("New", &[("days_subscribed", "<7")])], &[])
            .unwrap();
        store.clear().unwrap();
        store
            .seed(&[SegmentRule::new("Fresh", &[("days_subscribed", "<1")])], &[])
            .unwrap();
        let rules = store.segment_rules().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].segment, "Fresh");
        assert!(store.config_cache().is_some());
    }
}
