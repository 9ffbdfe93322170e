//! JSON document backend: one file mapping subscriber id to a flat record.
//! Every update rewrites the whole file (write temp, then rename).
//! Successful sends are appended to a JSONL message log next to it.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::Value;
use subflow_core::error::{Result, SubflowError};
use subflow_core::traits::SubscriberStore;
use subflow_core::types::{DEFAULT_TIER, Fields, MessageLog, Subscriber};

type Documents = BTreeMap<String, Fields>;

/// File-based subscriber store.
pub struct DocumentStore {
    path: PathBuf,
    log_path: PathBuf,
    /// Serializes read-modify-write cycles inside this process.
    write_lock: Mutex<()>,
}

impl DocumentStore {
    pub fn new(path: &Path, log_path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            log_path: log_path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records. A missing file is an empty store; an unparsable one
    /// is treated as empty with a warning.
    fn load(&self) -> Result<Documents> {
        if !self.path.exists() {
            return Ok(Documents::new());
        }
        let json = std::fs::read_to_string(&self.path)?;
        if json.trim().is_empty() {
            return Ok(Documents::new());
        }
        Ok(serde_json::from_str(&json).unwrap_or_else(|e| {
            let err = SubflowError::Corruption(format!("{}: {e}", self.path.display()));
            tracing::warn!("⚠️ {err}. Re-initialising as empty store.");
            Documents::new()
        }))
    }

    /// Atomically replace the file.
    fn save(&self, docs: &Documents) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(docs)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        tracing::debug!("💾 Saved {} subscribers to {}", docs.len(), self.path.display());
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|e| SubflowError::Database(format!("Lock: {e}")))
    }

    /// Parse every record, skipping (and logging) ones that do not fit the model.
    fn subscribers(&self) -> Result<Vec<Subscriber>> {
        let docs = self.load()?;
        Ok(docs
            .iter()
            .filter_map(|(id, record)| match Subscriber::from_record(id, record) {
                Ok(sub) => Some(sub),
                Err(e) => {
                    tracing::warn!("⚠️ Skipping unreadable subscriber record: {e}");
                    None
                }
            })
            .collect())
    }
}

/// Defaults written when an update creates a record.
fn fresh_record() -> Fields {
    let mut record = Fields::new();
    record.insert("tier".into(), Value::String(DEFAULT_TIER.into()));
    record.insert("is_active".into(), Value::Bool(true));
    record.insert("joined_at".into(), serde_json::json!(Utc::now()));
    record
}

impl SubscriberStore for DocumentStore {
    fn name(&self) -> &str {
        "json"
    }

    fn init(&self) -> Result<()> {
        let _guard = self.lock()?;
        let docs = self.load()?;
        self.save(&docs)?;
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Subscriber>> {
        let docs = self.load()?;
        docs.get(id)
            .map(|record| Subscriber::from_record(id, record))
            .transpose()
    }

    fn update(&self, id: &str, fields: &Fields) -> Result<Subscriber> {
        let _guard = self.lock()?;
        let mut docs = self.load()?;
        let record = docs.entry(id.to_string()).or_insert_with(fresh_record);
        // Type-check recognised fields the same way the typed backend does.
        Subscriber::from_record(id, record)?.apply_fields(fields)?;
        for (key, value) in fields {
            if key != "id" {
                record.insert(key.clone(), value.clone());
            }
        }
        let merged = Subscriber::from_record(id, record)?;
        self.save(&docs)?;
        Ok(merged)
    }

    fn insert(&self, subscriber: &Subscriber) -> Result<Subscriber> {
        let _guard = self.lock()?;
        let mut docs = self.load()?;
        if docs.contains_key(&subscriber.id) {
            return Err(SubflowError::Database(format!(
                "Subscriber {} already exists",
                subscriber.id
            )));
        }
        let mut record = subscriber.to_record();
        record.remove("id");
        docs.insert(subscriber.id.clone(), record);
        self.save(&docs)?;
        Ok(subscriber.clone())
    }

    fn find_by_username(&self, username: &str) -> Result<Option<Subscriber>> {
        let docs = self.load()?;
        docs.iter()
            .find(|(_, record)| record.get("username").and_then(Value::as_str) == Some(username))
            .map(|(id, record)| Subscriber::from_record(id, record))
            .transpose()
    }

    fn active_subscribers(&self) -> Result<Vec<Subscriber>> {
        Ok(self
            .subscribers()?
            .into_iter()
            .filter(|s| s.is_active)
            .collect())
    }

    fn stale_subscribers(&self, cutoff: DateTime<Utc>) -> Result<Vec<Subscriber>> {
        Ok(self
            .subscribers()?
            .into_iter()
            .filter(|s| s.is_active && s.last_active.is_some_and(|last| last < cutoff))
            .collect())
    }

    fn append_log(&self, entry: &MessageLog) -> Result<()> {
        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(file, "{}", serde_json::to_string(entry)?)?;
        Ok(())
    }

    fn message_log(&self, subscriber_id: &str) -> Result<Vec<MessageLog>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.log_path)?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<MessageLog>(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("⚠️ Skipping bad message log line: {e}");
                    None
                }
            })
            .filter(|entry| entry.subscriber_id == subscriber_id)
            .collect())
    }
}
