//! # Subflow Store
//!
//! Subscriber persistence behind the [`SubscriberStore`] trait.
//!
//! - [`DocumentStore`]: one JSON file, whole-file rewrite per update, JSONL message log.
//! - [`SqliteStore`]: typed rows, transactional updates, rules/tiers cache.

pub mod document;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use subflow_core::config::{StorageBackend, StorageConfig};
use subflow_core::error::Result;
use subflow_core::traits::SubscriberStore;

pub use document::DocumentStore;
pub use sqlite::SqliteStore;

/// Open and initialise the configured backend. `resolve` turns configured
/// path strings (which may contain `~`) into filesystem paths.
pub fn open(
    config: &StorageConfig,
    resolve: impl Fn(&str) -> PathBuf,
) -> Result<Arc<dyn SubscriberStore>> {
    let store: Arc<dyn SubscriberStore> = match config.backend {
        StorageBackend::Json => Arc::new(DocumentStore::new(
            &resolve(&config.json_path),
            &resolve(&config.message_log_path),
        )),
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&resolve(&config.sqlite_path))?),
    };
    store.init()?;
    tracing::info!("🗄️ Subscriber store ready: {}", store.name());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use subflow_core::types::{Fields, MessageLog, Subscriber};

    fn backends(dir: &std::path::Path) -> Vec<Arc<dyn SubscriberStore>> {
        let resolve = |p: &str| dir.join(p);
        let json = StorageConfig {
            backend: StorageBackend::Json,
            json_path: "subs.json".into(),
            sqlite_path: "subs.db".into(),
            message_log_path: "log.jsonl".into(),
        };
        let sqlite = StorageConfig {
            backend: StorageBackend::Sqlite,
            ..json.clone()
        };
        vec![open(&json, resolve).unwrap(), open(&sqlite, resolve).unwrap()]
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    /// Behaviour both backends must agree on.
    #[test]
    fn test_backend_contract() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        for store in backends(dir.path()) {
            let name = store.name().to_string();
            assert!(store.get("1").unwrap().is_none(), "{name}");

            let mut sub = Subscriber::new("1", "ann", "ann@example.com");
            sub.last_active = Some(now - Duration::days(40));
            store.insert(&sub).unwrap();

            let updated = store.update("1", &fields(json!({"tags": "At-Risk"}))).unwrap();
            assert_eq!(updated.username, "ann", "{name}");
            assert_eq!(updated.tags.as_deref(), Some("At-Risk"), "{name}");

            let again = store.update("1", &fields(json!({"tags": "At-Risk"}))).unwrap();
            assert_eq!(again.tags, updated.tags, "{name}");

            let stale = store.stale_subscribers(now - Duration::days(30)).unwrap();
            assert_eq!(stale.len(), 1, "{name}");

            store.append_log(&MessageLog::now("1", "Retention offer sent")).unwrap();
            assert_eq!(store.message_log("1").unwrap().len(), 1, "{name}");
            assert_eq!(store.find_by_username("ann").unwrap().unwrap().id, "1", "{name}");
        }
    }

    #[test]
    fn test_bad_field_type_is_rejected_alike() {
        let dir = tempfile::tempdir().unwrap();
        for store in backends(dir.path()) {
            let name = store.name().to_string();
            store.insert(&Subscriber::new("1", "bo", "bo@example.com")).unwrap();

            for patch in [json!({"email": null}), json!({"is_active": "yes"})] {
                let err = store.update("1", &fields(patch)).unwrap_err();
                assert!(
                    matches!(err, subflow_core::error::SubflowError::InvalidField { .. }),
                    "{name}: {err:?}"
                );
            }
            let stored = store.get("1").unwrap().unwrap();
            assert_eq!(stored.email, "bo@example.com", "{name}");
            assert!(stored.is_active, "{name}");
        }
    }

    #[test]
    fn test_only_sqlite_offers_config_cache() {
        let dir = tempfile::tempdir().unwrap();
        let names: Vec<(String, bool)> = backends(dir.path())
            .iter()
            .map(|s| (s.name().to_string(), s.config_cache().is_some()))
            .collect();
        assert_eq!(
            names,
            vec![("json".to_string(), false), ("sqlite".to_string(), true)]
        );
    }
}
