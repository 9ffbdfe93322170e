//! Subflow configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SubflowError};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubflowConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

impl SubflowConfig {
    /// Load config from the default path (~/.subflow/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubflowError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SubflowError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| SubflowError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Subflow home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".subflow")
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply environment overrides using `lookup` for variable access.
    ///
    /// `SUBFLOW_DATABASE_URL` (or `DATABASE_URL`): `json` selects the document
    /// backend, `sqlite://PATH` the relational backend at PATH.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("SUBFLOW_DATABASE_URL").or_else(|| lookup("DATABASE_URL"));
        let Some(url) = url else {
            return Ok(());
        };
        let url = url.trim();
        if url.is_empty() || url == "json" {
            self.storage.backend = StorageBackend::Json;
        } else if let Some(path) = url.strip_prefix("sqlite://") {
            self.storage.backend = StorageBackend::Sqlite;
            self.storage.sqlite_path = path.to_string();
        } else {
            return Err(SubflowError::Config(format!(
                "Unsupported DATABASE_URL '{url}' (expected 'json' or 'sqlite://PATH')"
            )));
        }
        Ok(())
    }
}

/// Which subscriber store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Single JSON document file.
    #[default]
    Json,
    /// SQLite database.
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_json_path")]
    pub json_path: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_message_log_path")]
    pub message_log_path: String,
}

fn default_json_path() -> String { "~/.subflow/data/subscribers_db.json".into() }
fn default_sqlite_path() -> String { "~/.subflow/data/subflow.db".into() }
fn default_message_log_path() -> String { "~/.subflow/logs/message_log.jsonl".into() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            json_path: default_json_path(),
            sqlite_path: default_sqlite_path(),
            message_log_path: default_message_log_path(),
        }
    }
}

/// Configuration inputs: rules, tiers and templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_rules_file")]
    pub rules_file: String,
    #[serde(default = "default_tiers_file")]
    pub tiers_file: String,
    #[serde(default = "default_templates_dir")]
    pub templates_dir: String,
}

fn default_rules_file() -> String { "config/segmentation_rules.json".into() }
fn default_tiers_file() -> String { "config/tier_definitions.yaml".into() }
fn default_templates_dir() -> String { "message_templates".into() }

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            rules_file: default_rules_file(),
            tiers_file: default_tiers_file(),
            templates_dir: default_templates_dir(),
        }
    }
}

/// Batch job schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_retention_cron")]
    pub retention_cron: String,
    #[serde(default = "default_churn_cron")]
    pub churn_cron: String,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

fn default_retention_cron() -> String { "0 0 * * *".into() }
fn default_churn_cron() -> String { "0 1 * * 1".into() }
fn default_check_interval() -> u64 { 60 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            retention_cron: default_retention_cron(),
            churn_cron: default_churn_cron(),
            check_interval_secs: default_check_interval(),
        }
    }
}

/// Workflow tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_churn_days")]
    pub churn_inactive_days: i64,
    #[serde(default = "default_churn_subject")]
    pub churn_subject: String,
    #[serde(default)]
    pub attach_assets: bool,
}

fn default_churn_days() -> i64 { 30 }
fn default_churn_subject() -> String { "We're sorry to see you go".into() }

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            churn_inactive_days: default_churn_days(),
            churn_subject: default_churn_subject(),
            attach_assets: false,
        }
    }
}

/// Outbound messaging adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// "log" or "webhook".
    #[serde(default = "default_messaging_kind")]
    pub kind: String,
    #[serde(default = "default_webhook_url")]
    pub webhook_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_messaging_kind() -> String { "log".into() }
fn default_webhook_url() -> String { "http://127.0.0.1:5001/send".into() }
fn default_timeout() -> u64 { 10 }

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            kind: default_messaging_kind(),
            webhook_url: default_webhook_url(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Content asset provider endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    #[serde(default = "default_generate_url")]
    pub generate_url: String,
    #[serde(default = "default_prompt_file")]
    pub prompt_file: String,
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,
}

fn default_generate_url() -> String { "http://127.0.0.1:5001/generate-assets".into() }
fn default_prompt_file() -> String { "prompt_templates/cover_image_prompts.json".into() }
fn default_manifest_path() -> String { "assets/asset_manifest.csv".into() }

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            generate_url: default_generate_url(),
            prompt_file: default_prompt_file(),
            manifest_path: default_manifest_path(),
        }
    }
}

/// Event router behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Skip events whose idempotency key was already seen in the same run.
    #[serde(default)]
    pub dedupe_events: bool,
}
