//! # Subflow Templates
//!
//! File-backed message templates. Tiers map to filenames through a fixed
//! table; personalization is a literal placeholder replace, nothing more.

use std::path::{Path, PathBuf};

use serde_json::Value;
use subflow_core::error::{Result, SubflowError};
use subflow_core::types::Fields;

/// Placeholder replaced by the subscriber's name.
pub const NAME_PLACEHOLDER: &str = "{{subscriber_name}}";
/// Used when the payload carries no name.
pub const FALLBACK_NAME: &str = "there";

pub const WELCOME_TEMPLATE: &str = "welcome_new_sub.txt";
pub const PREMIUM_WELCOME_TEMPLATE: &str = "tier1_welcome.md";
pub const RETENTION_TEMPLATE: &str = "retention_offer.md";
pub const CHURN_TEMPLATE: &str = "churn_warning_followup.txt";

/// Template file for a tier's welcome message. Unlisted tiers get the
/// default welcome.
pub fn welcome_file_for(tier: &str) -> &'static str {
    match tier {
        "VIP" | "Ultra" => PREMIUM_WELCOME_TEMPLATE,
        _ => WELCOME_TEMPLATE,
    }
}

/// Read-only view over a template directory.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Welcome template text for `tier`.
    pub fn load_template(&self, tier: &str) -> Result<String> {
        self.load_file(welcome_file_for(tier))
    }

    pub fn load_retention(&self) -> Result<String> {
        self.load_file(RETENTION_TEMPLATE)
    }

    pub fn load_churn_warning(&self) -> Result<String> {
        self.load_file(CHURN_TEMPLATE)
    }

    /// Full text of a template by filename.
    pub fn load_file(&self, filename: &str) -> Result<String> {
        let path = self.dir.join(filename);
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!("📝 Loaded template {}", path.display());
                Ok(text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SubflowError::TemplateNotFound(path))
            }
            Err(e) => Err(SubflowError::Io(e)),
        }
    }
}

/// Replace `{{subscriber_name}}` with `fields["name"]`, or "there".
pub fn personalize(template: &str, fields: &Fields) -> String {
    let name = match fields.get("name") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => FALLBACK_NAME.to_string(),
        Some(other) => other.to_string(),
    };
    template.replace(NAME_PLACEHOLDER, &name)
}
