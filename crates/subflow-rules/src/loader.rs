//! Rules (JSON) and tiers (YAML) loaders, plus the loaded configuration bundle.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use subflow_core::error::{Result, SubflowError};
use subflow_core::traits::ConfigCache;
use subflow_core::types::{SegmentRule, TierDefinition};

use crate::segment::RuleSet;

#[derive(Deserialize)]
#[serde(untagged)]
enum RulesFile {
    Wrapped {
        #[serde(default)]
        rules: Vec<SegmentRule>,
    },
    Bare(Vec<SegmentRule>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TierEntry {
    Name(String),
    Full(TierDefinition),
}

#[derive(Deserialize)]
struct TiersFile {
    #[serde(default)]
    tiers: Vec<TierEntry>,
}

fn read_config_file(kind: &str, path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        SubflowError::Config(format!("Failed to read {kind} file {}: {e}", path.display()))
    })
}

/// Load segmentation rules from `{"rules": [...]}` (or a bare array).
pub fn load_rules(path: &Path) -> Result<Vec<SegmentRule>> {
    let content = read_config_file("rules", path)?;
    let parsed: RulesFile = serde_json::from_str(&content).map_err(|e| {
        SubflowError::Config(format!("Failed to parse rules file {}: {e}", path.display()))
    })?;
    let rules = match parsed {
        RulesFile::Wrapped { rules } | RulesFile::Bare(rules) => rules,
    };
    tracing::debug!("📄 Loaded {} rules from {}", rules.len(), path.display());
    Ok(rules)
}

/// Load tier definitions from `{"tiers": [...]}`. Entries may be bare names
/// or `{name, criteria}` maps.
pub fn load_tiers(path: &Path) -> Result<Vec<TierDefinition>> {
    let content = read_config_file("tiers", path)?;
    let parsed: TiersFile = serde_yaml::from_str(&content).map_err(|e| {
        SubflowError::Config(format!("Failed to parse tiers file {}: {e}", path.display()))
    })?;
    let tiers: Vec<TierDefinition> = parsed
        .tiers
        .into_iter()
        .map(|entry| match entry {
            TierEntry::Name(name) => TierDefinition::named(&name),
            TierEntry::Full(def) => def,
        })
        .collect();
    tracing::debug!("📄 Loaded {} tiers from {}", tiers.len(), path.display());
    Ok(tiers)
}

/// Rules and tiers loaded once per process.
#[derive(Debug, Clone)]
pub struct ConfigBundle {
    rules: Vec<SegmentRule>,
    rule_set: RuleSet,
    tiers: Vec<TierDefinition>,
    rules_path: Option<PathBuf>,
    tiers_path: Option<PathBuf>,
}

impl ConfigBundle {
    /// Build from in-memory rules and tiers.
    pub fn from_parts(rules: Vec<SegmentRule>, tiers: Vec<TierDefinition>) -> Result<Self> {
        let rule_set = RuleSet::compile(&rules)?;
        Ok(Self {
            rules,
            rule_set,
            tiers,
            rules_path: None,
            tiers_path: None,
        })
    }

    /// Read both configuration files.
    pub fn load(rules_path: &Path, tiers_path: &Path) -> Result<Self> {
        let mut bundle = Self::from_parts(load_rules(rules_path)?, load_tiers(tiers_path)?)?;
        bundle.rules_path = Some(rules_path.to_path_buf());
        bundle.tiers_path = Some(tiers_path.to_path_buf());
        tracing::info!(
            "📚 Configuration loaded: {} rules, {} tiers",
            bundle.rules.len(),
            bundle.tiers.len()
        );
        Ok(bundle)
    }

    /// Seed `cache` from the files (insert-if-absent) and serve rules and
    /// tiers from the cache afterwards. The cache wins over later file edits
    /// until it is cleared.
    pub fn load_cached(cache: &dyn ConfigCache, rules_path: &Path, tiers_path: &Path) -> Result<Self> {
        let files = Self::load(rules_path, tiers_path)?;
        let report = cache.seed(&files.rules, &files.tiers)?;
        if report.rules_inserted + report.tiers_inserted > 0 {
            tracing::info!(
                "🌱 Seeded config cache: {} rules, {} tiers",
                report.rules_inserted,
                report.tiers_inserted
            );
        }
        let mut bundle = Self::from_parts(cache.segment_rules()?, cache.tier_definitions()?)?;
        bundle.rules_path = files.rules_path;
        bundle.tiers_path = files.tiers_path;
        Ok(bundle)
    }

    /// Re-read the files this bundle was loaded from.
    pub fn reload(&mut self) -> Result<()> {
        let (Some(rules_path), Some(tiers_path)) = (self.rules_path.clone(), self.tiers_path.clone())
        else {
            return Err(SubflowError::Config(
                "Configuration was not loaded from files; nothing to reload".into(),
            ));
        };
        *self = Self::load(&rules_path, &tiers_path)?;
        Ok(())
    }

    pub fn rules(&self) -> &[SegmentRule] {
        &self.rules
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    pub fn tiers(&self) -> &[TierDefinition] {
        &self.tiers
    }
}
