//! Segment assignment: first rule whose conditions all hold wins.

use serde_json::Value;
use subflow_core::error::Result;
use subflow_core::types::{Fields, SegmentRule, UNSEGMENTED};

use crate::condition::Condition;

/// A segmentation rule with its conditions parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pub segment: String,
    pub conditions: Vec<(String, Condition)>,
}

impl CompiledRule {
    pub fn compile(rule: &SegmentRule) -> Result<Self> {
        let conditions = rule
            .conditions
            .iter()
            .map(|(field, spec)| Ok((field.clone(), Condition::parse(spec)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            segment: rule.segment.clone(),
            conditions,
        })
    }

    /// All conditions hold. A missing (or null) field is a non-match.
    pub fn matches(&self, record: &Fields) -> Result<bool> {
        for (field, condition) in &self.conditions {
            let actual = match record.get(field) {
                None | Some(Value::Null) => return Ok(false),
                Some(v) => v,
            };
            if !condition.matches(field, actual)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Ordered, pre-parsed rule list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    pub fn compile(rules: &[SegmentRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!("📐 Compiled {} segmentation rules", rules.len());
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Segment of the first fully matching rule, or "Unsegmented".
    pub fn assign_segment(&self, record: &Fields) -> Result<&str> {
        for rule in &self.rules {
            if rule.matches(record)? {
                return Ok(&rule.segment);
            }
        }
        Ok(UNSEGMENTED)
    }
}

/// Compile `rules` and classify `record` in one call.
pub fn assign_segment(record: &Fields, rules: &[SegmentRule]) -> Result<String> {
    RuleSet::compile(rules)?
        .assign_segment(record)
        .map(str::to_string)
}
