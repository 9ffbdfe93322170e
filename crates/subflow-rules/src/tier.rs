//! Tier assignment.
//!
//! Spend thresholds are fixed; the configured list only decides which tier
//! names are available. `TierDefinition::criteria` is not evaluated.

use serde_json::Value;
use subflow_core::error::Result;
use subflow_core::types::{DEFAULT_TIER, Fields, TierDefinition};

use crate::condition::as_number;

/// Spend above which "Ultra" is assigned (when configured).
pub const ULTRA_SPEND: f64 = 100.0;
/// Spend above which "VIP" is assigned (when configured).
pub const VIP_SPEND: f64 = 50.0;

/// Pick a tier from `total_spend`. The result is always one of the configured
/// names, or "Basic" when none are configured.
pub fn assign_tier(record: &Fields, tiers: &[TierDefinition]) -> Result<String> {
    let spend = match record.get("total_spend") {
        None | Some(Value::Null) => 0.0,
        Some(v) => as_number("total_spend", v)?,
    };
    let has = |name: &str| tiers.iter().any(|t| t.name == name);

    if spend > ULTRA_SPEND && has("Ultra") {
        return Ok("Ultra".into());
    }
    if spend > VIP_SPEND && has("VIP") {
        return Ok("VIP".into());
    }
    Ok(tiers
        .first()
        .map(|t| t.name.clone())
        .unwrap_or_else(|| DEFAULT_TIER.to_string()))
}
