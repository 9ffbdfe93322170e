//! # Subflow Rules
//!
//! Declarative subscriber classification.
//!
//! ```text
//! rules file ──► SegmentRule ──compile──► RuleSet ──► assign_segment(record)
//!                                          │
//!                 "<7"  → Condition::Lt(7.0)
//!                 ">=50"→ Condition::Ge(50.0)
//!                 "gold"→ Condition::Equals("gold")
//!
//! tiers file ──► TierDefinition list ──► assign_tier(record)
//! ```
//!
//! Everything here is pure: no I/O after loading, no mutation of inputs.

pub mod condition;
pub mod loader;
pub mod segment;
pub mod tier;

pub use condition::{Condition, evaluate_condition};
pub use loader::{ConfigBundle, load_rules, load_tiers};
pub use segment::{CompiledRule, RuleSet, assign_segment};
pub use tier::assign_tier;
