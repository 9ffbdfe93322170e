//! Condition mini-language: `<N`, `>N`, `<=N`, `>=N` or an exact literal.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;
use subflow_core::error::{Result, SubflowError};

/// A parsed rule condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Lt(f64),
    Gt(f64),
    Le(f64),
    Ge(f64),
    /// Case-sensitive match against the value's string form.
    Equals(String),
}

impl Condition {
    /// Parse a condition string. Numeric operands are validated here, once,
    /// instead of on every evaluation.
    pub fn parse(spec: &str) -> Result<Self> {
        // Two-character operators first so "<=" is not read as "<" + "=5".
        let numeric = |op: &str, rest: &str| -> Result<f64> {
            rest.trim().parse::<f64>().map_err(|_| {
                SubflowError::Config(format!(
                    "Invalid numeric operand in condition '{spec}' (operator '{op}')"
                ))
            })
        };
        if let Some(rest) = spec.strip_prefix("<=") {
            return Ok(Self::Le(numeric("<=", rest)?));
        }
        if let Some(rest) = spec.strip_prefix(">=") {
            return Ok(Self::Ge(numeric(">=", rest)?));
        }
        if let Some(rest) = spec.strip_prefix('<') {
            return Ok(Self::Lt(numeric("<", rest)?));
        }
        if let Some(rest) = spec.strip_prefix('>') {
            return Ok(Self::Gt(numeric(">", rest)?));
        }
        Ok(Self::Equals(spec.to_string()))
    }

    /// Evaluate against the value of `field`.
    ///
    /// Numeric operators require a value coercible to a number and fail with
    /// `TypeConversion` otherwise.
    pub fn matches(&self, field: &str, actual: &Value) -> Result<bool> {
        match self {
            Self::Lt(n) => Ok(as_number(field, actual)? < *n),
            Self::Gt(n) => Ok(as_number(field, actual)? > *n),
            Self::Le(n) => Ok(as_number(field, actual)? <= *n),
            Self::Ge(n) => Ok(as_number(field, actual)? >= *n),
            Self::Equals(expected) => Ok(literal(actual) == *expected),
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Equals(_))
    }
}

impl FromStr for Condition {
    type Err = SubflowError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lt(n) => write!(f, "<{n}"),
            Self::Gt(n) => write!(f, ">{n}"),
            Self::Le(n) => write!(f, "<={n}"),
            Self::Ge(n) => write!(f, ">={n}"),
            Self::Equals(s) => f.write_str(s),
        }
    }
}

/// Parse and evaluate in one step.
pub fn evaluate_condition(spec: &str, actual: &Value) -> Result<bool> {
    Condition::parse(spec)?.matches("value", actual)
}

/// Coerce a JSON value to `f64`. Numbers pass through, numeric strings are
/// parsed, everything else is a `TypeConversion` error.
pub(crate) fn as_number(field: &str, actual: &Value) -> Result<f64> {
    let coerced = match actual {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    coerced.ok_or_else(|| SubflowError::TypeConversion {
        field: field.to_string(),
        value: actual.to_string(),
    })
}

/// String form used for exact matches.
fn literal(actual: &Value) -> String {
    match actual {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
