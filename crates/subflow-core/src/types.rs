//! Data model: subscribers, rules, tiers, message log and lifecycle events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SubflowError};

/// Flat field map: event payloads, rule-evaluation records and partial updates.
pub type Fields = serde_json::Map<String, Value>;

/// Tier used when nothing else is configured.
pub const DEFAULT_TIER: &str = "Basic";

/// Segment returned when no rule matches.
pub const UNSEGMENTED: &str = "Unsegmented";

/// Fields a typed backend knows how to apply. Everything else is free-form.
pub const RECOGNIZED_FIELDS: &[&str] = &[
    "username",
    "email",
    "phone",
    "tier",
    "is_active",
    "joined_at",
    "last_active",
    "tags",
];

fn default_tier() -> String {
    DEFAULT_TIER.into()
}
fn bool_true() -> bool {
    true
}

/// A subscriber record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_tier")]
    pub tier: String,
    #[serde(default = "bool_true")]
    pub is_active: bool,
    #[serde(default = "Utc::now")]
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub last_active: Option<DateTime<Utc>>,
    /// Segment label / free-form tags.
    #[serde(default)]
    pub tags: Option<String>,
    /// Attributes the typed model does not know about (spend, day counters...).
    #[serde(flatten)]
    pub attributes: Fields,
}

impl Subscriber {
    pub fn new(id: &str, username: &str, email: &str) -> Self {
        Self {
            id: id.to_string(),
            username: username.to_string(),
            email: email.to_string(),
            phone: None,
            tier: default_tier(),
            is_active: true,
            joined_at: Utc::now(),
            last_active: None,
            tags: None,
            attributes: Fields::new(),
        }
    }

    /// Build a subscriber from a stored flat record. The id comes from the key
    /// the record is stored under.
    pub fn from_record(id: &str, record: &Fields) -> Result<Self> {
        let mut sub: Subscriber = serde_json::from_value(Value::Object(record.clone()))
            .map_err(|e| SubflowError::Corruption(format!("subscriber {id}: {e}")))?;
        sub.id = id.to_string();
        Ok(sub)
    }

    /// Flatten into a field map.
    pub fn to_record(&self) -> Fields {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Fields::new(),
        }
    }

    /// Record used for rule evaluation in batch scans: stored fields plus
    /// `name`, `days_subscribed` and `no_activity_days` derived at `now`.
    pub fn record_at(&self, now: DateTime<Utc>) -> Fields {
        let mut record = self.to_record();
        record.insert("name".into(), Value::String(self.username.clone()));
        record.insert(
            "days_subscribed".into(),
            Value::from((now - self.joined_at).num_days()),
        );
        if let Some(last) = self.last_active {
            record.insert("no_activity_days".into(), Value::from((now - last).num_days()));
        }
        record
    }

    /// Address used for outbound messages: email when known, username otherwise.
    pub fn recipient(&self) -> &str {
        if self.email.is_empty() {
            &self.username
        } else {
            &self.email
        }
    }

    /// Apply the recognised fields of a partial update in place.
    /// Returns the keys that were not recognised (and therefore not applied).
    pub fn apply_fields(&mut self, fields: &Fields) -> Result<Vec<String>> {
        let mut ignored = Vec::new();
        for (key, value) in fields {
            match key.as_str() {
                "username" => self.username = string_field(key, value)?,
                "email" => self.email = string_field(key, value)?,
                "tier" => self.tier = string_field(key, value)?,
                "phone" => self.phone = optional_string_field(key, value)?,
                "tags" => self.tags = optional_string_field(key, value)?,
                "is_active" => {
                    self.is_active = value.as_bool().ok_or_else(|| SubflowError::InvalidField {
                        field: key.clone(),
                        reason: format!("expected boolean, got {value}"),
                    })?
                }
                "joined_at" => {
                    self.joined_at = parse_timestamp(key, value)?.ok_or_else(|| {
                        SubflowError::InvalidField {
                            field: key.clone(),
                            reason: "joined_at cannot be null".into(),
                        }
                    })?
                }
                "last_active" => self.last_active = parse_timestamp(key, value)?,
                "id" => {}
                _ => ignored.push(key.clone()),
            }
        }
        Ok(ignored)
    }
}

fn string_field(key: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| SubflowError::InvalidField {
            field: key.to_string(),
            reason: format!("expected string, got {value}"),
        })
}

fn optional_string_field(key: &str, value: &Value) -> Result<Option<String>> {
    if value.is_null() {
        return Ok(None);
    }
    string_field(key, value).map(Some)
}

fn parse_timestamp(key: &str, value: &Value) -> Result<Option<DateTime<Utc>>> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| Some(d.with_timezone(&Utc)))
            .map_err(|e| SubflowError::InvalidField {
                field: key.to_string(),
                reason: format!("bad timestamp '{s}': {e}"),
            }),
        other => Err(SubflowError::InvalidField {
            field: key.to_string(),
            reason: format!("expected RFC 3339 timestamp, got {other}"),
        }),
    }
}

/// Extract a subscriber id from a payload. Numeric ids are accepted and
/// rendered as strings.
pub fn subscriber_id(fields: &Fields) -> Option<String> {
    match fields.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Display name carried by an event payload (`name`, then `username`).
pub fn display_name(fields: &Fields) -> Option<&str> {
    fields
        .get("name")
        .or_else(|| fields.get("username"))
        .and_then(Value::as_str)
}

/// Append-only record of a successful send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageLog {
    pub subscriber_id: String,
    pub sent_at: DateTime<Utc>,
    pub message: String,
}

impl MessageLog {
    pub fn now(subscriber_id: &str, message: &str) -> Self {
        Self {
            subscriber_id: subscriber_id.to_string(),
            sent_at: Utc::now(),
            message: message.to_string(),
        }
    }
}

/// Segmentation rule as written in the rules file:
/// `{"segment": "New", "days_subscribed": "<7"}`.
/// Conditions keep the order they were written in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Fields", into = "Fields")]
pub struct SegmentRule {
    pub segment: String,
    pub conditions: Vec<(String, String)>,
}

impl SegmentRule {
    pub fn new(segment: &str, conditions: &[(&str, &str)]) -> Self {
        Self {
            segment: segment.to_string(),
            conditions: conditions
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Build from a `{field: condition}` map, in map order.
    pub fn from_conditions(segment: String, conditions: Fields) -> Result<Self> {
        let conditions = conditions
            .into_iter()
            .map(|(field, spec)| match spec {
                Value::String(spec) => Ok((field, spec)),
                other => Err(SubflowError::Config(format!(
                    "rule '{segment}': condition for '{field}' must be a string, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            segment,
            conditions,
        })
    }

    /// Conditions as an ordered `{field: condition}` map.
    pub fn conditions_map(&self) -> Fields {
        self.conditions
            .iter()
            .map(|(field, spec)| (field.clone(), Value::String(spec.clone())))
            .collect()
    }

    pub fn condition(&self, field: &str) -> Option<&str> {
        self.conditions
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, spec)| spec.as_str())
    }
}

impl TryFrom<Fields> for SegmentRule {
    type Error = SubflowError;

    fn try_from(record: Fields) -> Result<Self> {
        let mut segment = None;
        let mut conditions = Fields::new();
        for (key, value) in record {
            if key == "segment" {
                segment = Some(value);
            } else {
                conditions.insert(key, value);
            }
        }
        match segment {
            Some(Value::String(segment)) => Self::from_conditions(segment, conditions),
            other => Err(SubflowError::Config(format!(
                "segmentation rule needs a string 'segment', got {}",
                other.unwrap_or(Value::Null)
            ))),
        }
    }
}

impl From<SegmentRule> for Fields {
    fn from(rule: SegmentRule) -> Self {
        let mut record = Fields::new();
        record.insert("segment".into(), Value::String(rule.segment.clone()));
        record.extend(rule.conditions_map());
        record
    }
}

/// Subscription tier. `criteria` is carried for operators but not evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDefinition {
    pub name: String,
    #[serde(default)]
    pub criteria: String,
}

impl TierDefinition {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            criteria: String::new(),
        }
    }
}

/// A message handed to the outbound messaging collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub recipient: String,
    /// "Welcome", "Retention", "ChurnWarning", "Upgrade".
    pub message_type: String,
    pub subject: Option<String>,
    pub body: String,
    pub asset_path: Option<String>,
}

/// Acknowledgement returned by a successful send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub channel: String,
    pub recipient: String,
    pub reference: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Generated content asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// A lifecycle event read from the event feed.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    NewSubscription {
        subscriber: Fields,
        at: Option<DateTime<Utc>>,
    },
    Inactive {
        subscriber: Fields,
        at: Option<DateTime<Utc>>,
    },
    Upgrade {
        subscriber: Fields,
        at: Option<DateTime<Utc>>,
    },
    ChurnCheck {
        at: Option<DateTime<Utc>>,
    },
}

impl LifecycleEvent {
    /// Parse one feed entry. Accepts `event` or `type` as the tag key and
    /// either a nested `subscriber` object or a flat payload.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| SubflowError::EventSource(format!("event is not an object: {value}")))?;
        let tag = obj
            .get("event")
            .or_else(|| obj.get("type"))
            .and_then(Value::as_str)
            .ok_or_else(|| SubflowError::EventSource(format!("event without tag: {value}")))?;

        let at = match obj.get("timestamp") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|e| SubflowError::EventSource(format!("bad timestamp '{s}': {e}")))?
                    .with_timezone(&Utc),
            ),
            Some(other) => {
                return Err(SubflowError::EventSource(format!(
                    "timestamp must be a string, got {other}"
                )));
            }
        };

        let payload = || -> Result<Fields> {
            match obj.get("subscriber") {
                Some(Value::Object(map)) => Ok(map.clone()),
                Some(other) => Err(SubflowError::EventSource(format!(
                    "'{tag}' subscriber must be an object, got {other}"
                ))),
                None => {
                    let mut flat = obj.clone();
                    flat.remove("event");
                    flat.remove("type");
                    flat.remove("timestamp");
                    Ok(flat)
                }
            }
        };

        match tag {
            "new" | "new_subscription" => Ok(Self::NewSubscription {
                subscriber: payload()?,
                at,
            }),
            "inactive" | "inactivity" => Ok(Self::Inactive {
                subscriber: payload()?,
                at,
            }),
            "upgrade" => Ok(Self::Upgrade {
                subscriber: payload()?,
                at,
            }),
            "churn_check" => Ok(Self::ChurnCheck { at }),
            other => Err(SubflowError::EventSource(format!(
                "unknown event tag '{other}'"
            ))),
        }
    }

    /// Canonical tag name.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::NewSubscription { .. } => "new_subscription",
            Self::Inactive { .. } => "inactive",
            Self::Upgrade { .. } => "upgrade",
            Self::ChurnCheck { .. } => "churn_check",
        }
    }

    pub fn subscriber(&self) -> Option<&Fields> {
        match self {
            Self::NewSubscription { subscriber, .. }
            | Self::Inactive { subscriber, .. }
            | Self::Upgrade { subscriber, .. } => Some(subscriber),
            Self::ChurnCheck { .. } => None,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::NewSubscription { at, .. }
            | Self::Inactive { at, .. }
            | Self::Upgrade { at, .. }
            | Self::ChurnCheck { at } => *at,
        }
    }

    /// Subscriber id + tag + timestamp, used to drop replayed events.
    pub fn idempotency_key(&self) -> String {
        let who = self
            .subscriber()
            .and_then(|s| subscriber_id(s).or_else(|| display_name(s).map(str::to_string)))
            .unwrap_or_else(|| "-".into());
        let when = self
            .timestamp()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".into());
        format!("{who}:{}:{when}", self.tag())
    }
}
