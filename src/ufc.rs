//! Universal Flag Configuration (UFC): the JSON document describing every flag of an environment.
//!
//! Types here mirror the wire format one-to-one. Evaluation lives in `eval` and `rules`.
use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::AssignmentValue;

#[allow(missing_docs)]
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Flag configuration of one environment, as returned by the flag configuration endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UniversalFlagConfig {
    /// Publication time of this configuration.
    pub created_at: Timestamp,
    #[allow(missing_docs)]
    pub environment: Environment,
    /// Flags by key. A flag the SDK cannot parse is kept as [`TryParse::ParseFailed`] and
    /// evaluates to the default value, leaving other flags usable.
    pub flags: HashMap<String, TryParse<Flag>>,
    /// Flag variations that are backed by a bandit, keyed by bandit key. Bandit models are
    /// fetched from a separate endpoint.
    #[serde(default)]
    pub bandits: HashMap<String, Vec<BanditVariation>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Environment {
    pub name: String,
}

/// Either a parsed `T` or the raw JSON that failed to parse as `T`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Flag {
    pub key: String,
    pub enabled: bool,
    pub variation_type: VariationType,
    pub variations: HashMap<String, Variation>,
    /// Evaluated in order. The first allocation matching the subject wins.
    pub allocations: Vec<Allocation>,
    #[serde(default = "Flag::default_total_shards")]
    pub total_shards: u32,
}

impl Flag {
    fn default_total_shards() -> u32 {
        10_000
    }
}

/// Value type of a flag, fixed when the flag is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum VariationType {
    String,
    Integer,
    Numeric,
    Boolean,
    Json,
}

/// Raw variation value. Its meaning depends on the flag's [`VariationType`]: numbers may be
/// integers or floats, and strings may be plain strings or serialized JSON.
#[derive(Debug, Clone, PartialEq, From, Serialize, Deserialize)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum Value {
    Boolean(bool),
    Number(f64),
    String(String),
}

impl Value {
    /// Interpret the raw value as `ty`. Returns `None` if the value does not fit the type.
    pub(crate) fn to_assignment_value(&self, ty: VariationType) -> Option<AssignmentValue> {
        let value = match (ty, self) {
            (VariationType::String, Value::String(s)) => AssignmentValue::String(s.clone()),
            (VariationType::Integer, Value::Number(n)) => AssignmentValue::Integer(to_integer(*n)?),
            (VariationType::Numeric, Value::Number(n)) => AssignmentValue::Numeric(*n),
            (VariationType::Boolean, Value::Boolean(b)) => AssignmentValue::Boolean(*b),
            (VariationType::Json, Value::String(s)) => {
                AssignmentValue::Json(serde_json::from_str(s).ok()?)
            }
            _ => return None,
        };
        Some(value)
    }
}

/// Integral floats only. Values beyond `i64` range are rejected.
fn to_integer(n: f64) -> Option<i64> {
    let i = n as i64;
    (i as f64 == n).then_some(i)
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Variation {
    pub key: String,
    pub value: Value,
}

/// A targeted slice of traffic: subjects passing `rules` within the time window are split
/// between variations by `splits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Allocation {
    pub key: String,
    /// Any rule matching is enough. No rules means everyone matches.
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub start_at: Option<Timestamp>,
    #[serde(default)]
    pub end_at: Option<Timestamp>,
    pub splits: Vec<Split>,
    /// Whether assignments from this allocation produce an [`AssignmentEvent`](crate::AssignmentEvent).
    #[serde(default = "Allocation::default_do_log")]
    pub do_log: bool,
}

impl Allocation {
    fn default_do_log() -> bool {
        true
    }
}

/// Conjunction of conditions.
#[derive(Debug, Clone, From, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Rule {
    pub conditions: Vec<Condition>,
}

/// Checks subject `attribute` against `value` with `operator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Condition {
    pub operator: ConditionOperator,
    pub attribute: String,
    pub value: ConditionValue,
}

/// Comparison performed by a [`Condition`].
///
/// Every operator except `IS_NULL` fails when the attribute is missing or null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    /// Attribute, converted to a string, matches the regex in the condition value.
    Matches,
    /// Attribute, converted to a string, does not match the regex in the condition value.
    NotMatches,
    /// Greater than or equal. Compares semantic versions if both sides parse as versions, numbers
    /// otherwise.
    Gte,
    /// Greater than. See [`ConditionOperator::Gte`].
    Gt,
    /// Less than or equal. See [`ConditionOperator::Gte`].
    Lte,
    /// Less than. See [`ConditionOperator::Gte`].
    Lt,
    /// Attribute, converted to a string, is one of the listed strings. Case-sensitive.
    OneOf,
    /// Attribute, converted to a string, is none of the listed strings.
    NotOneOf,
    /// Condition value `true` requires a null or missing attribute, `false` a present one.
    IsNull,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum ConditionValue {
    Single(Value),
    /// Lists are string-only on the wire.
    Multiple(Vec<String>),
}

impl<T: Into<Value>> From<T> for ConditionValue {
    fn from(value: T) -> Self {
        ConditionValue::Single(value.into())
    }
}

impl From<Vec<String>> for ConditionValue {
    fn from(value: Vec<String>) -> Self {
        ConditionValue::Multiple(value)
    }
}

impl From<Vec<&str>> for ConditionValue {
    fn from(value: Vec<&str>) -> Self {
        ConditionValue::Multiple(value.into_iter().map(str::to_owned).collect())
    }
}

/// Assigns `variation_key` to subjects falling into every one of `shards`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Split {
    /// An empty list matches every subject.
    pub shards: Vec<Shard>,
    pub variation_key: String,
    /// Copied verbatim into the assignment event.
    #[serde(default)]
    pub extra_logging: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Shard {
    pub salt: String,
    pub ranges: Vec<ShardRange>,
}

/// Half-open range `[start, end)` of shard numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct ShardRange {
    pub start: u32,
    pub end: u32,
}

impl ShardRange {
    pub(crate) fn contains(&self, v: u32) -> bool {
        (self.start..self.end).contains(&v)
    }
}

/// Links a string flag variation to the bandit that picks actions for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct BanditVariation {
    /// Bandit key.
    pub key: String,
    pub flag_key: String,
    pub variation_key: String,
    pub variation_value: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ShardRange, TryParse, UniversalFlagConfig, Value, VariationType};
    use crate::AssignmentValue;

    #[test]
    fn unknown_flag_shape_does_not_break_other_flags() {
        let flag = |key: &str, variation_type: &str| {
            json!({
                "key": key,
                "enabled": true,
                "variationType": variation_type,
                "variations": {},
                "allocations": []
            })
        };
        let ufc: UniversalFlagConfig = serde_json::from_value(json!({
            "createdAt": "2024-07-18T00:00:00Z",
            "environment": {"name": "Test"},
            "flags": {
                "known": flag("known", "BOOLEAN"),
                "future": flag("future", "DATE_RANGE")
            }
        }))
        .unwrap();

        match &ufc.flags["known"] {
            TryParse::Parsed(flag) => assert_eq!(flag.total_shards, 10_000),
            other => panic!("expected parsed flag, got {other:?}"),
        }
        assert!(matches!(ufc.flags["future"], TryParse::ParseFailed(_)));
        assert!(ufc.bandits.is_empty());
    }

    #[test]
    fn value_conversion_respects_variation_type() {
        assert_eq!(
            Value::Number(42.0).to_assignment_value(VariationType::Integer),
            Some(AssignmentValue::Integer(42))
        );
        assert_eq!(
            Value::Number(42.5).to_assignment_value(VariationType::Integer),
            None
        );
        assert_eq!(
            Value::Number(1e300).to_assignment_value(VariationType::Integer),
            None
        );
        assert_eq!(
            Value::Number(42.5).to_assignment_value(VariationType::Numeric),
            Some(AssignmentValue::Numeric(42.5))
        );
        assert_eq!(
            Value::from("red").to_assignment_value(VariationType::Boolean),
            None
        );
        assert_eq!(
            Value::from(r#"{"a":1}"#).to_assignment_value(VariationType::Json),
            Some(AssignmentValue::Json(json!({"a": 1})))
        );
        assert_eq!(
            Value::from("not json").to_assignment_value(VariationType::Json),
            None
        );
    }

    #[test]
    fn shard_range_is_half_open() {
        let range = ShardRange { start: 10, end: 20 };
        assert!(!range.contains(9));
        assert!(range.contains(10));
        assert!(range.contains(19));
        assert!(!range.contains(20));
    }
}
