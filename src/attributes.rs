use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Type alias for a HashMap representing key-value pairs of attributes.
///
/// Keys are strings representing attribute names.
///
/// # Examples
/// ```
/// # use eppo_client::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.0.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("username".to_owned(), "john_doe".into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Loosely-typed attributes accepted by bandit evaluation.
///
/// Either a flat map of attribute values, or a map holding a numeric and/or a categorical bucket
/// (see [`coerce_context_attributes`]).
pub type AttributeMap = serde_json::Map<String, Value>;

/// Enum representing possible values of an attribute for a subject.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, and `bool` types.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value or absence of value.
    Null,
}

impl AttributeValue {
    /// Return the string value if the attribute is a string.
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// `ContextAttributes` are subject or action attributes split by their semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextAttributes {
    /// Numeric attributes are quantitative (e.g., real numbers) and define a scale.
    ///
    /// Not all numbers are numeric attributes. If a number is used to represent an enumeration or
    /// on/off values, it is a categorical attribute.
    #[serde(
        rename = "numericAttributes",
        alias = "numeric_attributes",
        default
    )]
    pub numeric: HashMap<String, f64>,
    /// Categorical attributes are attributes that have a finite set of values that are not
    /// directly comparable (i.e., enumeration).
    #[serde(
        rename = "categoricalAttributes",
        alias = "categorical_attributes",
        default
    )]
    pub categorical: HashMap<String, String>,
}

const NUMERIC_BUCKET_KEYS: [&str; 2] = ["numeric_attributes", "numericAttributes"];
const CATEGORICAL_BUCKET_KEYS: [&str; 2] = ["categorical_attributes", "categoricalAttributes"];

/// Normalize loosely-typed attributes into [`ContextAttributes`].
///
/// Both bucket spellings are recognized (`numeric_attributes`/`numericAttributes` and
/// `categorical_attributes`/`categoricalAttributes`). Numbers from the numeric bucket stay
/// numeric, anything else is stringified into the categorical bucket. Null values are dropped.
///
/// Returns `None` if neither bucket is present.
///
/// ```
/// # use eppo_client::coerce_context_attributes;
/// let attributes = serde_json::json!({"numeric_attributes": {"age": 5, "x": "bad"}});
/// let coerced = coerce_context_attributes(attributes.as_object().unwrap()).unwrap();
/// assert_eq!(coerced.numeric["age"], 5.0);
/// assert_eq!(coerced.categorical["x"], "bad");
/// ```
pub fn coerce_context_attributes(attributes: &AttributeMap) -> Option<ContextAttributes> {
    let numeric = find_bucket(attributes, &NUMERIC_BUCKET_KEYS);
    let categorical = find_bucket(attributes, &CATEGORICAL_BUCKET_KEYS);
    if numeric.is_none() && categorical.is_none() {
        return None;
    }

    let mut result = ContextAttributes::default();

    for (key, value) in numeric.into_iter().flatten() {
        match value {
            Value::Null => {}
            Value::Number(n) => match n.as_f64() {
                Some(n) => {
                    result.numeric.insert(key.clone(), n);
                }
                None => {
                    result.categorical.insert(key.clone(), n.to_string());
                }
            },
            other => {
                result.categorical.insert(key.clone(), to_categorical(other));
            }
        }
    }

    for (key, value) in categorical.into_iter().flatten() {
        if !value.is_null() {
            result.categorical.insert(key.clone(), to_categorical(value));
        }
    }

    Some(result)
}

/// Find the first spelling of the bucket that holds an object.
fn find_bucket<'a>(attributes: &'a AttributeMap, keys: &[&str]) -> Option<&'a AttributeMap> {
    keys.iter()
        .find_map(|key| attributes.get(*key).and_then(Value::as_object))
}

fn to_categorical(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        // Booleans, numbers, arrays and objects use their compact JSON form.
        other => other.to_string(),
    }
}

impl ContextAttributes {
    /// Split a flat attribute map by value type: numbers become numeric attributes, everything
    /// else non-null becomes categorical.
    pub fn from_flat(attributes: &AttributeMap) -> ContextAttributes {
        attributes
            .iter()
            .fold(ContextAttributes::default(), |mut acc, (key, value)| {
                match value {
                    Value::Null => {}
                    Value::Number(n) if n.as_f64().is_some() => {
                        acc.numeric.insert(key.clone(), n.as_f64().unwrap_or_default());
                    }
                    other => {
                        acc.categorical.insert(key.clone(), to_categorical(other));
                    }
                }
                acc
            })
    }

    /// Convert contextual attributes to generic `Attributes`.
    pub fn to_generic_attributes(&self) -> Attributes {
        let mut result = HashMap::with_capacity(self.numeric.len() + self.categorical.len());
        for (key, value) in self.numeric.iter() {
            result.insert(key.clone(), AttributeValue::Number(*value));
        }
        for (key, value) in self.categorical.iter() {
            result.insert(key.clone(), AttributeValue::String(value.clone()));
        }
        result
    }
}

impl From<Attributes> for ContextAttributes {
    fn from(value: Attributes) -> Self {
        value
            .into_iter()
            .fold(ContextAttributes::default(), |mut acc, (key, value)| {
                match value {
                    AttributeValue::String(value) => {
                        acc.categorical.insert(key, value);
                    }
                    AttributeValue::Number(value) => {
                        acc.numeric.insert(key, value);
                    }
                    AttributeValue::Boolean(value) => {
                        acc.categorical.insert(key, value.to_string());
                    }
                    AttributeValue::Null => {
                        // Nulls are missing values and are ignored.
                    }
                }
                acc
            })
    }
}
