use serde::Serialize;

use crate::{events::AssignmentEvent, ufc::VariationType};

/// Value served to a subject, with the event to log if the allocation asks for it.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[allow(missing_docs)]
    pub value: AssignmentValue,
    /// `None` when the matched allocation has `doLog` turned off.
    pub event: Option<AssignmentEvent>,
}

/// A typed flag value.
///
/// Serializes as `{"type": ..., "value": ...}` where `type` is the [`VariationType`] name, for
/// example `{"type":"JSON","value":{"hello":"world"}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum AssignmentValue {
    String(String),
    Integer(i64),
    Numeric(f64),
    Boolean(bool),
    Json(serde_json::Value),
}

impl AssignmentValue {
    /// ```
    /// # use eppo_client::{AssignmentValue, VariationType};
    /// assert_eq!(AssignmentValue::Integer(42).variation_type(), VariationType::Integer);
    /// ```
    pub fn variation_type(&self) -> VariationType {
        match self {
            Self::String(_) => VariationType::String,
            Self::Integer(_) => VariationType::Integer,
            Self::Numeric(_) => VariationType::Numeric,
            Self::Boolean(_) => VariationType::Boolean,
            Self::Json(_) => VariationType::Json,
        }
    }

    /// `Some` for string values only. Same for the other accessors and their variants.
    pub fn as_str(&self) -> Option<&str> {
        if let Self::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    #[allow(missing_docs, clippy::inherent_to_string)]
    pub fn to_string(self) -> Option<String> {
        if let Self::String(s) = self {
            Some(s)
        } else {
            None
        }
    }

    #[allow(missing_docs)]
    pub fn as_integer(&self) -> Option<i64> {
        if let Self::Integer(i) = *self {
            Some(i)
        } else {
            None
        }
    }

    #[allow(missing_docs)]
    pub fn as_numeric(&self) -> Option<f64> {
        if let Self::Numeric(n) = *self {
            Some(n)
        } else {
            None
        }
    }

    #[allow(missing_docs)]
    pub fn as_boolean(&self) -> Option<bool> {
        if let Self::Boolean(b) = *self {
            Some(b)
        } else {
            None
        }
    }

    #[allow(missing_docs)]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        if let Self::Json(v) = self {
            Some(v)
        } else {
            None
        }
    }

    #[allow(missing_docs)]
    pub fn to_json(self) -> Option<serde_json::Value> {
        if let Self::Json(v) = self {
            Some(v)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::AssignmentValue;
    use crate::VariationType;

    #[test]
    fn serializes_with_type_tag() {
        assert_eq!(
            serde_json::to_value(AssignmentValue::Json(json!({"hello": "world"}))).unwrap(),
            json!({"type": "JSON", "value": {"hello": "world"}})
        );
        assert_eq!(
            serde_json::to_value(AssignmentValue::Integer(3)).unwrap(),
            json!({"type": "INTEGER", "value": 3})
        );
    }

    #[test]
    fn accessors_only_match_own_variant() {
        let value = AssignmentValue::Numeric(3.5);
        assert_eq!(value.as_numeric(), Some(3.5));
        assert_eq!(value.as_integer(), None);
        assert_eq!(value.as_boolean(), None);
        assert_eq!(value.variation_type(), VariationType::Numeric);

        assert_eq!(
            AssignmentValue::String("red".to_owned()).to_string(),
            Some("red".to_owned())
        );
        assert_eq!(AssignmentValue::Boolean(true).to_json(), None);
    }
}
