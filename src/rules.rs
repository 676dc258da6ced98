use std::cmp::Ordering;

use regex::Regex;
use semver::Version;

use crate::{
    eval_visitor::EvalRuleVisitor,
    ufc::{Condition, ConditionOperator, ConditionValue, Rule, Value},
    AttributeValue, Attributes,
};

/// Subject identity as seen by rule evaluation.
pub(crate) struct Subject<'a> {
    key: &'a str,
    attributes: &'a Attributes,
    /// Subject key exposed as an attribute, so that rules can target `id`.
    key_attribute: AttributeValue,
}

impl<'a> Subject<'a> {
    pub(crate) fn new(key: &'a str, attributes: &'a Attributes) -> Subject<'a> {
        Subject {
            key,
            attributes,
            key_attribute: AttributeValue::String(key.to_owned()),
        }
    }

    pub(crate) fn key(&self) -> &str {
        self.key
    }

    /// Lookup attribute by name. `id` falls back to the subject key if not set explicitly.
    fn get_attribute(&self, name: &str) -> Option<&AttributeValue> {
        match self.attributes.get(name) {
            Some(value) => Some(value),
            None if name == "id" => Some(&self.key_attribute),
            None => None,
        }
    }
}

impl Rule {
    pub(crate) fn eval<V: EvalRuleVisitor>(&self, visitor: &mut V, subject: &Subject) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.eval(visitor, subject))
    }
}

impl Condition {
    fn eval<V: EvalRuleVisitor>(&self, visitor: &mut V, subject: &Subject) -> bool {
        let attribute = subject.get_attribute(&self.attribute);
        let result = self.operator.eval(attribute, &self.value);
        visitor.on_condition_eval(self, attribute, result);
        result
    }
}

impl ConditionOperator {
    /// Whether `attribute` satisfies the condition. Misconfigured conditions and attributes of an
    /// unsuitable type never match.
    fn eval(&self, attribute: Option<&AttributeValue>, condition_value: &ConditionValue) -> bool {
        self.try_eval(attribute, condition_value).unwrap_or(false)
    }

    fn try_eval(
        &self,
        attribute: Option<&AttributeValue>,
        condition_value: &ConditionValue,
    ) -> Option<bool> {
        let outcome = match (self, condition_value) {
            (Self::Matches | Self::NotMatches, ConditionValue::Single(Value::String(pattern))) => {
                let regex = Regex::new(pattern).ok()?;
                regex.is_match(&stringify(attribute?)?) == (*self == Self::Matches)
            }
            (Self::OneOf | Self::NotOneOf, ConditionValue::Multiple(values)) => {
                let value = stringify(attribute?)?;
                values.contains(&value) == (*self == Self::OneOf)
            }
            (Self::IsNull, ConditionValue::Single(Value::Boolean(want_null))) => {
                let is_null = matches!(attribute, None | Some(AttributeValue::Null));
                is_null == *want_null
            }
            (Self::Gte | Self::Gt | Self::Lte | Self::Lt, ConditionValue::Single(bound)) => {
                let ordering = compare_versions(attribute?, bound)
                    .or_else(|| compare_numbers(attribute?, bound))?;
                match self {
                    Self::Gt => ordering.is_gt(),
                    Self::Gte => ordering.is_ge(),
                    Self::Lt => ordering.is_lt(),
                    _ => ordering.is_le(),
                }
            }
            _ => return None,
        };
        Some(outcome)
    }
}

/// String form of an attribute for regex and list matching. Null has none.
fn stringify(attribute: &AttributeValue) -> Option<String> {
    match attribute {
        AttributeValue::String(s) => Some(s.clone()),
        AttributeValue::Number(n) => Some(n.to_string()),
        AttributeValue::Boolean(b) => Some(b.to_string()),
        AttributeValue::Null => None,
    }
}

/// Semantic version ordering, used only when the bound parses as a version.
fn compare_versions(attribute: &AttributeValue, bound: &Value) -> Option<Ordering> {
    let Value::String(bound) = bound else {
        return None;
    };
    let bound = Version::parse(bound).ok()?;
    let AttributeValue::String(attribute) = attribute else {
        return None;
    };
    Some(Version::parse(attribute).ok()?.cmp(&bound))
}

/// Numeric ordering. Numeric strings on either side are accepted.
fn compare_numbers(attribute: &AttributeValue, bound: &Value) -> Option<Ordering> {
    let bound: f64 = match bound {
        Value::Number(n) => *n,
        Value::String(s) => s.parse().ok()?,
        Value::Boolean(_) => return None,
    };
    let attribute: f64 = match attribute {
        AttributeValue::Number(n) => *n,
        AttributeValue::String(s) => s.parse().ok()?,
        _ => return None,
    };
    attribute.partial_cmp(&bound)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::Subject;
    use crate::{
        eval_visitor::NoopEvalVisitor,
        ufc::{Condition, ConditionOperator, ConditionValue, Rule},
        AttributeValue, Attributes,
    };

    fn eval_rule(rule: &Rule, attributes: &Attributes) -> bool {
        rule.eval(&mut NoopEvalVisitor, &Subject::new("subject", attributes))
    }

    fn op(
        operator: ConditionOperator,
        attribute: Option<AttributeValue>,
        value: impl Into<ConditionValue>,
    ) -> bool {
        operator.eval(attribute.as_ref(), &value.into())
    }

    fn attr(value: impl Into<AttributeValue>) -> Option<AttributeValue> {
        Some(value.into())
    }

    #[test]
    fn regex_operators() {
        use ConditionOperator::{Matches, NotMatches};

        assert!(op(Matches, attr("alice@eppo.cloud"), r"@eppo\.cloud$"));
        assert!(!op(Matches, attr("alice@example.com"), r"@eppo\.cloud$"));
        assert!(op(Matches, attr(1234.0), "^12"));
        assert!(op(NotMatches, attr("alice@example.com"), r"@eppo\.cloud$"));
        assert!(!op(NotMatches, attr("alice@eppo.cloud"), r"@eppo\.cloud$"));
        // Missing attributes match neither operator.
        assert!(!op(Matches, None, ".*"));
        assert!(!op(NotMatches, None, ".*"));
    }

    #[test]
    fn invalid_regex_never_matches() {
        assert!(!op(ConditionOperator::Matches, attr("abc"), "("));
        assert!(!op(ConditionOperator::NotMatches, attr("abc"), "("));
    }

    #[test]
    fn list_operators() {
        use ConditionOperator::{NotOneOf, OneOf};
        let plans = || vec!["free", "pro"];

        assert!(op(OneOf, attr("pro"), plans()));
        assert!(!op(OneOf, attr("Pro"), plans()));
        assert!(op(NotOneOf, attr("enterprise"), plans()));
        assert!(!op(NotOneOf, attr("free"), plans()));
        assert!(!op(OneOf, None, plans()));
        assert!(!op(NotOneOf, None, plans()));
        assert!(!op(NotOneOf, attr(AttributeValue::Null), plans()));
    }

    #[test]
    fn list_operators_stringify_attributes() {
        use ConditionOperator::OneOf;

        assert!(op(OneOf, attr(7.0), vec!["7"]));
        assert!(!op(OneOf, attr(7.5), vec!["7"]));
        assert!(op(OneOf, attr(true), vec!["true"]));
        assert!(!op(OneOf, attr(1.0), vec!["true"]));
    }

    #[test]
    fn is_null_operator() {
        use ConditionOperator::IsNull;

        assert!(op(IsNull, None, true));
        assert!(op(IsNull, attr(AttributeValue::Null), true));
        assert!(!op(IsNull, attr("x"), true));
        assert!(op(IsNull, attr(0.0), false));
        assert!(!op(IsNull, None, false));
        // Non-boolean operand is a misconfiguration.
        assert!(!op(IsNull, None, "true"));
    }

    #[test]
    fn numeric_ordering() {
        use ConditionOperator::{Gt, Gte, Lt, Lte};

        let cases = [
            (Gt, 21.0, true),
            (Gt, 20.0, false),
            (Gte, 20.0, true),
            (Gte, 19.5, false),
            (Lt, 19.5, true),
            (Lt, 20.0, false),
            (Lte, 20.0, true),
            (Lte, 20.5, false),
        ];
        for (operator, age, expected) in cases {
            assert_eq!(op(operator, attr(age), 20.0), expected, "{operator:?} {age}");
        }

        assert!(op(Gt, attr("25"), "20"));
        assert!(!op(Gt, attr("twenty-five"), 20.0));
        assert!(!op(Gt, attr(true), 0.0));
    }

    #[test]
    fn version_ordering() {
        use ConditionOperator::{Gt, Gte, Lt, Lte};

        assert!(op(Gte, attr("2.10.0"), "2.9.0"));
        assert!(op(Gte, attr("2.9.0"), "2.9.0"));
        assert!(!op(Gt, attr("2.9.0"), "2.9.0"));
        assert!(op(Lt, attr("2.9.1"), "2.10.0"));
        assert!(op(Lte, attr("1.0.0-beta"), "1.0.0"));
        // A version bound never falls back to numbers.
        assert!(!op(Gte, attr("3"), "2.9.0"));
    }

    #[test]
    fn rule_without_conditions_matches() {
        let rule = Rule { conditions: vec![] };
        assert!(eval_rule(&rule, &HashMap::new()));
    }

    #[test]
    fn all_conditions_must_match() {
        let rule = Rule {
            conditions: vec![
                Condition {
                    attribute: "age".into(),
                    operator: ConditionOperator::Gt,
                    value: 18.0.into(),
                },
                Condition {
                    attribute: "age".into(),
                    operator: ConditionOperator::Lt,
                    value: 100.0.into(),
                },
            ],
        };
        assert!(eval_rule(&rule, &HashMap::from([("age".into(), 20.0.into())])));
        assert!(!eval_rule(&rule, &HashMap::from([("age".into(), 17.0.into())])));
        assert!(!eval_rule(&rule, &HashMap::from([("age".into(), 110.0.into())])));
    }

    #[test]
    fn missing_attribute_fails_comparison() {
        let rule = Rule {
            conditions: vec![Condition {
                attribute: "age".into(),
                operator: ConditionOperator::Gt,
                value: 10.0.into(),
            }],
        };
        assert!(!eval_rule(&rule, &HashMap::from([("name".into(), "alice".into())])));
    }

    #[test]
    fn id_attribute_falls_back_to_subject_key() {
        let rule = Rule {
            conditions: vec![Condition {
                attribute: "id".into(),
                operator: ConditionOperator::OneOf,
                value: vec!["subject"].into(),
            }],
        };
        assert!(eval_rule(&rule, &HashMap::new()));
        assert!(!eval_rule(&rule, &HashMap::from([("id".into(), "other".into())])));
    }
}
