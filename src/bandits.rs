//! Contextual bandits: configuration models and action selection.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    eval::get_assignment_with_visitor,
    eval_details::{BanditEvaluationCode, EvaluationDetails},
    eval_details_builder::EvalDetailsBuilder,
    eval_visitor::{EvalBanditVisitor, NoopEvalVisitor},
    events::{AssignmentEvent, BanditEvent, EventMetaData},
    sharder::get_md5_shard,
    ufc::{Timestamp, VariationType},
    Configuration, ContextAttributes,
};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct BanditResponse {
    pub bandits: HashMap<String, BanditConfiguration>,
    pub updated_at: Timestamp,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct BanditConfiguration {
    pub bandit_key: String,
    pub model_name: String,
    pub model_version: String,
    pub model_data: BanditModelData,
    pub updated_at: Timestamp,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct BanditModelData {
    pub gamma: f64,
    pub default_action_score: f64,
    pub action_probability_floor: f64,
    pub coefficients: HashMap<String, BanditCoefficients>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct BanditCoefficients {
    pub action_key: String,
    pub intercept: f64,
    pub subject_numeric_coefficients: Vec<BanditNumericAttributeCoefficient>,
    pub subject_categorical_coefficients: Vec<BanditCategoricalAttributeCoefficient>,
    pub action_numeric_coefficients: Vec<BanditNumericAttributeCoefficient>,
    pub action_categorical_coefficients: Vec<BanditCategoricalAttributeCoefficient>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct BanditNumericAttributeCoefficient {
    pub attribute_key: String,
    pub coefficient: f64,
    pub missing_value_coefficient: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct BanditCategoricalAttributeCoefficient {
    pub attribute_key: String,
    pub value_coefficients: HashMap<String, f64>,
    pub missing_value_coefficient: f64,
}

/// Result of evaluating a bandit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditResult {
    /// Selected variation from the feature flag.
    pub variation: String,
    /// Selected action if any.
    pub action: Option<String>,
    /// Flag assignment event that needs to be logged to analytics storage.
    pub assignment_event: Option<AssignmentEvent>,
    /// Bandit assignment event that needs to be logged to analytics storage.
    pub bandit_event: Option<BanditEvent>,
}

/// Action picked by a bandit model for one subject.
#[derive(Debug)]
struct Selection {
    action_key: String,
    probability: f64,
    /// Score of the best action minus the score of the selected one.
    optimality_gap: f64,
}

/// Shards used to shuffle and pick actions. Not configurable.
const ACTION_SHARDS: u32 = 10_000;

/// Evaluate the string flag `flag_key` and, when the assigned variation is backed by a bandit,
/// pick one of `actions` for the subject.
pub(crate) fn get_bandit_action(
    configuration: Option<&Configuration>,
    flag_key: &str,
    subject_key: &str,
    subject_attributes: &ContextAttributes,
    actions: &HashMap<String, ContextAttributes>,
    default_variation: &str,
    now: DateTime<Utc>,
) -> BanditResult {
    get_bandit_action_with_visitor(
        &mut NoopEvalVisitor,
        configuration,
        flag_key,
        subject_key,
        subject_attributes,
        actions,
        default_variation,
        now,
    )
}

/// Like [`get_bandit_action`], also recording how the result was reached.
pub(crate) fn get_bandit_action_details(
    configuration: Option<&Configuration>,
    flag_key: &str,
    subject_key: &str,
    subject_attributes: &ContextAttributes,
    actions: &HashMap<String, ContextAttributes>,
    default_variation: &str,
    now: DateTime<Utc>,
) -> (BanditResult, EvaluationDetails) {
    let mut builder = EvalDetailsBuilder::new(
        flag_key.to_owned(),
        subject_key.to_owned(),
        Arc::new(subject_attributes.to_generic_attributes()),
        now,
    );
    let mut result = get_bandit_action_with_visitor(
        &mut builder,
        configuration,
        flag_key,
        subject_key,
        subject_attributes,
        actions,
        default_variation,
        now,
    );
    let details = builder.build();
    if let Some(event) = result.assignment_event.as_mut() {
        event.evaluation_details = Some(Arc::new(details.clone()));
    }
    (result, details)
}

impl BanditResult {
    fn without_action(variation: String, assignment_event: Option<AssignmentEvent>) -> Self {
        BanditResult {
            variation,
            action: None,
            assignment_event,
            bandit_event: None,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn get_bandit_action_with_visitor<V: EvalBanditVisitor>(
    visitor: &mut V,
    configuration: Option<&Configuration>,
    flag_key: &str,
    subject_key: &str,
    subject_attributes: &ContextAttributes,
    actions: &HashMap<String, ContextAttributes>,
    default_variation: &str,
    now: DateTime<Utc>,
) -> BanditResult {
    let Some(configuration) = configuration else {
        let result = BanditResult::without_action(default_variation.to_owned(), None);
        visitor.on_result(BanditEvaluationCode::ConfigurationMissing, &result);
        return result;
    };
    visitor.on_configuration(configuration);

    let flag_attributes = Arc::new(subject_attributes.to_generic_attributes());
    let assigned = get_assignment_with_visitor(
        Some(configuration),
        &mut visitor.visit_assignment(),
        flag_key,
        subject_key,
        &flag_attributes,
        Some(VariationType::String),
        now,
    )
    .ok()
    .and_then(|assignment| Some((assignment.value.to_string()?, assignment.event)));
    let (variation, assignment_event) =
        assigned.unwrap_or_else(|| (default_variation.to_owned(), None));

    let Some(bandit_key) = configuration.get_bandit_key(flag_key, &variation) else {
        let result = BanditResult::without_action(variation, assignment_event);
        visitor.on_result(BanditEvaluationCode::NonBanditVariation, &result);
        return result;
    };
    visitor.on_bandit_key(bandit_key);

    let Some(bandit) = configuration.get_bandit(bandit_key) else {
        // Flags reference a bandit that the bandit configuration does not have.
        log::warn!(target: "eppo", flag_key, bandit_key; "bandit model is missing from configuration");
        let result = BanditResult::without_action(variation, assignment_event);
        visitor.on_result(BanditEvaluationCode::UnexpectedConfigurationError, &result);
        return result;
    };

    let selection =
        match bandit
            .model_data
            .select_action(flag_key, subject_key, subject_attributes, actions)
        {
            Ok(selection) => selection,
            Err(code) => {
                let result = BanditResult::without_action(variation, assignment_event);
                visitor.on_result(code, &result);
                return result;
            }
        };

    let action_attributes = actions
        .get(&selection.action_key)
        .cloned()
        .unwrap_or_default();
    let bandit_event = BanditEvent {
        flag_key: flag_key.to_owned(),
        bandit_key: bandit_key.to_owned(),
        subject: subject_key.to_owned(),
        action: selection.action_key.clone(),
        action_probability: selection.probability,
        optimality_gap: selection.optimality_gap,
        model_version: bandit.model_version.clone(),
        timestamp: now.to_rfc3339(),
        subject_numeric_attributes: subject_attributes.numeric.clone(),
        subject_categorical_attributes: subject_attributes.categorical.clone(),
        action_numeric_attributes: action_attributes.numeric,
        action_categorical_attributes: action_attributes.categorical,
        meta_data: EventMetaData::current(),
    };

    let result = BanditResult {
        variation,
        action: Some(selection.action_key),
        assignment_event,
        bandit_event: Some(bandit_event),
    };
    visitor.on_result(BanditEvaluationCode::Match, &result);
    result
}

impl BanditModelData {
    fn select_action(
        &self,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &ContextAttributes,
        actions: &HashMap<String, ContextAttributes>,
    ) -> Result<Selection, BanditEvaluationCode> {
        let mut ranked = actions
            .iter()
            .map(|(key, action_attributes)| {
                let score = self.score(key, subject_attributes, action_attributes);
                (key.as_str(), score)
            })
            .collect::<Vec<_>>();
        // Best score first. Ties go to the lexicographically smaller key.
        ranked.sort_by(|a, b| f64::total_cmp(&b.1, &a.1).then_with(|| a.0.cmp(b.0)));

        let &(_, best_score) = ranked
            .first()
            .ok_or(BanditEvaluationCode::NoActionsSuppliedForBandit)?;
        let probabilities = self.action_probabilities(&ranked);

        // Per-subject shuffle, so that a small change in probabilities moves subjects between
        // many actions rather than all onto the same one.
        let mut shuffled = ranked.iter().map(|&(key, _)| key).collect::<Vec<_>>();
        shuffled.sort_by_cached_key(|&key| {
            let shard = get_md5_shard(&[flag_key, "-", subject_key, "-", key], ACTION_SHARDS);
            (shard, key)
        });

        let threshold = f64::from(get_md5_shard(&[flag_key, "-", subject_key], ACTION_SHARDS))
            / f64::from(ACTION_SHARDS);
        let mut cumulative = 0.0;
        let selected = shuffled
            .iter()
            .copied()
            .find(|&key| {
                cumulative += probabilities[key];
                cumulative > threshold
            })
            .or_else(|| shuffled.last().copied())
            .ok_or(BanditEvaluationCode::NoActionsSuppliedForBandit)?;

        let selected_score = ranked
            .iter()
            .find_map(|&(key, score)| (key == selected).then_some(score))
            .unwrap_or(best_score);

        Ok(Selection {
            action_key: selected.to_owned(),
            probability: probabilities[selected],
            optimality_gap: best_score - selected_score,
        })
    }

    /// Probability of each action in `ranked` (best first). Every other action gets at least
    /// `action_probability_floor / n`, and the best action takes what is left.
    fn action_probabilities<'a>(&self, ranked: &[(&'a str, f64)]) -> HashMap<&'a str, f64> {
        let Some((&(best_key, best_score), others)) = ranked.split_first() else {
            return HashMap::new();
        };

        let n = ranked.len() as f64;
        let floor = self.action_probability_floor / n;
        let mut probabilities = others
            .iter()
            .map(|&(key, score)| {
                let p = 1.0 / (n + self.gamma * (best_score - score));
                (key, p.max(floor))
            })
            .collect::<HashMap<_, _>>();

        let taken: f64 = probabilities.values().sum();
        probabilities.insert(best_key, (1.0 - taken).max(0.0));
        probabilities
    }

    fn score(
        &self,
        action_key: &str,
        subject_attributes: &ContextAttributes,
        action_attributes: &ContextAttributes,
    ) -> f64 {
        match self.coefficients.get(action_key) {
            Some(coefficients) => coefficients.score(subject_attributes, action_attributes),
            None => self.default_action_score,
        }
    }
}

impl BanditCoefficients {
    fn score(&self, subject: &ContextAttributes, action: &ContextAttributes) -> f64 {
        self.intercept
            + numeric_score(&subject.numeric, &self.subject_numeric_coefficients)
            + categorical_score(&subject.categorical, &self.subject_categorical_coefficients)
            + numeric_score(&action.numeric, &self.action_numeric_coefficients)
            + categorical_score(&action.categorical, &self.action_categorical_coefficients)
    }
}

fn numeric_score(
    values: &HashMap<String, f64>,
    coefficients: &[BanditNumericAttributeCoefficient],
) -> f64 {
    coefficients
        .iter()
        .map(|c| match values.get(&c.attribute_key) {
            // Infinity or NaN would poison every score downstream.
            Some(value) if value.is_finite() => value * c.coefficient,
            _ => c.missing_value_coefficient,
        })
        .sum()
}

fn categorical_score(
    values: &HashMap<String, String>,
    coefficients: &[BanditCategoricalAttributeCoefficient],
) -> f64 {
    coefficients
        .iter()
        .map(|c| {
            values
                .get(&c.attribute_key)
                .and_then(|value| c.value_coefficients.get(value))
                .copied()
                .unwrap_or(c.missing_value_coefficient)
        })
        .sum()
}
