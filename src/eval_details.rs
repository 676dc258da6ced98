//! Machine-readable details explaining how a flag or bandit was evaluated.
//!
//! Returned by the `*_details` methods of [`Client`](crate::Client) and attached to assignment
//! events produced by them. The format is meant for debugging and may change between releases.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    eval_details_builder::EvalDetailsBuilder,
    eval_visitor::EvalAssignmentVisitor,
    ufc::{Condition, Shard},
    AssignmentValue, AttributeValue, Attributes, EvaluationError,
};

/// Outcome of flag evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagEvaluationCode {
    /// The subject was assigned a variation by one of the allocations.
    Match,
    /// No configuration is available yet.
    ConfigurationMissing,
    /// The flag is unknown or disabled in this environment.
    FlagUnrecognizedOrDisabled,
    /// No allocation matched, so the caller's default is served.
    DefaultAllocationNull,
    /// The flag's type differs from the type requested by the caller.
    TypeMismatch,
    /// The flag configuration could not be used by this SDK version.
    UnexpectedConfigurationError,
}

/// Outcome of bandit evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BanditEvaluationCode {
    /// An action was selected.
    Match,
    /// No configuration is available yet.
    ConfigurationMissing,
    /// The variation references a bandit whose model is missing.
    UnexpectedConfigurationError,
    /// The variation is not backed by a bandit.
    NonBanditVariation,
    /// The variation is a bandit but the caller supplied no actions.
    NoActionsSuppliedForBandit,
}

/// Result of an evaluation together with its details.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct EvaluationResultWithDetails<T> {
    /// `None` if evaluation produced no value.
    pub variation: Option<T>,
    pub action: Option<String>,
    pub evaluation_details: Arc<EvaluationDetails>,
}

/// Step-by-step account of a flag (and possibly bandit) evaluation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct EvaluationDetails {
    pub flag_key: String,
    pub subject_key: String,
    pub subject_attributes: Arc<Attributes>,
    /// Evaluation time.
    pub timestamp: DateTime<Utc>,

    /// When the SDK received the configuration used.
    pub config_fetched_at: Option<DateTime<Utc>>,
    /// When the server published the configuration used.
    pub config_published_at: Option<DateTime<Utc>>,
    pub environment_name: Option<String>,

    pub bandit_evaluation_code: Option<BanditEvaluationCode>,
    pub flag_evaluation_code: Option<FlagEvaluationCode>,
    /// Human-readable summary of `flag_evaluation_code`.
    pub flag_evaluation_description: String,

    pub variation_key: Option<String>,
    /// `None` if no variation was assigned or the assigned one could not be converted.
    pub variation_value: Option<AssignmentValue>,

    pub bandit_key: Option<String>,
    pub bandit_action: Option<String>,

    /// Every allocation of the flag in evaluation order, including those never reached.
    pub allocations: Vec<AllocationEvaluationDetails>,
}

impl EvaluationDetails {
    /// Details for an evaluation that had no configuration to work with.
    pub(crate) fn configuration_missing(
        flag_key: &str,
        subject_key: &str,
        subject_attributes: Arc<Attributes>,
    ) -> EvaluationDetails {
        let mut builder = EvalDetailsBuilder::new(
            flag_key.to_owned(),
            subject_key.to_owned(),
            subject_attributes,
            Utc::now(),
        );
        builder.on_result(&Err(EvaluationError::ConfigurationMissing));
        builder.build()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct AllocationEvaluationDetails {
    pub key: String,
    /// 1-based position of the allocation within the flag.
    pub order_position: usize,
    pub allocation_evaluation_code: AllocationEvaluationCode,
    pub evaluated_rules: Vec<RuleEvaluationDetails>,
    pub evaluated_splits: Vec<SplitEvaluationDetails>,
}

/// Outcome of a single allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationEvaluationCode {
    /// Not reached because an earlier allocation matched or evaluation stopped before allocations.
    Unevaluated,
    /// Selected for the subject.
    Match,
    /// Evaluated before the allocation's start time.
    BeforeStartTime,
    /// Evaluated after the allocation's end time.
    AfterEndTime,
    /// None of the allocation's rules matched.
    FailingRule,
    /// Rules matched but the subject fell outside every split.
    TrafficExposureMiss,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct RuleEvaluationDetails {
    pub matched: bool,
    pub conditions: Vec<ConditionEvaluationDetails>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ConditionEvaluationDetails {
    pub condition: Condition,
    pub attribute_value: Option<AttributeValue>,
    pub matched: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct SplitEvaluationDetails {
    pub variation_key: String,
    pub matched: bool,
    pub shards: Vec<ShardEvaluationDetails>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ShardEvaluationDetails {
    pub matched: bool,
    pub shard: Shard,
    pub shard_value: u32,
}

impl From<Result<(), EvaluationError>> for FlagEvaluationCode {
    fn from(value: Result<(), EvaluationError>) -> Self {
        value.map_or_else(FlagEvaluationCode::from, |()| FlagEvaluationCode::Match)
    }
}

impl From<EvaluationError> for FlagEvaluationCode {
    fn from(value: EvaluationError) -> Self {
        match value {
            EvaluationError::ConfigurationMissing => FlagEvaluationCode::ConfigurationMissing,
            EvaluationError::FlagNotFound | EvaluationError::FlagDisabled => {
                FlagEvaluationCode::FlagUnrecognizedOrDisabled
            }
            EvaluationError::NoAllocation => FlagEvaluationCode::DefaultAllocationNull,
            EvaluationError::TypeMismatch { .. } => FlagEvaluationCode::TypeMismatch,
            EvaluationError::ConfigurationParseError | EvaluationError::ConfigurationError => {
                FlagEvaluationCode::UnexpectedConfigurationError
            }
        }
    }
}
