use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    eval_details::EvaluationResultWithDetails,
    eval_details_builder::EvalDetailsBuilder,
    eval_visitor::{
        EvalAllocationVisitor, EvalAssignmentVisitor, EvalRuleVisitor, EvalSplitVisitor,
        NoopEvalVisitor,
    },
    events::{AssignmentEvent, EventMetaData},
    rules::Subject,
    sharder::get_md5_shard,
    ufc::{Allocation, Flag, Shard, Split, Timestamp, TryParse, UniversalFlagConfig, VariationType},
    Assignment, AssignmentValue, Attributes, Configuration, EvaluationError,
};

/// Evaluate `flag_key` for the subject. `expected_type`, if set, must match the flag's type.
pub(crate) fn get_assignment(
    configuration: Option<&Configuration>,
    flag_key: &str,
    subject_key: &str,
    subject_attributes: &Arc<Attributes>,
    expected_type: Option<VariationType>,
    now: DateTime<Utc>,
) -> Result<Assignment, EvaluationError> {
    get_assignment_with_visitor(
        configuration,
        &mut NoopEvalVisitor,
        flag_key,
        subject_key,
        subject_attributes,
        expected_type,
        now,
    )
}

/// Like [`get_assignment`], recording every step of the evaluation. The assignment event, if
/// any, carries the same details.
pub(crate) fn get_assignment_details(
    configuration: Option<&Configuration>,
    flag_key: &str,
    subject_key: &str,
    subject_attributes: &Arc<Attributes>,
    expected_type: Option<VariationType>,
    now: DateTime<Utc>,
) -> (
    EvaluationResultWithDetails<AssignmentValue>,
    Option<AssignmentEvent>,
) {
    let mut builder = EvalDetailsBuilder::new(
        flag_key.to_owned(),
        subject_key.to_owned(),
        Arc::clone(subject_attributes),
        now,
    );
    let assignment = get_assignment_with_visitor(
        configuration,
        &mut builder,
        flag_key,
        subject_key,
        subject_attributes,
        expected_type,
        now,
    )
    .ok();
    let evaluation_details = Arc::new(builder.build());

    let (variation, event) = match assignment {
        Some(Assignment { value, event }) => {
            let event = event.map(|event| AssignmentEvent {
                evaluation_details: Some(Arc::clone(&evaluation_details)),
                ..event
            });
            (Some(value), event)
        }
        None => (None, None),
    };

    let result = EvaluationResultWithDetails {
        variation,
        action: None,
        evaluation_details,
    };
    (result, event)
}

/// Shared by flag and bandit evaluation.
pub(crate) fn get_assignment_with_visitor<V: EvalAssignmentVisitor>(
    configuration: Option<&Configuration>,
    visitor: &mut V,
    flag_key: &str,
    subject_key: &str,
    subject_attributes: &Arc<Attributes>,
    expected_type: Option<VariationType>,
    now: DateTime<Utc>,
) -> Result<Assignment, EvaluationError> {
    let result = configuration
        .ok_or(EvaluationError::ConfigurationMissing)
        .and_then(|configuration| {
            visitor.on_configuration(configuration);
            configuration.flags.evaluate(
                visitor,
                flag_key,
                subject_key,
                subject_attributes,
                expected_type,
                now,
            )
        });
    visitor.on_result(&result);

    match &result {
        Ok(assignment) => log::trace!(target: "eppo",
                                      flag_key,
                                      subject_key,
                                      assignment:serde = assignment.value;
                                      "assigned"),
        Err(err) => log::trace!(target: "eppo",
                                flag_key,
                                subject_key;
                                "no assignment: {err}"),
    }

    result
}

impl UniversalFlagConfig {
    fn evaluate<V: EvalAssignmentVisitor>(
        &self,
        visitor: &mut V,
        flag_key: &str,
        subject_key: &str,
        subject_attributes: &Arc<Attributes>,
        expected_type: Option<VariationType>,
        now: DateTime<Utc>,
    ) -> Result<Assignment, EvaluationError> {
        let flag = match self.flags.get(flag_key) {
            Some(TryParse::Parsed(flag)) => flag,
            Some(TryParse::ParseFailed(_)) => return Err(EvaluationError::ConfigurationParseError),
            None => return Err(EvaluationError::FlagNotFound),
        };
        visitor.on_flag_configuration(flag);

        if !flag.enabled {
            return Err(EvaluationError::FlagDisabled);
        }
        match expected_type {
            Some(expected) if expected != flag.variation_type => {
                Err(EvaluationError::TypeMismatch {
                    expected,
                    found: flag.variation_type,
                })
            }
            _ => flag.assign(visitor, subject_key, subject_attributes, now),
        }
    }
}

impl Flag {
    /// Walk allocations in order and serve the variation of the first one that matches.
    fn assign<V: EvalAssignmentVisitor>(
        &self,
        visitor: &mut V,
        subject_key: &str,
        subject_attributes: &Arc<Attributes>,
        now: DateTime<Utc>,
    ) -> Result<Assignment, EvaluationError> {
        let subject = Subject::new(subject_key, subject_attributes);

        let (allocation, split) = self
            .allocations
            .iter()
            .find_map(|allocation| {
                let mut visitor = visitor.visit_allocation(allocation);
                let outcome = allocation.select_split(&mut visitor, &subject, self.total_shards, now);
                visitor.on_result(outcome);
                Some((allocation, outcome.ok()?))
            })
            .ok_or(EvaluationError::NoAllocation)?;

        let Some(variation) = self.variations.get(&split.variation_key) else {
            log::warn!(target: "eppo",
                       flag_key = self.key.as_str(),
                       variation_key = split.variation_key.as_str();
                       "split points to an unknown variation");
            return Err(EvaluationError::ConfigurationError);
        };
        let value = variation
            .value
            .to_assignment_value(self.variation_type)
            .ok_or(EvaluationError::ConfigurationError)?;

        let event = if allocation.do_log {
            Some(AssignmentEvent {
                feature_flag: self.key.clone(),
                allocation: allocation.key.clone(),
                experiment: format!("{}-{}", self.key, allocation.key),
                variation: variation.key.clone(),
                subject: subject_key.to_owned(),
                subject_attributes: Arc::clone(subject_attributes),
                timestamp: now,
                meta_data: EventMetaData::current(),
                extra_logging: split.extra_logging.clone(),
                evaluation_details: None,
            })
        } else {
            None
        };

        Ok(Assignment { value, event })
    }
}

/// Why an allocation was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum AllocationNonMatchReason {
    BeforeStartDate,
    AfterEndDate,
    FailingRule,
    TrafficExposureMiss,
}

impl Allocation {
    fn select_split<V: EvalAllocationVisitor>(
        &self,
        visitor: &mut V,
        subject: &Subject,
        total_shards: u32,
        now: Timestamp,
    ) -> Result<&Split, AllocationNonMatchReason> {
        self.check_window(now)?;

        // No rules means the allocation targets everyone.
        if !self.rules.is_empty() {
            let targeted = self.rules.iter().any(|rule| {
                let mut visitor = visitor.visit_rule(rule);
                let matched = rule.eval(&mut visitor, subject);
                visitor.on_result(matched);
                matched
            });
            if !targeted {
                return Err(AllocationNonMatchReason::FailingRule);
            }
        }

        for split in &self.splits {
            let mut visitor = visitor.visit_split(split);
            let matched = split.matches(&mut visitor, subject.key(), total_shards);
            visitor.on_result(matched);
            if matched {
                return Ok(split);
            }
        }
        Err(AllocationNonMatchReason::TrafficExposureMiss)
    }

    /// Both ends of the window are inclusive.
    fn check_window(&self, now: Timestamp) -> Result<(), AllocationNonMatchReason> {
        match (self.start_at, self.end_at) {
            (Some(start), _) if now < start => Err(AllocationNonMatchReason::BeforeStartDate),
            (_, Some(end)) if now > end => Err(AllocationNonMatchReason::AfterEndDate),
            _ => Ok(()),
        }
    }
}

impl Split {
    /// A subject lands in a split only if it falls into every shard. No shards means everyone.
    fn matches<V: EvalSplitVisitor>(
        &self,
        visitor: &mut V,
        subject_key: &str,
        total_shards: u32,
    ) -> bool {
        self.shards
            .iter()
            .all(|shard| shard.matches(visitor, subject_key, total_shards))
    }
}

impl Shard {
    fn matches<V: EvalSplitVisitor>(
        &self,
        visitor: &mut V,
        subject_key: &str,
        total_shards: u32,
    ) -> bool {
        let shard_value = get_md5_shard(&[self.salt.as_str(), "-", subject_key], total_shards);
        let matched = self
            .ranges
            .iter()
            .any(|range| range.contains(shard_value));
        visitor.on_shard_eval(self, shard_value, matched);
        matched
    }
}
