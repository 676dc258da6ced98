//! Evaluation visitor that records what happened at every step into [`EvaluationDetails`].
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    bandits::BanditResult,
    eval::AllocationNonMatchReason,
    eval_details::*,
    eval_visitor::*,
    ufc::{Allocation, Condition, Flag, Rule, Shard, Split},
    Assignment, AssignmentValue, AttributeValue, Attributes, Configuration, EvaluationError,
};

/// Records flag and bandit evaluation. Pass it wherever an evaluation visitor is expected, then
/// call [`EvalDetailsBuilder::build`].
pub(crate) struct EvalDetailsBuilder {
    flag_key: String,
    subject_key: String,
    subject_attributes: Arc<Attributes>,
    now: DateTime<Utc>,

    fetched_at: Option<DateTime<Utc>>,
    published_at: Option<DateTime<Utc>>,
    environment_name: Option<String>,

    flag_result: Option<Result<(), EvaluationError>>,
    variation_key: Option<String>,
    variation_value: Option<AssignmentValue>,
    winner: Option<Winner>,

    bandit_code: Option<BanditEvaluationCode>,
    bandit_key: Option<String>,
    bandit_action: Option<String>,

    /// One entry per allocation of the flag, in flag order.
    allocations: Vec<AllocationEvaluationDetails>,
}

/// Shape of the allocation that produced the variation. Drives the human-readable description.
struct Winner {
    allocation_key: String,
    targeted: bool,
    sharded: bool,
}

pub(crate) struct AllocationRecorder<'a> {
    allocation_key: String,
    targeted: bool,
    experiment: bool,
    details: &'a mut AllocationEvaluationDetails,
    winner: &'a mut Option<Winner>,
    variation_key: &'a mut Option<String>,
}

pub(crate) struct RuleRecorder<'a>(&'a mut RuleEvaluationDetails);

pub(crate) struct SplitRecorder<'a>(&'a mut SplitEvaluationDetails);

impl EvalDetailsBuilder {
    pub fn new(
        flag_key: String,
        subject_key: String,
        subject_attributes: Arc<Attributes>,
        now: DateTime<Utc>,
    ) -> EvalDetailsBuilder {
        EvalDetailsBuilder {
            flag_key,
            subject_key,
            subject_attributes,
            now,
            fetched_at: None,
            published_at: None,
            environment_name: None,
            flag_result: None,
            variation_key: None,
            variation_value: None,
            winner: None,
            bandit_code: None,
            bandit_key: None,
            bandit_action: None,
            allocations: Vec::new(),
        }
    }

    pub fn build(self) -> EvaluationDetails {
        let flag_evaluation_description = describe(
            &self.flag_key,
            &self.subject_key,
            self.flag_result.as_ref(),
            self.winner.as_ref().zip(self.variation_key.as_deref()),
        );

        EvaluationDetails {
            flag_key: self.flag_key,
            subject_key: self.subject_key,
            subject_attributes: self.subject_attributes,
            timestamp: self.now,
            config_fetched_at: self.fetched_at,
            config_published_at: self.published_at,
            environment_name: self.environment_name,
            bandit_evaluation_code: self.bandit_code,
            flag_evaluation_code: self.flag_result.map(FlagEvaluationCode::from),
            flag_evaluation_description,
            variation_key: self.variation_key,
            variation_value: self.variation_value,
            bandit_key: self.bandit_key,
            bandit_action: self.bandit_action,
            allocations: self.allocations,
        }
    }

    fn allocation_index(&mut self, key: &str) -> usize {
        match self.allocations.iter().position(|it| it.key == key) {
            Some(index) => index,
            None => {
                let position = self.allocations.len() + 1;
                self.allocations.push(unevaluated(key, position));
                self.allocations.len() - 1
            }
        }
    }
}

fn unevaluated(key: &str, order_position: usize) -> AllocationEvaluationDetails {
    AllocationEvaluationDetails {
        key: key.to_owned(),
        order_position,
        allocation_evaluation_code: AllocationEvaluationCode::Unevaluated,
        evaluated_rules: Vec::new(),
        evaluated_splits: Vec::new(),
    }
}

fn describe(
    flag_key: &str,
    subject_key: &str,
    result: Option<&Result<(), EvaluationError>>,
    winner: Option<(&Winner, &str)>,
) -> String {
    let Some(result) = result else {
        return "Flag was not evaluated".to_owned();
    };

    match result {
        Err(EvaluationError::ConfigurationMissing) => {
            "Configuration has not been fetched yet".to_owned()
        }
        Err(EvaluationError::FlagNotFound | EvaluationError::FlagDisabled) => {
            format!("Flag {flag_key} is not recognized or is disabled")
        }
        Err(EvaluationError::TypeMismatch { expected, found }) => {
            format!("Flag {flag_key} has type {found:?} but {expected:?} was requested")
        }
        Err(EvaluationError::NoAllocation) => {
            "No allocation matched the subject; serving the default value".to_owned()
        }
        Err(EvaluationError::ConfigurationParseError | EvaluationError::ConfigurationError) => {
            "Flag configuration is invalid for this SDK version; consider upgrading".to_owned()
        }
        Ok(()) => match winner {
            None => String::new(),
            Some((winner, variation_key)) => {
                let allocation_key = &winner.allocation_key;
                match (winner.targeted, winner.sharded) {
                    (false, _) => format!(
                        "{subject_key} falls into traffic assigned to {variation_key:?} by allocation {allocation_key:?}."
                    ),
                    (true, true) => format!(
                        "Attributes match allocation {allocation_key:?} rules and {subject_key} falls into traffic assigned to {variation_key:?}."
                    ),
                    (true, false) => {
                        format!("Attributes match allocation {allocation_key:?} rules.")
                    }
                }
            }
        },
    }
}

impl EvalBanditVisitor for EvalDetailsBuilder {
    type AssignmentVisitor<'a> = &'a mut Self;

    fn on_configuration(&mut self, configuration: &Configuration) {
        EvalAssignmentVisitor::on_configuration(self, configuration)
    }

    fn on_bandit_key(&mut self, key: &str) {
        self.bandit_key = Some(key.to_owned());
    }

    fn visit_assignment<'a>(&'a mut self) -> Self::AssignmentVisitor<'a> {
        self
    }

    fn on_result(&mut self, code: BanditEvaluationCode, result: &BanditResult) {
        self.bandit_code = Some(code);
        self.bandit_action = result.action.clone();
    }
}

// Bandit evaluation hands out `&mut EvalDetailsBuilder` as its assignment visitor.
impl<'b> EvalAssignmentVisitor for &'b mut EvalDetailsBuilder {
    type AllocationVisitor<'a> = AllocationRecorder<'a>
    where
        Self: 'a;

    fn visit_allocation<'a>(&'a mut self, allocation: &Allocation) -> Self::AllocationVisitor<'a> {
        EvalAssignmentVisitor::visit_allocation(&mut **self, allocation)
    }

    fn on_configuration(&mut self, configuration: &Configuration) {
        EvalAssignmentVisitor::on_configuration(&mut **self, configuration)
    }

    fn on_flag_configuration(&mut self, flag: &Flag) {
        EvalAssignmentVisitor::on_flag_configuration(&mut **self, flag)
    }

    fn on_result(&mut self, result: &Result<Assignment, EvaluationError>) {
        EvalAssignmentVisitor::on_result(&mut **self, result)
    }
}

impl EvalAssignmentVisitor for EvalDetailsBuilder {
    type AllocationVisitor<'a> = AllocationRecorder<'a>
    where
        Self: 'a;

    fn visit_allocation<'a>(&'a mut self, allocation: &Allocation) -> Self::AllocationVisitor<'a> {
        let index = self.allocation_index(&allocation.key);
        AllocationRecorder {
            allocation_key: allocation.key.clone(),
            targeted: !allocation.rules.is_empty(),
            experiment: allocation.splits.len() > 1,
            details: &mut self.allocations[index],
            winner: &mut self.winner,
            variation_key: &mut self.variation_key,
        }
    }

    fn on_configuration(&mut self, configuration: &Configuration) {
        self.fetched_at = Some(configuration.fetched_at);
        self.published_at = Some(configuration.flags.created_at);
        self.environment_name = Some(configuration.flags.environment.name.clone());
    }

    fn on_flag_configuration(&mut self, flag: &Flag) {
        self.allocations = flag
            .allocations
            .iter()
            .enumerate()
            .map(|(i, allocation)| unevaluated(&allocation.key, i + 1))
            .collect();
    }

    fn on_result(&mut self, result: &Result<Assignment, EvaluationError>) {
        self.flag_result = Some(match result {
            Ok(assignment) => {
                self.variation_value = Some(assignment.value.clone());
                Ok(())
            }
            Err(err) => Err(*err),
        });
    }
}

impl<'b> EvalAllocationVisitor for AllocationRecorder<'b> {
    type RuleVisitor<'a> = RuleRecorder<'a>
    where
        Self: 'a;

    type SplitVisitor<'a> = SplitRecorder<'a>
    where
        Self: 'a;

    fn visit_rule<'a>(&'a mut self, _rule: &Rule) -> Self::RuleVisitor<'a> {
        let rules = &mut self.details.evaluated_rules;
        rules.push(RuleEvaluationDetails {
            matched: false,
            conditions: Vec::new(),
        });
        let last = rules.len() - 1;
        RuleRecorder(&mut rules[last])
    }

    fn visit_split<'a>(&'a mut self, split: &Split) -> Self::SplitVisitor<'a> {
        let splits = &mut self.details.evaluated_splits;
        splits.push(SplitEvaluationDetails {
            variation_key: split.variation_key.clone(),
            matched: false,
            shards: Vec::new(),
        });
        let last = splits.len() - 1;
        SplitRecorder(&mut splits[last])
    }

    fn on_result(&mut self, result: Result<&Split, AllocationNonMatchReason>) {
        self.details.allocation_evaluation_code = match result {
            Ok(split) => {
                *self.winner = Some(Winner {
                    allocation_key: self.allocation_key.clone(),
                    targeted: self.targeted,
                    sharded: self.experiment || split.shards.len() > 1,
                });
                *self.variation_key = Some(split.variation_key.clone());
                AllocationEvaluationCode::Match
            }
            Err(reason) => {
                *self.variation_key = None;
                match reason {
                    AllocationNonMatchReason::BeforeStartDate => {
                        AllocationEvaluationCode::BeforeStartTime
                    }
                    AllocationNonMatchReason::AfterEndDate => AllocationEvaluationCode::AfterEndTime,
                    AllocationNonMatchReason::FailingRule => AllocationEvaluationCode::FailingRule,
                    AllocationNonMatchReason::TrafficExposureMiss => {
                        AllocationEvaluationCode::TrafficExposureMiss
                    }
                }
            }
        };
    }
}

impl<'a> EvalRuleVisitor for RuleRecorder<'a> {
    fn on_condition_eval(
        &mut self,
        condition: &Condition,
        attribute_value: Option<&AttributeValue>,
        result: bool,
    ) {
        self.0.conditions.push(ConditionEvaluationDetails {
            condition: condition.clone(),
            attribute_value: attribute_value.cloned(),
            matched: result,
        });
    }

    fn on_result(&mut self, result: bool) {
        self.0.matched = result;
    }
}

impl<'a> EvalSplitVisitor for SplitRecorder<'a> {
    fn on_shard_eval(&mut self, shard: &Shard, shard_value: u32, matches: bool) {
        self.0.shards.push(ShardEvaluationDetails {
            matched: matches,
            shard: shard.clone(),
            shard_value,
        });
    }

    fn on_result(&mut self, matches: bool) {
        self.0.matched = matches;
    }
}
