use crate::{
    bandits::BanditResult,
    eval::AllocationNonMatchReason,
    eval_details::BanditEvaluationCode,
    ufc::{Allocation, Condition, Flag, Rule, Shard, Split},
    Assignment, AttributeValue, Configuration, EvaluationError,
};

pub(crate) trait EvalBanditVisitor {
    type AssignmentVisitor<'a>: EvalAssignmentVisitor + 'a
    where
        Self: 'a;

    /// Called when (if) evaluation gets configuration.
    #[allow(unused_variables)]
    #[inline]
    fn on_configuration(&mut self, configuration: &Configuration) {}

    /// Called when bandit key is resolved.
    #[allow(unused_variables)]
    #[inline]
    fn on_bandit_key(&mut self, key: &str) {}

    fn visit_assignment<'a>(&'a mut self) -> Self::AssignmentVisitor<'a>;

    /// Called with bandit evaluation result.
    #[allow(unused_variables)]
    #[inline]
    fn on_result(&mut self, code: BanditEvaluationCode, result: &BanditResult) {}
}

pub(crate) trait EvalAssignmentVisitor {
    // Type-foo here basically means that AllocationVisitor may hold references to
    // EvalAssignmentVisitor but should not outlive it.
    type AllocationVisitor<'a>: EvalAllocationVisitor + 'a
    where
        Self: 'a;

    /// Called when (if) evaluation gets configuration.
    #[allow(unused_variables)]
    #[inline]
    fn on_configuration(&mut self, configuration: &Configuration) {}

    /// Called when flag configuration is found.
    #[allow(unused_variables)]
    #[inline]
    fn on_flag_configuration(&mut self, flag: &Flag) {}

    fn visit_allocation<'a>(&'a mut self, allocation: &Allocation) -> Self::AllocationVisitor<'a>;

    /// Called with evaluation result.
    #[allow(unused_variables)]
    #[inline]
    fn on_result(&mut self, result: &Result<Assignment, EvaluationError>) {}
}

pub(crate) trait EvalAllocationVisitor {
    type RuleVisitor<'a>: EvalRuleVisitor + 'a
    where
        Self: 'a;

    type SplitVisitor<'a>: EvalSplitVisitor + 'a
    where
        Self: 'a;

    fn visit_rule<'a>(&'a mut self, rule: &Rule) -> Self::RuleVisitor<'a>;

    fn visit_split<'a>(&'a mut self, split: &Split) -> Self::SplitVisitor<'a>;

    /// Called when allocation evaluation result is known.
    #[allow(unused_variables)]
    #[inline]
    fn on_result(&mut self, result: Result<&Split, AllocationNonMatchReason>) {}
}

pub(crate) trait EvalRuleVisitor {
    #[allow(unused_variables)]
    #[inline]
    fn on_condition_eval(
        &mut self,
        condition: &Condition,
        attribute_value: Option<&AttributeValue>,
        result: bool,
    ) {
    }

    #[allow(unused_variables)]
    #[inline]
    fn on_result(&mut self, result: bool) {}
}

pub(crate) trait EvalSplitVisitor {
    #[allow(unused_variables)]
    #[inline]
    fn on_shard_eval(&mut self, shard: &Shard, shard_value: u32, matches: bool) {}

    #[allow(unused_variables)]
    #[inline]
    fn on_result(&mut self, matches: bool) {}
}

/// Dummy visitor that does nothing.
///
/// It is designed so that all calls to it are optimized away (zero-cost).
pub(crate) struct NoopEvalVisitor;

impl EvalBanditVisitor for NoopEvalVisitor {
    type AssignmentVisitor<'a> = NoopEvalVisitor;

    #[inline]
    fn visit_assignment<'a>(&'a mut self) -> Self::AssignmentVisitor<'a> {
        NoopEvalVisitor
    }
}

impl EvalAssignmentVisitor for NoopEvalVisitor {
    type AllocationVisitor<'a> = NoopEvalVisitor;

    #[inline]
    fn visit_allocation<'a>(&'a mut self, _allocation: &Allocation) -> Self::AllocationVisitor<'a> {
        NoopEvalVisitor
    }
}

impl EvalAllocationVisitor for NoopEvalVisitor {
    type RuleVisitor<'a> = NoopEvalVisitor;

    type SplitVisitor<'a> = NoopEvalVisitor;

    #[inline]
    fn visit_rule<'a>(&'a mut self, _rule: &Rule) -> Self::RuleVisitor<'a> {
        NoopEvalVisitor
    }

    #[inline]
    fn visit_split<'a>(&'a mut self, _split: &Split) -> Self::SplitVisitor<'a> {
        NoopEvalVisitor
    }
}

impl EvalRuleVisitor for NoopEvalVisitor {}

impl EvalSplitVisitor for NoopEvalVisitor {}
