use std::collections::BTreeMap;

use crate::probe::framework::{Rule, RuleId};

/// Orders the rules for one port into stages.  A rule runs once everything
/// it depends on has finished.  Dependencies on rules that aren't part of the
/// plan are ignored, so a user can run any subset of the layers.
pub struct PortTestPlan {
    to_run: Vec<Box<dyn Rule>>,
    selected: Vec<RuleId>,
    finished: Vec<RuleId>,
    /// A list of rules that are blocked indexed by the first rule blocking
    /// them.
    blocked: BTreeMap<RuleId, Vec<Box<dyn Rule>>>,
}

impl PortTestPlan {
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        let selected: Vec<RuleId> = rules.iter().map(|rule| rule.rule_id()).collect();
        rules.into_iter().fold(
            PortTestPlan {
                to_run: vec![],
                selected,
                finished: vec![],
                blocked: Default::default(),
            },
            |mut testplan, rule| {
                if let Some(first_dependency) = testplan.unmet_dependencies(rule.as_ref()).first()
                {
                    testplan
                        .blocked
                        .entry(first_dependency.clone())
                        .or_default()
                        .push(rule);
                } else {
                    testplan.to_run.push(rule);
                }
                testplan
            },
        )
    }

    fn unmet_dependencies(&self, rule: &dyn Rule) -> Vec<RuleId> {
        rule.dependencies()
            .into_iter()
            .filter(|rule_id| self.selected.contains(rule_id))
            .filter(|rule_id| !self.finished.contains(rule_id))
            .collect()
    }

    /// Move on to the next stage.  `finished` holds the rules of this stage
    /// that either ran successfully or were skipped as not applicable.  Rules
    /// of this stage missing from it failed, anything waiting on them stays
    /// blocked for good.
    pub fn build_next_stage_plan(mut self, mut finished: Vec<RuleId>) -> Self {
        self.to_run = Vec::new();
        let mut possibly_unblocked_rules = Vec::new();
        for rule_id in &finished {
            if let Some(mut rules) = self.blocked.remove(rule_id) {
                possibly_unblocked_rules.append(&mut rules);
            }
        }
        self.finished.append(&mut finished);

        for possibly_unblocked_rule in possibly_unblocked_rules {
            if let Some(first_unmet_dep) = self
                .unmet_dependencies(possibly_unblocked_rule.as_ref())
                .first()
            {
                // Still waiting on something.  File it under that and check
                // again when it finishes.
                self.blocked
                    .entry(first_unmet_dep.clone())
                    .or_default()
                    .push(possibly_unblocked_rule);
            } else {
                self.to_run.push(possibly_unblocked_rule);
            }
        }
        self
    }

    pub fn has_actions_to_run(&self) -> bool {
        !self.to_run.is_empty()
    }

    pub fn rules_to_run(&self) -> &[Box<dyn Rule>] {
        &self.to_run
    }

    /// Rules that will never run because something they need failed
    pub fn pruned(&self) -> impl Iterator<Item = &dyn Rule> {
        self.blocked.values().flatten().map(|rule| rule.as_ref())
    }
}
