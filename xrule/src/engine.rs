use crate::analysis::analyze;
use crate::ast::{Rule, RuleSet};
use crate::document::DocumentGraph;
use crate::evaluator::{evaluate_assertion, evaluate_output_rule, GlobalContext, RuleContext, RuleRun};
use crate::index::FactIndex;
use crate::resource_limits::RunOptions;
use crate::response::{RuleOutcome, RunReport};
use crate::{XruleError, XruleResult};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// The rule evaluation engine
///
/// Analyzes a rule set once and indexes the document's facts once; every
/// [`Engine::run`] then evaluates the selected rules against them, sharing
/// constants and global expression results between rules.
pub struct Engine {
    global: GlobalContext,
}

impl Engine {
    pub fn new(
        document: Arc<dyn DocumentGraph>,
        mut rule_set: RuleSet,
        options: RunOptions,
    ) -> XruleResult<Self> {
        analyze(&mut rule_set)?;
        for name in &options.rule_filter {
            if rule_set.rule(name).is_none() {
                return Err(XruleError::Engine(format!("Unknown rule '{}'", name)));
            }
        }
        let index = FactIndex::build(document.as_ref());
        debug!(
            facts = index.len(),
            duplicates = index.duplicates_removed(),
            "fact index built"
        );
        let global = GlobalContext::new(document, Arc::new(index), Arc::new(rule_set), options);
        Ok(Self { global })
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.global.rule_set
    }

    pub fn options(&self) -> &RunOptions {
        &self.global.options
    }

    pub fn index(&self) -> &FactIndex {
        &self.global.index
    }

    /// Run every selected rule in declaration order
    ///
    /// A failing rule is recorded in its outcome and the run moves on, unless
    /// `crash_on_error` is set, in which case the first error is returned.
    pub fn run(&self) -> XruleResult<RunReport> {
        let mut report = RunReport::default();
        for rule in &self.global.rule_set.rules {
            if !self.global.options.selects(rule.name()) {
                continue;
            }
            report.results.push(self.run_rule(rule)?);
        }
        info!(
            rules = report.results.len(),
            messages = report.message_count(),
            failures = report.failures().count(),
            "run finished"
        );
        Ok(report)
    }

    fn run_rule(&self, rule: &Rule) -> XruleResult<RuleOutcome> {
        debug!(rule = rule.name(), kind = rule.kind_name(), "rule started");
        let mut ctx = RuleContext::new(&self.global, rule.name());
        let result = match rule {
            Rule::Assertion(assertion) => evaluate_assertion(assertion, &mut ctx),
            Rule::Output(output) => evaluate_output_rule(output, &mut ctx),
        };
        let (run, error) = match result {
            Ok(run) => (run, None),
            Err(err) => {
                let err = err.with_rule(rule.name());
                if self.global.options.crash_on_error {
                    error!(rule = rule.name(), error = %err, "rule failed, stopping run");
                    return Err(err);
                }
                warn!(rule = rule.name(), error = %err, "rule failed");
                let run = RuleRun {
                    iterations: ctx.iterations,
                    ..Default::default()
                };
                (run, Some(err.to_string()))
            }
        };
        Ok(RuleOutcome {
            rule: rule.name().to_string(),
            kind: rule.kind_name(),
            severity: rule.severity(),
            messages: run.messages,
            iterations: run.iterations,
            passes: run.passes,
            suppressed: run.suppressed,
            error,
        })
    }
}
