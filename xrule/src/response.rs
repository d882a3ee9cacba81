use crate::ast::Severity;
use crate::evaluator::RuleMessage;
use serde::Serialize;

/// Outcome of running a single rule
///
/// A rule that failed keeps the messages it emitted before the error was
/// raised out of the report; only the error text is recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub kind: &'static str,
    pub severity: Severity,
    pub messages: Vec<RuleMessage>,
    pub iterations: u64,
    pub passes: u64,
    pub suppressed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RuleOutcome {
    pub fn failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Result of running a rule set against one document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub results: Vec<RuleOutcome>,
}

impl RunReport {
    pub fn outcome(&self, rule: &str) -> Option<&RuleOutcome> {
        self.results.iter().find(|r| r.rule == rule)
    }

    /// Every message of the run, in rule order
    pub fn messages(&self) -> impl Iterator<Item = &RuleMessage> {
        self.results.iter().flat_map(|r| r.messages.iter())
    }

    pub fn message_count(&self) -> usize {
        self.results.iter().map(|r| r.messages.len()).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.results.iter().filter(|r| r.failed())
    }
}
