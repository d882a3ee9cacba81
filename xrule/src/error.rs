use crate::value::Alignment;
use thiserror::Error;

/// Error types for the rule engine
///
/// Everything here ends the current rule execution. Control flow that only
/// ends a single iteration is expressed with [`Signal`] instead.
#[derive(Debug, Clone, Error)]
pub enum XruleError {
    /// A rule-authoring error: type or arity mismatch, missing declaration,
    /// division by zero, bad regex
    #[error("Processing error in rule '{rule}': {message}")]
    Processing { rule: String, message: String },

    /// The iteration table was driven into an inconsistent state
    #[error("Iteration table error in rule '{rule}': {message}")]
    BuildTable { rule: String, message: String },

    /// Malformed instance or taxonomy data
    #[error("Document error: {0}")]
    Document(String),

    /// Engine error without a specific rule
    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Resource limit exceeded: {limit_name} (limit: {limit_value}, actual: {actual_value})")]
    ResourceLimitExceeded {
        limit_name: String,
        limit_value: String,
        actual_value: String,
    },
}

impl XruleError {
    /// Processing error raised below the rule boundary. The rule name is
    /// stamped on later by the driver via [`XruleError::with_rule`].
    pub fn processing(message: impl Into<String>) -> Self {
        XruleError::Processing {
            rule: String::new(),
            message: message.into(),
        }
    }

    pub fn build_table(message: impl Into<String>) -> Self {
        XruleError::BuildTable {
            rule: String::new(),
            message: message.into(),
        }
    }

    /// Attach the rule name if the error does not carry one yet
    pub fn with_rule(self, rule_name: &str) -> Self {
        match self {
            XruleError::Processing { rule, message } if rule.is_empty() => {
                XruleError::Processing {
                    rule: rule_name.to_string(),
                    message,
                }
            }
            XruleError::BuildTable { rule, message } if rule.is_empty() => {
                XruleError::BuildTable {
                    rule: rule_name.to_string(),
                    message,
                }
            }
            other => other,
        }
    }

    pub fn is_processing(&self) -> bool {
        matches!(
            self,
            XruleError::Processing { .. } | XruleError::BuildTable { .. }
        )
    }

    pub fn rule_name(&self) -> Option<&str> {
        match self {
            XruleError::Processing { rule, .. } | XruleError::BuildTable { rule, .. }
                if !rule.is_empty() =>
            {
                Some(rule)
            }
            _ => None,
        }
    }
}

/// Non-value outcomes of evaluating a node
///
/// `Ok(value)` is the produced case. The variants here unwind to fixed catch
/// points: `IterationStop` to the per-iteration loop, `ReEvaluate` to the
/// factset evaluator, `Error` to the rule boundary.
#[derive(Debug, Clone)]
pub enum Signal {
    /// The current alignment/row combination produces no result
    IterationStop,
    /// A where clause discovered the alignment of an enclosing iteration
    ReEvaluate(Alignment),
    Error(XruleError),
}

impl Signal {
    /// Collapse the signal into an error once it escapes its catch point
    pub fn into_error(self) -> XruleError {
        match self {
            Signal::Error(err) => err,
            Signal::IterationStop => {
                XruleError::processing("iteration stop escaped its evaluation loop")
            }
            Signal::ReEvaluate(_) => XruleError::processing(
                "re-evaluate signal escaped the factset that raised it",
            ),
        }
    }
}

impl From<XruleError> for Signal {
    fn from(err: XruleError) -> Self {
        Signal::Error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_rule_fills_missing_name_only() {
        let err = XruleError::processing("Division by zero").with_rule("r1");
        assert_eq!(
            err.to_string(),
            "Processing error in rule 'r1': Division by zero"
        );
        let again = err.with_rule("r2");
        assert_eq!(again.rule_name(), Some("r1"));
    }

    #[test]
    fn stray_signals_become_processing_errors() {
        let err = Signal::IterationStop.into_error();
        assert!(err.is_processing());
        let err: Signal = XruleError::Engine("boom".into()).into();
        assert!(matches!(err.into_error(), XruleError::Engine(_)));
    }
}
