use serde::Deserialize;

/// Resource limits that keep a runaway rule from taking the run down
///
/// Exceeding a limit aborts the offending rule only; sibling rules continue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum full iterations of one rule body
    /// Real usage: a few thousand for a large filing, Limit: 1,000,000
    pub max_iterations_per_rule: u64,

    /// Maximum expression nesting depth during evaluation
    pub max_expression_depth: usize,

    /// Maximum nested user-function calls (recursion guard)
    pub max_function_depth: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_iterations_per_rule: 1_000_000,
            max_expression_depth: 256,
            max_function_depth: 64,
        }
    }
}

impl ResourceLimits {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Options for one engine run
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Propagate the first rule error instead of recording it and moving on
    pub crash_on_error: bool,
    /// Bypass the local and global caches
    pub no_cache: bool,
    /// Only run these rules; empty runs everything
    pub rule_filter: Vec<String>,
    pub limits: ResourceLimits,
}

impl RunOptions {
    pub fn selects(&self, rule_name: &str) -> bool {
        self.rule_filter.is_empty() || self.rule_filter.iter().any(|r| r == rule_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_deserialize_with_defaults() {
        let options: RunOptions =
            serde_json::from_str(r#"{"no_cache": true, "limits": {"max_function_depth": 8}}"#)
                .unwrap();
        assert!(options.no_cache);
        assert!(!options.crash_on_error);
        assert_eq!(options.limits.max_function_depth, 8);
        assert_eq!(options.limits.max_iterations_per_rule, 1_000_000);
    }

    #[test]
    fn empty_filter_selects_every_rule() {
        let mut options = RunOptions::default();
        assert!(options.selects("anything"));
        options.rule_filter = vec!["r1".to_string()];
        assert!(options.selects("r1"));
        assert!(!options.selects("r2"));
    }
}
