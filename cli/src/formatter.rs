use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, Row, Table};
use xrule::ast::{MessagePart, Node, Rule};
use xrule::{RuleMessage, RuleSet, RunReport};

pub struct Formatter {}

impl Default for Formatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter {
    pub fn new() -> Self {
        Self {}
    }

    /// One line per message, in rule order
    pub fn format_messages(&self, report: &RunReport) -> String {
        let mut output = String::new();
        for message in report.messages() {
            output.push_str(&self.format_message(message));
            output.push('\n');
        }
        output
    }

    fn format_message(&self, message: &RuleMessage) -> String {
        match &message.alignment {
            Some(alignment) => format!(
                "[{}] {}: {} {}",
                message.severity, message.rule, message.text, alignment
            ),
            None => format!("[{}] {}: {}", message.severity, message.rule, message.text),
        }
    }

    pub fn format_failure(&self, rule: &str, error: &str) -> String {
        format!("rule '{}' failed: {}", rule, error)
    }

    /// Table of every declaration with its iterable expression count
    pub fn format_rule_set(&self, rule_set: &RuleSet) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(Row::from(vec![
            Cell::new("Kind").set_alignment(CellAlignment::Left),
            Cell::new("Name").set_alignment(CellAlignment::Left),
            Cell::new("Severity").set_alignment(CellAlignment::Left),
            Cell::new("Iterables").set_alignment(CellAlignment::Right),
        ]));

        for constant in &rule_set.constants {
            table.add_row(Row::from(vec![
                Cell::new("constant"),
                Cell::new(&constant.name),
                Cell::new(""),
                Cell::new(iterables(&constant.expr)).set_alignment(CellAlignment::Right),
            ]));
        }
        for function in &rule_set.functions {
            let signature = format!("{}({})", function.name, function.params.join(", "));
            table.add_row(Row::from(vec![
                Cell::new("function"),
                Cell::new(signature),
                Cell::new(""),
                Cell::new(iterables(&function.body)).set_alignment(CellAlignment::Right),
            ]));
        }
        for rule in &rule_set.rules {
            table.add_row(Row::from(vec![
                Cell::new(rule.kind_name()),
                Cell::new(rule.name()),
                Cell::new(rule.severity()),
                Cell::new(rule_iterables(rule)).set_alignment(CellAlignment::Right),
            ]));
        }

        let mut output = table.to_string();
        output.push('\n');
        output.push_str(&format!(
            "{} rule(s), {} constant(s), {} function(s)\n",
            rule_set.rules.len(),
            rule_set.constants.len(),
            rule_set.functions.len()
        ));
        output
    }
}

fn iterables(node: &Node) -> usize {
    node.count_where(&|n| n.meta.is_iterable)
}

fn rule_iterables(rule: &Rule) -> usize {
    let in_message: usize = rule
        .message()
        .unwrap_or_default()
        .iter()
        .map(|part| match part {
            MessagePart::Expr(node) => iterables(node),
            MessagePart::Text(_) => 0,
        })
        .sum();
    iterables(rule.body()) + in_message
}

#[cfg(test)]
mod tests {
    use super::*;
    use xrule::ast::build::*;
    use xrule::QName;

    #[test]
    fn rule_set_table_counts_iterables() {
        let mut rule_set = RuleSet {
            constants: vec![constant_decl("rate", int(2))],
            rules: vec![output(
                "assets",
                add(facts(QName::local("Assets")), facts(QName::local("Liabilities"))),
            )],
            ..Default::default()
        };
        xrule::analysis::analyze(&mut rule_set).unwrap();
        let text = Formatter::default().format_rule_set(&rule_set);
        assert!(text.contains("assets"));
        assert!(text.contains("rate"));
        assert!(text.contains("1 rule(s), 1 constant(s), 0 function(s)"));
        assert_eq!(rule_iterables(&rule_set.rules[0]), 2);
    }
}
