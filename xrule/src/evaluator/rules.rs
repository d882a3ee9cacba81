//! Rule drivers
//!
//! A rule body runs once per row combination of its root table. Each pass
//! either stops (a pass), yields a result that becomes a message, or fails
//! the whole rule.

use super::context::RuleContext;
use super::{evaluate, evaluate_resolved, resolve};
use crate::ast::{Assertion, MessagePart, Node, NodeKind, OutputRule, Severity};
use crate::document::FactId;
use crate::table::ProcessingId;
use crate::value::{Value, ValueKind};
use crate::{Signal, XruleError, XruleResult};
use serde::Serialize;
use tracing::{debug, trace};

/// A message emitted by one rule pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMessage {
    pub rule: String,
    pub severity: Severity,
    pub text: String,
    /// Facts that contributed to the result, in first-seen order
    pub facts: Vec<FactId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alignment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Messages and counters of one rule execution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleRun {
    pub messages: Vec<RuleMessage>,
    pub iterations: u64,
    /// Passes that produced no message
    pub passes: u64,
    /// Results dropped because no factset ever bound for them
    pub suppressed: u64,
}

/// Run an assertion, emitting a message for every pass whose result equals
/// the assertion's `satisfied` flag
pub fn evaluate_assertion<'g>(
    assertion: &'g Assertion,
    ctx: &mut RuleContext<'g>,
) -> XruleResult<RuleRun> {
    drive(&assertion.body, ctx, |result, ctx, run| {
        let result = resolve(ctx.document(), &result)?;
        let holds = match result.kind {
            ValueKind::Bool(b) => b,
            ValueKind::None | ValueKind::Unbound => {
                run.passes += 1;
                return Ok(());
            }
            _ => {
                return Err(XruleError::processing(format!(
                    "Assertion must produce a boolean, found {}",
                    result.type_name()
                )))
            }
        };
        if suppressed(&result) {
            run.suppressed += 1;
            return Ok(());
        }
        if holds != assertion.satisfied {
            run.passes += 1;
            return Ok(());
        }
        let default = format!(
            "Assertion {} {}",
            assertion.name,
            if assertion.satisfied { "satisfied" } else { "unsatisfied" }
        );
        let text = message_text(assertion.message.as_deref(), default, ctx)?;
        run.messages.push(message(&assertion.name, assertion.severity, text, &result, ctx, None));
        Ok(())
    })
}

/// Run an output rule, emitting a message for every bound result
pub fn evaluate_output_rule<'g>(
    rule: &'g OutputRule,
    ctx: &mut RuleContext<'g>,
) -> XruleResult<RuleRun> {
    drive(&rule.body, ctx, |result, ctx, run| {
        let result = resolve(ctx.document(), &result)?;
        if result.is_missing() {
            run.passes += 1;
            return Ok(());
        }
        if suppressed(&result) {
            run.suppressed += 1;
            return Ok(());
        }
        let shown = result.to_string();
        let text = message_text(rule.message.as_deref(), shown.clone(), ctx)?;
        run.messages.push(message(&rule.name, rule.severity, text, &result, ctx, Some(shown)));
        Ok(())
    })
}

fn suppressed(result: &Value) -> bool {
    result.aligned_result_only && result.alignment.is_none()
}

/// Evaluate `body` until its root table is exhausted
///
/// A top-level block keeps its frame pushed while `on_result` runs so that
/// message expressions see the rule's declarations.
fn drive<'g, F>(body: &'g Node, ctx: &mut RuleContext<'g>, mut on_result: F) -> XruleResult<RuleRun>
where
    F: FnMut(Value, &mut RuleContext<'g>, &mut RuleRun) -> XruleResult<()>,
{
    let root = ProcessingId::body(ctx.prefix());
    ctx.table.add_table(root.clone())?;
    let mut run = RuleRun::default();

    let outcome = loop {
        if let Err(err) = ctx.count_iteration() {
            break Err(err);
        }
        ctx.reset_iteration();

        let (inner, framed) = match &body.kind {
            NodeKind::Block { declarations, body: inner } => {
                ctx.push_frame();
                for declaration in declarations {
                    ctx.bind_lazy(declaration);
                }
                (inner.as_ref(), true)
            }
            _ => (body, false),
        };
        let step = match evaluate(inner, ctx) {
            Ok(result) => on_result(result, ctx, &mut run),
            Err(Signal::IterationStop) => {
                trace!(rule = %ctx.rule_name, "iteration stopped");
                run.passes += 1;
                Ok(())
            }
            Err(other) => Err(other.into_error()),
        };
        if framed {
            ctx.pop_frame();
        }
        if let Err(err) = step {
            break Err(err);
        }

        if let Err(err) = ctx.table.next(&root) {
            break Err(err);
        }
        match ctx.table.is_empty(&root) {
            Ok(true) => break Ok(()),
            Ok(false) => {}
            Err(err) => break Err(err),
        }
    };

    let removed = ctx.table.del_table(&root);
    outcome?;
    removed?;
    run.iterations = ctx.iterations;
    debug!(
        rule = %ctx.rule_name,
        iterations = run.iterations,
        messages = run.messages.len(),
        passes = run.passes,
        suppressed = run.suppressed,
        "rule finished"
    );
    Ok(run)
}

fn message(
    rule: &str,
    severity: Severity,
    text: String,
    result: &Value,
    ctx: &RuleContext<'_>,
    value: Option<String>,
) -> RuleMessage {
    let mut facts = ctx.facts.clone();
    for fact in &result.facts {
        if !facts.contains(fact) {
            facts.push(*fact);
        }
    }
    RuleMessage {
        rule: rule.to_string(),
        severity,
        text,
        facts,
        alignment: result.alignment.as_ref().map(ToString::to_string),
        value,
    }
}

/// Render message parts in a fork of the rule context so that expression
/// columns added while rendering never reach the rule's own table
fn message_text<'g>(
    parts: Option<&'g [MessagePart]>,
    default: String,
    ctx: &RuleContext<'g>,
) -> XruleResult<String> {
    let Some(parts) = parts else {
        return Ok(default);
    };
    let mut fork = ctx.fork();
    let mut text = String::new();
    for part in parts {
        match part {
            MessagePart::Text(s) => text.push_str(s),
            MessagePart::Expr(node) => match evaluate_resolved(node, &mut fork) {
                Ok(value) => text.push_str(&value.to_string()),
                Err(Signal::IterationStop) => text.push_str("unbound"),
                Err(other) => return Err(other.into_error()),
            },
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Alignment, AspectKey, AspectValue};
    use std::collections::BTreeMap;

    #[test]
    fn unaligned_placeholder_results_are_suppressed() {
        let mut result = Value::bool(false);
        result.aligned_result_only = true;
        assert!(suppressed(&result));

        let mut aspects = BTreeMap::new();
        aspects.insert(AspectKey::CONCEPT, AspectValue::Typed("Assets".to_string()));
        let aligned = result.clone().with_alignment(Some(Alignment::new(aspects)));
        assert!(!suppressed(&aligned));
        assert!(!suppressed(&Value::bool(false)));
    }
}
