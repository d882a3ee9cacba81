//! Expression evaluation
//!
//! Per-kind evaluators for everything that is not an iterable source. They
//! recurse through [`super::evaluate`] so every child goes through the
//! iteration and caching protocol.

use super::context::{RuleContext, VarLookup};
use super::operations::{arithmetic_operation, comparison_operation, unary_operation};
use super::{constant_value, evaluate, evaluate_resolved, functions, properties};
use crate::ast::{Declaration, DictEntry, Literal, Node, NodeKind};
use crate::cache::Computed;
use crate::document::{parse_date_time, Period};
use crate::value::{Alignment, Value, ValueKind, ValueSet};
use crate::{EvalResult, XruleError, XruleResult};
use std::collections::BTreeMap;

/// Evaluate a non-iterable node by kind
pub fn evaluate_kind<'g>(node: &'g Node, ctx: &mut RuleContext<'g>) -> EvalResult<Value> {
    match &node.kind {
        NodeKind::Literal(literal) => Ok(literal_value(literal)?),

        NodeKind::Unary { op, operand } => {
            let operand = evaluate_resolved(operand, ctx)?;
            Ok(unary_operation(*op, &operand)?)
        }

        NodeKind::Arithmetic {
            op,
            left,
            right,
            hard_left,
            hard_right,
        } => {
            let left = evaluate_resolved(left, ctx)?;
            let right = evaluate_resolved(right, ctx)?;
            arithmetic_operation(&left, *op, &right, *hard_left, *hard_right)
        }

        NodeKind::Comparison { op, left, right } => {
            let left = evaluate_resolved(left, ctx)?;
            let right = evaluate_resolved(right, ctx)?;
            Ok(comparison_operation(&left, *op, &right)?)
        }

        NodeKind::And(operands) => evaluate_logical(operands, false, ctx),
        NodeKind::Or(operands) => evaluate_logical(operands, true, ctx),

        NodeKind::Block { declarations, body } => evaluate_block(declarations, body, ctx),

        NodeKind::Variable(name) => evaluate_variable(name, ctx),

        NodeKind::Tag(name) => Ok(ctx.tags.get(name).cloned().unwrap_or_else(Value::unbound)),

        NodeKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let condition = evaluate_resolved(condition, ctx)?;
            match condition.kind {
                ValueKind::Bool(true) => evaluate(then_branch, ctx),
                ValueKind::Bool(false) => match else_branch {
                    Some(branch) => evaluate(branch, ctx),
                    None => Ok(Value::derive(ValueKind::Unbound, &[&condition])),
                },
                ValueKind::None | ValueKind::Unbound => {
                    Ok(Value::derive(ValueKind::Unbound, &[&condition]))
                }
                _ => Err(XruleError::processing(format!(
                    "'if' condition must be a boolean, found {}",
                    condition.type_name()
                ))
                .into()),
            }
        }

        NodeKind::Filter {
            collection,
            variable,
            condition,
            returns,
        } => evaluate_filter(
            node,
            collection,
            variable,
            condition.as_deref(),
            returns.as_deref(),
            ctx,
        ),

        NodeKind::Call { function, args } => functions::call_scalar(node, function, args, ctx),

        NodeKind::Property { target, name, args } => {
            let target = evaluate(target, ctx)?;
            let mut arguments = Vec::with_capacity(args.len());
            for arg in args {
                arguments.push(evaluate_resolved(arg, ctx)?);
            }
            Ok(properties::property(&target, name, &arguments, ctx)?)
        }

        NodeKind::Index { target, index } => {
            let target = evaluate_resolved(target, ctx)?;
            let index = evaluate_resolved(index, ctx)?;
            Ok(index_value(&target, &index)?)
        }

        NodeKind::List(items) => {
            let items = evaluate_all(items, ctx)?;
            Ok(collection(ValueKind::List(items.clone()), &items))
        }

        NodeKind::Set(items) => {
            let items = evaluate_all(items, ctx)?;
            let set = Value::set(items.clone());
            Ok(collection(set.kind, &items))
        }

        NodeKind::Dict(entries) => evaluate_dict(entries, ctx),

        NodeKind::Envelope { filters, body } => {
            ctx.push_envelope(filters);
            let result = evaluate(body, ctx);
            ctx.pop_envelope();
            result
        }

        NodeKind::Constant(name) => match constant_value(name, ctx)?.as_ref() {
            Computed::Single(value) => Ok(value.clone()),
            Computed::Set(values) => match values.len() {
                0 => Ok(Value::default_unbound()),
                1 => Ok(values.values().next().cloned().unwrap_or_else(Value::unbound)),
                n => Err(XruleError::processing(format!(
                    "Constant '{}' has {} values but is used as a single value",
                    name, n
                ))
                .into()),
            },
        },

        NodeKind::Factset(_) | NodeKind::For { .. } | NodeKind::Navigate(_) => {
            Err(XruleError::build_table(format!(
                "node {} is an iterable form but was not marked iterable",
                node.meta.id
            ))
            .into())
        }
    }
}

pub(crate) fn literal_value(literal: &Literal) -> XruleResult<Value> {
    let kind = match literal {
        Literal::Int(i) => ValueKind::Int(*i),
        Literal::Decimal(d) => ValueKind::Decimal(*d),
        Literal::Float(f) => ValueKind::Float(*f),
        Literal::String(s) => ValueKind::String(s.clone()),
        Literal::Bool(b) => ValueKind::Bool(*b),
        Literal::None => ValueKind::None,
        Literal::Skip => ValueKind::Unbound,
        Literal::QName(q) => ValueKind::QName(q.clone()),
        Literal::Date(text) => ValueKind::Instant(
            parse_date_time(text, true).map_err(|e| XruleError::processing(e.to_string()))?,
        ),
        Literal::Period { start, end } => ValueKind::Period(
            Period::duration(start, end).map_err(|e| XruleError::processing(e.to_string()))?,
        ),
        Literal::Forever => ValueKind::Period(Period::Forever),
    };
    Ok(Value::new(kind))
}

/// `and`/`or`: the first determining operand (false for `and`, true for
/// `or`) decides, even past unbound operands
fn evaluate_logical<'g>(
    operands: &'g [Node],
    is_or: bool,
    ctx: &mut RuleContext<'g>,
) -> EvalResult<Value> {
    let mut seen: Vec<Value> = Vec::with_capacity(operands.len());
    let mut missing = false;
    for operand in operands {
        let value = evaluate_resolved(operand, ctx)?;
        match value.kind {
            ValueKind::Bool(b) if b == is_or => {
                seen.push(value);
                let sources: Vec<&Value> = seen.iter().collect();
                return Ok(Value::derive(ValueKind::Bool(is_or), &sources));
            }
            ValueKind::Bool(_) => {}
            ValueKind::None | ValueKind::Unbound => missing = true,
            _ => {
                return Err(XruleError::processing(format!(
                    "'{}' requires boolean operands, found {}",
                    if is_or { "or" } else { "and" },
                    value.type_name()
                ))
                .into())
            }
        }
        seen.push(value);
    }
    let sources: Vec<&Value> = seen.iter().collect();
    let kind = if missing {
        ValueKind::Unbound
    } else {
        ValueKind::Bool(!is_or)
    };
    Ok(Value::derive(kind, &sources))
}

fn evaluate_block<'g>(
    declarations: &'g [Declaration],
    body: &'g Node,
    ctx: &mut RuleContext<'g>,
) -> EvalResult<Value> {
    ctx.push_frame();
    for declaration in declarations {
        ctx.bind_lazy(declaration);
    }
    let result = evaluate(body, ctx);
    ctx.pop_frame();
    result
}

/// Resolve a variable, evaluating its declaration on first use in the scope
/// it was declared in
pub(crate) fn evaluate_variable<'g>(name: &str, ctx: &mut RuleContext<'g>) -> EvalResult<Value> {
    match ctx.lookup_var(name) {
        VarLookup::Ready(value) => Ok(value),
        VarLookup::Pending { frame, slot, decl } => {
            ctx.set_lazy_state(frame, slot, None, true);
            let detached = ctx.split_scopes(frame);
            let result = evaluate(&decl.expr, ctx);
            ctx.restore_scopes(detached);
            match result {
                Ok(value) => {
                    if let Some(tag) = &decl.tag {
                        ctx.tags.insert(tag.clone(), value.clone());
                    }
                    ctx.set_lazy_state(frame, slot, Some(value.clone()), false);
                    Ok(value)
                }
                Err(signal) => {
                    ctx.set_lazy_state(frame, slot, None, false);
                    Err(signal)
                }
            }
        }
        VarLookup::Cycle => Err(XruleError::processing(format!(
            "Variable ${} refers to itself",
            name
        ))
        .into()),
        VarLookup::Missing => {
            Err(XruleError::processing(format!("Variable ${} is not declared", name)).into())
        }
    }
}

fn evaluate_all<'g>(nodes: &'g [Node], ctx: &mut RuleContext<'g>) -> EvalResult<Vec<Value>> {
    let mut values = Vec::with_capacity(nodes.len());
    for node in nodes {
        values.push(evaluate(node, ctx)?);
    }
    Ok(values)
}

fn evaluate_dict<'g>(entries: &'g [DictEntry], ctx: &mut RuleContext<'g>) -> EvalResult<Value> {
    let mut pairs = Vec::with_capacity(entries.len());
    let mut members = Vec::with_capacity(entries.len() * 2);
    for entry in entries {
        let key = evaluate_resolved(&entry.key, ctx)?;
        let value = evaluate(&entry.value, ctx)?;
        members.push(key.clone());
        members.push(value.clone());
        pairs.push((key, value));
    }
    let dict = Value::dict(pairs);
    Ok(collection(dict.kind, &members))
}

/// A collection value carrying the provenance of its members
fn collection(kind: ValueKind, members: &[Value]) -> Value {
    let sources: Vec<&Value> = members.iter().collect();
    Value::derive(kind, &sources)
}

fn index_value(target: &Value, index: &Value) -> XruleResult<Value> {
    if target.is_missing() {
        return Ok(Value::derive(target.kind.clone(), &[target]));
    }
    let found = match (&target.kind, &index.kind) {
        (ValueKind::List(items), ValueKind::Int(i)) => {
            let position = usize::try_from(*i)
                .ok()
                .filter(|p| *p < items.len())
                .ok_or_else(|| {
                    XruleError::processing(format!(
                        "Index {} is out of range for a list of {} items",
                        i,
                        items.len()
                    ))
                })?;
            items[position].clone()
        }
        (ValueKind::Dict(entries), _) => entries
            .iter()
            .find(|(key, _)| key == index)
            .map(|(_, value)| value.clone())
            .unwrap_or_else(Value::none),
        _ => {
            return Err(XruleError::processing(format!(
                "Cannot index a {} with a {}",
                target.type_name(),
                index.type_name()
            )))
        }
    };
    let mut result = found;
    result.absorb(target);
    Ok(result)
}

/// Items of a collection operand; missing collections have none
fn collection_items(collection: &Value) -> XruleResult<Vec<Value>> {
    if collection.is_missing() {
        return Ok(Vec::new());
    }
    collection
        .items()
        .map(|items| items.into_iter().cloned().collect())
        .ok_or_else(|| {
            XruleError::processing(format!(
                "Expected a collection, found {}",
                collection.type_name()
            ))
        })
}

/// `for $x in coll body`: one list of body results per alignment
pub(crate) fn evaluate_for<'g>(
    node: &'g Node,
    variable: &str,
    collection: &'g Node,
    body: &'g Node,
    ctx: &mut RuleContext<'g>,
) -> EvalResult<ValueSet> {
    let source = evaluate_resolved(collection, ctx)?;
    let items = collection_items(&source)?;
    let table = ctx.processing_id(node.meta.id);

    let mut groups: BTreeMap<Option<Alignment>, Vec<Value>> = BTreeMap::new();
    for item in items {
        ctx.push_frame();
        ctx.bind_value(variable, item);
        let produced = ctx.isolated(table.clone(), |c| evaluate(body, c));
        ctx.pop_frame();
        for value in produced? {
            groups.entry(value.alignment.clone()).or_default().push(value);
        }
    }

    let mut values = ValueSet::new();
    if groups.is_empty() {
        values.append(None, Value::list(Vec::new()));
        return Ok(values);
    }
    for (alignment, results) in groups {
        let mut list = Value::list(results.clone());
        for result in &results {
            list.add_facts(&result.facts);
        }
        list.add_facts(&source.facts);
        values.append(alignment.clone(), list.with_alignment(alignment));
    }
    Ok(values)
}

/// `filter coll where cond returns expr`
fn evaluate_filter<'g>(
    node: &'g Node,
    collection: &'g Node,
    variable: &str,
    condition: Option<&'g Node>,
    returns: Option<&'g Node>,
    ctx: &mut RuleContext<'g>,
) -> EvalResult<Value> {
    let source = evaluate_resolved(collection, ctx)?;
    let items = collection_items(&source)?;
    let table = ctx.processing_id(node.meta.id);

    let mut kept = Vec::new();
    for item in items {
        ctx.push_frame();
        ctx.bind_value(variable, item.clone());
        let outcome = filter_item(&table, item, condition, returns, ctx);
        ctx.pop_frame();
        kept.extend(outcome?);
    }

    let kind = match source.kind {
        ValueKind::Set(_) => Value::set(kept).kind,
        _ => ValueKind::List(kept),
    };
    Ok(Value::derive(kind, &[&source]))
}

fn filter_item<'g>(
    table: &crate::table::ProcessingId,
    item: Value,
    condition: Option<&'g Node>,
    returns: Option<&'g Node>,
    ctx: &mut RuleContext<'g>,
) -> EvalResult<Vec<Value>> {
    if let Some(condition) = condition {
        let mut keep = false;
        for result in ctx.isolated(table.clone(), |c| evaluate_resolved(condition, c))? {
            match result.kind {
                ValueKind::Bool(b) => keep |= b,
                ValueKind::None | ValueKind::Unbound => {}
                _ => {
                    return Err(XruleError::processing(format!(
                        "Filter condition must be a boolean, found {}",
                        result.type_name()
                    ))
                    .into())
                }
            }
        }
        if !keep {
            return Ok(Vec::new());
        }
    }
    match returns {
        Some(expr) => ctx.isolated(table.clone(), |c| evaluate(expr, c)),
        None => Ok(vec![item]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn date_literals_mean_end_of_day() {
        let value = literal_value(&Literal::Date("2024-12-31".to_string())).unwrap();
        assert!(matches!(value.kind, ValueKind::Instant(at) if at.to_string() == "2025-01-01 00:00:00"));
        assert_eq!(value.to_string(), "2024-12-31");
    }

    #[test]
    fn bad_period_literal_is_a_processing_error() {
        let err = literal_value(&Literal::Period {
            start: "2024-12-31".to_string(),
            end: "2024-01-01".to_string(),
        })
        .unwrap_err();
        assert!(err.is_processing());
    }

    #[test]
    fn dictionary_lookup_misses_give_none() {
        let dict = Value::dict(vec![(Value::string("a"), Value::int(1))]);
        assert_eq!(index_value(&dict, &Value::string("a")).unwrap(), Value::int(1));
        assert!(index_value(&dict, &Value::string("b")).unwrap().is_none());
        let list = Value::list(vec![Value::decimal(Decimal::ONE)]);
        assert!(index_value(&list, &Value::int(3)).is_err());
    }
}
