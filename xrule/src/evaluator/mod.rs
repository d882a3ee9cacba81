//! Rule evaluation
//!
//! Every node goes through [`evaluate`]. Iterable nodes compute their whole
//! value set once, register it as a column of their sub-table and read back
//! the row the cursor currently selects; everything else is computed
//! directly from its children. The rule driver in [`rules`] re-walks the body
//! until the table runs out of combinations.

pub mod context;
pub mod datetime;
pub mod expression;
pub mod factset;
pub mod functions;
pub mod navigation;
pub mod operations;
pub mod properties;
pub mod rules;

pub use context::{GlobalContext, RuleContext};
pub use rules::{evaluate_assertion, evaluate_output_rule, RuleMessage, RuleRun};

use crate::ast::{ConstantDecl, Node, NodeKind};
use crate::cache::{CacheKey, Computed};
use crate::document::{parse_date_time, DataKind, DocumentGraph};
use crate::table::{ColumnLinks, ProcessingId};
use crate::value::{Alignment, Shadow, Value, ValueKind, ValueSet};
use crate::{EvalResult, Signal, XruleError, XruleResult};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

/// Evaluate a node under the current iteration
pub fn evaluate<'g>(node: &'g Node, ctx: &mut RuleContext<'g>) -> EvalResult<Value> {
    ctx.enter()?;
    let result = if node.meta.is_iterable {
        evaluate_iterable(node, ctx)
    } else {
        evaluate_scalar(node, ctx)
    };
    ctx.exit();
    let value = result?;
    ctx.record(&value);
    Ok(value)
}

fn evaluate_iterable<'g>(node: &'g Node, ctx: &mut RuleContext<'g>) -> EvalResult<Value> {
    let table = ctx.table_for(&node.meta)?;
    if !ctx.table.contains_table(&table) {
        return Err(XruleError::build_table(format!(
            "table {} for node {} is not open",
            table, node.meta.id
        ))
        .into());
    }
    let column = ctx.processing_id(node.meta.id);
    // Rows keep the tags they were built with. Live tags stay in ctx.tags,
    // which is what tag lookups, messages and isolated results read.
    if let Some(value) = ctx.table.current_value(&table, &column)? {
        return Ok(value);
    }

    let (values, restriction) = iterable_values(node, ctx)?;
    let links = ColumnLinks {
        masters: node
            .meta
            .dependent_iterables
            .iter()
            .map(|id| ctx.processing_id(*id))
            .collect(),
        alignment_bound: node.meta.is_dependent && restriction.is_some(),
        pinned: restriction,
    };
    ctx.table.add_column(&table, column.clone(), values, links)?;
    ctx.table.current_value(&table, &column)?.ok_or_else(|| {
        Signal::from(XruleError::build_table(format!(
            "column {} vanished from table {}",
            column, table
        )))
    })
}

/// Full value set of an iterable node, plus the alignment it was restricted
/// to when the node depends on an enclosing iteration
fn iterable_values<'g>(
    node: &'g Node,
    ctx: &mut RuleContext<'g>,
) -> EvalResult<(ValueSet, Option<Alignment>)> {
    let table = ctx.table_for(&node.meta)?;
    let restriction = if node.meta.is_dependent {
        ctx.table.dependent_alignment(&table)
    } else {
        None
    };

    let key = if ctx.global.caching() {
        cache_key(node, ctx, restriction.clone())
    } else {
        None
    };
    let shared = key.is_some() && globally_cacheable(node);
    if let Some(key) = &key {
        if let Some(values) = ctx.cache.get_set(key) {
            return Ok((values, restriction));
        }
        if shared {
            if let Some(values) = ctx.global.cache.expression(key) {
                return Ok(((*values).clone(), restriction));
            }
        }
    }

    let (values, restriction) = match &node.kind {
        NodeKind::Factset(factset) => factset::evaluate_factset(node, factset, ctx, restriction)?,
        NodeKind::For {
            variable,
            collection,
            body,
        } => (
            expression::evaluate_for(node, variable, collection, body, ctx)?,
            restriction,
        ),
        NodeKind::Call { function, args } => (
            functions::evaluate_iterable_call(node, function, args, ctx)?,
            restriction,
        ),
        NodeKind::Navigate(navigation) => (
            navigation::evaluate_navigation(navigation, ctx)?,
            restriction,
        ),
        NodeKind::Constant(name) => {
            let values = match constant_value(name, ctx)?.as_ref() {
                Computed::Single(value) => ValueSet::single(value.clone()),
                Computed::Set(values) => values.clone(),
            };
            return Ok((values, restriction));
        }
        _ => {
            return Err(XruleError::build_table(format!(
                "node {} is marked iterable but is not an iterable form",
                node.meta.id
            ))
            .into())
        }
    };

    if let Some(key) = key {
        if shared {
            ctx.global.cache.store_expression(key.clone(), values.clone());
        }
        ctx.cache.put_set(key, values.clone());
    }
    Ok((values, restriction))
}

fn evaluate_scalar<'g>(node: &'g Node, ctx: &mut RuleContext<'g>) -> EvalResult<Value> {
    let key = if ctx.global.caching() && scalar_cacheable(node, ctx) {
        cache_key(node, ctx, None)
    } else {
        None
    };
    if let Some(key) = &key {
        if let Some(value) = ctx.cache.get_scalar(key) {
            return Ok(value);
        }
    }
    let value = expression::evaluate_kind(node, ctx)?;
    if let Some(key) = key {
        // Values read from a column are only valid for the current row
        if value.used_expressions.is_empty() {
            ctx.cache.put_scalar(key, value.clone());
        }
    }
    Ok(value)
}

fn scalar_cacheable(node: &Node, ctx: &RuleContext<'_>) -> bool {
    if node.meta.is_dependent {
        return false;
    }
    match &node.kind {
        NodeKind::Call { function, .. } => functions::is_cacheable(function, ctx),
        NodeKind::Property { .. } | NodeKind::Index { .. } | NodeKind::Filter { .. } => true,
        _ => false,
    }
}

/// Expressions with no free inputs give the same set in every rule
fn globally_cacheable(node: &Node) -> bool {
    matches!(node.kind, NodeKind::Factset(_) | NodeKind::Navigate(_))
        && node.meta.var_refs.is_empty()
        && node.meta.dependent_iterables.is_empty()
        && !node.meta.is_dependent
}

/// Snapshot of everything a node's value depends on. `None` when an input is
/// not available yet, in which case the cache is bypassed.
fn cache_key(node: &Node, ctx: &RuleContext<'_>, alignment: Option<Alignment>) -> Option<CacheKey> {
    let mut vars: Vec<(String, Shadow)> = Vec::with_capacity(node.meta.var_refs.len());
    for name in &node.meta.var_refs {
        let shadow = match name.strip_prefix('#') {
            Some(tag) => ctx.tags.get(tag).map_or(Shadow::Unbound, Value::shadow),
            None => ctx.peek_var(name)?.shadow(),
        };
        vars.push((name.clone(), shadow));
    }
    for id in &node.meta.dependent_iterables {
        let current = ctx.table.peek_column(&ctx.processing_id(*id))?;
        vars.push((format!("@{}", id), current.shadow()));
    }
    Some(CacheKey {
        node: node.meta.id,
        vars,
        alignment,
    })
}

/// Value of a named constant, computed once per run
pub fn constant_value<'g>(name: &str, ctx: &RuleContext<'g>) -> EvalResult<Arc<Computed>> {
    let global = ctx.global;
    if global.caching() {
        if let Some(found) = global.cache.constant(name) {
            return Ok(found);
        }
    }
    let decl = global
        .constant(name)
        .ok_or_else(|| XruleError::processing(format!("Constant '{}' is not defined", name)))?;
    if !global.cache.begin_constant(name) {
        return Err(XruleError::processing(format!("Constant '{}' refers to itself", name)).into());
    }
    let computed = compute_constant(decl, global);
    global.cache.end_constant(name);
    let computed = computed?;
    if global.caching() {
        Ok(global.cache.store_constant(name, computed))
    } else {
        Ok(Arc::new(computed))
    }
}

fn compute_constant(decl: &ConstantDecl, global: &GlobalContext) -> XruleResult<Computed> {
    let mut ctx = RuleContext::new(global, format!("constant {}", decl.name));
    let produced = ctx
        .isolated(ProcessingId::body(&[]), |c| evaluate(&decl.expr, c))
        .map_err(Signal::into_error)?;
    Ok(collect_results(produced))
}

/// Shape the values of an isolated evaluation: one unaligned value stays
/// single, anything else becomes a set keyed by alignment
pub(crate) fn collect_results(produced: Vec<Value>) -> Computed {
    if produced.len() == 1 && produced[0].alignment.is_none() {
        if let Some(value) = produced.into_iter().next() {
            return Computed::Single(value);
        }
        return Computed::Set(ValueSet::new());
    }
    let mut values = ValueSet::new();
    for value in produced {
        values.push(value);
    }
    Computed::Set(values)
}

/// Replace a fact reference with its typed value, keeping provenance
pub fn resolve(document: &dyn DocumentGraph, value: &Value) -> XruleResult<Value> {
    let ValueKind::Fact(id) = value.kind else {
        return Ok(value.clone());
    };
    let fact = document
        .fact(id)
        .ok_or_else(|| XruleError::processing(format!("{} is not in the document", id)))?;
    let data_kind = document
        .concept(&fact.concept)
        .map(|c| c.data_kind)
        .unwrap_or(if fact.unit.is_some() {
            DataKind::Decimal
        } else {
            DataKind::String
        });

    let kind = match fact.value.as_deref() {
        None => ValueKind::None,
        Some(text) => typed_fact_value(text, data_kind).ok_or_else(|| {
            XruleError::processing(format!(
                "Value '{}' of {} is not a valid {:?}",
                text, fact.concept, data_kind
            ))
        })?,
    };
    let mut resolved = value.clone();
    resolved.kind = kind;
    Ok(resolved)
}

fn typed_fact_value(text: &str, data_kind: DataKind) -> Option<ValueKind> {
    let text = text.trim();
    match data_kind {
        DataKind::Monetary | DataKind::Decimal | DataKind::Integer => {
            Decimal::from_str(text).ok().map(ValueKind::Decimal)
        }
        DataKind::Boolean => match text {
            "true" | "1" => Some(ValueKind::Bool(true)),
            "false" | "0" => Some(ValueKind::Bool(false)),
            _ => None,
        },
        DataKind::Date => parse_date_time(text, true).ok().map(ValueKind::Instant),
        DataKind::String => Some(ValueKind::String(text.to_string())),
    }
}

/// Evaluate and resolve in one step
pub(crate) fn evaluate_resolved<'g>(node: &'g Node, ctx: &mut RuleContext<'g>) -> EvalResult<Value> {
    let value = evaluate(node, ctx)?;
    Ok(resolve(ctx.document(), &value)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Concept, Entity, Fact, FactId, MemoryDocument, Period, QName};

    fn document() -> MemoryDocument {
        let concept = Concept {
            name: QName::local("Assets"),
            data_kind: DataKind::Monetary,
            period_type: crate::document::PeriodType::Instant,
            balance: None,
            is_abstract: false,
        };
        let fact = Fact {
            id: FactId(0),
            concept: QName::local("Assets"),
            period: Period::instant("2024-12-31").unwrap(),
            unit: None,
            entity: Entity::new("cik", "1"),
            dimensions: Default::default(),
            value: Some(" 100.50 ".to_string()),
            decimals: None,
        };
        let nil = Fact {
            value: None,
            ..fact.clone()
        };
        MemoryDocument::new(vec![fact, nil], vec![concept]).unwrap()
    }

    #[test]
    fn facts_resolve_to_typed_values() {
        let doc = document();
        let mut fact = Value::new(ValueKind::Fact(FactId(0)));
        fact.facts.push(FactId(0));
        let resolved = resolve(&doc, &fact).unwrap();
        assert_eq!(resolved, Value::decimal(Decimal::from_str("100.5").unwrap()));
        assert_eq!(resolved.facts, vec![FactId(0)]);

        let nil = resolve(&doc, &Value::new(ValueKind::Fact(FactId(1)))).unwrap();
        assert!(nil.is_none());
    }

    #[test]
    fn single_unaligned_result_collapses() {
        assert!(matches!(
            collect_results(vec![Value::int(1)]),
            Computed::Single(_)
        ));
        assert!(matches!(
            collect_results(vec![Value::int(1), Value::int(2)]),
            Computed::Set(ref s) if s.len() == 2
        ));
        assert!(matches!(collect_results(vec![]), Computed::Set(ref s) if s.is_empty()));
    }
}
