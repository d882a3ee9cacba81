//! Factset evaluation
//!
//! Filters resolve to index constraints, the index yields candidate facts,
//! dependent factsets keep only candidates aligned with the enclosing
//! iteration, and the where clause runs once per remaining candidate in its
//! own sub-table.

use super::context::RuleContext;
use super::{evaluate, evaluate_resolved};
use crate::ast::{AspectFilter, AspectSelector, Factset, FilterOp, Node, NodeId};
use crate::document::{DimensionValue, FactId, Period, QName, UnitValue};
use crate::index::{Constraint, IndexKey};
use crate::value::{Alignment, AspectKey, AspectValue, Value, ValueKind, ValueSet};
use crate::{EvalResult, Signal, XruleError, XruleResult};
use tracing::trace;

/// Evaluate a factset to its value set, together with the alignment it was
/// restricted to
///
/// A where clause that discovers the enclosing alignment mid-evaluation
/// restarts the match restricted to it. That happens at most once.
pub fn evaluate_factset<'g>(
    node: &'g Node,
    factset: &'g Factset,
    ctx: &mut RuleContext<'g>,
    restriction: Option<Alignment>,
) -> EvalResult<(ValueSet, Option<Alignment>)> {
    retry_with_discovered_alignment(node.meta.id, restriction, |restriction| {
        match_facts(node, factset, ctx, restriction)
    })
}

/// Run `attempt`, and once more restricted to the alignment of a
/// `ReEvaluate` it raises. A second `ReEvaluate` is a processing error.
fn retry_with_discovered_alignment<T, F>(
    factset: NodeId,
    restriction: Option<Alignment>,
    mut attempt: F,
) -> EvalResult<(T, Option<Alignment>)>
where
    F: FnMut(Option<&Alignment>) -> EvalResult<T>,
{
    let mut restriction = restriction;
    let mut retried = false;
    loop {
        match attempt(restriction.as_ref()) {
            Ok(values) => return Ok((values, restriction)),
            Err(Signal::ReEvaluate(found)) if !retried => {
                trace!(factset = %factset, alignment = %found, "re-evaluating with discovered alignment");
                retried = true;
                restriction = Some(found);
            }
            Err(Signal::ReEvaluate(_)) => {
                return Err(XruleError::processing(format!(
                    "Factset {} requested re-evaluation twice",
                    factset
                ))
                .into())
            }
            Err(other) => return Err(other),
        }
    }
}

fn match_facts<'g>(
    node: &'g Node,
    factset: &'g Factset,
    ctx: &mut RuleContext<'g>,
    restriction: Option<&Alignment>,
) -> EvalResult<ValueSet> {
    let filters = effective_filters(factset, ctx);
    let mut constraints = Vec::with_capacity(filters.len());
    let mut excluded: Vec<AspectKey> = Vec::new();
    for &filter in &filters {
        constraints.push(resolve_filter(filter, ctx)?);
        if let (false, Some(key)) = (filter.aligning, aspect_key(&filter.aspect)) {
            if !excluded.contains(&key) {
                excluded.push(key);
            }
        }
    }

    let index = ctx.index();
    let mut candidates = index.candidates(&constraints);
    if let Some(dependent) = restriction {
        let target = dependent.without(&excluded);
        candidates.retain(|fact| {
            ctx.cache
                .fact_alignment(node.meta.id, *fact, || index.alignment(*fact, &excluded))
                .is_some_and(|own| own == target)
        });
    }

    let table = ctx.table_for(&node.meta)?;
    let discovering = node.meta.is_dependent && restriction.is_none();
    let mut values = ValueSet::new();
    for fact in candidates {
        let mut value = fact_value(fact, factset.covered, node, &excluded, ctx);
        if let Some(condition) = &factset.where_clause {
            let keep = where_passes(node, &factset.fact_variable, condition, &value, ctx)?;
            if discovering {
                if let Some(found) = ctx.table.dependent_alignment(&table) {
                    return Err(Signal::ReEvaluate(found));
                }
            }
            if !keep {
                continue;
            }
        }
        value.aligned_result_only = !factset.covered;
        values.push(value);
    }

    if values.is_empty() && !factset.covered {
        values.append(None, Value::default_unbound());
    }
    Ok(values)
}

/// Inherited envelope filters followed by the factset's own; an own filter
/// replaces an inherited one on the same aspect
fn effective_filters<'g>(factset: &'g Factset, ctx: &RuleContext<'g>) -> Vec<&'g AspectFilter> {
    let mut filters: Vec<&'g AspectFilter> = ctx
        .envelope_filters()
        .into_iter()
        .filter(|inherited| !factset.filters.iter().any(|own| own.aspect == inherited.aspect))
        .collect();
    filters.extend(factset.filters.iter());
    filters
}

fn fact_value(
    fact: FactId,
    covered: bool,
    node: &Node,
    excluded: &[AspectKey],
    ctx: &mut RuleContext<'_>,
) -> Value {
    let mut value = Value::new(ValueKind::Fact(fact));
    value.facts.push(fact);
    if !covered {
        let index = ctx.index();
        value.alignment = ctx
            .cache
            .fact_alignment(node.meta.id, fact, || index.alignment(fact, excluded));
    }
    value
}

fn where_passes<'g>(
    node: &'g Node,
    variable: &str,
    condition: &'g Node,
    candidate: &Value,
    ctx: &mut RuleContext<'g>,
) -> EvalResult<bool> {
    let table = ctx.processing_id(node.meta.id);
    ctx.push_frame();
    ctx.bind_value(variable, candidate.clone());
    let results = ctx.isolated_pinned(table, candidate.alignment.clone(), |c| {
        evaluate_resolved(condition, c)
    });
    ctx.pop_frame();

    let mut keep = false;
    for result in results? {
        match result.kind {
            ValueKind::Bool(b) => keep |= b,
            ValueKind::None | ValueKind::Unbound => {}
            _ => {
                return Err(XruleError::processing(format!(
                    "Where clause must be a boolean, found {}",
                    result.type_name()
                ))
                .into())
            }
        }
    }
    Ok(keep)
}

/// Alignment key a filter pins, if it names an aspect
fn aspect_key(selector: &AspectSelector) -> Option<AspectKey> {
    match selector {
        AspectSelector::Concept => Some(AspectKey::CONCEPT),
        AspectSelector::Period => Some(AspectKey::PERIOD),
        AspectSelector::Unit => Some(AspectKey::UNIT),
        AspectSelector::Entity => Some(AspectKey::ENTITY),
        AspectSelector::Dimension(name) => Some(AspectKey::dimension(name.clone())),
        AspectSelector::Property(_) => None,
    }
}

fn index_key(selector: &AspectSelector) -> IndexKey {
    match selector {
        AspectSelector::Property(property) => IndexKey::Property(*property),
        other => match aspect_key(other) {
            Some(key) => IndexKey::Aspect(key),
            None => IndexKey::Aspect(AspectKey::CONCEPT),
        },
    }
}

fn resolve_filter<'g>(filter: &'g AspectFilter, ctx: &mut RuleContext<'g>) -> EvalResult<Constraint> {
    let key = index_key(&filter.aspect);
    let value = match (&filter.value, filter.op) {
        (_, FilterOp::Any) | (None, _) => return Ok(Constraint::Present(key)),
        (Some(node), _) => evaluate(node, ctx)?,
    };

    let members: Vec<Value> = match (&value.kind, filter.op) {
        (ValueKind::Unbound, _) => Vec::new(),
        (ValueKind::List(items) | ValueKind::Set(items), _) => items.clone(),
        (_, FilterOp::In | FilterOp::NotIn) => {
            return Err(XruleError::processing(format!(
                "Filter on {:?} expects a collection, found {}",
                filter.aspect,
                value.type_name()
            ))
            .into())
        }
        _ => vec![value.clone()],
    };

    let mut resolved = Vec::with_capacity(members.len());
    for member in &members {
        if member.is_unbound() {
            continue;
        }
        resolved.push(aspect_value(&filter.aspect, member, ctx)?);
    }
    Ok(match filter.op {
        FilterOp::NotEq | FilterOp::NotIn => Constraint::NoneOf(key, resolved),
        _ => Constraint::OneOf(key, resolved),
    })
}

/// Convert a filter operand to the index value it selects. `None` selects
/// facts lacking the aspect.
fn aspect_value(
    selector: &AspectSelector,
    value: &Value,
    ctx: &RuleContext<'_>,
) -> XruleResult<Option<AspectValue>> {
    if value.is_none() {
        return Ok(None);
    }
    let document = ctx.document();
    let fact = match value.kind {
        ValueKind::Fact(id) => document.fact(id),
        _ => None,
    };
    let mismatch = || {
        XruleError::processing(format!(
            "A {} value cannot filter the {:?} aspect",
            value.type_name(),
            selector
        ))
    };

    let resolved = match selector {
        AspectSelector::Concept => match (&value.kind, fact) {
            (_, Some(fact)) => AspectValue::QName(fact.concept.clone()),
            (ValueKind::QName(q) | ValueKind::Concept(q), _) => AspectValue::QName(q.clone()),
            (ValueKind::String(s), _) => AspectValue::QName(QName::parse(s)?),
            _ => return Err(mismatch()),
        },
        AspectSelector::Period => match (&value.kind, fact) {
            (_, Some(fact)) => AspectValue::Period(fact.period.clone()),
            (ValueKind::Period(p), _) => AspectValue::Period(p.clone()),
            (ValueKind::Instant(at), _) => AspectValue::Period(Period::Instant(*at)),
            _ => return Err(mismatch()),
        },
        AspectSelector::Unit => match (&value.kind, fact) {
            (_, Some(fact)) => match &fact.unit {
                Some(unit) => AspectValue::Unit(unit.clone()),
                None => return Ok(None),
            },
            (ValueKind::Unit(u), _) => AspectValue::Unit(u.clone()),
            (ValueKind::QName(q), _) => AspectValue::Unit(UnitValue::single(q.clone())),
            _ => return Err(mismatch()),
        },
        AspectSelector::Entity => match (&value.kind, fact) {
            (_, Some(fact)) => AspectValue::Entity(fact.entity.clone()),
            (ValueKind::Entity(e), _) => AspectValue::Entity(e.clone()),
            _ => return Err(mismatch()),
        },
        AspectSelector::Dimension(dimension) => match (&value.kind, fact) {
            (_, Some(fact)) => match fact.dimensions.get(dimension) {
                Some(DimensionValue::Explicit(q)) => AspectValue::QName(q.clone()),
                Some(DimensionValue::Typed(t)) => AspectValue::Typed(t.clone()),
                None => return Ok(None),
            },
            (ValueKind::QName(q) | ValueKind::Concept(q), _) => AspectValue::QName(q.clone()),
            (ValueKind::String(s), _) => AspectValue::Typed(s.clone()),
            _ => return Err(mismatch()),
        },
        AspectSelector::Property(_) => match &value.kind {
            ValueKind::Bool(b) => AspectValue::Bool(*b),
            ValueKind::Int(i) => AspectValue::Int(*i),
            ValueKind::Decimal(d) if d.fract().is_zero() => {
                AspectValue::Int(i64::try_from(*d).map_err(|_| mismatch())?)
            }
            ValueKind::String(s) => AspectValue::Typed(s.clone()),
            ValueKind::Instant(at) => AspectValue::Instant(*at),
            _ => return Err(mismatch()),
        },
    };
    Ok(Some(resolved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::ast::build::*;
    use crate::ast::{IndexedProperty, NodeKind, RuleSet};
    use crate::document::{Entity, MemoryDocument};
    use crate::evaluator::GlobalContext;
    use crate::index::FactIndex;
    use crate::resource_limits::RunOptions;
    use crate::table::ProcessingId;
    use std::sync::Arc;

    fn q(name: &str) -> QName {
        QName::new("http://example.com/gaap", name)
    }

    fn global(body: crate::ast::Node) -> GlobalContext {
        let mut rule_set = RuleSet {
            rules: vec![output("r", body)],
            ..Default::default()
        };
        analyze(&mut rule_set).unwrap();
        let document = Arc::new(MemoryDocument::default());
        let index = Arc::new(FactIndex::build(document.as_ref()));
        GlobalContext::new(document, index, Arc::new(rule_set), RunOptions::default())
    }

    fn evaluate_body(global: &GlobalContext) -> ValueSet {
        let node = global.rule_set.rules[0].body();
        let NodeKind::Factset(factset) = &node.kind else {
            panic!("expected a factset");
        };
        let mut ctx = RuleContext::new(global, "r");
        ctx.table.add_table(ProcessingId::body(&[])).unwrap();
        let (values, restriction) = evaluate_factset(node, factset, &mut ctx, None).unwrap();
        assert!(restriction.is_none());
        values
    }

    fn entity(id: &str) -> Alignment {
        [(AspectKey::ENTITY, AspectValue::Entity(Entity::new("cik", id)))]
            .into_iter()
            .collect()
    }

    #[test]
    fn unmatched_factset_yields_one_default_unbound() {
        let global = global(facts(q("Equity")));
        let values = evaluate_body(&global);
        assert_eq!(values.len(), 1);
        let value = values.as_single().unwrap();
        assert!(value.is_unbound());
        assert!(value.aligned_result_only);
        assert!(value.alignment.is_none());
    }

    #[test]
    fn unmatched_covered_factset_yields_nothing() {
        let global = global(FactsetBuilder::new().concept(q("Equity")).covered().build());
        assert!(evaluate_body(&global).is_empty());
    }

    #[test]
    fn discovered_alignment_restarts_the_match_once() {
        let mut seen = Vec::new();
        let (value, restriction) =
            retry_with_discovered_alignment(NodeId(3), None, |restriction| {
                seen.push(restriction.cloned());
                match restriction {
                    None => Err(Signal::ReEvaluate(entity("e1"))),
                    Some(_) => Ok(7),
                }
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(restriction, Some(entity("e1")));
        assert_eq!(seen, vec![None, Some(entity("e1"))]);
    }

    #[test]
    fn second_discovery_is_a_processing_error() {
        let mut attempts = 0;
        let result: EvalResult<(u8, Option<Alignment>)> =
            retry_with_discovered_alignment(NodeId(3), None, |_| {
                attempts += 1;
                Err(Signal::ReEvaluate(entity("e1")))
            });
        assert_eq!(attempts, 2);
        let err = result.err().unwrap().into_error();
        assert!(err.is_processing());
        assert!(err.to_string().contains("re-evaluation twice"));
    }

    #[test]
    fn property_filters_do_not_pin_alignment() {
        assert_eq!(aspect_key(&AspectSelector::Concept), Some(AspectKey::CONCEPT));
        assert_eq!(
            aspect_key(&AspectSelector::Property(IndexedProperty::IsNil)),
            None
        );
        assert_eq!(
            index_key(&AspectSelector::Property(IndexedProperty::PeriodDays)),
            IndexKey::Property(IndexedProperty::PeriodDays)
        );
    }
}
