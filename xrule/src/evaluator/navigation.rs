//! Relationship network navigation

use super::context::RuleContext;
use super::evaluate_resolved;
use crate::ast::{NavDirection, NavReturn, Navigation};
use crate::document::{DocumentGraph, QName, Relationship, RelationshipId};
use crate::value::{Value, ValueKind, ValueSet};
use crate::{EvalResult, XruleError, XruleResult};
use std::collections::{BTreeSet, VecDeque};

/// Evaluate a navigation to one unaligned value per reached concept or
/// relationship, in network order
pub fn evaluate_navigation<'g>(
    navigation: &'g Navigation,
    ctx: &mut RuleContext<'g>,
) -> EvalResult<ValueSet> {
    let starts = match &navigation.from {
        Some(from) => {
            let value = evaluate_resolved(from, ctx)?;
            Some(start_concepts(&value, ctx.document())?)
        }
        None => None,
    };
    let reached = walk(
        ctx.document(),
        navigation.direction,
        &navigation.arcrole,
        navigation.role.as_deref(),
        starts.as_deref(),
    );

    let mut values = ValueSet::new();
    for (id, relationship) in reached {
        let kind = match (navigation.returns, navigation.direction) {
            (NavReturn::Relationships, _) => ValueKind::Relationship(id),
            (NavReturn::Concepts, NavDirection::Children | NavDirection::Descendants) => {
                ValueKind::Concept(relationship.to.clone())
            }
            (NavReturn::Concepts, NavDirection::Parents | NavDirection::Ancestors) => {
                ValueKind::Concept(relationship.from.clone())
            }
        };
        values.append(None, Value::new(kind));
    }
    if values.is_empty() {
        values.append(None, Value::default_unbound());
    }
    Ok(values)
}

/// Relationships reached from `starts`; without a start every relationship
/// of the network is reached once
fn walk<'d>(
    document: &'d dyn DocumentGraph,
    direction: NavDirection,
    arcrole: &str,
    role: Option<&str>,
    starts: Option<&[QName]>,
) -> Vec<(RelationshipId, &'d Relationship)> {
    let mut network = document.relationships(arcrole, role);
    network.sort_by(|(a_id, a), (b_id, b)| a.order.cmp(&b.order).then(a_id.cmp(b_id)));

    let Some(starts) = starts else {
        return network;
    };
    let upward = matches!(direction, NavDirection::Parents | NavDirection::Ancestors);
    let transitive = matches!(direction, NavDirection::Descendants | NavDirection::Ancestors);

    let mut reached = Vec::new();
    let mut seen_relationships = BTreeSet::new();
    let mut visited: BTreeSet<&QName> = starts.iter().collect();
    let mut queue: VecDeque<&QName> = starts.iter().collect();
    while let Some(concept) = queue.pop_front() {
        for (id, relationship) in &network {
            let (near, far) = if upward {
                (&relationship.to, &relationship.from)
            } else {
                (&relationship.from, &relationship.to)
            };
            if near != concept || !seen_relationships.insert(*id) {
                continue;
            }
            reached.push((*id, *relationship));
            if transitive && visited.insert(far) {
                queue.push_back(far);
            }
        }
    }
    reached
}

/// Concept names a navigation start value denotes. Missing starts reach
/// nothing.
fn start_concepts(value: &Value, document: &dyn DocumentGraph) -> XruleResult<Vec<QName>> {
    let concept = match &value.kind {
        ValueKind::None | ValueKind::Unbound => return Ok(Vec::new()),
        ValueKind::Concept(q) | ValueKind::QName(q) => q.clone(),
        ValueKind::String(s) => QName::parse(s)?,
        ValueKind::Fact(id) => match document.fact(*id) {
            Some(fact) => fact.concept.clone(),
            None => return Err(XruleError::processing(format!("{} is not in the document", id))),
        },
        ValueKind::List(items) | ValueKind::Set(items) => {
            let mut names = Vec::new();
            for item in items {
                for name in start_concepts(item, document)? {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
            return Ok(names);
        }
        _ => {
            return Err(XruleError::processing(format!(
                "Cannot navigate from a {}",
                value.type_name()
            )))
        }
    };
    Ok(vec![concept])
}
