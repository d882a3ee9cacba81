//! Fact index
//!
//! Built once per document. Maps every aspect (and a handful of derived fact
//! properties) to buckets of facts keyed by value, so factset filters resolve
//! to candidate facts by set intersection instead of scanning.

use crate::ast::IndexedProperty;
use crate::document::{Concept, DocumentGraph, Fact, FactId, PeriodType};
use crate::value::{Alignment, AspectKey, AspectValue};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub type Aspects = BTreeMap<AspectKey, AspectValue>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKey {
    Aspect(AspectKey),
    Property(IndexedProperty),
}

/// One filter, already resolved to index terms
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Fact value is one of these (`None` selects facts lacking the aspect)
    OneOf(IndexKey, Vec<Option<AspectValue>>),
    /// Fact value is none of these
    NoneOf(IndexKey, Vec<Option<AspectValue>>),
    /// Fact has the aspect at all
    Present(IndexKey),
}

#[derive(Debug, Default)]
pub struct FactIndex {
    facts: Vec<FactId>,
    aspects: FxHashMap<FactId, Aspects>,
    buckets: FxHashMap<IndexKey, FxHashMap<AspectValue, FxHashSet<FactId>>>,
    /// Facts lacking a key, filled on first request
    missing: Mutex<FxHashMap<IndexKey, Arc<FxHashSet<FactId>>>>,
    duplicates: usize,
}

impl FactIndex {
    pub fn build(document: &dyn DocumentGraph) -> Self {
        let mut index = FactIndex::default();
        let mut groups: FxHashMap<Aspects, Vec<FactId>> = FxHashMap::default();

        for fact in document.facts() {
            let concept = document.concept(&fact.concept);
            let aspects = fact_aspects(fact, concept);
            let kept = groups.entry(aspects.clone()).or_default();
            match kept
                .iter()
                .position(|&other| document.fact(other).is_some_and(|o| is_duplicate(o, fact)))
            {
                Some(pos) => {
                    index.duplicates += 1;
                    let other = kept[pos];
                    if prefer(document, fact, other) {
                        kept[pos] = fact.id;
                        index.remove(other);
                        index.insert(fact, concept, aspects);
                    }
                }
                None => {
                    kept.push(fact.id);
                    index.insert(fact, concept, aspects);
                }
            }
        }

        index.facts.sort();
        debug!(
            facts = index.facts.len(),
            duplicates = index.duplicates,
            keys = index.buckets.len(),
            "Built fact index"
        );
        index
    }

    fn insert(&mut self, fact: &Fact, concept: Option<&Concept>, aspects: Aspects) {
        for (key, value) in &aspects {
            self.buckets
                .entry(IndexKey::Aspect(key.clone()))
                .or_default()
                .entry(value.clone())
                .or_default()
                .insert(fact.id);
        }
        for (property, value) in fact_properties(fact, concept) {
            self.buckets
                .entry(IndexKey::Property(property))
                .or_default()
                .entry(value)
                .or_default()
                .insert(fact.id);
        }
        self.facts.push(fact.id);
        self.aspects.insert(fact.id, aspects);
    }

    fn remove(&mut self, id: FactId) {
        self.facts.retain(|f| *f != id);
        self.aspects.remove(&id);
        for values in self.buckets.values_mut() {
            for facts in values.values_mut() {
                facts.remove(&id);
            }
            values.retain(|_, facts| !facts.is_empty());
        }
    }

    /// Indexed facts in document order, duplicates removed
    pub fn facts(&self) -> &[FactId] {
        &self.facts
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn duplicates_removed(&self) -> usize {
        self.duplicates
    }

    pub fn aspects(&self, fact: FactId) -> Option<&Aspects> {
        self.aspects.get(&fact)
    }

    /// The fact's aspects minus `excluded`, as an alignment
    pub fn alignment(&self, fact: FactId, excluded: &[AspectKey]) -> Option<Alignment> {
        let aspects = self.aspects.get(&fact)?;
        Some(
            aspects
                .iter()
                .filter(|(k, _)| !excluded.contains(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Resolve constraints to matching facts, in document order
    pub fn candidates(&self, constraints: &[Constraint]) -> Vec<FactId> {
        let mut positives: Vec<FxHashSet<FactId>> = Vec::new();
        let mut negatives: Vec<FxHashSet<FactId>> = Vec::new();
        for constraint in constraints {
            match constraint {
                Constraint::OneOf(key, values) => positives.push(self.lookup(key, values)),
                Constraint::NoneOf(key, values) => negatives.push(self.lookup(key, values)),
                Constraint::Present(key) => positives.push(self.present(key)),
            }
        }

        positives.sort_by_key(FxHashSet::len);
        let mut matched: Vec<FactId> = match positives.split_first() {
            Some((smallest, rest)) => smallest
                .iter()
                .filter(|f| rest.iter().all(|set| set.contains(f)))
                .copied()
                .collect(),
            None => self.facts.clone(),
        };
        matched.retain(|f| negatives.iter().all(|set| !set.contains(f)));
        matched.sort();
        matched
    }

    fn lookup(&self, key: &IndexKey, values: &[Option<AspectValue>]) -> FxHashSet<FactId> {
        let mut found = FxHashSet::default();
        for value in values {
            match value {
                Some(value) => {
                    if let Some(facts) = self.buckets.get(key).and_then(|b| b.get(value)) {
                        found.extend(facts.iter().copied());
                    }
                }
                None => found.extend(self.missing(key).iter().copied()),
            }
        }
        found
    }

    fn present(&self, key: &IndexKey) -> FxHashSet<FactId> {
        self.buckets
            .get(key)
            .map(|values| values.values().flatten().copied().collect())
            .unwrap_or_default()
    }

    fn missing(&self, key: &IndexKey) -> Arc<FxHashSet<FactId>> {
        let mut missing = self.missing.lock();
        if let Some(facts) = missing.get(key) {
            return facts.clone();
        }
        let present = self.present(key);
        let lacking: Arc<FxHashSet<FactId>> = Arc::new(
            self.facts
                .iter()
                .filter(|f| !present.contains(f))
                .copied()
                .collect(),
        );
        missing.insert(key.clone(), lacking.clone());
        lacking
    }
}

/// Full aspect set of a fact. Units only count for numeric facts.
pub fn fact_aspects(fact: &Fact, concept: Option<&Concept>) -> Aspects {
    let mut aspects = Aspects::new();
    aspects.insert(
        AspectKey::CONCEPT,
        AspectValue::QName(fact.concept.clone()),
    );
    aspects.insert(AspectKey::PERIOD, AspectValue::Period(fact.period.clone()));
    let numeric = concept.map_or(fact.unit.is_some(), Concept::is_numeric);
    if let (true, Some(unit)) = (numeric, &fact.unit) {
        aspects.insert(AspectKey::UNIT, AspectValue::Unit(unit.clone()));
    }
    aspects.insert(AspectKey::ENTITY, AspectValue::Entity(fact.entity.clone()));
    for (dimension, member) in &fact.dimensions {
        let value = match member {
            crate::document::DimensionValue::Explicit(q) => AspectValue::QName(q.clone()),
            crate::document::DimensionValue::Typed(t) => AspectValue::Typed(t.clone()),
        };
        aspects.insert(AspectKey::dimension(dimension.clone()), value);
    }
    aspects
}

fn fact_properties(fact: &Fact, concept: Option<&Concept>) -> Vec<(IndexedProperty, AspectValue)> {
    let mut properties = vec![(IndexedProperty::IsNil, AspectValue::Bool(fact.is_nil()))];
    if let Some(concept) = concept {
        properties.push((
            IndexedProperty::ConceptIsMonetary,
            AspectValue::Bool(concept.is_monetary()),
        ));
        properties.push((
            IndexedProperty::ConceptIsNumeric,
            AspectValue::Bool(concept.is_numeric()),
        ));
        if let Some(balance) = concept.balance {
            properties.push((
                IndexedProperty::ConceptBalance,
                AspectValue::Typed(balance.to_string()),
            ));
        }
        let period_type = match concept.period_type {
            PeriodType::Instant => "instant",
            PeriodType::Duration => "duration",
        };
        properties.push((
            IndexedProperty::ConceptPeriodType,
            AspectValue::Typed(period_type.to_string()),
        ));
    }
    if let Some(start) = fact.period.start() {
        properties.push((IndexedProperty::PeriodStart, AspectValue::Instant(start)));
    }
    if let Some(end) = fact.period.end() {
        properties.push((IndexedProperty::PeriodEnd, AspectValue::Instant(end)));
    }
    if let Some(days) = fact.period.days() {
        properties.push((IndexedProperty::PeriodDays, AspectValue::Int(days)));
    }
    properties
}

/// Same value once both are rounded to the lower precision
fn is_duplicate(a: &Fact, b: &Fact) -> bool {
    match (a.numeric_value(), b.numeric_value()) {
        (Some(x), Some(y)) => match (a.decimals, b.decimals) {
            (Some(da), Some(db)) => {
                let precision = da.min(db);
                precision.round(x) == precision.round(y)
            }
            _ => x == y,
        },
        _ => a.value == b.value,
    }
}

/// Whether `candidate` should replace the already-kept duplicate `kept`
fn prefer(document: &dyn DocumentGraph, candidate: &Fact, kept: FactId) -> bool {
    let Some(kept) = document.fact(kept) else {
        return true;
    };
    match (candidate.decimals, kept.decimals) {
        (Some(c), Some(k)) => c.is_more_precise_than(k),
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Decimals, Entity, MemoryDocument, Period, QName, UnitValue};
    use crate::value::AspectValue;

    fn fact(concept: &str, entity: &str, value: &str, decimals: i32) -> Fact {
        Fact {
            id: FactId(0),
            concept: QName::local(concept),
            period: Period::instant("2020-12-31").unwrap(),
            unit: Some(UnitValue::single(QName::local("USD"))),
            entity: Entity::new("cik", entity),
            dimensions: Default::default(),
            value: Some(value.to_string()),
            decimals: Some(Decimals::Places(decimals)),
        }
    }

    fn concept_is(name: &str) -> Constraint {
        Constraint::OneOf(
            IndexKey::Aspect(AspectKey::CONCEPT),
            vec![Some(AspectValue::QName(QName::local(name)))],
        )
    }

    #[test]
    fn intersects_aspect_buckets() {
        let doc = MemoryDocument::new(
            vec![
                fact("Assets", "1", "10", 0),
                fact("Assets", "2", "20", 0),
                fact("Liabilities", "1", "5", 0),
            ],
            vec![],
        )
        .unwrap();
        let index = FactIndex::build(&doc);
        assert_eq!(index.candidates(&[concept_is("Assets")]).len(), 2);
        let entity_one = Constraint::OneOf(
            IndexKey::Aspect(AspectKey::ENTITY),
            vec![Some(AspectValue::Entity(Entity::new("cik", "1")))],
        );
        assert_eq!(
            index.candidates(&[concept_is("Assets"), entity_one]),
            vec![FactId(0)]
        );
    }

    #[test]
    fn negative_constraints_subtract() {
        let doc = MemoryDocument::new(
            vec![fact("Assets", "1", "10", 0), fact("Assets", "2", "20", 0)],
            vec![],
        )
        .unwrap();
        let index = FactIndex::build(&doc);
        let not_entity_one = Constraint::NoneOf(
            IndexKey::Aspect(AspectKey::ENTITY),
            vec![Some(AspectValue::Entity(Entity::new("cik", "1")))],
        );
        assert_eq!(index.candidates(&[not_entity_one]), vec![FactId(1)]);
    }

    #[test]
    fn unknown_aspect_matches_only_through_missing_bucket() {
        let doc = MemoryDocument::new(vec![fact("Assets", "1", "10", 0)], vec![]).unwrap();
        let index = FactIndex::build(&doc);
        let dim = IndexKey::Aspect(AspectKey::dimension(QName::local("Segment")));
        assert!(index
            .candidates(&[Constraint::OneOf(
                dim.clone(),
                vec![Some(AspectValue::QName(QName::local("Retail")))]
            )])
            .is_empty());
        assert_eq!(
            index.candidates(&[Constraint::OneOf(dim.clone(), vec![None])]),
            vec![FactId(0)]
        );
        assert!(index.candidates(&[Constraint::Present(dim)]).is_empty());
    }

    #[test]
    fn duplicates_collapse_to_the_more_precise_fact() {
        let doc = MemoryDocument::new(
            vec![
                fact("Assets", "1", "1000", -3),
                fact("Assets", "1", "1234", 0),
                fact("Assets", "1", "9000", 0),
            ],
            vec![],
        )
        .unwrap();
        let index = FactIndex::build(&doc);
        assert_eq!(index.duplicates_removed(), 1);
        assert_eq!(index.facts(), &[FactId(1), FactId(2)]);
    }

    #[test]
    fn alignment_drops_excluded_aspects() {
        let doc = MemoryDocument::new(vec![fact("Assets", "1", "10", 0)], vec![]).unwrap();
        let index = FactIndex::build(&doc);
        let alignment = index.alignment(FactId(0), &[AspectKey::CONCEPT]).unwrap();
        assert!(!alignment.contains_key(&AspectKey::CONCEPT));
        assert!(alignment.contains_key(&AspectKey::ENTITY));
        assert!(alignment.contains_key(&AspectKey::UNIT));
    }
}
