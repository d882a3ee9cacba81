//! Runtime values
//!
//! A [`Value`] is a [`ValueKind`] plus the metadata the iteration machinery
//! threads through evaluation: the alignment it was produced under, the facts
//! that contributed to it, message tags, and the columns read while
//! computing it. Equality always goes through the [`Shadow`] so collections
//! compare structurally.

mod alignment;
mod set;
mod shadow;

pub use alignment::{Alignment, AspectKey, AspectKind, AspectValue};
pub use set::ValueSet;
pub use shadow::Shadow;

use crate::ast::NodeId;
use crate::document::{display_date, Entity, FactId, Period, QName, RelationshipId, UnitValue};
use chrono::{Duration, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone)]
pub enum ValueKind {
    Int(i64),
    Decimal(Decimal),
    Float(f64),
    String(String),
    Bool(bool),
    Instant(NaiveDateTime),
    /// Duration or forever; instant periods appear when reading a fact's period
    Period(Period),
    TimeSpan(Duration),
    QName(QName),
    Unit(UnitValue),
    Entity(Entity),
    List(Vec<Value>),
    /// Insertion-ordered, deduplicated by shadow
    Set(Vec<Value>),
    /// Insertion-ordered entries, keys unique by shadow
    Dict(Vec<(Value, Value)>),
    Fact(FactId),
    Concept(QName),
    /// `None` is the document's own taxonomy
    Taxonomy(Option<String>),
    Network {
        arcrole: String,
        role: Option<String>,
    },
    Relationship(RelationshipId),
    Role(String),
    None,
    Unbound,
}

#[derive(Debug, Clone)]
pub struct Value {
    pub kind: ValueKind,
    pub alignment: Option<Alignment>,
    /// Contributing facts in first-seen order
    pub facts: Vec<FactId>,
    pub tags: BTreeMap<String, Value>,
    /// Set on values that only make sense inside a real alignment. A result
    /// carrying this flag without an alignment is suppressed.
    pub aligned_result_only: bool,
    /// Iteration columns consulted while producing this value
    pub used_expressions: BTreeSet<NodeId>,
}

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            alignment: None,
            facts: Vec::new(),
            tags: BTreeMap::new(),
            aligned_result_only: false,
            used_expressions: BTreeSet::new(),
        }
    }

    /// A value computed from `sources`, inheriting their provenance
    pub fn derive(kind: ValueKind, sources: &[&Value]) -> Self {
        let mut value = Value::new(kind);
        for source in sources {
            value.absorb(source);
        }
        value
    }

    /// Merge another value's provenance into this one
    pub fn absorb(&mut self, source: &Value) {
        if self.alignment.is_none() {
            self.alignment = source.alignment.clone();
        }
        self.add_facts(&source.facts);
        self.aligned_result_only |= source.aligned_result_only;
        self.used_expressions
            .extend(source.used_expressions.iter().copied());
    }

    pub fn add_facts(&mut self, facts: &[FactId]) {
        for fact in facts {
            if !self.facts.contains(fact) {
                self.facts.push(*fact);
            }
        }
    }

    pub fn with_alignment(mut self, alignment: Option<Alignment>) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn int(i: i64) -> Self {
        Value::new(ValueKind::Int(i))
    }

    pub fn decimal(d: Decimal) -> Self {
        Value::new(ValueKind::Decimal(d))
    }

    pub fn float(f: f64) -> Self {
        Value::new(ValueKind::Float(f))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::new(ValueKind::String(s.into()))
    }

    pub fn bool(b: bool) -> Self {
        Value::new(ValueKind::Bool(b))
    }

    pub fn none() -> Self {
        Value::new(ValueKind::None)
    }

    pub fn unbound() -> Self {
        Value::new(ValueKind::Unbound)
    }

    /// The value a factset yields when nothing matched
    pub fn default_unbound() -> Self {
        let mut value = Value::unbound();
        value.aligned_result_only = true;
        value
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::new(ValueKind::List(items))
    }

    pub fn set(items: Vec<Value>) -> Self {
        let mut seen = BTreeSet::new();
        let unique = items
            .into_iter()
            .filter(|item| seen.insert(item.shadow()))
            .collect();
        Value::new(ValueKind::Set(unique))
    }

    /// Later entries replace the value of an equal earlier key in place
    pub fn dict(entries: Vec<(Value, Value)>) -> Self {
        let mut positions: BTreeMap<Shadow, usize> = BTreeMap::new();
        let mut unique: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match positions.get(&key.shadow()) {
                Some(&pos) => unique[pos].1 = value,
                None => {
                    positions.insert(key.shadow(), unique.len());
                    unique.push((key, value));
                }
            }
        }
        Value::new(ValueKind::Dict(unique))
    }

    pub fn shadow(&self) -> Shadow {
        Shadow::of(self)
    }

    pub fn is_unbound(&self) -> bool {
        matches!(self.kind, ValueKind::Unbound)
    }

    pub fn is_none(&self) -> bool {
        matches!(self.kind, ValueKind::None)
    }

    /// Unbound or none
    pub fn is_missing(&self) -> bool {
        self.is_unbound() || self.is_none()
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.kind {
            ValueKind::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::Int(_) | ValueKind::Decimal(_) | ValueKind::Float(_)
        )
    }

    /// Items of a list, set, or the keys of a dictionary
    pub fn items(&self) -> Option<Vec<&Value>> {
        match &self.kind {
            ValueKind::List(items) | ValueKind::Set(items) => Some(items.iter().collect()),
            ValueKind::Dict(entries) => Some(entries.iter().map(|(k, _)| k).collect()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            ValueKind::Int(_) => "int",
            ValueKind::Decimal(_) => "decimal",
            ValueKind::Float(_) => "float",
            ValueKind::String(_) => "string",
            ValueKind::Bool(_) => "boolean",
            ValueKind::Instant(_) => "instant",
            ValueKind::Period(_) => "duration",
            ValueKind::TimeSpan(_) => "time-period",
            ValueKind::QName(_) => "qname",
            ValueKind::Unit(_) => "unit",
            ValueKind::Entity(_) => "entity",
            ValueKind::List(_) => "list",
            ValueKind::Set(_) => "set",
            ValueKind::Dict(_) => "dictionary",
            ValueKind::Fact(_) => "fact",
            ValueKind::Concept(_) => "concept",
            ValueKind::Taxonomy(_) => "taxonomy",
            ValueKind::Network { .. } => "network",
            ValueKind::Relationship(_) => "relationship",
            ValueKind::Role(_) => "role",
            ValueKind::None => "none",
            ValueKind::Unbound => "unbound",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.shadow() == other.shadow()
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ValueKind::Int(i) => write!(f, "{}", i),
            ValueKind::Decimal(d) => write!(f, "{}", d.normalize()),
            ValueKind::Float(x) => write!(f, "{}", x),
            ValueKind::String(s) => write!(f, "{}", s),
            ValueKind::Bool(b) => write!(f, "{}", b),
            ValueKind::Instant(at) => write!(f, "{}", display_date(at, true)),
            ValueKind::Period(p) => write!(f, "{}", p),
            ValueKind::TimeSpan(span) => write!(f, "P{}D", span.num_days()),
            ValueKind::QName(q) | ValueKind::Concept(q) => write!(f, "{}", q),
            ValueKind::Unit(u) => write!(f, "{}", u),
            ValueKind::Entity(e) => write!(f, "{}", e),
            ValueKind::List(items) => write!(f, "list({})", join(items)),
            ValueKind::Set(items) => write!(f, "set({})", join(items)),
            ValueKind::Dict(entries) => {
                let parts: Vec<String> =
                    entries.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "dict({})", parts.join(", "))
            }
            ValueKind::Fact(id) => write!(f, "{}", id),
            ValueKind::Taxonomy(Some(url)) => write!(f, "taxonomy({})", url),
            ValueKind::Taxonomy(None) => write!(f, "taxonomy()"),
            ValueKind::Network { arcrole, role } => match role {
                Some(role) => write!(f, "network({}, {})", arcrole, role),
                None => write!(f, "network({})", arcrole),
            },
            ValueKind::Relationship(id) => write!(f, "relationship({})", id.0),
            ValueKind::Role(uri) => write!(f, "{}", uri),
            ValueKind::None => write!(f, "none"),
            ValueKind::Unbound => write!(f, "unbound"),
        }
    }
}

fn join(items: &[Value]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_construction_deduplicates() {
        let set = Value::set(vec![
            Value::int(1),
            Value::int(2),
            Value::int(2),
            Value::int(3),
        ]);
        assert_eq!(set.items().unwrap().len(), 3);
    }

    #[test]
    fn set_equality_ignores_order() {
        let a = Value::set(vec![Value::int(1), Value::int(2)]);
        let b = Value::set(vec![Value::int(2), Value::int(1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn dict_values_participate_in_equality() {
        let a = Value::dict(vec![(Value::string("k1"), Value::string("v1"))]);
        let b = Value::dict(vec![(Value::string("k1"), Value::string("v2"))]);
        assert_ne!(a, b);
    }

    #[test]
    fn dict_later_key_replaces_value() {
        let dict = Value::dict(vec![
            (Value::string("k"), Value::int(1)),
            (Value::string("j"), Value::int(2)),
            (Value::string("k"), Value::int(3)),
        ]);
        match dict.kind {
            ValueKind::Dict(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].1, Value::int(3));
            }
            other => panic!("expected dict, got {:?}", other),
        }
    }

    #[test]
    fn derive_merges_provenance() {
        let mut left = Value::int(1);
        left.facts = vec![FactId(1), FactId(2)];
        let mut right = Value::int(2);
        right.facts = vec![FactId(2), FactId(3)];
        right.aligned_result_only = true;
        right.used_expressions.insert(NodeId(7));
        let sum = Value::derive(ValueKind::Int(3), &[&left, &right]);
        assert_eq!(sum.facts, vec![FactId(1), FactId(2), FactId(3)]);
        assert!(sum.aligned_result_only);
        assert!(sum.used_expressions.contains(&NodeId(7)));
    }

    #[test]
    fn unbound_and_none_are_distinct() {
        assert_ne!(Value::unbound(), Value::none());
        assert!(Value::default_unbound().aligned_result_only);
    }
}
