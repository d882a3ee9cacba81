use super::{Value, ValueKind};
use crate::document::{Entity, FactId, Period, QName, RelationshipId, UnitValue};
use chrono::{Duration, NaiveDateTime};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Plain structural mirror of a [`Value`], ignoring metadata
///
/// All numbers collapse into one decimal domain so `1`, `1.0` and
/// `Decimal("1.00")` share a shadow. Floats that have no decimal
/// representation (NaN, infinities) keep their bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Shadow {
    None,
    Unbound,
    Bool(bool),
    Number(Decimal),
    Float(u64),
    String(String),
    Instant(NaiveDateTime),
    Period(Period),
    TimeSpan(Duration),
    QName(QName),
    Unit(UnitValue),
    Entity(Entity),
    List(Vec<Shadow>),
    Set(BTreeSet<Shadow>),
    Dict(BTreeMap<Shadow, Shadow>),
    Fact(FactId),
    Concept(QName),
    Taxonomy(Option<String>),
    Network(String, Option<String>),
    Relationship(RelationshipId),
    Role(String),
}

impl Shadow {
    pub fn of(value: &Value) -> Shadow {
        match &value.kind {
            ValueKind::Int(i) => Shadow::Number(Decimal::from(*i)),
            ValueKind::Decimal(d) => Shadow::Number(*d),
            ValueKind::Float(f) => match Decimal::from_f64_retain(*f) {
                Some(d) => Shadow::Number(d),
                None => Shadow::Float(f.to_bits()),
            },
            ValueKind::String(s) => Shadow::String(s.clone()),
            ValueKind::Bool(b) => Shadow::Bool(*b),
            ValueKind::Instant(at) => Shadow::Instant(*at),
            ValueKind::Period(p) => Shadow::Period(p.clone()),
            ValueKind::TimeSpan(span) => Shadow::TimeSpan(*span),
            ValueKind::QName(q) => Shadow::QName(q.clone()),
            ValueKind::Unit(u) => Shadow::Unit(u.clone()),
            ValueKind::Entity(e) => Shadow::Entity(e.clone()),
            ValueKind::List(items) => Shadow::List(items.iter().map(Shadow::of).collect()),
            ValueKind::Set(items) => Shadow::Set(items.iter().map(Shadow::of).collect()),
            ValueKind::Dict(entries) => Shadow::Dict(
                entries
                    .iter()
                    .map(|(k, v)| (Shadow::of(k), Shadow::of(v)))
                    .collect(),
            ),
            ValueKind::Fact(id) => Shadow::Fact(*id),
            ValueKind::Concept(q) => Shadow::Concept(q.clone()),
            ValueKind::Taxonomy(url) => Shadow::Taxonomy(url.clone()),
            ValueKind::Network { arcrole, role } => {
                Shadow::Network(arcrole.clone(), role.clone())
            }
            ValueKind::Relationship(id) => Shadow::Relationship(*id),
            ValueKind::Role(uri) => Shadow::Role(uri.clone()),
            ValueKind::None => Shadow::None,
            ValueKind::Unbound => Shadow::Unbound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn numbers_share_a_domain() {
        let int = Value::int(1);
        let float = Value::float(1.0);
        let decimal = Value::decimal(Decimal::from_str("1.00").unwrap());
        assert_eq!(int.shadow(), float.shadow());
        assert_eq!(int.shadow(), decimal.shadow());
    }

    #[test]
    fn nan_keeps_bits() {
        let nan = Value::float(f64::NAN);
        assert!(matches!(nan.shadow(), Shadow::Float(_)));
        assert_eq!(nan.shadow(), Value::float(f64::NAN).shadow());
    }

    #[test]
    fn nested_sets_ignore_order() {
        let a = Value::list(vec![Value::set(vec![Value::int(1), Value::int(2)])]);
        let b = Value::list(vec![Value::set(vec![Value::int(2), Value::int(1)])]);
        assert_eq!(a.shadow(), b.shadow());
    }
}
