//! Property access (`value.name` and `value.name(args)`)

use super::context::RuleContext;
use super::operations::{arithmetic_operation, contains};
use super::resolve;
use crate::ast::ArithmeticOp;
use crate::document::{Concept, Decimals, DimensionValue, DocumentGraph, Fact, Period, QName};
use crate::value::{Value, ValueKind};
use crate::{Signal, XruleError, XruleResult};
use rust_decimal::Decimal;

/// Evaluate property `name` of `target`
///
/// A missing target gives a missing result of the same kind. Fact metadata
/// is read from the fact itself; any other property sees the fact's typed
/// value.
pub fn property(
    target: &Value,
    name: &str,
    args: &[Value],
    ctx: &RuleContext<'_>,
) -> XruleResult<Value> {
    if target.is_missing() {
        return Ok(Value::derive(target.kind.clone(), &[target]));
    }
    let document = ctx.document();
    if let ValueKind::Fact(id) = target.kind {
        let fact = document
            .fact(id)
            .ok_or_else(|| XruleError::processing(format!("{} is not in the document", id)))?;
        if let Some(kind) = fact_property(fact, name, args, document)? {
            return Ok(Value::derive(kind, &[target]));
        }
        let resolved = resolve(document, target)?;
        return property(&resolved, name, args, ctx);
    }

    let kind = match &target.kind {
        ValueKind::Concept(qname) => qname_property(qname, name)
            .or_else(|| concept_metadata(document.concept(qname), name)),
        ValueKind::QName(qname) => qname_property(qname, name),
        ValueKind::Period(period) => period_property(period, name),
        ValueKind::Instant(at) => period_property(&Period::Instant(*at), name),
        ValueKind::Entity(entity) => match name {
            "scheme" => Some(ValueKind::String(entity.scheme.clone())),
            "id" => Some(ValueKind::String(entity.id.clone())),
            _ => None,
        },
        ValueKind::Unit(unit) => match name {
            "numerator" => Some(qname_list(unit.numerator())),
            "denominator" => Some(qname_list(unit.denominator())),
            _ => None,
        },
        ValueKind::Relationship(id) => {
            let relationship = document.relationship(*id).ok_or_else(|| {
                XruleError::processing(format!("Relationship {} is not in the document", id.0))
            })?;
            match name {
                "source" => Some(ValueKind::Concept(relationship.from.clone())),
                "target" => Some(ValueKind::Concept(relationship.to.clone())),
                "order" => Some(optional_decimal(relationship.order)),
                "weight" => Some(optional_decimal(relationship.weight)),
                "arcrole" => Some(ValueKind::String(relationship.arcrole.clone())),
                "role" => Some(ValueKind::String(relationship.role.clone())),
                _ => None,
            }
        }
        ValueKind::Taxonomy(url) => match name {
            "concepts" => {
                let concepts = taxonomy_concepts(url.as_deref(), document, ctx)?;
                Some(Value::set(concepts.into_iter().map(|c| Value::new(ValueKind::Concept(c))).collect()).kind)
            }
            _ => None,
        },
        ValueKind::String(s) => match name {
            "length" => Some(ValueKind::Int(s.chars().count() as i64)),
            "contains" => Some(ValueKind::Bool(contains(target, single_arg(name, args)?)?)),
            _ => None,
        },
        ValueKind::List(_) | ValueKind::Set(_) | ValueKind::Dict(_) => {
            collection_property(target, name, args)?
        }
        _ => None,
    };
    let kind = kind.ok_or_else(|| unknown(target, name))?;
    Ok(Value::derive(kind, &[target]))
}

fn fact_property(
    fact: &Fact,
    name: &str,
    args: &[Value],
    document: &dyn DocumentGraph,
) -> XruleResult<Option<ValueKind>> {
    let kind = match name {
        "concept" => ValueKind::Concept(fact.concept.clone()),
        "period" => ValueKind::Period(fact.period.clone()),
        "unit" => fact
            .unit
            .clone()
            .map_or(ValueKind::None, ValueKind::Unit),
        "entity" => ValueKind::Entity(fact.entity.clone()),
        "decimals" => match fact.decimals {
            Some(Decimals::Places(places)) => ValueKind::Int(i64::from(places)),
            Some(Decimals::Infinite) => ValueKind::Float(f64::INFINITY),
            None => ValueKind::None,
        },
        "dimension" => {
            let dimension = qname_arg(name, single_arg(name, args)?)?;
            match fact.dimensions.get(&dimension) {
                Some(DimensionValue::Explicit(member)) => ValueKind::QName(member.clone()),
                Some(DimensionValue::Typed(text)) => ValueKind::String(text.clone()),
                None => ValueKind::None,
            }
        }
        "dimensions" => Value::dict(
            fact.dimensions
                .iter()
                .map(|(dimension, member)| {
                    let member = match member {
                        DimensionValue::Explicit(q) => ValueKind::QName(q.clone()),
                        DimensionValue::Typed(t) => ValueKind::String(t.clone()),
                    };
                    (Value::new(ValueKind::QName(dimension.clone())), Value::new(member))
                })
                .collect(),
        )
        .kind,
        "start" | "end" | "days" => match period_property(&fact.period, name) {
            Some(kind) => kind,
            None => return Ok(None),
        },
        "is-nil" => ValueKind::Bool(fact.is_nil()),
        "name" | "local-name" | "namespace-uri" => match qname_property(&fact.concept, name) {
            Some(kind) => kind,
            None => return Ok(None),
        },
        "is-monetary" | "balance" | "period-type" | "is-abstract" => {
            match concept_metadata(document.concept(&fact.concept), name) {
                Some(kind) => kind,
                None => return Ok(None),
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(kind))
}

/// Properties read from concept metadata. An unknown concept has none of
/// its metadata.
fn concept_metadata(concept: Option<&Concept>, name: &str) -> Option<ValueKind> {
    let kind = match (name, concept) {
        ("is-monetary", Some(c)) => ValueKind::Bool(c.is_monetary()),
        ("is-numeric", Some(c)) => ValueKind::Bool(c.is_numeric()),
        ("is-abstract", Some(c)) => ValueKind::Bool(c.is_abstract),
        ("balance", Some(c)) => c
            .balance
            .map_or(ValueKind::None, |b| ValueKind::String(b.to_string())),
        ("period-type", Some(c)) => ValueKind::String(
            match c.period_type {
                crate::document::PeriodType::Instant => "instant",
                crate::document::PeriodType::Duration => "duration",
            }
            .to_string(),
        ),
        ("is-monetary" | "is-numeric" | "is-abstract" | "balance" | "period-type", None) => {
            ValueKind::None
        }
        _ => return None,
    };
    Some(kind)
}

fn qname_property(qname: &QName, name: &str) -> Option<ValueKind> {
    match name {
        "name" => Some(ValueKind::QName(qname.clone())),
        "local-name" => Some(ValueKind::String(qname.local_name.clone())),
        "namespace-uri" => Some(ValueKind::String(qname.namespace.clone())),
        _ => None,
    }
}

fn period_property(period: &Period, name: &str) -> Option<ValueKind> {
    let optional_instant = |at: Option<chrono::NaiveDateTime>| at.map_or(ValueKind::None, ValueKind::Instant);
    match name {
        "start" => Some(optional_instant(period.start())),
        "end" => Some(optional_instant(period.end())),
        "days" => Some(period.days().map_or(ValueKind::None, ValueKind::Int)),
        "is-instant" => Some(ValueKind::Bool(period.is_instant())),
        "is-forever" => Some(ValueKind::Bool(matches!(period, Period::Forever))),
        _ => None,
    }
}

fn collection_property(target: &Value, name: &str, args: &[Value]) -> XruleResult<Option<ValueKind>> {
    let items: Vec<Value> = match &target.kind {
        ValueKind::List(items) | ValueKind::Set(items) => items.clone(),
        ValueKind::Dict(entries) => entries.iter().map(|(k, _)| k.clone()).collect(),
        _ => return Ok(None),
    };
    let kind = match (name, &target.kind) {
        ("length", _) => ValueKind::Int(items.len() as i64),
        ("keys", ValueKind::Dict(_)) => Value::set(items).kind,
        ("values", ValueKind::Dict(entries)) => {
            ValueKind::List(entries.iter().map(|(_, v)| v.clone()).collect())
        }
        ("has-key", ValueKind::Dict(_)) => ValueKind::Bool(contains(target, single_arg(name, args)?)?),
        ("contains", _) => ValueKind::Bool(contains(target, single_arg(name, args)?)?),
        ("first", ValueKind::List(_) | ValueKind::Set(_)) => return Ok(Some(edge(items.first()))),
        ("last", ValueKind::List(_) | ValueKind::Set(_)) => return Ok(Some(edge(items.last()))),
        ("to-list", _) => ValueKind::List(items),
        ("to-set", _) => Value::set(items).kind,
        ("sum", ValueKind::List(_) | ValueKind::Set(_)) => {
            let mut total = Value::unbound();
            for item in &items {
                total = arithmetic_operation(&total, ArithmeticOp::Add, item, false, false)
                    .map_err(Signal::into_error)?;
            }
            total.kind
        }
        _ => return Ok(None),
    };
    Ok(Some(kind))
}

fn edge(item: Option<&Value>) -> ValueKind {
    item.map_or(ValueKind::None, |v| v.kind.clone())
}

fn taxonomy_concepts(
    url: Option<&str>,
    document: &dyn DocumentGraph,
    ctx: &RuleContext<'_>,
) -> XruleResult<Vec<QName>> {
    match url {
        None => Ok(document.concepts().into_iter().map(|c| c.name.clone()).collect()),
        Some(url) => {
            let taxonomy = ctx.global.cache.taxonomy(url, || document.load_taxonomy(url))?;
            Ok(taxonomy.concepts.iter().map(|c| c.name.clone()).collect())
        }
    }
}

fn qname_list(names: &[QName]) -> ValueKind {
    ValueKind::List(names.iter().map(|q| Value::new(ValueKind::QName(q.clone()))).collect())
}

fn optional_decimal(value: Option<Decimal>) -> ValueKind {
    value.map_or(ValueKind::None, ValueKind::Decimal)
}

fn single_arg<'a>(name: &str, args: &'a [Value]) -> XruleResult<&'a Value> {
    match args {
        [arg] => Ok(arg),
        _ => Err(XruleError::processing(format!(
            "Property '{}' expects 1 argument, found {}",
            name,
            args.len()
        ))),
    }
}

fn qname_arg(name: &str, value: &Value) -> XruleResult<QName> {
    match &value.kind {
        ValueKind::QName(q) | ValueKind::Concept(q) => Ok(q.clone()),
        ValueKind::String(s) => QName::parse(s),
        _ => Err(XruleError::processing(format!(
            "Property '{}' expects a qname, found {}",
            name,
            value.type_name()
        ))),
    }
}

fn unknown(target: &Value, name: &str) -> XruleError {
    XruleError::processing(format!(
        "'{}' is not a property of {}",
        name,
        target.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value(kind: Option<ValueKind>) -> Option<Value> {
        kind.map(Value::new)
    }

    #[test]
    fn collection_properties() {
        let list = Value::list(vec![Value::int(3), Value::int(4), Value::int(3)]);
        assert_eq!(
            value(collection_property(&list, "length", &[]).unwrap()),
            Some(Value::int(3))
        );
        assert_eq!(
            value(collection_property(&list, "sum", &[]).unwrap()),
            Some(Value::int(10))
        );
        assert_eq!(
            value(collection_property(&list, "last", &[]).unwrap()),
            Some(Value::int(3))
        );
        let set = Value::new(collection_property(&list, "to-set", &[]).unwrap().unwrap());
        assert_eq!(set.items().map(|i| i.len()), Some(2));
        assert!(collection_property(&list, "keys", &[]).unwrap().is_none());
    }

    #[test]
    fn dict_properties() {
        let dict = Value::dict(vec![
            (Value::string("a"), Value::int(1)),
            (Value::string("b"), Value::int(2)),
        ]);
        assert_eq!(
            value(collection_property(&dict, "has-key", &[Value::string("b")]).unwrap()),
            Some(Value::bool(true))
        );
        assert_eq!(
            value(collection_property(&dict, "values", &[]).unwrap()),
            Some(Value::list(vec![Value::int(1), Value::int(2)]))
        );
        assert!(collection_property(&dict, "has-key", &[]).is_err());
    }

    #[test]
    fn period_properties() {
        let period = Period::duration("2024-01-01", "2024-12-31").unwrap();
        assert_eq!(value(period_property(&period, "days")), Some(Value::int(366)));
        assert_eq!(value(period_property(&Period::Forever, "start")), Some(Value::none()));
        assert_eq!(
            value(period_property(&period, "is-instant")),
            Some(Value::bool(false))
        );
    }

    #[test]
    fn qname_parts() {
        let q = QName::new("http://example.com/ns", "Assets");
        assert_eq!(value(qname_property(&q, "local-name")), Some(Value::string("Assets")));
        assert_eq!(
            value(qname_property(&q, "namespace-uri")),
            Some(Value::string("http://example.com/ns"))
        );
    }
}
