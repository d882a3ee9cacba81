use crate::document::{Entity, Period, QName, UnitValue};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectKind {
    Concept,
    Period,
    Unit,
    Entity,
    Dimension,
}

/// Identifies one aspect of a fact. Dimensions carry the dimension name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AspectKey {
    pub kind: AspectKind,
    pub dimension: Option<QName>,
}

impl AspectKey {
    pub const CONCEPT: AspectKey = AspectKey::simple(AspectKind::Concept);
    pub const PERIOD: AspectKey = AspectKey::simple(AspectKind::Period);
    pub const UNIT: AspectKey = AspectKey::simple(AspectKind::Unit);
    pub const ENTITY: AspectKey = AspectKey::simple(AspectKind::Entity);

    pub const fn simple(kind: AspectKind) -> Self {
        Self {
            kind,
            dimension: None,
        }
    }

    /// Explicit and typed dimensions share a key; the value tells them apart
    pub fn dimension(name: QName) -> Self {
        Self {
            kind: AspectKind::Dimension,
            dimension: Some(name),
        }
    }

    pub fn is_dimension(&self) -> bool {
        self.dimension.is_some()
    }
}

impl fmt::Display for AspectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.dimension) {
            (_, Some(dim)) => write!(f, "{}", dim),
            (AspectKind::Concept, None) => write!(f, "concept"),
            (AspectKind::Period, None) => write!(f, "period"),
            (AspectKind::Unit, None) => write!(f, "unit"),
            (AspectKind::Entity, None) => write!(f, "entity"),
            (AspectKind::Dimension, None) => write!(f, "dimension"),
        }
    }
}

/// Value of an aspect or an indexed derived property
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectValue {
    QName(QName),
    Period(Period),
    Unit(UnitValue),
    Entity(Entity),
    Typed(String),
    Bool(bool),
    Int(i64),
    Instant(NaiveDateTime),
}

impl fmt::Display for AspectValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AspectValue::QName(q) => write!(f, "{}", q),
            AspectValue::Period(p) => write!(f, "{}", p),
            AspectValue::Unit(u) => write!(f, "{}", u),
            AspectValue::Entity(e) => write!(f, "{}", e),
            AspectValue::Typed(s) => write!(f, "{}", s),
            AspectValue::Bool(b) => write!(f, "{}", b),
            AspectValue::Int(i) => write!(f, "{}", i),
            AspectValue::Instant(at) => write!(f, "{}", crate::document::display_date(at, true)),
        }
    }
}

/// Frozen aspect map shared between every value produced under it
///
/// Cloning is a reference count bump. Ordering follows the underlying map so
/// alignments can key ordered collections deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alignment(Arc<BTreeMap<AspectKey, AspectValue>>);

impl Alignment {
    pub fn new(aspects: BTreeMap<AspectKey, AspectValue>) -> Self {
        Alignment(Arc::new(aspects))
    }

    pub fn get(&self, key: &AspectKey) -> Option<&AspectValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &AspectKey) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AspectKey, &AspectValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The alignment with the given aspects dropped
    pub fn without<'k>(&self, keys: impl IntoIterator<Item = &'k AspectKey>) -> Alignment {
        let mut aspects = (*self.0).clone();
        for key in keys {
            aspects.remove(key);
        }
        Alignment::new(aspects)
    }
}

impl FromIterator<(AspectKey, AspectValue)> for Alignment {
    fn from_iter<T: IntoIterator<Item = (AspectKey, AspectValue)>>(iter: T) -> Self {
        Alignment::new(iter.into_iter().collect())
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

impl Serialize for Alignment {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }
}
