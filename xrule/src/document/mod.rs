//! Instance document model
//!
//! The evaluator treats the host document as an opaque graph reached through
//! [`DocumentGraph`]. This module defines the value types that cross that
//! boundary (qualified names, periods, units, entities, facts, concepts and
//! relationships) and ships [`MemoryDocument`], a serde-loadable implementation.

pub mod memory;

pub use memory::MemoryDocument;

use crate::{XruleError, XruleResult};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Namespace-qualified name, written `{namespace}local` when serialized
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QName {
    pub namespace: String,
    pub local_name: String,
}

impl QName {
    pub fn new(namespace: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
        }
    }

    /// A name without a namespace
    pub fn local(local_name: impl Into<String>) -> Self {
        Self::new("", local_name)
    }

    /// Parse Clark notation (`{ns}local`) or a bare local name
    pub fn parse(text: &str) -> XruleResult<Self> {
        if let Some(rest) = text.strip_prefix('{') {
            let (ns, local) = rest.split_once('}').ok_or_else(|| {
                XruleError::Document(format!("Unterminated namespace in qname '{}'", text))
            })?;
            if local.is_empty() {
                return Err(XruleError::Document(format!(
                    "QName '{}' has no local name",
                    text
                )));
            }
            Ok(Self::new(ns, local))
        } else if text.is_empty() {
            Err(XruleError::Document("Empty qname".to_string()))
        } else {
            Ok(Self::local(text))
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.local_name)
        } else {
            write!(f, "{{{}}}{}", self.namespace, self.local_name)
        }
    }
}

impl TryFrom<String> for QName {
    type Error = XruleError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        QName::parse(&text)
    }
}

impl From<QName> for String {
    fn from(qname: QName) -> Self {
        qname.to_string()
    }
}

/// Reporting period of a fact
///
/// Instants and duration ends are stored as the moment just after the
/// reported day, so `2020-12-31` as an instant equals the start of a duration
/// beginning `2021-01-01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "PeriodRepr", into = "PeriodRepr")]
pub enum Period {
    Instant(NaiveDateTime),
    Duration {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    Forever,
}

impl Period {
    pub fn instant(date: &str) -> XruleResult<Self> {
        Ok(Period::Instant(parse_date_time(date, true)?))
    }

    pub fn duration(start: &str, end: &str) -> XruleResult<Self> {
        let start = parse_date_time(start, false)?;
        let end = parse_date_time(end, true)?;
        if end < start {
            return Err(XruleError::Document(format!(
                "Period end {} is before start {}",
                end, start
            )));
        }
        Ok(Period::Duration { start, end })
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        match self {
            Period::Instant(at) => Some(*at),
            Period::Duration { start, .. } => Some(*start),
            Period::Forever => None,
        }
    }

    pub fn end(&self) -> Option<NaiveDateTime> {
        match self {
            Period::Instant(at) => Some(*at),
            Period::Duration { end, .. } => Some(*end),
            Period::Forever => None,
        }
    }

    /// Whole days covered by the period; instants cover none
    pub fn days(&self) -> Option<i64> {
        match self {
            Period::Instant(_) => Some(0),
            Period::Duration { start, end } => Some((*end - *start).num_days()),
            Period::Forever => None,
        }
    }

    pub fn is_instant(&self) -> bool {
        matches!(self, Period::Instant(_))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Instant(at) => write!(f, "{}", display_date(at, true)),
            Period::Duration { start, end } => write!(
                f,
                "{} - {}",
                display_date(start, false),
                display_date(end, true)
            ),
            Period::Forever => write!(f, "forever"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum PeriodRepr {
    Instant { instant: String },
    Duration { start: String, end: String },
    Keyword(String),
}

impl TryFrom<PeriodRepr> for Period {
    type Error = XruleError;

    fn try_from(repr: PeriodRepr) -> Result<Self, Self::Error> {
        match repr {
            PeriodRepr::Instant { instant } => Period::instant(&instant),
            PeriodRepr::Duration { start, end } => Period::duration(&start, &end),
            PeriodRepr::Keyword(word) if word == "forever" => Ok(Period::Forever),
            PeriodRepr::Keyword(word) => Period::instant(&word),
        }
    }
}

impl From<Period> for PeriodRepr {
    fn from(period: Period) -> Self {
        match period {
            Period::Instant(at) => PeriodRepr::Instant {
                instant: display_date(&at, true),
            },
            Period::Duration { start, end } => PeriodRepr::Duration {
                start: display_date(&start, false),
                end: display_date(&end, true),
            },
            Period::Forever => PeriodRepr::Keyword("forever".to_string()),
        }
    }
}

/// Parse an ISO date or datetime. Bare dates used as an end or instant roll
/// over to midnight of the following day.
pub fn parse_date_time(text: &str, end_of_day: bool) -> XruleResult<NaiveDateTime> {
    let text = text.trim();
    if let Ok(at) = NaiveDateTime::from_str(text) {
        return Ok(at);
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|e| XruleError::Document(format!("Invalid date '{}': {}", text, e)))?;
    let midnight = date.and_time(NaiveTime::MIN);
    if end_of_day {
        Ok(midnight + ChronoDuration::days(1))
    } else {
        Ok(midnight)
    }
}

/// Inverse of [`parse_date_time`] for whole-day values
pub fn display_date(at: &NaiveDateTime, end_of_day: bool) -> String {
    if at.time() != NaiveTime::MIN {
        return at.to_string();
    }
    let shown = if end_of_day {
        *at - ChronoDuration::days(1)
    } else {
        *at
    };
    shown.date().format("%Y-%m-%d").to_string()
}

/// Reporting entity (identifier scheme and value)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entity {
    pub scheme: String,
    pub id: String,
}

impl Entity {
    pub fn new(scheme: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.id)
    }
}

/// A unit of measure: numerator and denominator measure multisets
///
/// Construction cancels measures that appear on both sides and sorts both
/// lists, so structurally equal units compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "UnitRepr", into = "UnitRepr")]
pub struct UnitValue {
    numerator: Vec<QName>,
    denominator: Vec<QName>,
}

impl UnitValue {
    pub fn new(numerator: Vec<QName>, denominator: Vec<QName>) -> Self {
        let mut numerator = numerator;
        let mut denominator = denominator;
        let mut remaining = Vec::with_capacity(numerator.len());
        for measure in numerator.drain(..) {
            if let Some(pos) = denominator.iter().position(|d| *d == measure) {
                denominator.remove(pos);
            } else {
                remaining.push(measure);
            }
        }
        remaining.sort();
        denominator.sort();
        Self {
            numerator: remaining,
            denominator,
        }
    }

    pub fn single(measure: QName) -> Self {
        Self::new(vec![measure], Vec::new())
    }

    pub fn numerator(&self) -> &[QName] {
        &self.numerator
    }

    pub fn denominator(&self) -> &[QName] {
        &self.denominator
    }

    pub fn multiply(&self, other: &UnitValue) -> UnitValue {
        let mut numerator = self.numerator.clone();
        numerator.extend(other.numerator.iter().cloned());
        let mut denominator = self.denominator.clone();
        denominator.extend(other.denominator.iter().cloned());
        UnitValue::new(numerator, denominator)
    }

    pub fn divide(&self, other: &UnitValue) -> UnitValue {
        let mut numerator = self.numerator.clone();
        numerator.extend(other.denominator.iter().cloned());
        let mut denominator = self.denominator.clone();
        denominator.extend(other.numerator.iter().cloned());
        UnitValue::new(numerator, denominator)
    }

    /// Pure (dimensionless) after cancellation
    pub fn is_pure(&self) -> bool {
        self.numerator.is_empty() && self.denominator.is_empty()
    }
}

impl fmt::Display for UnitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |measures: &[QName]| {
            measures
                .iter()
                .map(|m| m.local_name.clone())
                .collect::<Vec<_>>()
                .join("*")
        };
        if self.numerator.is_empty() && self.denominator.is_empty() {
            return write!(f, "pure");
        }
        let numerator = if self.numerator.is_empty() {
            "1".to_string()
        } else {
            join(&self.numerator)
        };
        if self.denominator.is_empty() {
            write!(f, "{}", numerator)
        } else {
            write!(f, "{}/{}", numerator, join(&self.denominator))
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum UnitRepr {
    Measure(QName),
    Ratio {
        numerator: Vec<QName>,
        #[serde(default)]
        denominator: Vec<QName>,
    },
}

impl TryFrom<UnitRepr> for UnitValue {
    type Error = XruleError;

    fn try_from(repr: UnitRepr) -> Result<Self, Self::Error> {
        Ok(match repr {
            UnitRepr::Measure(measure) => UnitValue::single(measure),
            UnitRepr::Ratio {
                numerator,
                denominator,
            } => UnitValue::new(numerator, denominator),
        })
    }
}

impl From<UnitValue> for UnitRepr {
    fn from(unit: UnitValue) -> Self {
        UnitRepr::Ratio {
            numerator: unit.numerator,
            denominator: unit.denominator,
        }
    }
}

/// Member of a dimension: an explicit member name or a typed value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DimensionValue {
    Explicit(QName),
    Typed(String),
}

/// Precision of a numeric fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "serde_json::Value", into = "serde_json::Value")]
pub enum Decimals {
    Infinite,
    Places(i32),
}

impl Decimals {
    /// The lower precision of the two, used when comparing duplicates
    pub fn min(self, other: Decimals) -> Decimals {
        match (self, other) {
            (Decimals::Infinite, d) | (d, Decimals::Infinite) => d,
            (Decimals::Places(a), Decimals::Places(b)) => Decimals::Places(a.min(b)),
        }
    }

    pub fn is_more_precise_than(self, other: Decimals) -> bool {
        match (self, other) {
            (Decimals::Infinite, Decimals::Infinite) => false,
            (Decimals::Infinite, _) => true,
            (_, Decimals::Infinite) => false,
            (Decimals::Places(a), Decimals::Places(b)) => a > b,
        }
    }

    /// Round a value to this precision (negative places round to tens, hundreds, ...)
    pub fn round(self, value: Decimal) -> Decimal {
        match self {
            Decimals::Infinite => value,
            Decimals::Places(places) if places >= 0 => value.round_dp(places as u32),
            Decimals::Places(places) => {
                let scale = Decimal::from(10i64.pow(places.unsigned_abs().min(18)));
                (value / scale).round() * scale
            }
        }
    }
}

impl TryFrom<serde_json::Value> for Decimals {
    type Error = XruleError;

    fn try_from(raw: serde_json::Value) -> Result<Self, Self::Error> {
        match &raw {
            serde_json::Value::String(s) if s.eq_ignore_ascii_case("INF") => {
                Ok(Decimals::Infinite)
            }
            serde_json::Value::String(s) => s
                .parse::<i32>()
                .map(Decimals::Places)
                .map_err(|_| XruleError::Document(format!("Invalid decimals '{}'", s))),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(|n| Decimals::Places(n as i32))
                .ok_or_else(|| XruleError::Document(format!("Invalid decimals {}", n))),
            other => Err(XruleError::Document(format!("Invalid decimals {}", other))),
        }
    }
}

impl From<Decimals> for serde_json::Value {
    fn from(decimals: Decimals) -> Self {
        match decimals {
            Decimals::Infinite => serde_json::Value::String("INF".to_string()),
            Decimals::Places(p) => serde_json::Value::from(p),
        }
    }
}

/// Index of a fact in its document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactId(pub u32);

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fact_{}", self.0)
    }
}

/// A reported fact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    #[serde(default = "unassigned_fact_id")]
    pub id: FactId,
    pub concept: QName,
    pub period: Period,
    #[serde(default)]
    pub unit: Option<UnitValue>,
    pub entity: Entity,
    #[serde(default)]
    pub dimensions: BTreeMap<QName, DimensionValue>,
    /// Raw lexical value; `None` for nil facts
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub decimals: Option<Decimals>,
}

fn unassigned_fact_id() -> FactId {
    FactId(u32::MAX)
}

impl Fact {
    pub fn is_nil(&self) -> bool {
        self.value.is_none()
    }

    pub fn numeric_value(&self) -> Option<Decimal> {
        self.value
            .as_deref()
            .and_then(|v| Decimal::from_str(v.trim()).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodType {
    Instant,
    Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Balance {
    Debit,
    Credit,
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Balance::Debit => write!(f, "debit"),
            Balance::Credit => write!(f, "credit"),
        }
    }
}

/// The kind of content a concept reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    Monetary,
    Decimal,
    Integer,
    Boolean,
    Date,
    #[default]
    String,
}

impl DataKind {
    pub fn is_numeric(self) -> bool {
        matches!(self, DataKind::Monetary | DataKind::Decimal | DataKind::Integer)
    }
}

/// Concept metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub name: QName,
    #[serde(default)]
    pub data_kind: DataKind,
    #[serde(default = "default_period_type")]
    pub period_type: PeriodType,
    #[serde(default)]
    pub balance: Option<Balance>,
    #[serde(default, rename = "abstract")]
    pub is_abstract: bool,
}

fn default_period_type() -> PeriodType {
    PeriodType::Duration
}

impl Concept {
    pub fn is_numeric(&self) -> bool {
        self.data_kind.is_numeric()
    }

    pub fn is_monetary(&self) -> bool {
        self.data_kind == DataKind::Monetary
    }
}

/// Index of a relationship in its document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipId(pub u32);

/// An arc in a relationship network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub arcrole: String,
    #[serde(default = "default_link_role")]
    pub role: String,
    pub from: QName,
    pub to: QName,
    #[serde(default)]
    pub order: Option<Decimal>,
    #[serde(default)]
    pub weight: Option<Decimal>,
}

pub const DEFAULT_LINK_ROLE: &str = "http://www.xbrl.org/2003/role/link";

fn default_link_role() -> String {
    DEFAULT_LINK_ROLE.to_string()
}

/// Role type metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub uri: String,
    #[serde(default)]
    pub definition: Option<String>,
}

/// Concepts and networks loaded from an external taxonomy URL
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Taxonomy {
    #[serde(default)]
    pub concepts: Vec<Concept>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl Taxonomy {
    pub fn concept(&self, name: &QName) -> Option<&Concept> {
        self.concepts.iter().find(|c| c.name == *name)
    }
}

/// Read-only access to the document the rules run against
///
/// Implementations must be safe to share across threads running independent
/// rules.
pub trait DocumentGraph: Send + Sync {
    fn facts(&self) -> &[Fact];

    fn fact(&self, id: FactId) -> Option<&Fact> {
        self.facts().get(id.0 as usize)
    }

    fn concept(&self, name: &QName) -> Option<&Concept>;

    fn concepts(&self) -> Vec<&Concept>;

    /// Relationships with the given arcrole, optionally restricted to a role
    fn relationships(&self, arcrole: &str, role: Option<&str>) -> Vec<(RelationshipId, &Relationship)>;

    fn relationship(&self, id: RelationshipId) -> Option<&Relationship>;

    fn role(&self, uri: &str) -> Option<&Role>;

    /// Fetch a taxonomy by URL. Callers memoize through the global context.
    fn load_taxonomy(&self, url: &str) -> XruleResult<Arc<Taxonomy>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qname_clark_round_trip() {
        let q = QName::parse("{http://fasb.org/us-gaap}Assets").unwrap();
        assert_eq!(q.namespace, "http://fasb.org/us-gaap");
        assert_eq!(q.local_name, "Assets");
        assert_eq!(QName::parse(&q.to_string()).unwrap(), q);
        assert!(QName::parse("{ns}").is_err());
    }

    #[test]
    fn instant_rolls_to_next_midnight() {
        let instant = Period::instant("2020-12-31").unwrap();
        let duration = Period::duration("2021-01-01", "2021-12-31").unwrap();
        assert_eq!(instant.end(), duration.start());
        assert_eq!(duration.days(), Some(365));
        assert_eq!(instant.to_string(), "2020-12-31");
    }

    #[test]
    fn units_cancel_and_sort() {
        let usd = QName::local("USD");
        let shares = QName::local("shares");
        let per_share = UnitValue::new(vec![usd.clone()], vec![shares.clone()]);
        let total = per_share.multiply(&UnitValue::single(shares));
        assert_eq!(total, UnitValue::single(usd));
        assert_eq!(per_share.to_string(), "USD/shares");
    }

    #[test]
    fn decimals_rounding_and_precision() {
        let value = Decimal::from_str("1234.567").unwrap();
        assert_eq!(
            Decimals::Places(-2).round(value),
            Decimal::from_str("1200").unwrap()
        );
        assert_eq!(
            Decimals::Places(1).round(value),
            Decimal::from_str("1234.6").unwrap()
        );
        assert!(Decimals::Infinite.is_more_precise_than(Decimals::Places(4)));
        assert_eq!(
            Decimals::Places(2).min(Decimals::Infinite),
            Decimals::Places(2)
        );
    }
}
