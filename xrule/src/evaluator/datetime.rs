//! Instant and time span arithmetic
//!
//! Instants are `NaiveDateTime`s; a bare date means the end of that day, so
//! `2024-12-31` and the start of `2025-01-01` are the same instant.

use crate::ast::ArithmeticOp;
use crate::document::Period;
use crate::value::{Value, ValueKind};
use crate::{XruleError, XruleResult};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// `+`/`-` between instants and time spans
///
/// - instant ± span = instant
/// - instant - instant = span
/// - span ± span = span
pub fn datetime_arithmetic(
    left: &Value,
    op: ArithmeticOp,
    right: &Value,
) -> XruleResult<ValueKind> {
    match (&left.kind, op, &right.kind) {
        (ValueKind::Instant(at), ArithmeticOp::Add, ValueKind::TimeSpan(span))
        | (ValueKind::TimeSpan(span), ArithmeticOp::Add, ValueKind::Instant(at)) => at
            .checked_add_signed(*span)
            .map(ValueKind::Instant)
            .ok_or_else(|| XruleError::processing("Date arithmetic overflowed")),
        (ValueKind::Instant(at), ArithmeticOp::Subtract, ValueKind::TimeSpan(span)) => at
            .checked_sub_signed(*span)
            .map(ValueKind::Instant)
            .ok_or_else(|| XruleError::processing("Date arithmetic overflowed")),
        (ValueKind::Instant(a), ArithmeticOp::Subtract, ValueKind::Instant(b)) => {
            Ok(ValueKind::TimeSpan(a.signed_duration_since(*b)))
        }
        (ValueKind::TimeSpan(a), ArithmeticOp::Add, ValueKind::TimeSpan(b)) => a
            .checked_add(b)
            .map(ValueKind::TimeSpan)
            .ok_or_else(|| XruleError::processing("Time span overflowed")),
        (ValueKind::TimeSpan(a), ArithmeticOp::Subtract, ValueKind::TimeSpan(b)) => a
            .checked_sub(b)
            .map(ValueKind::TimeSpan)
            .ok_or_else(|| XruleError::processing("Time span overflowed")),
        _ => Err(XruleError::processing(format!(
            "Operator '{}' is not supported for {} and {}",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

/// Ordering for temporal values of the same kind
pub fn datetime_ordering(left: &ValueKind, right: &ValueKind) -> Option<Ordering> {
    match (left, right) {
        (ValueKind::Instant(a), ValueKind::Instant(b)) => Some(a.cmp(b)),
        (ValueKind::TimeSpan(a), ValueKind::TimeSpan(b)) => Some(a.cmp(b)),
        (ValueKind::Period(a), ValueKind::Period(b)) => period_ordering(a, b),
        _ => None,
    }
}

/// Periods order by end, then start
fn period_ordering(a: &Period, b: &Period) -> Option<Ordering> {
    let end = match (a.end(), b.end()) {
        (Some(x), Some(y)) => x.cmp(&y),
        _ => return None,
    };
    Some(end.then_with(|| a.start().cmp(&b.start())))
}

fn time_span_pattern() -> XruleResult<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"^(-)?P(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").ok()
        })
        .as_ref()
        .ok_or_else(|| XruleError::Engine("time span pattern failed to compile".to_string()))
}

/// Parse an ISO 8601 day-time duration such as `P10D`, `P2W` or `PT12H`
pub fn parse_time_span(text: &str) -> XruleResult<ChronoDuration> {
    let text = text.trim();
    let invalid = || XruleError::processing(format!("Invalid time span '{}'", text));
    let captures = time_span_pattern()?.captures(text).ok_or_else(invalid)?;
    if text.ends_with('P') || text.ends_with('T') {
        return Err(invalid());
    }
    let part = |i: usize| -> XruleResult<i64> {
        captures
            .get(i)
            .map_or(Ok(0), |m| m.as_str().parse::<i64>().map_err(|_| invalid()))
    };
    let span = ChronoDuration::weeks(part(2)?)
        + ChronoDuration::days(part(3)?)
        + ChronoDuration::hours(part(4)?)
        + ChronoDuration::minutes(part(5)?)
        + ChronoDuration::seconds(part(6)?);
    Ok(if captures.get(1).is_some() { -span } else { span })
}

/// Period between two instants, rejecting reversed bounds
pub fn duration_between(start: NaiveDateTime, end: NaiveDateTime) -> XruleResult<Period> {
    if end < start {
        return Err(XruleError::processing(format!(
            "Duration end {} is before its start {}",
            end, start
        )));
    }
    Ok(Period::Duration { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_date_time;

    fn instant(text: &str) -> Value {
        Value::new(ValueKind::Instant(parse_date_time(text, true).unwrap()))
    }

    #[test]
    fn instant_plus_span() {
        let span = Value::new(ValueKind::TimeSpan(parse_time_span("P1D").unwrap()));
        let result = datetime_arithmetic(&instant("2024-12-30"), ArithmeticOp::Add, &span).unwrap();
        assert!(matches!(result, ValueKind::Instant(at) if at == parse_date_time("2024-12-31", true).unwrap()));
    }

    #[test]
    fn instant_difference_is_a_span() {
        let result =
            datetime_arithmetic(&instant("2024-12-31"), ArithmeticOp::Subtract, &instant("2024-01-01"))
                .unwrap();
        assert!(matches!(result, ValueKind::TimeSpan(span) if span.num_days() == 365));
    }

    #[test]
    fn time_span_forms() {
        assert_eq!(parse_time_span("P2W").unwrap().num_days(), 14);
        assert_eq!(parse_time_span("PT36H").unwrap().num_hours(), 36);
        assert_eq!(parse_time_span("-P3D").unwrap().num_days(), -3);
        assert!(parse_time_span("P").is_err());
        assert!(parse_time_span("3 days").is_err());
    }

    #[test]
    fn reversed_duration_is_rejected() {
        let start = parse_date_time("2024-01-01", false).unwrap();
        let end = parse_date_time("2023-01-01", false).unwrap();
        assert!(duration_between(start, end).is_err());
        assert!(duration_between(end, start).is_ok());
    }
}
