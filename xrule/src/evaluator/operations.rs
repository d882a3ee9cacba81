//! Type-aware arithmetic, comparison and unary operations
//!
//! Operands arrive with fact references already resolved to typed values.
//! Results inherit the provenance of every operand.
//!
//! Numbers promote along int → decimal → float:
//! ```text
//! 1 + 2.5     = 3.5  (decimal)
//! 1 + 2.5e0   = 3.5  (float)
//! 7 / 2       = 3.5  (float)
//! ```

use super::datetime::{datetime_arithmetic, datetime_ordering};
use crate::ast::{ArithmeticOp, ComparisonOp, UnaryOp};
use crate::value::{Value, ValueKind};
use crate::{EvalResult, Signal, XruleError, XruleResult};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Decimal(Decimal),
    Float(f64),
}

impl Number {
    fn of(kind: &ValueKind) -> Option<Number> {
        match kind {
            ValueKind::Int(i) => Some(Number::Int(*i)),
            ValueKind::Decimal(d) => Some(Number::Decimal(*d)),
            ValueKind::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    fn to_decimal(self) -> XruleResult<Decimal> {
        match self {
            Number::Int(i) => Ok(Decimal::from(i)),
            Number::Decimal(d) => Ok(d),
            Number::Float(f) => Decimal::from_f64(f)
                .ok_or_else(|| XruleError::processing(format!("{} has no decimal form", f))),
        }
    }

    fn to_float(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Decimal(d) => d.to_f64().unwrap_or(f64::NAN),
            Number::Float(f) => f,
        }
    }
}

/// Perform a binary arithmetic operation
///
/// A missing operand on a soft side acts as the identity for `+` and `-`;
/// on a hard (bar-delimited) side it stops the iteration. For `*` and `/`
/// a missing operand makes the result missing.
///
/// ```text
/// unbound + 5     = 5
/// unbound - (-5)  = 5
/// 3 +| unbound    → iteration stop
/// ```
pub fn arithmetic_operation(
    left: &Value,
    op: ArithmeticOp,
    right: &Value,
    hard_left: bool,
    hard_right: bool,
) -> EvalResult<Value> {
    if (hard_left && left.is_missing()) || (hard_right && right.is_missing()) {
        return Err(Signal::IterationStop);
    }
    let sources = [left, right];

    if left.is_missing() || right.is_missing() {
        let kind = match op {
            ArithmeticOp::Add | ArithmeticOp::Subtract => match (left.is_missing(), right.is_missing()) {
                (true, true) => missing_of(left, right),
                (true, false) if op == ArithmeticOp::Subtract => negate(right)?,
                (true, false) => right.kind.clone(),
                _ => left.kind.clone(),
            },
            ArithmeticOp::Multiply | ArithmeticOp::Divide => missing_of(left, right),
        };
        return Ok(Value::derive(kind, &sources));
    }

    let kind = match (Number::of(&left.kind), Number::of(&right.kind)) {
        (Some(l), Some(r)) => number_arithmetic(l, op, r)?,
        _ => match op {
            ArithmeticOp::Add | ArithmeticOp::Subtract => additive(left, op, right)?,
            _ => return Err(unsupported(op.symbol(), left, right).into()),
        },
    };
    Ok(Value::derive(kind, &sources))
}

/// `none` only when both operands are none, otherwise unbound
fn missing_of(left: &Value, right: &Value) -> ValueKind {
    if left.is_none() && right.is_none() {
        ValueKind::None
    } else if left.is_unbound() || right.is_unbound() {
        ValueKind::Unbound
    } else {
        ValueKind::None
    }
}

fn number_arithmetic(left: Number, op: ArithmeticOp, right: Number) -> XruleResult<ValueKind> {
    match (left, right) {
        (Number::Float(_), _) | (_, Number::Float(_)) => {
            float_arithmetic(left.to_float(), op, right.to_float())
        }
        (Number::Int(l), Number::Int(r)) => match op {
            ArithmeticOp::Divide => float_arithmetic(l as f64, op, r as f64),
            _ => {
                let result = match op {
                    ArithmeticOp::Add => l.checked_add(r),
                    ArithmeticOp::Subtract => l.checked_sub(r),
                    _ => l.checked_mul(r),
                };
                match result {
                    Some(i) => Ok(ValueKind::Int(i)),
                    None => decimal_arithmetic(Decimal::from(l), op, Decimal::from(r)),
                }
            }
        },
        _ => decimal_arithmetic(left.to_decimal()?, op, right.to_decimal()?),
    }
}

fn decimal_arithmetic(left: Decimal, op: ArithmeticOp, right: Decimal) -> XruleResult<ValueKind> {
    let result = match op {
        ArithmeticOp::Add => left.checked_add(right),
        ArithmeticOp::Subtract => left.checked_sub(right),
        ArithmeticOp::Multiply => left.checked_mul(right),
        ArithmeticOp::Divide => {
            if right.is_zero() {
                return Err(XruleError::processing("Division by zero"));
            }
            left.checked_div(right)
        }
    };
    result
        .map(ValueKind::Decimal)
        .ok_or_else(|| XruleError::processing(format!("Overflow in {} {} {}", left, op.symbol(), right)))
}

fn float_arithmetic(left: f64, op: ArithmeticOp, right: f64) -> XruleResult<ValueKind> {
    let result = match op {
        ArithmeticOp::Add => left + right,
        ArithmeticOp::Subtract => left - right,
        ArithmeticOp::Multiply => left * right,
        ArithmeticOp::Divide => {
            if right == 0.0 {
                return Err(XruleError::processing("Division by zero"));
            }
            left / right
        }
    };
    Ok(ValueKind::Float(result))
}

/// `+`/`-` on strings, collections and temporal values
fn additive(left: &Value, op: ArithmeticOp, right: &Value) -> XruleResult<ValueKind> {
    match (&left.kind, op, &right.kind) {
        (ValueKind::String(l), ArithmeticOp::Add, ValueKind::String(r)) => {
            Ok(ValueKind::String(format!("{}{}", l, r)))
        }
        (ValueKind::List(l), ArithmeticOp::Add, ValueKind::List(r)) => {
            Ok(ValueKind::List(l.iter().chain(r.iter()).cloned().collect()))
        }
        (ValueKind::List(l), ArithmeticOp::Subtract, ValueKind::List(r)) => Ok(ValueKind::List(
            l.iter().filter(|item| !r.contains(item)).cloned().collect(),
        )),
        (ValueKind::Set(l), ArithmeticOp::Add, ValueKind::Set(r)) => {
            Ok(Value::set(l.iter().chain(r.iter()).cloned().collect()).kind)
        }
        (ValueKind::Set(l), ArithmeticOp::Subtract, ValueKind::Set(r)) => Ok(ValueKind::Set(
            l.iter().filter(|item| !r.contains(item)).cloned().collect(),
        )),
        (ValueKind::Dict(l), ArithmeticOp::Add, ValueKind::Dict(r)) => {
            Ok(Value::dict(l.iter().chain(r.iter()).cloned().collect()).kind)
        }
        (ValueKind::Instant(_) | ValueKind::TimeSpan(_), _, _) => {
            datetime_arithmetic(left, op, right)
        }
        _ => Err(unsupported(op.symbol(), left, right)),
    }
}

fn negate(value: &Value) -> XruleResult<ValueKind> {
    match &value.kind {
        ValueKind::Int(i) => Ok(i
            .checked_neg()
            .map(ValueKind::Int)
            .unwrap_or_else(|| ValueKind::Decimal(-Decimal::from(*i)))),
        ValueKind::Decimal(d) => Ok(ValueKind::Decimal(-*d)),
        ValueKind::Float(f) => Ok(ValueKind::Float(-*f)),
        ValueKind::TimeSpan(span) => Ok(ValueKind::TimeSpan(-*span)),
        ValueKind::None | ValueKind::Unbound => Ok(value.kind.clone()),
        _ => Err(XruleError::processing(format!(
            "Cannot negate a {} value",
            value.type_name()
        ))),
    }
}

/// Perform a unary operation
pub fn unary_operation(op: UnaryOp, operand: &Value) -> XruleResult<Value> {
    let kind = match op {
        UnaryOp::Negate => negate(operand)?,
        UnaryOp::Plus => {
            if operand.is_numeric() || operand.is_missing() {
                operand.kind.clone()
            } else {
                return Err(XruleError::processing(format!(
                    "Unary '+' is not supported for {}",
                    operand.type_name()
                )));
            }
        }
        UnaryOp::Not => match operand.kind {
            ValueKind::Bool(b) => ValueKind::Bool(!b),
            ValueKind::None | ValueKind::Unbound => operand.kind.clone(),
            _ => {
                return Err(XruleError::processing(format!(
                    "'not' requires a boolean, found {}",
                    operand.type_name()
                )))
            }
        },
    };
    Ok(Value::derive(kind, &[operand]))
}

/// Perform a comparison
///
/// Unbound on either side gives unbound. `none` equals only `none`; ordering
/// against `none` gives none except that `none <= none` and `none >= none`
/// hold.
pub fn comparison_operation(left: &Value, op: ComparisonOp, right: &Value) -> XruleResult<Value> {
    let sources = [left, right];
    if left.is_unbound() || right.is_unbound() {
        return Ok(Value::derive(ValueKind::Unbound, &sources));
    }

    let kind = match op {
        ComparisonOp::Eq => ValueKind::Bool(left == right),
        ComparisonOp::Ne => ValueKind::Bool(left != right),
        ComparisonOp::In | ComparisonOp::NotIn => {
            if right.is_none() {
                ValueKind::None
            } else {
                let found = contains(right, left)?;
                ValueKind::Bool(if op == ComparisonOp::In { found } else { !found })
            }
        }
        ComparisonOp::Lt | ComparisonOp::Gt | ComparisonOp::Le | ComparisonOp::Ge => {
            match (left.is_none(), right.is_none()) {
                (true, true) => {
                    ValueKind::Bool(matches!(op, ComparisonOp::Le | ComparisonOp::Ge))
                }
                (true, false) | (false, true) => ValueKind::None,
                (false, false) => {
                    let ordering = ordering(left, right)
                        .ok_or_else(|| unsupported(op.symbol(), left, right))?;
                    ValueKind::Bool(match op {
                        ComparisonOp::Lt => ordering == Ordering::Less,
                        ComparisonOp::Gt => ordering == Ordering::Greater,
                        ComparisonOp::Le => ordering != Ordering::Greater,
                        _ => ordering != Ordering::Less,
                    })
                }
            }
        }
    };
    Ok(Value::derive(kind, &sources))
}

/// Membership in a collection, or substring of a string
pub fn contains(collection: &Value, item: &Value) -> XruleResult<bool> {
    match (&collection.kind, &item.kind) {
        (ValueKind::String(haystack), ValueKind::String(needle)) => Ok(haystack.contains(needle.as_str())),
        _ => match collection.items() {
            Some(items) => Ok(items.into_iter().any(|candidate| candidate == item)),
            None => Err(XruleError::processing(format!(
                "'in' requires a collection or string, found {}",
                collection.type_name()
            ))),
        },
    }
}

/// Natural ordering of two comparable values
pub fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (Number::of(&left.kind), Number::of(&right.kind)) {
        (Some(l), Some(r)) => number_ordering(l, r),
        _ => match (&left.kind, &right.kind) {
            (ValueKind::String(l), ValueKind::String(r)) => Some(l.cmp(r)),
            (ValueKind::Bool(l), ValueKind::Bool(r)) => Some(l.cmp(r)),
            _ => datetime_ordering(&left.kind, &right.kind),
        },
    }
}

fn number_ordering(left: Number, right: Number) -> Option<Ordering> {
    match (left, right) {
        (Number::Float(_), _) | (_, Number::Float(_)) => left.to_float().partial_cmp(&right.to_float()),
        _ => Some(left.to_decimal().ok()?.cmp(&right.to_decimal().ok()?)),
    }
}

fn unsupported(symbol: &str, left: &Value, right: &Value) -> XruleError {
    XruleError::processing(format!(
        "Operator '{}' is not supported for {} and {}",
        symbol,
        left.type_name(),
        right.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(text: &str) -> Value {
        Value::decimal(Decimal::from_str(text).unwrap())
    }

    fn soft(left: &Value, op: ArithmeticOp, right: &Value) -> Value {
        arithmetic_operation(left, op, right, false, false).unwrap()
    }

    #[test]
    fn promotion() {
        assert!(matches!(soft(&Value::int(1), ArithmeticOp::Add, &Value::int(2)).kind, ValueKind::Int(3)));
        assert!(matches!(
            soft(&Value::int(1), ArithmeticOp::Add, &dec("2.5")).kind,
            ValueKind::Decimal(_)
        ));
        assert!(matches!(
            soft(&dec("1"), ArithmeticOp::Multiply, &Value::float(2.0)).kind,
            ValueKind::Float(_)
        ));
        assert_eq!(
            soft(&Value::int(7), ArithmeticOp::Divide, &Value::int(2)),
            Value::float(3.5)
        );
    }

    #[test]
    fn int_overflow_falls_back_to_decimal() {
        let result = soft(&Value::int(i64::MAX), ArithmeticOp::Add, &Value::int(1));
        assert!(matches!(result.kind, ValueKind::Decimal(_)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        for zero in [Value::int(0), dec("0"), Value::float(0.0)] {
            let err = arithmetic_operation(&Value::int(1), ArithmeticOp::Divide, &zero, false, false);
            assert!(matches!(err, Err(Signal::Error(ref e)) if e.is_processing()));
        }
    }

    #[test]
    fn soft_missing_operands() {
        let unbound = Value::unbound();
        assert_eq!(soft(&unbound, ArithmeticOp::Add, &Value::int(5)), Value::int(5));
        assert_eq!(soft(&unbound, ArithmeticOp::Subtract, &Value::int(-5)), Value::int(5));
        assert_eq!(soft(&Value::int(5), ArithmeticOp::Subtract, &unbound), Value::int(5));
        assert!(soft(&unbound, ArithmeticOp::Add, &unbound).is_unbound());
        assert!(soft(&Value::none(), ArithmeticOp::Add, &Value::none()).is_none());
        assert!(soft(&unbound, ArithmeticOp::Multiply, &Value::int(2)).is_unbound());
    }

    #[test]
    fn hard_missing_operand_stops_iteration() {
        let result =
            arithmetic_operation(&Value::int(3), ArithmeticOp::Add, &Value::unbound(), false, true);
        assert!(matches!(result, Err(Signal::IterationStop)));
        let result =
            arithmetic_operation(&Value::int(3), ArithmeticOp::Add, &Value::int(1), true, true);
        assert_eq!(result.unwrap(), Value::int(4));
    }

    #[test]
    fn none_comparisons() {
        let none = Value::none();
        let cmp = |l: &Value, op, r: &Value| comparison_operation(l, op, r).unwrap();
        assert_eq!(cmp(&none, ComparisonOp::Eq, &none), Value::bool(true));
        assert_eq!(cmp(&none, ComparisonOp::Eq, &Value::int(0)), Value::bool(false));
        assert_eq!(cmp(&none, ComparisonOp::Le, &none), Value::bool(true));
        assert_eq!(cmp(&none, ComparisonOp::Lt, &none), Value::bool(false));
        assert!(cmp(&none, ComparisonOp::Gt, &Value::int(1)).is_none());
        assert!(cmp(&Value::unbound(), ComparisonOp::Eq, &none).is_unbound());
    }

    #[test]
    fn mixed_numeric_comparison() {
        let result = comparison_operation(&Value::int(2), ComparisonOp::Eq, &dec("2.0")).unwrap();
        assert_eq!(result, Value::bool(true));
        let result = comparison_operation(&Value::float(1.5), ComparisonOp::Lt, &Value::int(2)).unwrap();
        assert_eq!(result, Value::bool(true));
        assert!(comparison_operation(&Value::int(1), ComparisonOp::Lt, &Value::string("a")).is_err());
    }

    #[test]
    fn membership() {
        let list = Value::list(vec![Value::int(1), Value::int(2)]);
        assert_eq!(
            comparison_operation(&dec("2"), ComparisonOp::In, &list).unwrap(),
            Value::bool(true)
        );
        assert_eq!(
            comparison_operation(&Value::string("ss"), ComparisonOp::NotIn, &Value::string("Assets")).unwrap(),
            Value::bool(false)
        );
    }

    #[test]
    fn provenance_is_merged() {
        let mut left = Value::int(1);
        left.facts.push(crate::document::FactId(3));
        let result = soft(&left, ArithmeticOp::Add, &Value::int(2));
        assert_eq!(result.facts, vec![crate::document::FactId(3)]);
    }
}
