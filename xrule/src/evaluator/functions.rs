//! Built-in and user-defined functions
//!
//! Aggregates evaluate their argument in an isolated sub-table and produce
//! one value per alignment, so an aggregate call is itself iterable. Scalar
//! built-ins see already-evaluated arguments. User functions run their body
//! in an isolated sub-table under a call-site prefix, seeing only their
//! parameters.

use super::context::{GlobalContext, RuleContext};
use super::datetime::{duration_between, parse_time_span};
use super::operations::{arithmetic_operation, contains, ordering};
use super::{collect_results, evaluate, resolve};
use crate::ast::{ArithmeticOp, FunctionDecl, Node};
use crate::cache::Computed;
use crate::document::{parse_date_time, Period, QName, UnitValue};
use crate::table::ProcessingId;
use crate::value::{Alignment, Value, ValueKind, ValueSet};
use crate::{EvalResult, XruleError, XruleResult};
use regex::Regex;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Count,
    Sum,
    Max,
    Min,
    Avg,
    List,
    Set,
    Dict,
    All,
    Any,
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Exists,
    Missing,
    Abs,
    Round,
    String,
    Length,
    Contains,
    RegexMatch,
    Date,
    Duration,
    Forever,
    QName,
    Unit,
    TimeSpan,
    Taxonomy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Aggregate(Aggregate),
    Scalar(Scalar),
}

#[derive(Debug, Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub kind: BuiltinKind,
    pub min_args: usize,
    pub max_args: usize,
}

impl Builtin {
    const fn aggregate(name: &'static str, aggregate: Aggregate) -> Self {
        Self {
            name,
            kind: BuiltinKind::Aggregate(aggregate),
            min_args: 1,
            max_args: 1,
        }
    }

    const fn scalar(name: &'static str, scalar: Scalar, min_args: usize, max_args: usize) -> Self {
        Self {
            name,
            kind: BuiltinKind::Scalar(scalar),
            min_args,
            max_args,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.kind, BuiltinKind::Aggregate(_))
    }

    pub fn check_arity(&self, given: usize) -> XruleResult<()> {
        if given < self.min_args || given > self.max_args {
            let expected = if self.min_args == self.max_args {
                self.min_args.to_string()
            } else {
                format!("{} to {}", self.min_args, self.max_args)
            };
            return Err(XruleError::processing(format!(
                "Function '{}' expects {} argument(s), found {}",
                self.name, expected, given
            )));
        }
        Ok(())
    }
}

const BUILTINS: &[Builtin] = &[
    Builtin::aggregate("count", Aggregate::Count),
    Builtin::aggregate("sum", Aggregate::Sum),
    Builtin::aggregate("max", Aggregate::Max),
    Builtin::aggregate("min", Aggregate::Min),
    Builtin::aggregate("avg", Aggregate::Avg),
    Builtin::aggregate("list", Aggregate::List),
    Builtin::aggregate("set", Aggregate::Set),
    Builtin::aggregate("dict", Aggregate::Dict),
    Builtin::aggregate("all", Aggregate::All),
    Builtin::aggregate("any", Aggregate::Any),
    Builtin::aggregate("first", Aggregate::First),
    Builtin::scalar("exists", Scalar::Exists, 1, 1),
    Builtin::scalar("missing", Scalar::Missing, 1, 1),
    Builtin::scalar("abs", Scalar::Abs, 1, 1),
    Builtin::scalar("round", Scalar::Round, 1, 2),
    Builtin::scalar("string", Scalar::String, 1, 1),
    Builtin::scalar("length", Scalar::Length, 1, 1),
    Builtin::scalar("contains", Scalar::Contains, 2, 2),
    Builtin::scalar("regex-match", Scalar::RegexMatch, 2, 2),
    Builtin::scalar("date", Scalar::Date, 1, 1),
    Builtin::scalar("duration", Scalar::Duration, 2, 2),
    Builtin::scalar("forever", Scalar::Forever, 0, 0),
    Builtin::scalar("qname", Scalar::QName, 2, 2),
    Builtin::scalar("unit", Scalar::Unit, 1, 2),
    Builtin::scalar("time-span", Scalar::TimeSpan, 1, 1),
    Builtin::scalar("taxonomy", Scalar::Taxonomy, 0, 1),
];

/// Lookup table of built-in functions
pub struct FunctionRegistry;

impl FunctionRegistry {
    pub fn lookup(name: &str) -> Option<&'static Builtin> {
        BUILTINS.iter().find(|b| b.name == name)
    }
}

/// Whether a non-iterable call may go through the scalar cache
pub(crate) fn is_cacheable(name: &str, ctx: &RuleContext<'_>) -> bool {
    FunctionRegistry::lookup(name).is_some() || ctx.global.function(name).is_some()
}

/// Call a function whose result is a single value
pub fn call_scalar<'g>(
    node: &'g Node,
    name: &str,
    args: &'g [Node],
    ctx: &mut RuleContext<'g>,
) -> EvalResult<Value> {
    let global: &'g GlobalContext = ctx.global;
    if let Some(builtin) = FunctionRegistry::lookup(name) {
        builtin.check_arity(args.len())?;
        return match builtin.kind {
            BuiltinKind::Scalar(scalar) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    let value = evaluate(arg, ctx)?;
                    values.push(resolve(ctx.document(), &value)?);
                }
                Ok(call_builtin(scalar, &values, ctx)?)
            }
            BuiltinKind::Aggregate(_) => Err(XruleError::build_table(format!(
                "aggregate call {} was not marked iterable",
                node.meta.id
            ))
            .into()),
        };
    }
    let decl = global
        .function(name)
        .ok_or_else(|| XruleError::processing(format!("Function '{}' is not defined", name)))?;
    match call_user(node, decl, args, ctx)?.as_ref() {
        Computed::Single(value) => Ok(value.clone()),
        Computed::Set(values) => match values.len() {
            0 => Ok(Value::default_unbound()),
            1 => Ok(values.values().next().cloned().unwrap_or_else(Value::unbound)),
            n => Err(XruleError::processing(format!(
                "Function '{}' produced {} values where one was expected",
                name, n
            ))
            .into()),
        },
    }
}

/// Full value set of an iterable call: an aggregate, or a user function
/// whose body iterates
pub fn evaluate_iterable_call<'g>(
    node: &'g Node,
    name: &str,
    args: &'g [Node],
    ctx: &mut RuleContext<'g>,
) -> EvalResult<ValueSet> {
    let global: &'g GlobalContext = ctx.global;
    if let Some(builtin) = FunctionRegistry::lookup(name) {
        builtin.check_arity(args.len())?;
        return match builtin.kind {
            BuiltinKind::Aggregate(aggregate) => evaluate_aggregate(node, aggregate, &args[0], ctx),
            BuiltinKind::Scalar(_) => Err(XruleError::build_table(format!(
                "scalar call {} was marked iterable",
                node.meta.id
            ))
            .into()),
        };
    }
    let decl = global
        .function(name)
        .ok_or_else(|| XruleError::processing(format!("Function '{}' is not defined", name)))?;
    let values = match call_user(node, decl, args, ctx)?.as_ref() {
        Computed::Single(value) => ValueSet::single(value.clone()),
        Computed::Set(values) if values.is_empty() => {
            let mut values = ValueSet::new();
            values.append(None, Value::default_unbound());
            values
        }
        Computed::Set(values) => values.clone(),
    };
    Ok(values)
}

/// Run a user function body. Zero-argument results are shared by the run.
fn call_user<'g>(
    node: &'g Node,
    decl: &'g FunctionDecl,
    args: &'g [Node],
    ctx: &mut RuleContext<'g>,
) -> EvalResult<Arc<Computed>> {
    if args.len() != decl.params.len() {
        return Err(XruleError::processing(format!(
            "Function '{}' expects {} argument(s), found {}",
            decl.name,
            decl.params.len(),
            args.len()
        ))
        .into());
    }
    let shared = decl.params.is_empty() && ctx.global.caching();
    if shared {
        if let Some(found) = ctx.global.cache.function(&decl.name) {
            return Ok(found);
        }
    }

    let mut bound = Vec::with_capacity(args.len());
    for arg in args {
        bound.push(evaluate(arg, ctx)?);
    }

    ctx.enter_function()?;
    ctx.push_prefix(node.meta.id);
    let saved_scopes = ctx.replace_scopes(Vec::new());
    let saved_envelopes = ctx.replace_envelopes(Vec::new());
    ctx.push_frame();
    for (param, value) in decl.params.iter().zip(bound) {
        ctx.bind_value(param, value);
    }
    let table = ProcessingId::body(ctx.prefix());
    let produced = ctx.isolated(table, |c| evaluate(&decl.body, c));
    ctx.replace_scopes(saved_scopes);
    ctx.replace_envelopes(saved_envelopes);
    ctx.pop_prefix();
    ctx.exit_function();

    let computed = collect_results(produced?);
    if shared {
        Ok(ctx.global.cache.store_function(&decl.name, computed))
    } else {
        Ok(Arc::new(computed))
    }
}

fn evaluate_aggregate<'g>(
    node: &'g Node,
    aggregate: Aggregate,
    argument: &'g Node,
    ctx: &mut RuleContext<'g>,
) -> EvalResult<ValueSet> {
    let table = ctx.processing_id(node.meta.id);
    let produced = ctx.isolated(table, |c| evaluate(argument, c))?;

    let numeric = matches!(
        aggregate,
        Aggregate::Sum | Aggregate::Max | Aggregate::Min | Aggregate::Avg | Aggregate::All | Aggregate::Any
    );
    let mut groups: BTreeMap<Option<Alignment>, Vec<Value>> = BTreeMap::new();
    for value in produced {
        let value = if numeric {
            resolve(ctx.document(), &value)?
        } else {
            value
        };
        if value.is_unbound() || (numeric && value.is_none()) {
            continue;
        }
        groups.entry(value.alignment.clone()).or_default().push(value);
    }

    let mut values = ValueSet::new();
    if groups.is_empty() {
        values.append(None, aggregate_default(aggregate));
        return Ok(values);
    }
    for (alignment, members) in groups {
        let result = aggregate_values(aggregate, &members)?;
        values.append(alignment.clone(), result.with_alignment(alignment));
    }
    Ok(values)
}

/// Result of an aggregate over no values
pub fn aggregate_default(aggregate: Aggregate) -> Value {
    match aggregate {
        Aggregate::Count => Value::int(0),
        Aggregate::List => Value::list(Vec::new()),
        Aggregate::Set => Value::set(Vec::new()),
        Aggregate::Dict => Value::dict(Vec::new()),
        Aggregate::All => Value::bool(true),
        Aggregate::Any => Value::bool(false),
        Aggregate::Sum | Aggregate::Max | Aggregate::Min | Aggregate::Avg | Aggregate::First => {
            Value::unbound()
        }
    }
}

/// Combine the values of one alignment
pub fn aggregate_values(aggregate: Aggregate, members: &[Value]) -> EvalResult<Value> {
    let sources: Vec<&Value> = members.iter().collect();
    let kind = match aggregate {
        Aggregate::Count => ValueKind::Int(members.len() as i64),
        Aggregate::Sum => return sum(members),
        Aggregate::Avg => {
            let total = sum(members)?;
            let count = Value::int(members.len() as i64);
            return arithmetic_operation(&total, ArithmeticOp::Divide, &count, false, false);
        }
        Aggregate::Max | Aggregate::Min => {
            let mut best: Option<&Value> = None;
            for member in members {
                best = Some(match best {
                    None => member,
                    Some(current) => {
                        let order = ordering(member, current).ok_or_else(|| {
                            XruleError::processing(format!(
                                "Cannot compare {} with {}",
                                member.type_name(),
                                current.type_name()
                            ))
                        })?;
                        let better = if aggregate == Aggregate::Max {
                            order.is_gt()
                        } else {
                            order.is_lt()
                        };
                        if better {
                            member
                        } else {
                            current
                        }
                    }
                });
            }
            best.map(|b| b.kind.clone()).unwrap_or(ValueKind::Unbound)
        }
        Aggregate::List => ValueKind::List(members.to_vec()),
        Aggregate::Set => Value::set(members.to_vec()).kind,
        Aggregate::Dict => {
            let mut entries = Vec::with_capacity(members.len());
            for member in members {
                match member.items().as_deref() {
                    Some([key, value]) => entries.push(((*key).clone(), (*value).clone())),
                    _ => {
                        return Err(XruleError::processing(format!(
                            "'dict' expects key/value pairs, found {}",
                            member
                        ))
                        .into())
                    }
                }
            }
            Value::dict(entries).kind
        }
        Aggregate::All | Aggregate::Any => {
            let want_all = aggregate == Aggregate::All;
            let mut result = want_all;
            for member in members {
                let b = member.as_bool().ok_or_else(|| {
                    XruleError::processing(format!(
                        "'{}' expects booleans, found {}",
                        if want_all { "all" } else { "any" },
                        member.type_name()
                    ))
                })?;
                if want_all {
                    result &= b;
                } else {
                    result |= b;
                }
            }
            ValueKind::Bool(result)
        }
        Aggregate::First => return Ok(members[0].clone()),
    };
    Ok(Value::derive(kind, &sources))
}

fn sum(members: &[Value]) -> EvalResult<Value> {
    let mut total = Value::unbound();
    for member in members {
        total = arithmetic_operation(&total, ArithmeticOp::Add, member, false, false)?;
    }
    Ok(total)
}

/// Evaluate a scalar built-in over resolved arguments
pub fn call_builtin(scalar: Scalar, args: &[Value], ctx: &RuleContext<'_>) -> XruleResult<Value> {
    let sources: Vec<&Value> = args.iter().collect();
    let presence = matches!(scalar, Scalar::Exists | Scalar::Missing);
    if !presence && args.iter().any(Value::is_unbound) {
        return Ok(Value::derive(ValueKind::Unbound, &sources));
    }
    if !presence && scalar != Scalar::String && args.iter().any(Value::is_none) {
        return Ok(Value::derive(ValueKind::None, &sources));
    }

    let kind = match scalar {
        Scalar::Exists => ValueKind::Bool(!args[0].is_missing()),
        Scalar::Missing => ValueKind::Bool(args[0].is_missing()),
        Scalar::Abs => match &args[0].kind {
            ValueKind::Int(i) => i
                .checked_abs()
                .map(ValueKind::Int)
                .unwrap_or_else(|| ValueKind::Decimal(Decimal::from(*i).abs())),
            ValueKind::Decimal(d) => ValueKind::Decimal(d.abs()),
            ValueKind::Float(f) => ValueKind::Float(f.abs()),
            _ => return Err(argument_error("abs", "a number", &args[0])),
        },
        Scalar::Round => {
            let places = match args.get(1).map(|a| &a.kind) {
                None => 0,
                Some(ValueKind::Int(p)) => *p,
                Some(_) => return Err(argument_error("round", "an integer precision", &args[1])),
            };
            round(&args[0], places)?
        }
        Scalar::String => ValueKind::String(args[0].to_string()),
        Scalar::Length => match &args[0].kind {
            ValueKind::String(s) => ValueKind::Int(s.chars().count() as i64),
            _ => match args[0].items() {
                Some(items) => ValueKind::Int(items.len() as i64),
                None => return Err(argument_error("length", "a string or collection", &args[0])),
            },
        },
        Scalar::Contains => ValueKind::Bool(contains(&args[0], &args[1])?),
        Scalar::RegexMatch => {
            let text = string_arg("regex-match", &args[0])?;
            let pattern = string_arg("regex-match", &args[1])?;
            let regex = Regex::new(pattern).map_err(|e| {
                XruleError::processing(format!("Invalid regular expression '{}': {}", pattern, e))
            })?;
            ValueKind::Bool(regex.is_match(text))
        }
        Scalar::Date => match &args[0].kind {
            ValueKind::Instant(at) => ValueKind::Instant(*at),
            ValueKind::String(s) => ValueKind::Instant(
                parse_date_time(s, true).map_err(|e| XruleError::processing(e.to_string()))?,
            ),
            _ => return Err(argument_error("date", "a date string", &args[0])),
        },
        Scalar::Duration => {
            let start = instant_arg(&args[0], false)?;
            let end = instant_arg(&args[1], true)?;
            ValueKind::Period(duration_between(start, end)?)
        }
        Scalar::Forever => ValueKind::Period(Period::Forever),
        Scalar::QName => ValueKind::QName(QName::new(
            string_arg("qname", &args[0])?,
            string_arg("qname", &args[1])?,
        )),
        Scalar::Unit => {
            let numerator = measure_arg(&args[0])?;
            let denominator = match args.get(1) {
                Some(arg) => vec![measure_arg(arg)?],
                None => Vec::new(),
            };
            ValueKind::Unit(UnitValue::new(vec![numerator], denominator))
        }
        Scalar::TimeSpan => ValueKind::TimeSpan(parse_time_span(string_arg("time-span", &args[0])?)?),
        Scalar::Taxonomy => match args.first() {
            None => ValueKind::Taxonomy(None),
            Some(arg) => {
                let url = string_arg("taxonomy", arg)?;
                let document = ctx.document();
                ctx.global
                    .cache
                    .taxonomy(url, || document.load_taxonomy(url))?;
                ValueKind::Taxonomy(Some(url.to_string()))
            }
        },
    };
    Ok(Value::derive(kind, &sources))
}

fn round(value: &Value, places: i64) -> XruleResult<ValueKind> {
    let strategy = RoundingStrategy::MidpointAwayFromZero;
    match &value.kind {
        ValueKind::Int(i) if places >= 0 => Ok(ValueKind::Int(*i)),
        ValueKind::Int(i) => Ok(ValueKind::Decimal(round_decimal(Decimal::from(*i), places, strategy))),
        ValueKind::Decimal(d) => Ok(ValueKind::Decimal(round_decimal(*d, places, strategy))),
        ValueKind::Float(f) => {
            let d = Decimal::from_f64(*f)
                .ok_or_else(|| XruleError::processing(format!("Cannot round {}", f)))?;
            Ok(ValueKind::Float(
                round_decimal(d, places, strategy).to_f64().unwrap_or(*f),
            ))
        }
        _ => Err(argument_error("round", "a number", value)),
    }
}

fn round_decimal(value: Decimal, places: i64, strategy: RoundingStrategy) -> Decimal {
    if places >= 0 {
        return value.round_dp_with_strategy(places.min(28) as u32, strategy);
    }
    let factor = Decimal::from(10i64.pow(places.unsigned_abs().min(18) as u32));
    (value / factor).round_dp_with_strategy(0, strategy) * factor
}

fn string_arg<'v>(function: &str, value: &'v Value) -> XruleResult<&'v str> {
    match &value.kind {
        ValueKind::String(s) => Ok(s),
        _ => Err(argument_error(function, "a string", value)),
    }
}

fn instant_arg(value: &Value, end_of_day: bool) -> XruleResult<chrono::NaiveDateTime> {
    match &value.kind {
        ValueKind::Instant(at) => Ok(*at),
        ValueKind::String(s) => {
            parse_date_time(s, end_of_day).map_err(|e| XruleError::processing(e.to_string()))
        }
        _ => Err(argument_error("duration", "a date", value)),
    }
}

fn measure_arg(value: &Value) -> XruleResult<QName> {
    match &value.kind {
        ValueKind::QName(q) => Ok(q.clone()),
        ValueKind::String(s) => QName::parse(s),
        _ => Err(argument_error("unit", "a measure qname", value)),
    }
}

fn argument_error(function: &str, expected: &str, found: &Value) -> XruleError {
    XruleError::processing(format!(
        "Function '{}' expects {}, found {}",
        function,
        expected,
        found.type_name()
    ))
}
