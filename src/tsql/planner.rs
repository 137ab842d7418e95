//! Planning steps shared by the Elasticsearch and ClickHouse builders.

use crate::error::{must_args_min_num, Result, TsqlError};
use crate::models::{Column, ColumnFlag, Source};
use crate::tsql::ast::{BinaryExpr, BinaryOp, Call, DataType, Expr, Field, SourceRef, VarRef};
use crate::tsql::context::Context;
use crate::tsql::interval::adjust_interval;
use crate::tsql::resolver::{expr_key_and_flag, KeyResolver};
use crate::tsql::timeunit::SECOND;

/// Converts FROM clauses into sources. Only plain measurements are accepted.
pub fn from_sources(sources: &[SourceRef]) -> Result<Vec<Source>> {
    let mut list = Vec::with_capacity(sources.len());
    for source in sources {
        match source {
            SourceRef::Measurement(m) => {
                let database = if m.database.is_empty() {
                    m.retention_policy.clone()
                } else {
                    m.database.clone()
                };
                list.push(Source {
                    database,
                    name: m.name.clone(),
                });
            }
            SourceRef::Regex(r) => return Err(TsqlError::UnsupportedSource(format!("/{r}/"))),
            SourceRef::SubQuery(_) => return Err(TsqlError::UnsupportedSource("sub query".to_string())),
        }
    }
    if list.is_empty() {
        return Err(TsqlError::compile("sources not found"));
    }
    Ok(list)
}

/// The special grouping of a statement, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum Bucketing<'a> {
    None,
    Time(&'a Call),
    Range(&'a Call),
}

/// Splits GROUP BY into the special `time()`/`range()` grouping and the
/// plain dimensions. At most one special grouping is allowed.
pub fn split_dimensions(dimensions: &[Expr]) -> Result<(Bucketing<'_>, Vec<&Expr>)> {
    let mut bucketing = Bucketing::None;
    let mut plain = Vec::new();
    for dim in dimensions {
        let call = match dim.unparen() {
            Expr::Call(call) if call.name == "time" || call.name == "range" => call,
            _ => {
                plain.push(dim);
                continue;
            }
        };
        bucketing = match (&bucketing, call.name.as_str()) {
            (Bucketing::None, "time") => Bucketing::Time(call),
            (Bucketing::None, _) => Bucketing::Range(call),
            (Bucketing::Time(_), "time") => {
                return Err(TsqlError::compile("not support multi 'time' function in group by"));
            }
            (Bucketing::Range(_), "range") => {
                return Err(TsqlError::compile("not support multi 'range' function in group by"));
            }
            _ => return Err(TsqlError::compile("'time' and 'range' function conflict in group by")),
        };
    }
    Ok((bucketing, plain))
}

/// Bucket layout of a `time()` grouping, in the storage time unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucket {
    pub start: i64,
    pub end: i64,
    pub interval: i64,
}

impl TimeBucket {
    /// Bucket width in whole seconds, at least one.
    pub fn interval_seconds(&self, unit_nanos: i64) -> i64 {
        (self.interval.saturating_mul(unit_nanos) / SECOND).max(1)
    }
}

/// Resolves `time([duration])`: validates the argument, adjusts the interval
/// to the point budget and records it on the context.
pub fn time_bucket(ctx: &mut Context, call: &Call) -> Result<TimeBucket> {
    let requested = match call.args.as_slice() {
        [] => 0,
        [arg] => match arg.unparen() {
            Expr::Duration(d) if *d >= SECOND => *d,
            _ => {
                return Err(TsqlError::function(format!(
                    "invalid arg '{arg}' in function '{}'",
                    call.name
                )));
            }
        },
        args => {
            return Err(TsqlError::function(format!(
                "function '{}' expect 1 args, but got {} args",
                call.name,
                args.len()
            )));
        }
    };
    let (start, end) = ctx.range(false);
    let interval = adjust_interval(start, end, requested, ctx.max_time_points());
    ctx.set_interval(interval / ctx.target_time_unit().nanos());

    let storage = ctx.original_time_unit().nanos();
    let (start, end) = ctx.range(true);
    Ok(TimeBucket {
        start,
        end,
        interval: (interval / storage).max(1),
    })
}

/// Checks the minimum argument count of a `range()` grouping.
pub fn range_args(call: &Call, min: usize) -> Result<&VarRef> {
    must_args_min_num(&call.name, call.args.len(), min)?;
    match call.args[0].unparen() {
        Expr::VarRef(r) => Ok(r),
        _ => Err(TsqlError::function("args[0] is not reference in 'range' function")),
    }
}

/// A `key OP literal` comparison, normalised so the reference is on the left.
pub fn key_condition(b: &BinaryExpr) -> Option<(&VarRef, BinaryOp, &Expr)> {
    if !b.op.is_comparison() {
        return None;
    }
    match (b.lhs.unparen(), b.rhs.unparen()) {
        (Expr::VarRef(_), Expr::VarRef(_)) => None,
        (Expr::VarRef(r), rhs) => Some((r, b.op, rhs)),
        (lhs, Expr::VarRef(r)) => Some((r, b.op.swapped(), lhs)),
        _ => None,
    }
}

/// Whether `expr` calls any function for which `is_agg` holds, outside of
/// `scope()`.
pub fn contains_aggregate(expr: &Expr, is_agg: &dyn Fn(&str) -> bool) -> bool {
    match expr {
        Expr::Call(c) if c.name == "scope" => true,
        Expr::Call(c) => is_agg(&c.name) || c.args.iter().any(|a| contains_aggregate(a, is_agg)),
        Expr::Binary(b) => contains_aggregate(&b.lhs, is_agg) || contains_aggregate(&b.rhs, is_agg),
        Expr::Paren(inner) => contains_aggregate(inner, is_agg),
        _ => false,
    }
}

/// Builds the output column for a select field.
pub fn output_column(
    ctx: &Context,
    field: &Field,
    resolver: &dyn KeyResolver,
    is_agg: &dyn Fn(&str) -> bool,
) -> Column {
    let (mut key, mut flag) = expr_key_and_flag(&field.expr, DataType::AnyField, resolver);
    if contains_aggregate(&field.expr, is_agg) {
        flag |= ColumnFlag::AGG;
    }
    if ctx.has_dimension(&key) {
        flag |= ColumnFlag::GROUP_BY;
    } else if let Expr::VarRef(r) = field.expr.unparen() {
        // an untyped reference that is grouped on reads the tag
        let (tag_key, tag_flag) = resolver.resolve(r, DataType::Tag);
        if ctx.has_dimension(&tag_key) {
            key = tag_key;
            flag = tag_flag | ColumnFlag::GROUP_BY;
        }
    }
    Column::new(field.name(), key, flag)
}
