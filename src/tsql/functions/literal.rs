use std::sync::LazyLock;

use crate::error::{Result, TsqlError};
use crate::tsql::ast::Expr;
use crate::tsql::context::Context;
use crate::tsql::functions::FunctionTable;
use crate::tsql::timeunit::{TimeUnit, MILLISECOND, SECOND};
use crate::tsql::value::Value;

pub type LiteralFn = fn(&Context, &[Value]) -> Result<Value>;

static LITERAL_FUNCTIONS: LazyLock<FunctionTable<LiteralFn>> = LazyLock::new(|| {
    FunctionTable::<LiteralFn>::new()
        .with("interval", interval)
        .with("now", |ctx, _| Ok(Value::Int(ctx.now())))
        .with("now_sec", |ctx, _| Ok(Value::Int(ctx.now() / SECOND)))
        .with("now_ms", |ctx, _| Ok(Value::Int(ctx.now() / MILLISECOND)))
        .with("unix", |ctx, _| Ok(Value::Int(ctx.now() / SECOND)))
        .with("unix_ns", |ctx, _| Ok(Value::Int(ctx.now())))
        .with("date", |ctx, _| {
            let now = chrono::DateTime::from_timestamp_nanos(ctx.now());
            Ok(Value::String(now.format("%Y-%m-%d").to_string()))
        })
        .with("max_uint8", |_, _| Ok(Value::Int(u8::MAX.into())))
        .with("max_uint16", |_, _| Ok(Value::Int(u16::MAX.into())))
        .with("max_uint32", |_, _| Ok(Value::Int(u32::MAX.into())))
        .with("max_uint64", |_, _| Ok(Value::UInt(u64::MAX)))
        .with("max_int8", |_, _| Ok(Value::Int(i8::MAX.into())))
        .with("max_int16", |_, _| Ok(Value::Int(i16::MAX.into())))
        .with("max_int32", |_, _| Ok(Value::Int(i32::MAX.into())))
        .with("max_int64", |_, _| Ok(Value::Int(i64::MAX)))
        .with("max_float32", |_, _| Ok(Value::Float(f32::MAX.into())))
        .with("max_float64", |_, _| Ok(Value::Float(f64::MAX)))
        .with("min_int8", |_, _| Ok(Value::Int(i8::MIN.into())))
        .with("min_int16", |_, _| Ok(Value::Int(i16::MIN.into())))
        .with("min_int32", |_, _| Ok(Value::Int(i32::MIN.into())))
        .with("min_int64", |_, _| Ok(Value::Int(i64::MIN)))
});

pub fn literal_functions() -> &'static FunctionTable<LiteralFn> {
    &LITERAL_FUNCTIONS
}

/// Length of the query range, optionally in a unit such as `s` or `ms`.
fn interval(ctx: &Context, args: &[Value]) -> Result<Value> {
    let (start, end) = ctx.range(false);
    if start >= end {
        return Ok(Value::Int(1));
    }
    let span = end - start;
    match args.first() {
        Some(Value::String(unit)) if !unit.is_empty() => {
            let unit: TimeUnit = unit.parse().map_err(TsqlError::function)?;
            Ok(Value::Int(span / unit.nanos()))
        }
        Some(Value::String(_)) | None => Ok(Value::Int(span)),
        Some(_) => Err(TsqlError::function("invalid time unit")),
    }
}

/// Folds `expr` into a constant if it is one. Calls to literal functions whose
/// arguments are not constant are an error; anything that depends on row data
/// yields `None`.
pub fn reduce_literal(ctx: &Context, expr: &Expr) -> Result<Option<Value>> {
    match expr {
        Expr::Paren(inner) => reduce_literal(ctx, inner),
        Expr::Binary(b) => {
            let Some(lhs) = reduce_literal(ctx, &b.lhs)? else {
                return Ok(None);
            };
            let Some(rhs) = reduce_literal(ctx, &b.rhs)? else {
                return Ok(None);
            };
            lhs.operate(b.op, &rhs).map(Some)
        }
        Expr::Call(call) => {
            let Some(func) = literal_functions().get(&call.name) else {
                return Ok(None);
            };
            let mut args = Vec::with_capacity(call.args.len());
            for arg in &call.args {
                match reduce_literal(ctx, arg)? {
                    Some(v) => args.push(v),
                    None => {
                        return Err(TsqlError::function(format!(
                            "function '{}' args must be literal, got '{arg}'",
                            call.name
                        )));
                    }
                }
            }
            func(ctx, &args).map(Some)
        }
        other => Ok(Value::from_literal(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsql::ast::{BinaryOp, DataType};

    fn ctx() -> Context {
        let mut ctx = Context::new(0, 120 * SECOND);
        ctx.set_now(1_700_000_000 * SECOND + 5);
        ctx
    }

    #[test]
    fn time_literals() {
        let ctx = ctx();
        let now = reduce_literal(&ctx, &Expr::call("now", vec![])).unwrap();
        assert_eq!(now, Some(Value::Int(1_700_000_000 * SECOND + 5)));
        let sec = reduce_literal(&ctx, &Expr::call("now_sec", vec![])).unwrap();
        assert_eq!(sec, Some(Value::Int(1_700_000_000)));
        let date = reduce_literal(&ctx, &Expr::call("date", vec![])).unwrap();
        assert_eq!(date, Some(Value::String("2023-11-14".into())));
    }

    #[test]
    fn interval_in_units() {
        let ctx = ctx();
        let v = reduce_literal(&ctx, &Expr::call("interval", vec![Expr::String("s".into())])).unwrap();
        assert_eq!(v, Some(Value::Int(120)));
        let v = reduce_literal(&ctx, &Expr::call("interval", vec![])).unwrap();
        assert_eq!(v, Some(Value::Int(120 * SECOND)));
    }

    #[test]
    fn folds_arithmetic_and_skips_row_data() {
        let ctx = ctx();
        let e = Expr::binary(BinaryOp::Mul, Expr::Integer(6), Expr::Paren(Box::new(Expr::Integer(7))));
        assert_eq!(reduce_literal(&ctx, &e).unwrap(), Some(Value::Int(42)));
        let e = Expr::binary(BinaryOp::Add, Expr::var("a", DataType::Unknown), Expr::Integer(1));
        assert_eq!(reduce_literal(&ctx, &e).unwrap(), None);
        assert_eq!(reduce_literal(&ctx, &Expr::call("max", vec![])).unwrap(), None);
    }

    #[test]
    fn literal_function_with_row_argument_fails() {
        let ctx = ctx();
        let e = Expr::call("interval", vec![Expr::var("unit", DataType::Unknown)]);
        assert!(reduce_literal(&ctx, &e).is_err());
    }
}
