//! Per-row evaluation of select expressions against a decoded backend row.

use crate::error::{Result, TsqlError};
use crate::models::{Column, ColumnFlag};
use crate::tsql::ast::{Call, Expr, Field, VarRef};
use crate::tsql::context::Context;
use crate::tsql::functions::{builtin_functions, literal_functions, reduce_literal};
use crate::tsql::timeunit::{convert_timestamp, TimeUnit};
use crate::tsql::value::Value;
use crate::tsql::window::Window;

/// Extracts one aggregate's value from a backend row. `R` is the backend's
/// raw row shape: an aggregation bucket for Elasticsearch, a named-value map
/// for ClickHouse.
pub trait AggHandler<R>: Send + Sync {
    fn id(&self) -> &str;

    fn handle(&self, ctx: &Context, window: Window<'_, R>) -> Result<Value>;
}

/// What the evaluator needs to know about the row being decoded.
pub trait RowEnv {
    /// Value of an aggregate call, or `None` if `call` is not an aggregate
    /// for this backend.
    fn aggregate(&self, ctx: &Context, call: &Call) -> Option<Result<Value>>;

    fn column(&self, ctx: &Context, r: &VarRef) -> Value;

    /// Time bucket key in the storage time unit.
    fn time_bucket(&self) -> Option<i64> {
        None
    }

    /// `from-to` label of the range bucket.
    fn range_bucket(&self) -> Option<String> {
        None
    }

    fn row_num(&self) -> i64;

    /// Value of a scope aggregate registered under `id`.
    fn scope(&self, _ctx: &Context, _scope: &str, _id: &str) -> Option<Result<Value>> {
        None
    }
}

/// One select field and the output column it produces.
#[derive(Debug, Clone)]
pub struct ColumnHandler {
    pub field: Field,
    pub column: Column,
}

impl ColumnHandler {
    pub fn new(field: Field, column: Column) -> Self {
        Self { field, column }
    }

    /// A synthetic leading column such as `time` or `range`.
    pub fn special(name: &str, flag: ColumnFlag) -> Self {
        let field = Field {
            expr: Expr::call(name, Vec::new()),
            alias: Some(name.to_string()),
        };
        Self::new(field, Column::new(name, format!("{name}()"), flag))
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.field.expr, Expr::Wildcard)
    }

    pub fn eval(&self, ctx: &Context, env: &dyn RowEnv) -> Result<serde_json::Value> {
        eval(ctx, &self.field.expr, env).map(|v| v.to_json())
    }
}

pub fn eval(ctx: &Context, expr: &Expr, env: &dyn RowEnv) -> Result<Value> {
    match expr {
        Expr::Binary(b) => {
            let lhs = eval(ctx, &b.lhs, env)?;
            let rhs = eval(ctx, &b.rhs, env)?;
            lhs.operate(b.op, &rhs)
        }
        Expr::Call(call) => eval_call(ctx, call, env),
        Expr::Paren(inner) => eval(ctx, inner, env),
        Expr::VarRef(r) => Ok(env.column(ctx, r)),
        Expr::Wildcard => Err(TsqlError::eval("invalid expression '*'")),
        other => Value::from_literal(other).ok_or_else(|| TsqlError::eval(format!("invalid expression '{other}'"))),
    }
}

fn eval_call(ctx: &Context, call: &Call, env: &dyn RowEnv) -> Result<Value> {
    match call.name.as_str() {
        "time" => {
            let t = env
                .time_bucket()
                .ok_or_else(|| TsqlError::eval("function 'time' not in group or not found time bucket"))?;
            return Ok(format_bucket_time(ctx, t));
        }
        "timestamp" => {
            let t = env
                .time_bucket()
                .ok_or_else(|| TsqlError::eval("function 'timestamp' not in group or not found time bucket"))?;
            return Ok(Value::Int(convert_timestamp(
                t,
                ctx.original_time_unit(),
                ctx.target_time_unit(),
            )));
        }
        "range" => {
            return env
                .range_bucket()
                .map(Value::String)
                .ok_or_else(|| TsqlError::eval("function 'range' not in group or not found range bucket"));
        }
        "row_num" => return Ok(Value::Int(env.row_num())),
        "scope" => return eval_scope(ctx, call, env),
        _ => {}
    }
    if let Some(v) = env.aggregate(ctx, call) {
        return v;
    }
    if literal_functions().contains(&call.name) {
        return reduce_literal(ctx, &Expr::Call(call.clone()))?
            .ok_or_else(|| TsqlError::eval(format!("invalid literal function '{}'", call.name)));
    }
    let Some(func) = builtin_functions().get(&call.name) else {
        return Err(TsqlError::function(format!("not support function '{}'", call.name)));
    };
    let args = call
        .args
        .iter()
        .map(|arg| eval(ctx, arg, env))
        .collect::<Result<Vec<_>>>()?;
    func(&args)
}

fn eval_scope(ctx: &Context, call: &Call, env: &dyn RowEnv) -> Result<Value> {
    let (Some(Expr::Call(inner)), 1..=2) = (call.args.first().map(Expr::unparen), call.args.len()) else {
        return Err(TsqlError::eval("invalid args for function 'scope'"));
    };
    let scope = match call.args.get(1) {
        Some(Expr::String(s)) if !s.is_empty() => s.as_str(),
        Some(Expr::String(_)) | None => "terms",
        Some(_) => return Err(TsqlError::eval("invalid args for function 'scope'")),
    };
    let id = ctx.lookup_func_id(inner);
    env.scope(ctx, scope, &id)
        .unwrap_or_else(|| Err(TsqlError::eval(format!("not found scope '{scope}'"))))
}

/// Renders a bucket key for the `time` output column: converted into the
/// target unit when one is set, otherwise as a UTC timestamp string.
pub fn format_bucket_time(ctx: &Context, t: i64) -> Value {
    let target = ctx.target_time_unit();
    if target != TimeUnit::Unset {
        return Value::Int(convert_timestamp(t, ctx.original_time_unit(), target));
    }
    let nanos = match ctx.original_time_unit() {
        TimeUnit::Unset => t,
        unit => t.saturating_mul(unit.nanos()),
    };
    let time = chrono::DateTime::from_timestamp_nanos(nanos);
    Value::String(time.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsql::grammar::parse_expr;
    use crate::tsql::timeunit::SECOND;
    use std::collections::HashMap;

    struct FakeRow {
        values: HashMap<String, Value>,
        aggs: HashMap<String, Value>,
        bucket: Option<i64>,
    }

    impl RowEnv for FakeRow {
        fn aggregate(&self, ctx: &Context, call: &Call) -> Option<Result<Value>> {
            if call.name != "sum" && call.name != "max" {
                return None;
            }
            let id = ctx.lookup_func_id(call);
            Some(Ok(self.aggs.get(&id).cloned().unwrap_or_default()))
        }

        fn column(&self, _ctx: &Context, r: &VarRef) -> Value {
            self.values.get(&r.name).cloned().unwrap_or_default()
        }

        fn time_bucket(&self) -> Option<i64> {
            self.bucket
        }

        fn row_num(&self) -> i64 {
            7
        }
    }

    fn expr(s: &str) -> Expr {
        parse_expr(s, &HashMap::new()).unwrap()
    }

    fn row(ctx: &Context) -> FakeRow {
        let sum = match expr("sum(cpu)") {
            Expr::Call(c) => c,
            _ => unreachable!(),
        };
        FakeRow {
            values: HashMap::from([
                ("host".to_string(), Value::String("a".into())),
                ("cpu".to_string(), Value::Float(1.5)),
            ]),
            aggs: HashMap::from([(ctx.lookup_func_id(&sum), Value::Float(10.0))]),
            bucket: Some(60 * SECOND),
        }
    }

    #[test]
    fn arithmetic_over_aggregates() {
        let ctx = Context::new(0, 0);
        let row = row(&ctx);
        assert_eq!(eval(&ctx, &expr("sum(cpu) / 4"), &row).unwrap(), Value::Float(2.5));
        assert_eq!(eval(&ctx, &expr("cpu * 2"), &row).unwrap(), Value::Float(3.0));
        assert_eq!(eval(&ctx, &expr("row_num()"), &row).unwrap(), Value::Int(7));
    }

    #[test]
    fn builtins_take_row_values() {
        let ctx = Context::new(0, 0);
        let row = row(&ctx);
        let v = eval(&ctx, &expr("if(eq(host, 'a'), 'yes', 'no')"), &row).unwrap();
        assert_eq!(v, Value::String("yes".into()));
        let v = eval(&ctx, &expr("round_float(sum(cpu) / 3, 2)"), &row).unwrap();
        assert_eq!(v, Value::Float(3.33));
    }

    #[test]
    fn time_bucket_rendering() {
        let mut ctx = Context::new(0, 0);
        let row = row(&ctx);
        assert_eq!(
            eval(&ctx, &expr("time()"), &row).unwrap(),
            Value::String("1970-01-01T00:01:00Z".into())
        );
        ctx.set_target_time_unit(TimeUnit::Millisecond);
        assert_eq!(eval(&ctx, &expr("time()"), &row).unwrap(), Value::Int(60_000));
        assert_eq!(eval(&ctx, &expr("timestamp()"), &row).unwrap(), Value::Int(60_000));
    }

    #[test]
    fn missing_buckets_and_functions_fail() {
        let ctx = Context::new(0, 0);
        let row = row(&ctx);
        assert!(eval(&ctx, &expr("range()"), &row).is_err());
        let err = eval(&ctx, &expr("nope(1)"), &row).unwrap_err();
        assert_eq!(err.to_string(), "not support function 'nope'");
        assert!(eval(&ctx, &expr("scope(max(cpu), 'global')"), &row).is_err());
    }
}
