//! ClickHouse aggregate functions: the SQL aggregate each call selects, and
//! how its value is read back out of the result row.

use std::sync::LazyLock;

use crate::error::{must_args_num, Result, TsqlError};
use crate::tsql::ast::{Call, DataType, Expr};
use crate::tsql::context::Context;
use crate::tsql::eval::AggHandler;
use crate::tsql::functions::{reduce_literal, FuncFlag, FunctionTable};
use crate::tsql::query::Row;
use crate::tsql::resolver::{CkKeyResolver, KeyResolver};
use crate::tsql::script::{compile_script, ClickhouseScript};
use crate::tsql::value::Value;
use crate::tsql::window::Window;

/// SQL for the first argument, in both renderings.
#[derive(Debug, Clone, Default)]
pub struct CkAggArgs {
    /// NULL when the key is absent from the row.
    pub guarded: String,
    /// Array default (0 or '') when the key is absent.
    pub plain: String,
    pub params: Vec<Value>,
    pub time_key: String,
}

type BuildFn = fn(&CkAggArgs) -> Result<String>;
type ExtractFn = fn(&Context, &CkAggHandler, Window<'_, Row>) -> Result<Value>;

pub struct CkAggFunction {
    pub flag: FuncFlag,
    params: usize,
    build: BuildFn,
    extract: ExtractFn,
}

impl CkAggFunction {
    const fn new(flag: FuncFlag, params: usize, build: BuildFn, extract: ExtractFn) -> Self {
        Self {
            flag,
            params,
            build,
            extract,
        }
    }

    pub fn handler(
        &'static self,
        ctx: &Context,
        resolver: &CkKeyResolver,
        id: String,
        call: &Call,
    ) -> Result<CkAggHandler> {
        must_args_num(&call.name, call.args.len(), 1 + self.params)?;
        let mut args = CkAggArgs {
            time_key: resolver.time_key().to_string(),
            ..CkAggArgs::default()
        };
        match call.args[0].unparen() {
            Expr::VarRef(r) => {
                args.guarded = resolver.resolve_existing(r, DataType::AnyField).0;
                args.plain = resolver.resolve(r, DataType::AnyField).0;
            }
            arg => {
                let mut dialect = ClickhouseScript::new(resolver);
                let script = compile_script(ctx, arg, DataType::AnyField, &mut dialect)?;
                args.guarded = script.clone();
                args.plain = script;
            }
        }
        for (i, param) in call.args[1..].iter().enumerate() {
            let value = reduce_literal(ctx, param)?.ok_or_else(|| {
                TsqlError::function(format!("args[{}] must be literal in function '{}'", i + 1, call.name))
            })?;
            args.params.push(value);
        }
        let sql = (self.build)(&args)?;
        Ok(CkAggHandler {
            id,
            name: call.name.clone(),
            sql,
            define: self,
        })
    }
}

pub struct CkAggHandler {
    id: String,
    name: String,
    sql: String,
    define: &'static CkAggFunction,
}

impl CkAggHandler {
    /// The aggregate expression, without alias.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    fn result<'a>(&self, row: &'a Row) -> Result<&'a serde_json::Value> {
        row.get(&self.id)
            .ok_or_else(|| TsqlError::decode(format!("invalid {} Aggregation {}", self.name, self.id)))
    }
}

impl AggHandler<Row> for CkAggHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&self, ctx: &Context, window: Window<'_, Row>) -> Result<Value> {
        (self.define.extract)(ctx, self, window)
    }
}

fn guarded(kind: &'static str) -> BuildFn {
    match kind {
        "MAX" => |a| Ok(format!("MAX({})", a.guarded)),
        "MIN" => |a| Ok(format!("MIN({})", a.guarded)),
        "AVG" => |a| Ok(format!("AVG({})", a.guarded)),
        "COUNT" => |a| Ok(format!("COUNT({})", a.guarded)),
        "median" => |a| Ok(format!("median({})", a.guarded)),
        _ => |a| Ok(format!("uniqCombined({})", a.guarded)),
    }
}

fn sum(a: &CkAggArgs) -> Result<String> {
    Ok(format!("SUM({})", a.plain))
}

fn quantile(a: &CkAggArgs) -> Result<String> {
    let percent = match a.params.first() {
        Some(p) => p.as_f64().ok_or_else(|| TsqlError::function("invalid percent type error"))?,
        None => 50.0,
    };
    if !(0.0..=100.0).contains(&percent) {
        return Err(TsqlError::function("percent was out of range"));
    }
    Ok(format!("quantile({})({})", percent / 100.0, a.guarded))
}

fn arg_min(a: &CkAggArgs) -> Result<String> {
    Ok(format!("argMin({}, {})", a.guarded, a.time_key))
}

fn arg_max(a: &CkAggArgs) -> Result<String> {
    Ok(format!("argMax({}, {})", a.guarded, a.time_key))
}

/// 64-bit integers arrive quoted in JSONEachRow; read them back as numbers.
fn number(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}

fn numeric_value(_: &Context, h: &CkAggHandler, w: Window<'_, Row>) -> Result<Value> {
    Ok(Value::Float(number(h.result(w.current)?).unwrap_or(0.0)))
}

fn raw_value(_: &Context, h: &CkAggHandler, w: Window<'_, Row>) -> Result<Value> {
    Ok(Value::from_json(h.result(w.current)?))
}

fn delta(h: &CkAggHandler, w: Window<'_, Row>) -> Result<Option<f64>> {
    let Some(current) = number(h.result(w.current)?) else {
        return Ok(None);
    };
    let next = w.next.and_then(|next| next.get(&h.id)).and_then(number);
    Ok(next.map(|next| next - current))
}

fn diff_value(_: &Context, h: &CkAggHandler, w: Window<'_, Row>) -> Result<Value> {
    Ok(Value::Float(delta(h, w)?.unwrap_or(0.0)))
}

fn diffps_value(ctx: &Context, h: &CkAggHandler, w: Window<'_, Row>) -> Result<Value> {
    let seconds = ctx.interval_seconds();
    match delta(h, w)? {
        Some(d) if seconds > 0.0 => Ok(Value::Float(d / seconds)),
        _ => Ok(Value::Float(0.0)),
    }
}

fn rateps_value(ctx: &Context, h: &CkAggHandler, w: Window<'_, Row>) -> Result<Value> {
    let seconds = ctx.interval_seconds();
    let sum = number(h.result(w.current)?).unwrap_or(0.0);
    if seconds <= 0.0 {
        return Ok(Value::Float(0.0));
    }
    Ok(Value::Float(sum / seconds))
}

const SELECT_ORDER: FuncFlag = FuncFlag::SELECT.union(FuncFlag::ORDER_BY);

static CK_AGG_FUNCTIONS: LazyLock<FunctionTable<CkAggFunction>> = LazyLock::new(|| {
    FunctionTable::new()
        .with("max", CkAggFunction::new(SELECT_ORDER, 0, guarded("MAX"), numeric_value))
        .with("min", CkAggFunction::new(SELECT_ORDER, 0, guarded("MIN"), numeric_value))
        .with("avg", CkAggFunction::new(SELECT_ORDER, 0, guarded("AVG"), numeric_value))
        .with("mean", CkAggFunction::new(SELECT_ORDER, 0, guarded("AVG"), numeric_value))
        .with("sum", CkAggFunction::new(SELECT_ORDER, 0, sum, numeric_value))
        .with("count", CkAggFunction::new(SELECT_ORDER, 0, guarded("COUNT"), numeric_value))
        .with("distinct", CkAggFunction::new(SELECT_ORDER, 0, guarded("uniqCombined"), numeric_value))
        .with("median", CkAggFunction::new(FuncFlag::SELECT, 0, guarded("median"), numeric_value))
        .with("percentiles", CkAggFunction::new(FuncFlag::SELECT, 1, quantile, numeric_value))
        .with("first", CkAggFunction::new(FuncFlag::SELECT, 0, arg_min, raw_value))
        .with("last", CkAggFunction::new(FuncFlag::SELECT, 0, arg_max, raw_value))
        .with("value", CkAggFunction::new(FuncFlag::SELECT, 0, arg_max, raw_value))
        .with("diff", CkAggFunction::new(FuncFlag::SELECT, 0, guarded("MIN"), diff_value))
        .with("diffps", CkAggFunction::new(FuncFlag::SELECT, 0, guarded("MIN"), diffps_value))
        .with("rateps", CkAggFunction::new(FuncFlag::SELECT, 0, sum, rateps_value))
});

pub fn ck_agg_functions() -> &'static FunctionTable<CkAggFunction> {
    &CK_AGG_FUNCTIONS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsql::grammar::parse_expr;
    use crate::tsql::timeunit::TimeUnit;
    use serde_json::json;
    use std::collections::HashMap;

    fn handler(ctx: &Context, src: &str) -> Result<CkAggHandler> {
        let Expr::Call(call) = parse_expr(src, &HashMap::new()).unwrap() else {
            panic!("not a call");
        };
        let resolver = CkKeyResolver::new("timestamp");
        let define = ck_agg_functions().get(&call.name).unwrap();
        define.handler(ctx, &resolver, "id0".to_string(), &call)
    }

    fn row(v: serde_json::Value) -> Row {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn guarded_and_plain_columns() {
        let ctx = Context::new(0, 0);
        assert_eq!(
            handler(&ctx, "max(column)").unwrap().sql(),
            "MAX(if(indexOf(number_field_keys,'column') == 0,null,number_field_values[indexOf(number_field_keys,'column')]))"
        );
        assert_eq!(
            handler(&ctx, "sum(column)").unwrap().sql(),
            "SUM(number_field_values[indexOf(number_field_keys,'column')])"
        );
        assert_eq!(
            handler(&ctx, "distinct(service_id::tag)").unwrap().sql(),
            "uniqCombined(if(indexOf(tag_keys,'service_id') == 0,null,tag_values[indexOf(tag_keys,'service_id')]))"
        );
        assert_eq!(handler(&ctx, "count(tenant_id)").unwrap().sql(), "COUNT(tenant_id)");
        assert_eq!(handler(&ctx, "min(timestamp)").unwrap().sql(), "MIN(timestamp)");
        assert!(handler(&ctx, "last(cpu)").unwrap().sql().ends_with(", timestamp)"));
    }

    #[test]
    fn script_arguments() {
        let ctx = Context::new(0, 0);
        assert_eq!(
            handler(&ctx, "sum(if(eq(error::tag, 'true'), elapsed::field, 0))").unwrap().sql(),
            "SUM(if(tag_values[indexOf(tag_keys,'error')]='true',number_field_values[indexOf(number_field_keys,'elapsed')],0))"
        );
        assert_eq!(handler(&ctx, "count(1)").unwrap().sql(), "COUNT(1)");
    }

    #[test]
    fn percentiles_take_a_literal() {
        let ctx = Context::new(0, 0);
        assert!(handler(&ctx, "percentiles(cpu, 90)").unwrap().sql().starts_with("quantile(0.9)("));
        assert!(handler(&ctx, "percentiles(cpu, 190)").is_err());
        assert!(handler(&ctx, "percentiles(cpu, cpu)").is_err());
        assert!(handler(&ctx, "max(cpu, 1)").is_err());
    }

    #[test]
    fn values_read_back() {
        let ctx = Context::new(0, 0);
        let h = handler(&ctx, "count(cpu)").unwrap();
        let current = row(json!({"id0": "12"}));
        assert_eq!(h.handle(&ctx, Window::single(&current)).unwrap(), Value::Float(12.0));
        let null = row(json!({"id0": null}));
        assert_eq!(h.handle(&ctx, Window::single(&null)).unwrap(), Value::Float(0.0));
        let missing = row(json!({}));
        assert!(h.handle(&ctx, Window::single(&missing)).is_err());
    }

    #[test]
    fn diffps_over_lookahead() {
        let mut ctx = Context::new(0, 0);
        ctx.set_target_time_unit(TimeUnit::Second);
        ctx.set_interval(60);
        let h = handler(&ctx, "diffps(cpu)").unwrap();
        let current = row(json!({"id0": 222}));
        let next = row(json!({"id0": 111}));
        assert_eq!(
            h.handle(&ctx, Window::new(&current, Some(&next))).unwrap(),
            Value::Float((111.0 - 222.0) / 60.0)
        );
        assert_eq!(h.handle(&ctx, Window::single(&current)).unwrap(), Value::Float(0.0));
    }
}
