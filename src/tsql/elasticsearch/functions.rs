//! Elasticsearch aggregate functions. Each definition knows how to build its
//! aggregation and how to read the value back out of a result bucket.

use std::sync::LazyLock;

use serde_json::{json, Value as Json};

use crate::error::{must_args_num, Result, TsqlError};
use crate::tsql::ast::{Call, DataType, Expr};
use crate::tsql::context::Context;
use crate::tsql::elasticsearch::dsl::{source_value, Aggregation};
use crate::tsql::eval::AggHandler;
use crate::tsql::functions::{reduce_literal, FuncFlag, FunctionTable};
use crate::tsql::resolver::{EsKeyResolver, KeyResolver};
use crate::tsql::script::{compile_script, PainlessScript};
use crate::tsql::value::Value;
use crate::tsql::window::Window;

/// Resolved first argument plus any constant parameters.
#[derive(Debug, Clone, Default)]
pub struct AggArgs {
    pub field: Option<String>,
    pub script: Option<String>,
    pub params: Vec<Value>,
    pub time_key: String,
}

type BuildFn = fn(&AggArgs) -> Result<Aggregation>;
type ExtractFn = fn(&Context, &EsAggHandler, Window<'_, Json>) -> Result<Value>;

pub struct EsAggFunction {
    pub flag: FuncFlag,
    /// Constant parameters after the first argument.
    params: usize,
    build: BuildFn,
    extract: ExtractFn,
}

impl EsAggFunction {
    const fn new(flag: FuncFlag, params: usize, build: BuildFn, extract: ExtractFn) -> Self {
        Self {
            flag,
            params,
            build,
            extract,
        }
    }

    /// Binds this definition to one call site.
    pub fn handler(&'static self, ctx: &Context, id: String, call: &Call) -> Result<EsAggHandler> {
        must_args_num(&call.name, call.args.len(), 1 + self.params)?;
        let mut args = AggArgs {
            time_key: ctx.time_key().to_string(),
            ..AggArgs::default()
        };
        let resolver = EsKeyResolver::new(ctx.time_key());
        match call.args[0].unparen() {
            Expr::VarRef(r) => args.field = Some(resolver.resolve(r, DataType::AnyField).0),
            arg => {
                let mut dialect = PainlessScript::new(&resolver);
                args.script = Some(compile_script(ctx, arg, DataType::AnyField, &mut dialect)?);
            }
        }
        for (i, param) in call.args[1..].iter().enumerate() {
            let value = reduce_literal(ctx, param)?.ok_or_else(|| {
                TsqlError::function(format!("args[{}] must be literal in function '{}'", i + 1, call.name))
            })?;
            args.params.push(value);
        }
        Ok(EsAggHandler {
            id,
            name: call.name.clone(),
            args,
            define: self,
        })
    }
}

pub struct EsAggHandler {
    id: String,
    name: String,
    args: AggArgs,
    define: &'static EsAggFunction,
}

impl EsAggHandler {
    pub fn aggregation(&self) -> Result<Aggregation> {
        (self.define.build)(&self.args)
    }

    /// The raw aggregation result for this handler inside `bucket`.
    fn result<'a>(&self, bucket: &'a Json) -> Result<&'a Json> {
        bucket
            .get(&self.id)
            .ok_or_else(|| TsqlError::decode(format!("invalid {} Aggregation {}", self.name, self.id)))
    }
}

impl AggHandler<Json> for EsAggHandler {
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&self, ctx: &Context, window: Window<'_, Json>) -> Result<Value> {
        (self.define.extract)(ctx, self, window)
    }
}

fn metric(kind: &'static str) -> BuildFn {
    match kind {
        "max" => |a| Ok(Aggregation::metric("max", a.field.as_deref(), a.script.as_deref())),
        "min" => |a| Ok(Aggregation::metric("min", a.field.as_deref(), a.script.as_deref())),
        "avg" => |a| Ok(Aggregation::metric("avg", a.field.as_deref(), a.script.as_deref())),
        "sum" => |a| Ok(Aggregation::metric("sum", a.field.as_deref(), a.script.as_deref())),
        "value_count" => |a| Ok(Aggregation::metric("value_count", a.field.as_deref(), a.script.as_deref())),
        _ => |a| Ok(Aggregation::metric("cardinality", a.field.as_deref(), a.script.as_deref())),
    }
}

fn single_value(h: &EsAggHandler, bucket: &Json) -> Result<Option<f64>> {
    Ok(h.result(bucket)?.get("value").and_then(Json::as_f64))
}

fn value_metric(_: &Context, h: &EsAggHandler, w: Window<'_, Json>) -> Result<Value> {
    Ok(Value::Float(single_value(h, w.current)?.unwrap_or(0.0)))
}

fn percentiles(a: &AggArgs) -> Result<Aggregation> {
    let percent = match a.params.first() {
        Some(p) => p.as_f64().ok_or_else(|| TsqlError::function("invalid percent type error"))?,
        None => 50.0,
    };
    if !(0.0..=100.0).contains(&percent) {
        return Err(TsqlError::function("percent was out of range"));
    }
    let mut agg = Aggregation::metric("percentiles", a.field.as_deref(), a.script.as_deref());
    agg.set("percents", json!([percent]));
    Ok(agg)
}

fn percentile_value(_: &Context, h: &EsAggHandler, w: Window<'_, Json>) -> Result<Value> {
    let values = h.result(w.current)?.get("values");
    let first = match values {
        Some(Json::Object(map)) => map.values().next(),
        Some(Json::Array(items)) => items.first().and_then(|item| item.get("value")),
        _ => None,
    };
    Ok(first.map(Value::from_json).unwrap_or_default())
}

fn top_hits(ascending: bool) -> BuildFn {
    fn build(a: &AggArgs, order: &str) -> Result<Aggregation> {
        let Some(field) = &a.field else {
            return Err(TsqlError::function("not support script"));
        };
        Ok(Aggregation::new(
            "top_hits",
            json!({
                "size": 1,
                "sort": [{ a.time_key.as_str(): { "order": order } }],
                "_source": { "includes": [field] }
            }),
        ))
    }
    if ascending {
        |a| build(a, "asc")
    } else {
        |a| build(a, "desc")
    }
}

fn top_hit_value(_: &Context, h: &EsAggHandler, w: Window<'_, Json>) -> Result<Value> {
    let hits = h.result(w.current)?;
    let source = hits.pointer("/hits/hits/0/_source");
    let value = match (source, &h.args.field) {
        (Some(source), Some(field)) => source_value(source, field).map(Value::from_json),
        _ => None,
    };
    Ok(value.unwrap_or_default())
}

/// Difference between the next bucket's minimum and this one's.
fn delta(h: &EsAggHandler, w: Window<'_, Json>) -> Result<Option<f64>> {
    let Some(current) = single_value(h, w.current)? else {
        return Ok(None);
    };
    let next = w.next.and_then(|next| next.get(&h.id)).and_then(|r| r.get("value")).and_then(Json::as_f64);
    Ok(next.map(|next| next - current))
}

fn diff_value(_: &Context, h: &EsAggHandler, w: Window<'_, Json>) -> Result<Value> {
    Ok(Value::Float(delta(h, w)?.unwrap_or(0.0)))
}

fn diffps_value(ctx: &Context, h: &EsAggHandler, w: Window<'_, Json>) -> Result<Value> {
    let seconds = ctx.interval_seconds();
    match delta(h, w)? {
        Some(d) if seconds > 0.0 => Ok(Value::Float(d / seconds)),
        _ => Ok(Value::Float(0.0)),
    }
}

fn rateps_value(ctx: &Context, h: &EsAggHandler, w: Window<'_, Json>) -> Result<Value> {
    let seconds = ctx.interval_seconds();
    let sum = single_value(h, w.current)?.unwrap_or(0.0);
    if seconds <= 0.0 {
        return Ok(Value::Float(0.0));
    }
    Ok(Value::Float(sum / seconds))
}

const SELECT_ORDER: FuncFlag = FuncFlag::SELECT.union(FuncFlag::ORDER_BY);

static ES_AGG_FUNCTIONS: LazyLock<FunctionTable<EsAggFunction>> = LazyLock::new(|| {
    FunctionTable::new()
        .with("max", EsAggFunction::new(SELECT_ORDER, 0, metric("max"), value_metric))
        .with("min", EsAggFunction::new(SELECT_ORDER, 0, metric("min"), value_metric))
        .with("avg", EsAggFunction::new(SELECT_ORDER, 0, metric("avg"), value_metric))
        .with("mean", EsAggFunction::new(SELECT_ORDER, 0, metric("avg"), value_metric))
        .with("sum", EsAggFunction::new(SELECT_ORDER, 0, metric("sum"), value_metric))
        .with("count", EsAggFunction::new(SELECT_ORDER, 0, metric("value_count"), value_metric))
        .with("distinct", EsAggFunction::new(SELECT_ORDER, 0, metric("cardinality"), value_metric))
        .with("median", EsAggFunction::new(FuncFlag::SELECT, 0, percentiles, percentile_value))
        .with("percentiles", EsAggFunction::new(FuncFlag::SELECT, 1, percentiles, percentile_value))
        .with("first", EsAggFunction::new(FuncFlag::SELECT, 0, top_hits(true), top_hit_value))
        .with("last", EsAggFunction::new(FuncFlag::SELECT, 0, top_hits(false), top_hit_value))
        .with("value", EsAggFunction::new(FuncFlag::SELECT, 0, top_hits(false), top_hit_value))
        .with("diff", EsAggFunction::new(FuncFlag::SELECT, 0, metric("min"), diff_value))
        .with("diffps", EsAggFunction::new(FuncFlag::SELECT, 0, metric("min"), diffps_value))
        .with("rateps", EsAggFunction::new(FuncFlag::SELECT, 0, metric("sum"), rateps_value))
});

pub fn es_agg_functions() -> &'static FunctionTable<EsAggFunction> {
    &ES_AGG_FUNCTIONS
}
