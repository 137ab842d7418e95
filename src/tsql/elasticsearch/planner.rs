//! Lowers a SELECT statement into an Elasticsearch search request.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::{json, Value as Json};

use crate::error::{Result, TsqlError};
use crate::models::{ColumnFlag, Filter, FilterOp, DEFAULT_LIMIT_SIZE};
use crate::tsql::ast::{BinaryOp, Call, DataType, Expr, SelectStatement, VarRef};
use crate::tsql::context::Context;
use crate::tsql::elasticsearch::dsl::{
    exists, range, regexp, script, script_query, term, terms, time_range, wildcard, Aggregation, BoolQuery,
};
use crate::tsql::elasticsearch::functions::{es_agg_functions, EsAggHandler};
use crate::tsql::elasticsearch::query::{EsQuery, Page, QueryFlag};
use crate::tsql::eval::ColumnHandler;
use crate::tsql::functions::{reduce_literal, FuncFlag};
use crate::tsql::planner::{
    from_sources, key_condition, output_column, range_args, split_dimensions, time_bucket, Bucketing,
};
use crate::tsql::resolver::{expr_key_and_flag, EsKeyResolver, KeyResolver};
use crate::tsql::script::{compile_script, PainlessScript};
use crate::tsql::value::Value;

pub const TERMS_AGG: &str = "term";
pub const HISTOGRAM_AGG: &str = "histogram";
pub const RANGE_AGG: &str = "range";
pub const COLUMNS_AGG: &str = "columns";

fn is_es_agg(name: &str) -> bool {
    es_agg_functions().contains(name)
}

/// Compiles one statement. Owns the per-statement context until the plan is
/// handed over to the resulting [`EsQuery`].
pub struct EsPlanner<'a> {
    ctx: Context,
    resolver: EsKeyResolver,
    filters: &'a [Filter],
    default_limit: i64,
    debug: bool,
}

impl<'a> EsPlanner<'a> {
    pub fn new(ctx: Context, filters: &'a [Filter]) -> Self {
        let resolver = EsKeyResolver::new(ctx.time_key());
        Self {
            ctx,
            resolver,
            filters,
            default_limit: DEFAULT_LIMIT_SIZE,
            debug: false,
        }
    }

    pub fn with_default_limit(mut self, limit: i64) -> Self {
        if limit > 0 {
            self.default_limit = limit;
        }
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn plan(mut self, stmt: &SelectStatement) -> Result<EsQuery> {
        let sources = from_sources(&stmt.sources)?;
        let query = self.bool_query(stmt)?;

        let limit = if stmt.limit > 0 { stmt.limit } else { self.default_limit };
        let offset = stmt.offset.max(0);

        // select
        let mut flag = QueryFlag::empty();
        let mut leaf: BTreeMap<String, Aggregation> = BTreeMap::new();
        let mut handlers = HashMap::new();
        let mut refs = BTreeSet::new();
        for field in &stmt.fields {
            if matches!(field.expr, Expr::Wildcard) {
                flag |= QueryFlag::ALL_COLUMNS;
                continue;
            }
            self.select_aggs(&field.expr, &mut leaf, &mut handlers)?;
            self.select_refs(&field.expr, &mut refs);
        }
        if !leaf.is_empty() {
            flag |= QueryFlag::AGGS;
        }
        if !refs.is_empty() {
            flag |= QueryFlag::COLUMNS;
        }

        // group by
        let (bucketing, plain) = split_dimensions(&stmt.dimensions)?;
        let mut columns = Vec::with_capacity(stmt.fields.len() + 1);
        let bucket = match bucketing {
            Bucketing::None => None,
            Bucketing::Time(call) => {
                flag |= QueryFlag::DIMENSIONS | QueryFlag::GROUP_BY_TIME;
                columns.push(ColumnHandler::special(
                    "time",
                    ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_INTERVAL,
                ));
                Some((HISTOGRAM_AGG, self.histogram(call)?))
            }
            Bucketing::Range(call) => {
                flag |= QueryFlag::DIMENSIONS | QueryFlag::GROUP_BY_RANGE;
                columns.push(ColumnHandler::special(
                    "range",
                    ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_RANGE,
                ));
                Some((RANGE_AGG, self.range_bucket(call)?))
            }
        };

        let mut dimension_keys = Vec::with_capacity(plain.len());
        let mut term_scripts = Vec::with_capacity(plain.len());
        for dim in &plain {
            let mut dialect = PainlessScript::new(&self.resolver);
            term_scripts.push(compile_script(&self.ctx, dim, DataType::Tag, &mut dialect)?);
            let key = expr_key_and_flag(dim, DataType::Tag, &self.resolver).0;
            self.ctx.add_dimension(key.clone());
            dimension_keys.push(key);
        }
        if !plain.is_empty() {
            flag |= QueryFlag::DIMENSIONS;
        }

        // scope aggregates and the terms bucket
        let mut scopes = HashMap::new();
        let mut global = BTreeMap::new();
        self.scope_aggs("global", &mut global, &mut scopes)?;
        let mut term_aggs = BTreeMap::new();
        self.scope_aggs("terms", &mut term_aggs, &mut scopes)?;

        let mut top = BTreeMap::new();
        if !plain.is_empty() {
            let mut orders = Vec::with_capacity(stmt.sort_fields.len());
            for sort in &stmt.sort_fields {
                let id = self.order_agg(&sort.expr, &mut term_aggs)?;
                let dir = if sort.ascending { "asc" } else { "desc" };
                orders.push(json!({ id: dir }));
            }

            let size = offset + limit;
            let mut terms_agg = Aggregation::new(
                "terms",
                json!({ "script": script(&term_scripts.join(" + '/' + ")), "size": size }),
            );
            if !orders.is_empty() {
                terms_agg.set("order", Json::Array(orders));
            }
            self.columns_agg(flag, &refs, &mut leaf);
            terms_agg.sub_aggregations(term_aggs);
            match bucket {
                Some((name, mut agg)) => {
                    agg.sub_aggregations(leaf);
                    terms_agg.sub_aggregation(name, agg);
                }
                None => {
                    terms_agg.sub_aggregations(leaf);
                }
            }
            top.insert(TERMS_AGG.to_string(), terms_agg);
            top.extend(global);
        } else if let Some((name, mut agg)) = bucket {
            // without a terms bucket, terms scope resolves against the top level
            global.extend(term_aggs);
            if !stmt.sort_fields.is_empty() {
                return Err(TsqlError::compile("not support order by in this case"));
            }
            self.columns_agg(flag, &refs, &mut leaf);
            agg.sub_aggregations(leaf);
            top.insert(name.to_string(), agg);
            top.extend(global);
        } else {
            global.extend(term_aggs);
            if !global.is_empty() {
                flag |= QueryFlag::AGGS;
            }
            if flag.contains(QueryFlag::AGGS) {
                self.columns_agg(flag, &refs, &mut leaf);
                top.extend(leaf);
                top.extend(global);
            }
        }

        let page = if flag.intersects(QueryFlag::DIMENSIONS | QueryFlag::AGGS) || flag.is_empty() {
            None
        } else {
            Some(Page {
                from: offset,
                size: limit,
                sort: self.hit_sort(stmt)?,
            })
        };

        for field in &stmt.fields {
            let column = output_column(&self.ctx, field, &self.resolver, &is_es_agg);
            columns.push(ColumnHandler::new(field.clone(), column));
        }

        Ok(EsQuery {
            sources,
            query,
            aggs: top,
            page,
            flag,
            columns,
            handlers,
            scopes,
            dimension_keys,
            offset: offset as usize,
            ctx: self.ctx,
            debug: self.debug,
        })
    }

    fn bool_query(&self, stmt: &SelectStatement) -> Result<BoolQuery> {
        let mut query = BoolQuery::new();
        let (start, end) = self.ctx.range(true);
        if start != 0 || end != 0 {
            query.filter(time_range(self.ctx.time_key(), start, end));
        }
        apply_filters(&mut query, self.filters)?;
        if let Some(cond) = &stmt.condition {
            let mut sub = BoolQuery::new();
            self.condition(cond, &mut sub)?;
            if !sub.is_empty() {
                query.filter(sub.to_json());
            }
        }
        Ok(query)
    }

    fn condition(&self, cond: &Expr, q: &mut BoolQuery) -> Result<()> {
        match cond {
            Expr::Paren(inner) => return self.condition(inner, q),
            Expr::Binary(b) if matches!(b.op, BinaryOp::And | BinaryOp::Or) => {
                let mut left = BoolQuery::new();
                self.condition(&b.lhs, &mut left)?;
                let mut right = BoolQuery::new();
                self.condition(&b.rhs, &mut right)?;
                if b.op == BinaryOp::And {
                    q.filter(left.to_json()).filter(right.to_json());
                } else {
                    q.should(left.to_json()).should(right.to_json());
                }
                return Ok(());
            }
            Expr::Binary(b) => {
                if let Some((r, op, value)) = key_condition(b) {
                    if self.key_condition(r, op, value, q)? {
                        return Ok(());
                    }
                }
            }
            _ => {}
        }

        let mut dialect = PainlessScript::tracking(&self.resolver);
        let source = compile_script(&self.ctx, cond, DataType::Tag, &mut dialect)?;
        for field in dialect.into_fields() {
            q.filter(exists(&field));
        }
        q.filter(script_query(&source));
        Ok(())
    }

    /// Lowers `key OP literal` into a native query. Returns false when the
    /// right-hand side does not reduce to a constant.
    fn key_condition(&self, r: &VarRef, op: BinaryOp, value: &Expr, q: &mut BoolQuery) -> Result<bool> {
        let Some(value) = reduce_literal(&self.ctx, value)? else {
            return Ok(false);
        };
        let key = self.resolver.resolve(r, DataType::Tag).0;
        match op {
            BinaryOp::Eq | BinaryOp::Neq => {
                let query = match &value {
                    Value::List(_) => terms(&key, value.to_json()),
                    _ => term(&key, value.to_json()),
                };
                if op == BinaryOp::Eq {
                    q.filter(query);
                } else {
                    q.must_not(query);
                }
            }
            BinaryOp::EqRegex | BinaryOp::NeqRegex => {
                let Value::Regex(pattern) = &value else {
                    return Err(TsqlError::compile(format!("invalid regexp '{value}'")));
                };
                let query = regexp(&key, &pattern.replace('/', "\\/"));
                if op == BinaryOp::EqRegex {
                    q.filter(query);
                } else {
                    q.must_not(query);
                }
            }
            BinaryOp::Gt => {
                q.filter(range(&key, "gt", value.to_json()));
            }
            BinaryOp::Gte => {
                q.filter(range(&key, "gte", value.to_json()));
            }
            BinaryOp::Lt => {
                q.filter(range(&key, "lt", value.to_json()));
            }
            BinaryOp::Lte => {
                q.filter(range(&key, "lte", value.to_json()));
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn select_aggs(
        &mut self,
        expr: &Expr,
        aggs: &mut BTreeMap<String, Aggregation>,
        handlers: &mut HashMap<String, EsAggHandler>,
    ) -> Result<()> {
        match expr {
            Expr::Call(call) if call.name == "scope" => self.register_scope(call),
            Expr::Call(call) => match es_agg_functions().get(&call.name) {
                Some(define) => {
                    if !define.flag.contains(FuncFlag::SELECT) {
                        return Err(TsqlError::function(format!(
                            "not support function '{}' in select",
                            call.name
                        )));
                    }
                    let id = self.ctx.func_id(call);
                    if !handlers.contains_key(&id) {
                        let handler = define.handler(&self.ctx, id.clone(), call)?;
                        aggs.insert(id.clone(), handler.aggregation()?);
                        handlers.insert(id, handler);
                    }
                    Ok(())
                }
                None => {
                    for arg in &call.args {
                        self.select_aggs(arg, aggs, handlers)?;
                    }
                    Ok(())
                }
            },
            Expr::Binary(b) => {
                self.select_aggs(&b.lhs, aggs, handlers)?;
                self.select_aggs(&b.rhs, aggs, handlers)
            }
            Expr::Paren(inner) => self.select_aggs(inner, aggs, handlers),
            _ => Ok(()),
        }
    }

    /// Document paths a select expression reads outside of aggregates.
    fn select_refs(&self, expr: &Expr, refs: &mut BTreeSet<String>) {
        match expr {
            Expr::Call(call) if call.name == "scope" || is_es_agg(&call.name) => {}
            Expr::Call(call) => call.args.iter().for_each(|a| self.select_refs(a, refs)),
            Expr::Binary(b) => {
                self.select_refs(&b.lhs, refs);
                self.select_refs(&b.rhs, refs);
            }
            Expr::Paren(inner) => self.select_refs(inner, refs),
            Expr::VarRef(r) => {
                refs.insert(self.resolver.resolve(r, DataType::AnyField).0);
            }
            _ => {}
        }
    }

    fn register_scope(&mut self, call: &Call) -> Result<()> {
        let (Some(Expr::Call(inner)), 1..=2) = (call.args.first().map(Expr::unparen), call.args.len()) else {
            return Err(TsqlError::function("invalid args for function 'scope'"));
        };
        let scope = match call.args.get(1).map(Expr::unparen) {
            Some(Expr::String(s)) if !s.is_empty() => s.clone(),
            Some(Expr::String(_)) | None => "terms".to_string(),
            Some(_) => return Err(TsqlError::function("invalid args for function 'scope'")),
        };
        let id = self.ctx.func_id(inner);
        self.ctx.add_scope(&scope, id, inner.clone());
        Ok(())
    }

    fn scope_aggs(
        &self,
        scope: &str,
        aggs: &mut BTreeMap<String, Aggregation>,
        handlers: &mut HashMap<(String, String), EsAggHandler>,
    ) -> Result<()> {
        let Some(calls) = self.ctx.scope(scope) else {
            return Ok(());
        };
        for (id, call) in calls {
            let define = es_agg_functions()
                .get(&call.name)
                .filter(|d| d.flag.contains(FuncFlag::SELECT))
                .ok_or_else(|| TsqlError::function(format!("invalid expression for scope '{scope}'")))?;
            let handler = define.handler(&self.ctx, id.clone(), call)?;
            aggs.insert(id.clone(), handler.aggregation()?);
            handlers.insert((scope.to_string(), id.clone()), handler);
        }
        Ok(())
    }

    /// Registers the aggregate a terms bucket is ordered by, returning its id.
    fn order_agg(&mut self, expr: &Expr, aggs: &mut BTreeMap<String, Aggregation>) -> Result<String> {
        let Expr::Call(call) = expr.unparen() else {
            return Err(TsqlError::compile("invalid order by expression"));
        };
        let define = es_agg_functions()
            .get(&call.name)
            .filter(|d| d.flag.contains(FuncFlag::ORDER_BY))
            .ok_or_else(|| TsqlError::function(format!("not support function '{}' in order by", call.name)))?;
        let id = self.ctx.func_id(call);
        if !aggs.contains_key(&id) {
            let handler = define.handler(&self.ctx, id.clone(), call)?;
            aggs.insert(id.clone(), handler.aggregation()?);
        }
        Ok(id)
    }

    /// Adds the `top_hits` that carries plain columns next to aggregates.
    fn columns_agg(&self, flag: QueryFlag, refs: &BTreeSet<String>, aggs: &mut BTreeMap<String, Aggregation>) {
        if !flag.intersects(QueryFlag::COLUMNS | QueryFlag::ALL_COLUMNS) {
            return;
        }
        let mut body = json!({
            "size": 1,
            "sort": [{ self.ctx.time_key(): { "order": "desc" } }],
        });
        if !flag.contains(QueryFlag::ALL_COLUMNS) {
            body["_source"] = json!({ "includes": refs });
        }
        aggs.insert(COLUMNS_AGG.to_string(), Aggregation::new("top_hits", body));
    }

    fn histogram(&mut self, call: &Call) -> Result<Aggregation> {
        let bucket = time_bucket(&mut self.ctx, call)?;
        Ok(Aggregation::new(
            "histogram",
            json!({
                "field": self.ctx.time_key(),
                "interval": bucket.interval,
                "min_doc_count": 0,
                "offset": bucket.start.rem_euclid(bucket.interval),
                "extended_bounds": { "min": bucket.start, "max": bucket.end },
            }),
        ))
    }

    fn range_bucket(&self, call: &Call) -> Result<Aggregation> {
        let r = range_args(call, 2)?;
        let key = self.resolver.resolve(r, DataType::AnyField).0;
        let mut bounds = Vec::with_capacity(call.args.len() - 1);
        for (i, arg) in call.args.iter().enumerate().skip(1) {
            let value = reduce_literal(&self.ctx, arg)?
                .ok_or_else(|| TsqlError::function(format!("args[{i}] is not literal in 'range' function")))?;
            bounds.push(value.to_json());
        }
        let ranges: Vec<Json> = bounds
            .chunks(2)
            .map(|pair| match pair {
                [from, to] => json!({ "from": from, "to": to }),
                [from] => json!({ "from": from }),
                _ => Json::Null,
            })
            .collect();
        Ok(Aggregation::new("range", json!({ "field": key, "ranges": ranges })))
    }

    fn hit_sort(&self, stmt: &SelectStatement) -> Result<Vec<Json>> {
        if stmt.sort_fields.is_empty() {
            return Ok(vec![json!({ self.ctx.time_key(): { "order": "desc" } })]);
        }
        let mut sort = Vec::with_capacity(stmt.sort_fields.len());
        for field in &stmt.sort_fields {
            let order = if field.ascending { "asc" } else { "desc" };
            match field.expr.unparen() {
                Expr::VarRef(r) => {
                    let key = self.resolver.resolve(r, DataType::AnyField).0;
                    sort.push(json!({ key: { "order": order } }));
                }
                expr => {
                    let mut dialect = PainlessScript::new(&self.resolver);
                    let source = compile_script(&self.ctx, expr, DataType::AnyField, &mut dialect)?;
                    sort.push(json!({
                        "_script": { "type": "number", "script": script(&source), "order": order }
                    }));
                }
            }
        }
        Ok(sort)
    }
}

fn filter_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// ANDs the flat request filters into `q`; `or_*` filters form one nested
/// should group.
pub fn apply_filters(q: &mut BoolQuery, filters: &[Filter]) -> Result<()> {
    let mut or = BoolQuery::new();
    for f in filters {
        let op = f.op().map_err(TsqlError::compile)?;
        let key = f.key.as_str();
        match op {
            FilterOp::Eq => {
                q.filter(term(key, f.value.clone()));
            }
            FilterOp::Neq => {
                q.must_not(term(key, f.value.clone()));
            }
            FilterOp::Gt => {
                q.filter(range(key, "gt", f.value.clone()));
            }
            FilterOp::Gte => {
                q.filter(range(key, "gte", f.value.clone()));
            }
            FilterOp::Lt => {
                q.filter(range(key, "lt", f.value.clone()));
            }
            FilterOp::Lte => {
                q.filter(range(key, "lte", f.value.clone()));
            }
            FilterOp::In => {
                if f.value.is_array() {
                    q.filter(terms(key, f.value.clone()));
                }
            }
            FilterOp::Match | FilterOp::NotMatch => {
                let text = filter_text(&f.value);
                if text.is_empty() || text == "*" {
                    continue;
                }
                let query = wildcard(key, &format!("*{text}*"));
                if op == FilterOp::Match {
                    q.filter(query);
                } else {
                    q.must_not(query);
                }
            }
            FilterOp::OrEq => {
                or.should(term(key, f.value.clone()));
            }
            FilterOp::OrIn => {
                if f.value.is_array() {
                    or.should(terms(key, f.value.clone()));
                }
            }
        }
    }
    if !or.is_empty() {
        q.filter(or.to_json());
    }
    Ok(())
}
