//! Lowers a SELECT statement into ClickHouse SQL over the metrics table.

use std::collections::HashMap;

use serde_json::Value as Json;

use crate::error::{must_args_num, Result, TsqlError};
use crate::models::{ColumnFlag, Filter, FilterOp, DEFAULT_LIMIT_SIZE};
use crate::tsql::ast::{BinaryOp, Call, DataType, Expr, SelectStatement, VarRef};
use crate::tsql::clickhouse::functions::{ck_agg_functions, CkAggHandler};
use crate::tsql::clickhouse::query::{CkBucket, CkQuery};
use crate::tsql::clickhouse::sql::{format_array_value, format_text, format_value, quote_ident, Cond, Fill, SelectBuilder};
use crate::tsql::context::Context;
use crate::tsql::eval::ColumnHandler;
use crate::tsql::functions::{reduce_literal, FuncFlag};
use crate::tsql::planner::{
    from_sources, key_condition, output_column, range_args, split_dimensions, time_bucket, Bucketing,
};
use crate::tsql::resolver::{expr_key_and_flag, CkKeyResolver, KeyResolver};
use crate::tsql::script::{compile_script, escape, ClickhouseScript};
use crate::tsql::timeunit::SECOND;
use crate::tsql::value::Value;

pub const TIME_BUCKET_COLUMN: &str = "bucket_timestamp";
pub const RANGE_BUCKET_COLUMN: &str = "bucket_range";

fn is_ck_agg(name: &str) -> bool {
    ck_agg_functions().contains(name)
}

/// Output alias of a plain reference: its text without identifier quotes.
pub(crate) fn ref_alias(r: &VarRef) -> String {
    Expr::VarRef(r.clone()).to_string().replace('"', "")
}

pub struct CkPlanner<'a> {
    ctx: Context,
    resolver: CkKeyResolver,
    filters: &'a [Filter],
    default_limit: i64,
    table: Option<String>,
    debug: bool,
}

impl<'a> CkPlanner<'a> {
    pub fn new(ctx: Context, filters: &'a [Filter]) -> Self {
        let resolver = CkKeyResolver::new(ctx.time_key());
        Self {
            ctx,
            resolver,
            filters,
            default_limit: DEFAULT_LIMIT_SIZE,
            table: None,
            debug: false,
        }
    }

    pub fn with_default_limit(mut self, limit: i64) -> Self {
        if limit > 0 {
            self.default_limit = limit;
        }
        self
    }

    /// Reads every statement from `table` instead of the FROM measurement.
    pub fn with_table(mut self, table: Option<String>) -> Self {
        self.table = table.filter(|t| !t.is_empty());
        self
    }

    /// Field names that live in the string-field arrays.
    pub fn with_string_fields(mut self, fields: impl IntoIterator<Item = String>) -> Self {
        self.resolver = self.resolver.with_string_fields(fields);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn plan(mut self, stmt: &SelectStatement) -> Result<CkQuery> {
        let sources = from_sources(&stmt.sources)?;
        let table = match &self.table {
            Some(table) => table.clone(),
            None => quote_ident(&sources[0].name),
        };
        let mut builder = SelectBuilder::new(table);
        self.where_clause(stmt, &mut builder)?;

        // group by
        let (bucketing, plain) = split_dimensions(&stmt.dimensions)?;
        let mut columns = Vec::with_capacity(stmt.fields.len() + 1);
        let mut aliases = HashMap::new();
        let bucket = match bucketing {
            Bucketing::None => None,
            Bucketing::Time(call) => {
                columns.push(ColumnHandler::special(
                    "time",
                    ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_INTERVAL,
                ));
                Some(self.time_group(call, &mut builder)?)
            }
            Bucketing::Range(call) => {
                columns.push(ColumnHandler::special(
                    "range",
                    ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_RANGE,
                ));
                Some(self.range_group(call, &mut builder)?)
            }
        };
        for dim in &plain {
            let key = match dim.unparen() {
                Expr::VarRef(r) => self.resolver.resolve(r, DataType::Tag).0,
                expr => {
                    let mut dialect = ClickhouseScript::new(&self.resolver);
                    compile_script(&self.ctx, expr, DataType::Tag, &mut dialect)?
                }
            };
            self.ctx
                .add_dimension(expr_key_and_flag(dim, DataType::Tag, &self.resolver).0);
            let alias = match dim.unparen() {
                Expr::VarRef(r) => ref_alias(r),
                expr => expr.to_string(),
            };
            if !aliases.contains_key(&key) {
                builder.column_as(&key, &alias);
                aliases.insert(key, alias.clone());
            }
            builder.group_by(quote_ident(&alias));
        }

        // select
        let mut handlers = HashMap::new();
        let mut wildcard = false;
        for field in &stmt.fields {
            if matches!(field.expr, Expr::Wildcard) {
                if !wildcard {
                    builder.column("*");
                }
                wildcard = true;
                continue;
            }
            self.select_aggs(&field.expr, &mut builder, &mut handlers)?;
            self.select_refs(&field.expr, &mut builder, &mut aliases);
        }

        self.order_by(stmt, &mut builder, &mut handlers, &aliases)?;
        let grouped: Vec<String> = builder.groups().to_vec();
        for group in grouped {
            if bucket.as_ref().is_some_and(|b| quote_ident(b.column()) == group) {
                continue;
            }
            if !builder.is_ordered(&group) {
                builder.order_by(group, true);
            }
        }
        if let Some(b) = &bucket {
            let column = quote_ident(b.column());
            if builder.fill_clause().is_none() && !builder.is_ordered(&column) {
                builder.order_by(column, true);
            }
        }

        if stmt.limit > 0 {
            builder.limit(stmt.limit);
        } else if bucket.is_none() {
            builder.limit(self.default_limit);
        }
        builder.offset(stmt.offset);

        for field in &stmt.fields {
            let column = output_column(&self.ctx, field, &self.resolver, &is_ck_agg);
            columns.push(ColumnHandler::new(field.clone(), column));
        }

        Ok(CkQuery {
            sources,
            builder,
            resolver: self.resolver,
            columns,
            handlers,
            aliases,
            bucket,
            wildcard,
            ctx: self.ctx,
            debug: self.debug,
        })
    }

    fn where_clause(&self, stmt: &SelectStatement, builder: &mut SelectBuilder) -> Result<()> {
        let (start, end) = self.ctx.range(false);
        if start != 0 || end != 0 {
            let time_key = self.resolver.time_key();
            builder.and_where(Cond::Expr(format!(
                "{time_key} >= fromUnixTimestamp64Nano(cast({start},'Int64'))"
            )));
            builder.and_where(Cond::Expr(format!(
                "{time_key} < fromUnixTimestamp64Nano(cast({end},'Int64'))"
            )));
        }
        if let Some(cond) = &stmt.condition {
            builder.and_where(self.condition(cond)?);
        }
        for cond in filter_conds(&self.resolver, self.filters)? {
            builder.and_where(cond);
        }
        Ok(())
    }

    fn condition(&self, cond: &Expr) -> Result<Cond> {
        match cond {
            Expr::Paren(inner) => return self.condition(inner),
            Expr::Binary(b) if matches!(b.op, BinaryOp::And | BinaryOp::Or) => {
                let items = vec![self.condition(&b.lhs)?, self.condition(&b.rhs)?];
                return Ok(if b.op == BinaryOp::And {
                    Cond::And(items)
                } else {
                    Cond::Or(items)
                });
            }
            Expr::Binary(b) => {
                if let Some((r, op, value)) = key_condition(b) {
                    if let Some(cond) = self.key_condition(r, op, value)? {
                        return Ok(cond);
                    }
                }
            }
            _ => {}
        }
        let mut dialect = ClickhouseScript::new(&self.resolver);
        Ok(Cond::Expr(compile_script(&self.ctx, cond, DataType::Tag, &mut dialect)?))
    }

    /// `key OP literal` as a native predicate, or `None` when the right-hand
    /// side is not constant.
    fn key_condition(&self, r: &VarRef, op: BinaryOp, value: &Expr) -> Result<Option<Cond>> {
        let Some(value) = reduce_literal(&self.ctx, value)? else {
            return Ok(None);
        };
        let key = self.resolver.resolve(r, DataType::Tag).0;
        let sql = match (op, &value) {
            (BinaryOp::Eq, Value::List(_)) => format!("({key} IN {})", format_array_value(&value.to_json())),
            (BinaryOp::Neq, Value::List(_)) => format!("({key} NOT IN {})", format_array_value(&value.to_json())),
            (BinaryOp::EqRegex | BinaryOp::NeqRegex, Value::Regex(pattern)) => {
                let cmp = if op == BinaryOp::EqRegex { "!=" } else { "==" };
                format!("extract({key},'{}') {cmp} ''", escape(pattern))
            }
            (BinaryOp::EqRegex | BinaryOp::NeqRegex, _) => {
                return Err(TsqlError::compile(format!("invalid regexp '{value}'")));
            }
            (BinaryOp::Eq | BinaryOp::Neq | BinaryOp::Gt | BinaryOp::Gte | BinaryOp::Lt | BinaryOp::Lte, _) => {
                let op = if op == BinaryOp::Neq { "!=" } else { op.as_str() };
                format!("({key} {op} {})", format_value(&value.to_json()))
            }
            _ => return Ok(None),
        };
        Ok(Some(Cond::Expr(sql)))
    }

    fn time_group(&mut self, call: &Call, builder: &mut SelectBuilder) -> Result<CkBucket> {
        let bucket = time_bucket(&mut self.ctx, call)?;
        let seconds = bucket.interval_seconds(self.ctx.original_time_unit().nanos());
        let time_key = self.resolver.time_key().to_string();
        builder.column_as(
            &format!("toStartOfInterval({time_key}, toIntervalSecond({seconds}))"),
            TIME_BUCKET_COLUMN,
        );
        builder.group_by(quote_ident(TIME_BUCKET_COLUMN));

        let (start, end) = self.ctx.range(false);
        if end > start {
            builder.fill(Fill {
                column: quote_ident(TIME_BUCKET_COLUMN),
                from: format!(
                    "toStartOfInterval(toDateTime({}), toIntervalSecond({seconds}))",
                    start / SECOND
                ),
                to: format!("toDateTime({})", end / SECOND),
                step: seconds.to_string(),
            });
        }
        Ok(CkBucket::Time {
            column: TIME_BUCKET_COLUMN.to_string(),
        })
    }

    fn range_group(&self, call: &Call, builder: &mut SelectBuilder) -> Result<CkBucket> {
        let r = range_args(call, 4)?;
        must_args_num(&call.name, call.args.len(), 4)?;
        let mut bounds = [0.0; 3];
        for (i, arg) in call.args.iter().enumerate().skip(1) {
            bounds[i - 1] = reduce_literal(&self.ctx, arg)?
                .and_then(|v| v.as_f64())
                .ok_or_else(|| TsqlError::function(format!("args[{i}] is not number in 'range' function")))?;
        }
        let [min, max, step] = bounds.map(Value::Float);
        if bounds[2] <= 0.0 {
            return Err(TsqlError::function("step must be positive in 'range' function"));
        }
        let key = self.resolver.resolve(r, DataType::AnyField).0;
        builder.column_as(
            &format!("floor(({key} - {min}) / {step}) * {step} + {min}"),
            RANGE_BUCKET_COLUMN,
        );
        builder.and_where(Cond::And(vec![
            Cond::Expr(format!("{key} >= {min}")),
            Cond::Expr(format!("{key} < {max}")),
        ]));
        builder.group_by(quote_ident(RANGE_BUCKET_COLUMN));
        builder.fill(Fill {
            column: quote_ident(RANGE_BUCKET_COLUMN),
            from: min.to_string(),
            to: max.to_string(),
            step: step.to_string(),
        });
        Ok(CkBucket::Range {
            column: RANGE_BUCKET_COLUMN.to_string(),
            step: bounds[2],
        })
    }

    fn select_aggs(
        &mut self,
        expr: &Expr,
        builder: &mut SelectBuilder,
        handlers: &mut HashMap<String, CkAggHandler>,
    ) -> Result<()> {
        match expr {
            Expr::Call(call) if call.name == "scope" => {
                Err(TsqlError::function("not support function 'scope' in clickhouse"))
            }
            Expr::Call(call) => match ck_agg_functions().get(&call.name) {
                Some(define) => {
                    if !define.flag.contains(FuncFlag::SELECT) {
                        return Err(TsqlError::function(format!(
                            "not support function '{}' in select",
                            call.name
                        )));
                    }
                    self.add_agg(call, builder, handlers)?;
                    Ok(())
                }
                None => {
                    for arg in &call.args {
                        self.select_aggs(arg, builder, handlers)?;
                    }
                    Ok(())
                }
            },
            Expr::Binary(b) => {
                self.select_aggs(&b.lhs, builder, handlers)?;
                self.select_aggs(&b.rhs, builder, handlers)
            }
            Expr::Paren(inner) => self.select_aggs(inner, builder, handlers),
            _ => Ok(()),
        }
    }

    /// Selects the aggregate under its function id, once per id.
    fn add_agg(
        &mut self,
        call: &Call,
        builder: &mut SelectBuilder,
        handlers: &mut HashMap<String, CkAggHandler>,
    ) -> Result<String> {
        let id = self.ctx.func_id(call);
        if !handlers.contains_key(&id) {
            let define = ck_agg_functions()
                .get(&call.name)
                .ok_or_else(|| TsqlError::function(format!("not support function '{}'", call.name)))?;
            let handler = define.handler(&self.ctx, &self.resolver, id.clone(), call)?;
            builder.column_as(handler.sql(), &id);
            handlers.insert(id.clone(), handler);
        }
        Ok(id)
    }

    /// The SQL key of a plain reference. A reference that is grouped on
    /// reads the tag.
    fn ref_key(&self, r: &VarRef) -> String {
        let key = self.resolver.resolve(r, DataType::AnyField).0;
        let probe = expr_key_and_flag(&Expr::VarRef(r.clone()), DataType::AnyField, &self.resolver).0;
        if self.ctx.has_dimension(&probe) {
            return key;
        }
        let (tag_key, _) = self.resolver.resolve(r, DataType::Tag);
        if self.ctx.has_dimension(&tag_key) {
            return tag_key;
        }
        key
    }

    fn select_refs(&self, expr: &Expr, builder: &mut SelectBuilder, aliases: &mut HashMap<String, String>) {
        match expr {
            Expr::Call(call) if is_ck_agg(&call.name) => {}
            Expr::Call(call) => call.args.iter().for_each(|a| self.select_refs(a, builder, aliases)),
            Expr::Binary(b) => {
                self.select_refs(&b.lhs, builder, aliases);
                self.select_refs(&b.rhs, builder, aliases);
            }
            Expr::Paren(inner) => self.select_refs(inner, builder, aliases),
            Expr::VarRef(r) => {
                let key = self.ref_key(r);
                if !aliases.contains_key(&key) {
                    let alias = ref_alias(r);
                    builder.column_as(&key, &alias);
                    aliases.insert(key, alias);
                }
            }
            _ => {}
        }
    }

    fn order_by(
        &mut self,
        stmt: &SelectStatement,
        builder: &mut SelectBuilder,
        handlers: &mut HashMap<String, CkAggHandler>,
        aliases: &HashMap<String, String>,
    ) -> Result<()> {
        for sort in &stmt.sort_fields {
            let expr = match sort.expr.unparen() {
                Expr::VarRef(r) => {
                    let key = self.ref_key(r);
                    match aliases.get(&key) {
                        Some(alias) => quote_ident(alias),
                        None => key,
                    }
                }
                Expr::Call(call) if is_ck_agg(&call.name) => {
                    let orderable = ck_agg_functions()
                        .get(&call.name)
                        .is_some_and(|d| d.flag.contains(FuncFlag::ORDER_BY));
                    if !orderable {
                        return Err(TsqlError::function(format!(
                            "not support function '{}' in order by",
                            call.name
                        )));
                    }
                    quote_ident(&self.add_agg(call, builder, handlers)?)
                }
                _ => return Err(TsqlError::compile("invalid order by expression")),
            };
            if !builder.is_ordered(&expr) {
                builder.order_by(expr, sort.ascending);
            }
        }
        Ok(())
    }
}

fn filter_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One predicate per AND filter, then a single OR group of the `or_*`
/// filters.
pub fn filter_conds(resolver: &CkKeyResolver, filters: &[Filter]) -> Result<Vec<Cond>> {
    let mut conds = Vec::with_capacity(filters.len());
    let mut or = Vec::new();
    for f in filters {
        let op = f.op().map_err(TsqlError::compile)?;
        let key = resolver.resolve_filter_key(&f.key);
        let cond = match op {
            FilterOp::In | FilterOp::OrIn => {
                if !f.value.is_array() {
                    continue;
                }
                format!("({key} IN {})", format_array_value(&f.value))
            }
            FilterOp::Match | FilterOp::NotMatch => {
                let text = filter_text(&f.value);
                if text.is_empty() || text == "*" {
                    continue;
                }
                let like = if op == FilterOp::Match { "LIKE" } else { "NOT LIKE" };
                format!("({key} {like} '%{}%')", escape(&text.replace('*', "%")))
            }
            _ => match op.sql_operator() {
                Some(sql_op) => format!("({key} {sql_op} {})", format_text(&f.value)),
                None => continue,
            },
        };
        if op.is_or() {
            or.push(Cond::Expr(cond));
        } else {
            conds.push(Cond::Expr(cond));
        }
    }
    if !or.is_empty() {
        conds.push(Cond::Or(or));
    }
    Ok(conds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsql::ast::Statement;
    use crate::tsql::grammar::{parse_expr, parse_statements};
    use crate::tsql::query::{Query, SearchSource};
    use crate::tsql::timeunit::MINUTE;
    use serde_json::json;

    fn select(sql: &str) -> SelectStatement {
        match parse_statements(sql, &HashMap::new()).unwrap().remove(0) {
            Statement::Select(stmt) => *stmt,
            other => panic!("not a select: {other:?}"),
        }
    }

    fn plan(ctx: Context, sql: &str) -> Result<CkQuery> {
        CkPlanner::new(ctx, &[]).plan(&select(sql))
    }

    fn sql(q: &CkQuery) -> String {
        match q.search_source() {
            SearchSource::Clickhouse(sql) => sql,
            other => panic!("unexpected source {other:?}"),
        }
    }

    fn id(ctx: &Context, src: &str) -> String {
        let Expr::Call(call) = parse_expr(src, &HashMap::new()).unwrap() else {
            panic!("not a call");
        };
        ctx.lookup_func_id(&call)
    }

    #[test]
    fn plain_column() {
        let q = plan(Context::new(0, 0), "select column from table").unwrap();
        assert_eq!(
            sql(&q),
            "SELECT number_field_values[indexOf(number_field_keys,'column')] AS \"column\" FROM \"table\" LIMIT 100"
        );
    }

    #[test]
    fn long_span_buckets_stay_under_cap() {
        let q = plan(Context::new(0, 72 * 60 * MINUTE), "select max(cpu) from t group by time(1m)").unwrap();
        let text = sql(&q);
        assert!(text.contains("toIntervalSecond(507)"));
        assert!(text.ends_with("STEP 507"));
        assert_eq!(q.context().interval_seconds(), 507.0);
        assert!(crate::tsql::interval::bucket_count(0, 72 * 3600, 507) <= 512);
    }

    #[test]
    fn aggregate_aliased_by_id() {
        let q = plan(Context::new(0, 0), "select sum(column) from table").unwrap();
        let id = id(q.context(), "sum(column)");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            sql(&q),
            format!(
                "SELECT SUM(number_field_values[indexOf(number_field_keys,'column')]) AS \"{id}\" FROM \"table\" LIMIT 100"
            )
        );
    }

    #[test]
    fn time_grouping_fills_buckets() {
        let q = plan(Context::new(0, 0), "select max(column) from table group by time()").unwrap();
        let text = sql(&q);
        assert!(text.contains("toStartOfInterval(timestamp, toIntervalSecond(60)) AS \"bucket_timestamp\""));
        assert!(text.contains("GROUP BY \"bucket_timestamp\""));
        assert!(text.ends_with("ORDER BY \"bucket_timestamp\" ASC"));
        assert!(!text.contains("LIMIT"));

        let q = plan(Context::new(0, 4 * 60 * MINUTE), "select max(column) from table group by time()").unwrap();
        let text = sql(&q);
        assert!(text.contains(
            "WHERE timestamp >= fromUnixTimestamp64Nano(cast(0,'Int64')) AND timestamp < fromUnixTimestamp64Nano(cast(14400000000000,'Int64'))"
        ));
        assert!(text.ends_with(
            "ORDER BY \"bucket_timestamp\" ASC WITH FILL FROM toStartOfInterval(toDateTime(0), toIntervalSecond(120)) TO toDateTime(14400) STEP 120"
        ));
        assert_eq!(
            q.sub_search_source().unwrap(),
            "ORDER BY \"bucket_timestamp\" ASC WITH FILL FROM toStartOfInterval(toDateTime(0), toIntervalSecond(120)) TO toDateTime(14400) STEP 120"
        );
    }

    #[test]
    fn filters_and_together() {
        let filters = vec![
            Filter::new("column", "eq", json!(123)),
            Filter::new("column", "=", json!(123)),
        ];
        let q = CkPlanner::new(Context::new(0, 0), &filters)
            .plan(&select("select column from table"))
            .unwrap();
        assert!(sql(&q).contains("WHERE (column = '123') AND (column = '123')"));
    }

    #[test]
    fn filter_operators() {
        let resolver = CkKeyResolver::new("timestamp");
        let filters = vec![
            Filter::new("tags.host", "in", json!(["1111", "2222"])),
            Filter::new("tags.org_name", "match", json!("te*st")),
            Filter::new("tags.host", "in", json!("skipped")),
            Filter::new("tags.host", "nmatch", json!("*")),
            Filter::new("tags.a", "or_eq", json!("x")),
            Filter::new("fields.b", "or_in", json!([1])),
        ];
        let conds: Vec<String> = filter_conds(&resolver, &filters)
            .unwrap()
            .iter()
            .map(Cond::render)
            .collect();
        assert_eq!(
            conds,
            vec![
                "(tag_values[indexOf(tag_keys,'host')] IN ('1111', '2222'))".to_string(),
                "(org_name LIKE '%te%st%')".to_string(),
                "((tag_values[indexOf(tag_keys,'a')] = 'x') OR (number_field_values[indexOf(number_field_keys,'b')] IN ('1')))"
                    .to_string(),
            ]
        );
        assert!(filter_conds(&resolver, &[Filter::new("a", "between", json!(1))]).is_err());
    }

    #[test]
    fn wildcard_selects_all() {
        let q = plan(Context::new(0, 0), "select * from metrics").unwrap();
        assert_eq!(sql(&q), "SELECT * FROM \"metrics\" LIMIT 100");
    }

    #[test]
    fn where_lowering() {
        let q = plan(
            Context::new(0, 0),
            "select cpu from t where host = 'a' and (cluster =~ /eu.*/ or cpu > 1) and cpu::field + 1 > 2",
        )
        .unwrap();
        let text = sql(&q);
        assert!(text.contains(
            "((tag_values[indexOf(tag_keys,'host')] = 'a') AND (extract(tag_values[indexOf(tag_keys,'cluster')],'eu.*') != '' OR (tag_values[indexOf(tag_keys,'cpu')] > 1)))"
        ), "{text}");
        assert!(text.contains("(number_field_values[indexOf(number_field_keys,'cpu')] + 1) > 2"), "{text}");
    }

    #[test]
    fn dimensions_and_order() {
        let q = plan(
            Context::new(0, 0),
            "select host, max(cpu) from t group by host, cluster order by max(cpu) desc limit 5 offset 5",
        )
        .unwrap();
        let id = id(q.context(), "max(cpu)");
        let text = sql(&q);
        assert!(text.starts_with(
            "SELECT tag_values[indexOf(tag_keys,'host')] AS \"host\", tag_values[indexOf(tag_keys,'cluster')] AS \"cluster\""
        ), "{text}");
        assert!(text.contains("GROUP BY \"host\", \"cluster\""));
        assert!(text.ends_with(&format!(
            "ORDER BY \"{id}\" DESC, \"host\" ASC, \"cluster\" ASC LIMIT 5 OFFSET 5"
        )));
        assert_eq!(q.columns[0].column.key, "tag_values[indexOf(tag_keys,'host')]");
        assert!(q.columns[0].column.flag.contains(ColumnFlag::GROUP_BY | ColumnFlag::TAG));
    }

    #[test]
    fn order_by_errors() {
        let err = plan(Context::new(0, 0), "select cpu from t order by first(cpu)").err().unwrap();
        assert_eq!(err.to_string(), "not support function 'first' in order by");
        let err = plan(Context::new(0, 0), "select cpu from t order by cpu + 1").err().unwrap();
        assert_eq!(err.to_string(), "invalid order by expression");
        assert!(plan(Context::new(0, 0), "select scope(max(cpu)) from t").is_err());
    }

    #[test]
    fn range_grouping() {
        let q = plan(Context::new(0, 0), "select count(cpu) from t group by range(cpu, 0, 100, 10)").unwrap();
        let text = sql(&q);
        let key = "number_field_values[indexOf(number_field_keys,'cpu')]";
        assert!(text.contains(&format!("floor(({key} - 0) / 10) * 10 + 0 AS \"bucket_range\"")));
        assert!(text.contains(&format!("({key} >= 0 AND {key} < 100)")));
        assert!(text.ends_with("ORDER BY \"bucket_range\" ASC WITH FILL FROM 0 TO 100 STEP 10"));
        assert!(plan(Context::new(0, 0), "select count(cpu) from t group by range(cpu, 0, 100)").is_err());
    }

    #[test]
    fn table_override() {
        let q = CkPlanner::new(Context::new(0, 0), &[])
            .with_table(Some("monitor.metrics_all".to_string()))
            .plan(&select("select * from cpu"))
            .unwrap();
        assert_eq!(sql(&q), "SELECT * FROM monitor.metrics_all LIMIT 100");
        assert_eq!(q.sources()[0].name, "cpu");
    }

    #[test]
    fn append_bool_filter_ands_equality() {
        let mut q = plan(Context::new(0, 0), "select * from metrics").unwrap();
        q.append_bool_filter("org_name", json!("erda"));
        q.append_bool_filter("tags.terminus_key", json!("tk"));
        assert_eq!(
            sql(&q),
            "SELECT * FROM \"metrics\" WHERE (org_name = 'erda') AND (tag_values[indexOf(tag_keys,'terminus_key')] = 'tk') LIMIT 100"
        );
    }
}
