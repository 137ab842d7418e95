//! Turns an Elasticsearch search response back into tabular [`Data`].

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as Json;

use crate::error::Result;
use crate::models::{Column, ColumnFlag, Data};
use crate::tsql::ast::{Call, DataType, VarRef};
use crate::tsql::context::Context;
use crate::tsql::elasticsearch::dsl::{flatten_source, source_value};
use crate::tsql::elasticsearch::functions::es_agg_functions;
use crate::tsql::elasticsearch::planner::{COLUMNS_AGG, HISTOGRAM_AGG, RANGE_AGG, TERMS_AGG};
use crate::tsql::elasticsearch::query::{EsQuery, QueryFlag};
use crate::tsql::eval::{AggHandler, RowEnv};
use crate::tsql::resolver::{EsKeyResolver, KeyResolver, FIELDS_PREFIX, NAME_KEY, TAGS_PREFIX};
use crate::tsql::value::Value;
use crate::tsql::window::{windows, Window};

/// One output row's worth of response: a raw hit or an aggregation bucket.
struct Leaf<'a> {
    bucket: &'a Json,
    next: Option<&'a Json>,
    term: Option<&'a Json>,
    time: Option<i64>,
    range: Option<String>,
}

impl<'a> Leaf<'a> {
    fn new(bucket: &'a Json, term: Option<&'a Json>) -> Self {
        Self {
            bucket,
            next: None,
            term,
            time: None,
            range: None,
        }
    }

    /// The document carrying plain columns for this row.
    fn source(&self, raw: bool) -> Option<&'a Json> {
        if raw {
            self.bucket.get("_source")
        } else {
            self.bucket.pointer(&format!("/{COLUMNS_AGG}/hits/hits/0/_source"))
        }
    }
}

struct BucketRow<'q, 'a> {
    query: &'q EsQuery,
    resolver: EsKeyResolver,
    root: &'a Json,
    leaf: &'a Leaf<'a>,
    raw: bool,
    row_num: i64,
}

impl BucketRow<'_, '_> {
    /// Reads a grouped dimension back out of the joined terms key.
    fn dimension(&self, r: &VarRef, key: &str) -> Option<Value> {
        let term_key = self.leaf.term?.get("key")?.as_str()?;
        let tag_key = self.resolver.resolve(r, DataType::Tag).0;
        let idx = self
            .query
            .dimension_keys
            .iter()
            .position(|k| *k == tag_key || k == key)?;
        let parts: Vec<&str> = term_key.split('/').collect();
        if parts.len() != self.query.dimension_keys.len() {
            // a value containing '/' makes the split ambiguous
            return None;
        }
        parts.get(idx).map(|s| Value::String(s.to_string()))
    }
}

impl RowEnv for BucketRow<'_, '_> {
    fn aggregate(&self, ctx: &Context, call: &Call) -> Option<Result<Value>> {
        if self.raw || !es_agg_functions().contains(&call.name) {
            return None;
        }
        let id = ctx.lookup_func_id(call);
        let handler = self.query.handlers.get(&id)?;
        Some(handler.handle(ctx, Window::new(self.leaf.bucket, self.leaf.next)))
    }

    fn column(&self, _ctx: &Context, r: &VarRef) -> Value {
        let key = self.resolver.resolve(r, DataType::AnyField).0;
        if let Some(v) = self.leaf.source(self.raw).and_then(|s| source_value(s, &key)) {
            return Value::from_json(v);
        }
        self.dimension(r, &key).unwrap_or_default()
    }

    fn time_bucket(&self) -> Option<i64> {
        self.leaf.time
    }

    fn range_bucket(&self) -> Option<String> {
        self.leaf.range.clone()
    }

    fn row_num(&self) -> i64 {
        self.row_num
    }

    fn scope(&self, ctx: &Context, scope: &str, id: &str) -> Option<Result<Value>> {
        let handler = self.query.scopes.get(&(scope.to_string(), id.to_string()))?;
        let bucket = match (scope, self.leaf.term) {
            ("terms", Some(term)) => term,
            _ => self.root,
        };
        Some(handler.handle(ctx, Window::single(bucket)))
    }
}

fn bucket_list<'a>(agg: Option<&'a Json>) -> &'a [Json] {
    agg.and_then(|a| a.get("buckets"))
        .and_then(Json::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn range_label(bucket: &Json) -> String {
    let bound = |k: &str| bucket.get(k).map(|v| Value::from_json(v).to_string()).unwrap_or_default();
    format!("{}-{}", bound("from"), bound("to"))
}

fn hits_total(resp: &Json) -> Option<i64> {
    let total = resp.pointer("/hits/total")?;
    total.as_i64().or_else(|| total.get("value").and_then(Json::as_i64))
}

fn wildcard_flag(key: &str, time_key: &str) -> ColumnFlag {
    if key == time_key {
        ColumnFlag::TIMESTAMP
    } else if key == NAME_KEY {
        ColumnFlag::NAME
    } else if key.starts_with(TAGS_PREFIX) {
        ColumnFlag::TAG
    } else if key.starts_with(FIELDS_PREFIX) {
        ColumnFlag::FIELD
    } else {
        ColumnFlag::NONE
    }
}

impl EsQuery {
    pub(crate) fn decode(&self, resp: &Json) -> Result<Data> {
        let raw = self.page.is_some();
        let empty = Json::Null;
        let root = resp.get("aggregations").unwrap_or(&empty);
        let leaves = if self.flag.is_empty() {
            vec![Leaf::new(&empty, None)]
        } else if raw {
            resp.pointer("/hits/hits")
                .and_then(Json::as_array)
                .into_iter()
                .flatten()
                .map(|hit| Leaf::new(hit, None))
                .collect()
        } else {
            self.leaves(root)
        };

        // wildcard columns are the union of every row's flattened document
        let mut flats: Vec<BTreeMap<String, Json>> = Vec::new();
        let mut wildcard_keys = BTreeSet::new();
        if self.flag.contains(QueryFlag::ALL_COLUMNS) {
            for leaf in &leaves {
                let mut flat = BTreeMap::new();
                if let Some(source) = leaf.source(raw) {
                    flatten_source(source, "", &mut flat);
                }
                wildcard_keys.extend(flat.keys().cloned());
                flats.push(flat);
            }
        }

        let mut columns = Vec::with_capacity(self.columns.len() + wildcard_keys.len());
        for handler in &self.columns {
            if handler.is_wildcard() {
                columns.extend(
                    wildcard_keys
                        .iter()
                        .map(|k| Column::new(k.clone(), k.clone(), wildcard_flag(k, self.ctx.time_key()))),
                );
            } else {
                columns.push(handler.column.clone());
            }
        }

        let resolver = EsKeyResolver::new(self.ctx.time_key());
        let mut rows = Vec::with_capacity(leaves.len());
        for (i, leaf) in leaves.iter().enumerate() {
            let env = BucketRow {
                query: self,
                resolver: resolver.clone(),
                root,
                leaf,
                raw,
                row_num: i as i64 + 1,
            };
            let mut row = Vec::with_capacity(columns.len());
            for handler in &self.columns {
                if handler.is_wildcard() {
                    let flat = flats.get(i);
                    row.extend(
                        wildcard_keys
                            .iter()
                            .map(|k| flat.and_then(|f| f.get(k)).cloned().unwrap_or(Json::Null)),
                    );
                } else {
                    row.push(handler.eval(&self.ctx, &env)?);
                }
            }
            rows.push(row);
        }

        Ok(Data {
            total: hits_total(resp).unwrap_or(rows.len() as i64),
            interval: self.ctx.interval(),
            columns,
            rows,
        })
    }

    /// Flattens the bucket tree into output rows, skipping the leading
    /// `offset` terms buckets.
    fn leaves<'a>(&self, root: &'a Json) -> Vec<Leaf<'a>> {
        let mut leaves = Vec::new();
        if self.flag.is_empty() || root.is_null() {
            return leaves;
        }
        if !self.dimension_keys.is_empty() {
            for term in bucket_list(root.get(TERMS_AGG)).iter().skip(self.offset) {
                self.bucket_leaves(term, Some(term), &mut leaves);
            }
        } else if self.flag.intersects(QueryFlag::GROUP_BY_TIME | QueryFlag::GROUP_BY_RANGE) {
            self.bucket_leaves(root, None, &mut leaves);
        } else {
            leaves.push(Leaf::new(root, None));
        }
        leaves
    }

    fn bucket_leaves<'a>(&self, parent: &'a Json, term: Option<&'a Json>, out: &mut Vec<Leaf<'a>>) {
        if self.flag.contains(QueryFlag::GROUP_BY_TIME) {
            for w in windows(bucket_list(parent.get(HISTOGRAM_AGG))) {
                let time = w.current.get("key").and_then(Json::as_f64).map(|k| k as i64);
                out.push(Leaf {
                    bucket: w.current,
                    next: w.next,
                    term,
                    time,
                    range: None,
                });
            }
        } else if self.flag.contains(QueryFlag::GROUP_BY_RANGE) {
            for bucket in bucket_list(parent.get(RANGE_AGG)) {
                out.push(Leaf {
                    range: Some(range_label(bucket)),
                    ..Leaf::new(bucket, term)
                });
            }
        } else {
            out.push(Leaf::new(parent, term));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsql::ast::{SelectStatement, Statement};
    use crate::tsql::elasticsearch::planner::EsPlanner;
    use crate::tsql::grammar::parse_statements;
    use crate::tsql::query::{Query, Response};
    use crate::tsql::timeunit::{TimeUnit, MINUTE};
    use serde_json::json;
    use std::collections::HashMap;

    fn select(sql: &str) -> SelectStatement {
        match parse_statements(sql, &HashMap::new()).unwrap().remove(0) {
            Statement::Select(stmt) => *stmt,
            other => panic!("not a select: {other:?}"),
        }
    }

    fn decode(ctx: Context, sql: &str, resp: Json) -> Data {
        let q = EsPlanner::new(ctx, &[]).plan(&select(sql)).unwrap();
        q.parse_result(Response::Elasticsearch(&resp)).unwrap()
    }

    fn id(q: &EsQuery, src: &str) -> String {
        let crate::tsql::ast::Expr::Call(call) = crate::tsql::grammar::parse_expr(src, &HashMap::new()).unwrap()
        else {
            panic!("not a call");
        };
        q.context().lookup_func_id(&call)
    }

    #[test]
    fn raw_hits_read_sources() {
        let resp = json!({
            "hits": {
                "total": { "value": 7 },
                "hits": [
                    { "_source": { "tags": { "host": "a" }, "fields": { "cpu": 1.5 } } },
                    { "_source": { "tags.host": "b" } }
                ]
            }
        });
        let data = decode(Context::new(0, 0), "SELECT host::tag, cpu, row_num() FROM cpu", resp);
        assert_eq!(data.total, 7);
        assert_eq!(data.columns.len(), 3);
        assert_eq!(data.rows[0], vec![json!("a"), json!(1.5), json!(1)]);
        assert_eq!(data.rows[1], vec![json!("b"), Json::Null, json!(2)]);
    }

    #[test]
    fn literal_overflow_does_not_abort_decode() {
        let resp = json!({ "hits": { "total": 1, "hits": [{ "_source": {} }] } });
        let data = decode(Context::new(0, 0), "SELECT min_int64() / -1, min_int64() % -1 FROM cpu", resp);
        assert_eq!(data.rows[0], vec![json!(i64::MIN), json!(0)]);
    }

    #[test]
    fn wildcard_unions_flattened_sources() {
        let resp = json!({
            "hits": {
                "total": 2,
                "hits": [
                    { "_source": { "name": "cpu", "timestamp": 1, "tags": { "host": "a" } } },
                    { "_source": { "name": "cpu", "timestamp": 2, "fields": { "idle": 3 } } }
                ]
            }
        });
        let data = decode(Context::new(0, 0), "SELECT * FROM cpu", resp);
        let names: Vec<&str> = data.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["fields.idle", "name", "tags.host", "timestamp"]);
        assert_eq!(data.columns[3].flag, ColumnFlag::TIMESTAMP);
        assert_eq!(data.rows[0], vec![Json::Null, json!("cpu"), json!("a"), json!(1)]);
        assert_eq!(data.rows[1], vec![json!(3), json!("cpu"), Json::Null, json!(2)]);
    }

    #[test]
    fn single_row_of_aggregates() {
        let q = EsPlanner::new(Context::new(0, 0), &[])
            .plan(&select("SELECT max(cpu), count(cpu) * 2 FROM cpu"))
            .unwrap();
        let resp = json!({
            "hits": { "total": 10, "hits": [] },
            "aggregations": {
                id(&q, "max(cpu)"): { "value": 9.5 },
                id(&q, "count(cpu)"): { "value": null }
            }
        });
        let data = q.parse_result(Response::Elasticsearch(&resp)).unwrap();
        assert_eq!(data.rows, vec![vec![json!(9.5), json!(0.0)]]);
    }

    #[test]
    fn missing_aggregation_is_an_error() {
        let q = EsPlanner::new(Context::new(0, 0), &[])
            .plan(&select("SELECT max(cpu) FROM cpu"))
            .unwrap();
        let resp = json!({ "aggregations": { "other": {} } });
        let err = q.parse_result(Response::Elasticsearch(&resp)).unwrap_err();
        assert!(err.to_string().contains("invalid max Aggregation"));
    }

    #[test]
    fn terms_with_histogram_rows() {
        let mut ctx = Context::new(0, 2 * MINUTE);
        ctx.set_target_time_unit(TimeUnit::Millisecond);
        let q = EsPlanner::new(ctx, &[])
            .plan(&select("SELECT host, diff(cpu) FROM cpu GROUP BY host, time(1m) LIMIT 1 OFFSET 1"))
            .unwrap();
        let diff = id(&q, "diff(cpu)");
        let resp = json!({
            "hits": { "total": 4 },
            "aggregations": {
                "term": { "buckets": [
                    { "key": "skipped", "histogram": { "buckets": [] } },
                    { "key": "b", "histogram": { "buckets": [
                        { "key": 0, diff.as_str(): { "value": 10.0 } },
                        { "key": MINUTE, diff.as_str(): { "value": 25.0 } }
                    ] } }
                ] }
            }
        });
        let data = q.parse_result(Response::Elasticsearch(&resp)).unwrap();
        assert_eq!(data.interval, 60_000);
        assert_eq!(data.columns[0].name, "time");
        assert_eq!(
            data.rows,
            vec![
                vec![json!(0), json!("b"), json!(15.0)],
                vec![json!(60_000), json!("b"), json!(0.0)],
            ]
        );
    }

    #[test]
    fn range_rows_are_labelled() {
        let q = EsPlanner::new(Context::new(0, 0), &[])
            .plan(&select("SELECT range(), count(cpu) FROM cpu GROUP BY range(cpu, 0, 10)"))
            .unwrap();
        let count = id(&q, "count(cpu)");
        let resp = json!({
            "aggregations": { "range": { "buckets": [
                { "from": 0.0, "to": 10.0, count.as_str(): { "value": 4 } }
            ] } }
        });
        let data = q.parse_result(Response::Elasticsearch(&resp)).unwrap();
        assert_eq!(data.columns[0].flag, ColumnFlag::GROUP_BY | ColumnFlag::GROUP_BY_RANGE);
        assert_eq!(data.rows, vec![vec![json!("0-10"), json!("0-10"), json!(4.0)]]);
        assert_eq!(data.total, 1);
    }

    #[test]
    fn scope_reads_enclosing_bucket() {
        let q = EsPlanner::new(Context::new(0, 0), &[])
            .plan(&select(
                "SELECT host, max(cpu) / scope(max(cpu), 'global') FROM cpu GROUP BY host",
            ))
            .unwrap();
        let max = id(&q, "max(cpu)");
        let resp = json!({
            "aggregations": {
                max.as_str(): { "value": 8.0 },
                "term": { "buckets": [
                    { "key": "a", max.as_str(): { "value": 2.0 } }
                ] }
            }
        });
        let data = q.parse_result(Response::Elasticsearch(&resp)).unwrap();
        assert_eq!(data.rows, vec![vec![json!("a"), json!(0.25)]]);
    }

    #[test]
    fn constants_decode_without_response() {
        let data = decode(Context::new(0, 0), "SELECT 1 + 2, 'x' FROM cpu", Json::Null);
        assert_eq!(data.rows, vec![vec![json!(3), json!("x")]]);
    }
}
