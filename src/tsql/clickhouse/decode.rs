//! Reads ClickHouse result rows back into tabular [`Data`].

use std::io::Read;

use chrono::{NaiveDateTime, TimeZone, Utc};
use serde_json::de::IoRead;
use serde_json::{StreamDeserializer, Value as Json};

use crate::error::{Result, TsqlError};
use crate::models::{Column, ColumnFlag, Data};
use crate::tsql::ast::{Call, VarRef};
use crate::tsql::clickhouse::functions::ck_agg_functions;
use crate::tsql::clickhouse::query::{CkBucket, CkQuery};
use crate::tsql::context::Context;
use crate::tsql::eval::{AggHandler, RowEnv};
use crate::tsql::query::{Row, RowCursor};
use crate::tsql::resolver::CK_NAME_COLUMN;
use crate::tsql::timeunit::{convert_timestamp, TimeUnit, SECOND};
use crate::tsql::value::Value;
use crate::tsql::window::{Lookahead, Window};

/// Rows of a `FORMAT JSONEachRow` body, one JSON object per line.
pub struct JsonEachRow<R: Read> {
    inner: StreamDeserializer<'static, IoRead<R>, Row>,
}

impl<R: Read> JsonEachRow<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: serde_json::Deserializer::from_reader(reader).into_iter(),
        }
    }
}

impl<R: Read> Iterator for JsonEachRow<R> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|row| row.map_err(|e| TsqlError::decode(format!("invalid clickhouse row: {e}"))))
    }
}

const BUCKET_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Bucket start in unix seconds. ClickHouse renders DateTime as text;
/// numbers are taken as seconds already.
fn bucket_seconds(v: &Json) -> Option<i64> {
    match v {
        Json::String(s) => {
            let naive = NaiveDateTime::parse_from_str(s, BUCKET_TIME_FORMAT).ok()?;
            Some(Utc.from_utc_datetime(&naive).timestamp())
        }
        other => other.as_i64(),
    }
}

struct CkRow<'q, 'a> {
    query: &'q CkQuery,
    current: &'a Row,
    next: Option<&'a Row>,
    row_num: i64,
}

impl RowEnv for CkRow<'_, '_> {
    fn aggregate(&self, ctx: &Context, call: &Call) -> Option<Result<Value>> {
        if !ck_agg_functions().contains(&call.name) {
            return None;
        }
        let id = ctx.lookup_func_id(call);
        let handler = self.query.handlers.get(&id)?;
        Some(handler.handle(ctx, Window::new(self.current, self.next)))
    }

    fn column(&self, _ctx: &Context, r: &VarRef) -> Value {
        let name = match self.query.alias_of(r) {
            Some(alias) => alias,
            None if self.query.wildcard => r.name.as_str(),
            None => return Value::Null,
        };
        self.current.get(name).map(Value::from_json).unwrap_or_default()
    }

    fn time_bucket(&self) -> Option<i64> {
        let Some(CkBucket::Time { column }) = &self.query.bucket else {
            return None;
        };
        let seconds = bucket_seconds(self.current.get(column)?)?;
        Some(convert_timestamp(
            seconds.saturating_mul(SECOND),
            TimeUnit::Nanosecond,
            self.query.ctx.original_time_unit(),
        ))
    }

    fn range_bucket(&self) -> Option<String> {
        let Some(CkBucket::Range { column, step }) = &self.query.bucket else {
            return None;
        };
        let from = Value::from_json(self.current.get(column)?).as_f64()?;
        Some(format!("{}-{}", Value::Float(from), Value::Float(from + step)))
    }

    fn row_num(&self) -> i64 {
        self.row_num
    }
}

impl CkQuery {
    /// Whether a result column is one of ours rather than a stored column.
    fn is_internal(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
            || self.aliases.values().any(|a| a == key)
            || self.bucket.as_ref().is_some_and(|b| b.column() == key)
    }

    fn wildcard_flag(&self, key: &str) -> ColumnFlag {
        if key == self.resolver.time_key() {
            ColumnFlag::TIMESTAMP
        } else if key == CK_NAME_COLUMN {
            ColumnFlag::NAME
        } else {
            ColumnFlag::NONE
        }
    }

    pub(crate) fn decode(&self, cursor: &mut dyn RowCursor) -> Result<Data> {
        let mut rows_iter = Lookahead::new(std::iter::from_fn(|| cursor.next_row().transpose()));
        let mut wildcard_keys: Option<Vec<String>> = None;
        let mut rows = Vec::new();

        while let Some((current, next)) = rows_iter.advance() {
            let current = current?;
            let next = next.and_then(|n| n.as_ref().ok());
            // stored columns come from the first row, in result order
            let keys = wildcard_keys.get_or_insert_with(|| {
                if !self.wildcard {
                    return Vec::new();
                }
                current.keys().filter(|k| !self.is_internal(k)).cloned().collect()
            });

            let env = CkRow {
                query: self,
                current: &current,
                next,
                row_num: rows.len() as i64 + 1,
            };
            let mut row = Vec::with_capacity(self.columns.len() + keys.len());
            for handler in &self.columns {
                if handler.is_wildcard() {
                    row.extend(keys.iter().map(|k| current.get(k).cloned().unwrap_or(Json::Null)));
                } else {
                    row.push(handler.eval(&self.ctx, &env)?);
                }
            }
            rows.push(row);
        }

        let keys = wildcard_keys.unwrap_or_default();
        let mut columns = Vec::with_capacity(self.columns.len() + keys.len());
        for handler in &self.columns {
            if handler.is_wildcard() {
                columns.extend(keys.iter().map(|k| Column::new(k.clone(), k.clone(), self.wildcard_flag(k))));
            } else {
                columns.push(handler.column.clone());
            }
        }
        tracing::trace!(rows = rows.len(), columns = columns.len(), "decoded clickhouse result");

        Ok(Data {
            total: rows.len() as i64,
            interval: self.ctx.interval(),
            columns,
            rows,
        })
    }
}
