use std::fmt;

use crate::error::Result;
use crate::models::{Data, Kind, Source};
use crate::tsql::context::Context;

/// A decoded ClickHouse row: column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Pull-based row source handed over by the storage layer.
pub trait RowCursor {
    fn next_row(&mut self) -> Result<Option<Row>>;
}

impl<I> RowCursor for I
where
    I: Iterator<Item = Result<Row>>,
{
    fn next_row(&mut self) -> Result<Option<Row>> {
        self.next().transpose()
    }
}

/// The executable plan produced for one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchSource {
    /// Search request body. `None` when the statement needs no round trip,
    /// e.g. a select of constants only.
    Elasticsearch(Option<serde_json::Value>),
    Clickhouse(String),
}

impl fmt::Display for SearchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchSource::Elasticsearch(Some(body)) => write!(f, "{body}"),
            SearchSource::Elasticsearch(None) => Ok(()),
            SearchSource::Clickhouse(sql) => f.write_str(sql),
        }
    }
}

/// Raw backend response handed back for decoding.
pub enum Response<'a> {
    Elasticsearch(&'a serde_json::Value),
    Clickhouse(&'a mut dyn RowCursor),
}

impl Response<'_> {
    pub fn kind(&self) -> Kind {
        match self {
            Response::Elasticsearch(_) => Kind::Elasticsearch,
            Response::Clickhouse(_) => Kind::Clickhouse,
        }
    }
}

/// A compiled statement, ready to be executed by the storage layer and to
/// decode what comes back.
pub trait Query: Send + Sync {
    fn sources(&self) -> &[Source];

    fn search_source(&self) -> SearchSource;

    /// Tail clauses the storage layer appends to the search source. Only
    /// ClickHouse bucketed queries produce one (`WITH FILL`).
    fn sub_search_source(&self) -> Option<String> {
        None
    }

    /// ANDs an equality filter into the query.
    fn append_bool_filter(&mut self, key: &str, value: serde_json::Value);

    fn parse_result(&self, resp: Response<'_>) -> Result<Data>;

    fn context(&self) -> &Context;

    fn debug(&self) -> bool;

    /// Query range in unix nanoseconds.
    fn timestamp(&self) -> (i64, i64) {
        let ctx = self.context();
        (ctx.start(), ctx.end())
    }

    fn kind(&self) -> Kind;
}
