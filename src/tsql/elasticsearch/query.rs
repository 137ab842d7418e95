use std::collections::{BTreeMap, HashMap};

use bitflags::bitflags;
use serde_json::{json, Map, Value as Json};

use crate::error::{Result, TsqlError};
use crate::models::{Data, Kind, Source};
use crate::tsql::context::Context;
use crate::tsql::elasticsearch::dsl::{aggregations_json, term, Aggregation, BoolQuery};
use crate::tsql::elasticsearch::functions::EsAggHandler;
use crate::tsql::eval::ColumnHandler;
use crate::tsql::query::{Query, Response, SearchSource};

bitflags! {
    /// Shape of a compiled statement; decides how results are shaped.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct QueryFlag: u32 {
        const DIMENSIONS = 1 << 0;
        const GROUP_BY_TIME = 1 << 1;
        const GROUP_BY_RANGE = 1 << 2;
        const AGGS = 1 << 3;
        const COLUMNS = 1 << 4;
        const ALL_COLUMNS = 1 << 5;
    }
}

/// From/size/sort of a raw-hits search.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub from: i64,
    pub size: i64,
    pub sort: Vec<Json>,
}

/// A statement compiled into an Elasticsearch search request.
pub struct EsQuery {
    pub(crate) sources: Vec<Source>,
    pub(crate) query: BoolQuery,
    pub(crate) aggs: BTreeMap<String, Aggregation>,
    pub(crate) page: Option<Page>,
    pub(crate) flag: QueryFlag,
    pub(crate) columns: Vec<ColumnHandler>,
    pub(crate) handlers: HashMap<String, EsAggHandler>,
    pub(crate) scopes: HashMap<(String, String), EsAggHandler>,
    /// Keys of the terms dimensions, in the order they are joined into the
    /// bucket key.
    pub(crate) dimension_keys: Vec<String>,
    pub(crate) offset: usize,
    pub(crate) ctx: Context,
    pub(crate) debug: bool,
}

impl EsQuery {
    pub fn flag(&self) -> QueryFlag {
        self.flag
    }

    pub fn bool_query(&self) -> &BoolQuery {
        &self.query
    }

    /// The request body, or `None` when nothing needs to be fetched.
    pub fn body(&self) -> Option<Json> {
        if self.flag.is_empty() {
            return None;
        }
        let mut body = Map::new();
        body.insert("query".into(), self.query.to_json());
        match &self.page {
            Some(page) => {
                body.insert("from".into(), json!(page.from));
                body.insert("size".into(), json!(page.size));
                body.insert("sort".into(), Json::Array(page.sort.clone()));
            }
            None => {
                body.insert("size".into(), json!(0));
            }
        }
        if !self.aggs.is_empty() {
            body.insert("aggs".into(), aggregations_json(&self.aggs));
        }
        Some(Json::Object(body))
    }
}

impl Query for EsQuery {
    fn sources(&self) -> &[Source] {
        &self.sources
    }

    fn search_source(&self) -> SearchSource {
        SearchSource::Elasticsearch(self.body())
    }

    fn append_bool_filter(&mut self, key: &str, value: Json) {
        self.query.filter(term(key, value));
    }

    fn parse_result(&self, resp: Response<'_>) -> Result<Data> {
        match resp {
            Response::Elasticsearch(body) => self.decode(body),
            other => Err(TsqlError::decode(format!(
                "elasticsearch query got a {} response",
                other.kind()
            ))),
        }
    }

    fn context(&self) -> &Context {
        &self.ctx
    }

    fn debug(&self) -> bool {
        self.debug
    }

    fn kind(&self) -> Kind {
        Kind::Elasticsearch
    }
}
