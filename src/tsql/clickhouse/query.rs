use std::collections::HashMap;

use serde_json::Value as Json;

use crate::error::{Result, TsqlError};
use crate::models::{Data, Kind, Source};
use crate::tsql::ast::{DataType, VarRef};
use crate::tsql::clickhouse::functions::CkAggHandler;
use crate::tsql::clickhouse::sql::{format_text, Cond, SelectBuilder};
use crate::tsql::context::Context;
use crate::tsql::eval::ColumnHandler;
use crate::tsql::query::{Query, Response, SearchSource};
use crate::tsql::resolver::{CkKeyResolver, KeyResolver};

/// The synthetic bucket column a grouped statement selects.
#[derive(Debug, Clone, PartialEq)]
pub enum CkBucket {
    Time { column: String },
    Range { column: String, step: f64 },
}

impl CkBucket {
    pub fn column(&self) -> &str {
        match self {
            CkBucket::Time { column } | CkBucket::Range { column, .. } => column,
        }
    }
}

/// A statement compiled into one ClickHouse SELECT.
pub struct CkQuery {
    pub(crate) sources: Vec<Source>,
    pub(crate) builder: SelectBuilder,
    pub(crate) resolver: CkKeyResolver,
    pub(crate) columns: Vec<ColumnHandler>,
    pub(crate) handlers: HashMap<String, CkAggHandler>,
    /// SQL key of each selected plain column to its alias.
    pub(crate) aliases: HashMap<String, String>,
    pub(crate) bucket: Option<CkBucket>,
    pub(crate) wildcard: bool,
    pub(crate) ctx: Context,
    pub(crate) debug: bool,
}

impl CkQuery {
    pub fn sql(&self) -> String {
        self.builder.to_sql()
    }

    /// The result column a reference is read from.
    pub(crate) fn alias_of(&self, r: &VarRef) -> Option<&str> {
        [DataType::AnyField, DataType::Tag]
            .into_iter()
            .find_map(|deftyp| self.aliases.get(&self.resolver.resolve(r, deftyp).0))
            .map(String::as_str)
    }
}

impl Query for CkQuery {
    fn sources(&self) -> &[Source] {
        &self.sources
    }

    fn search_source(&self) -> SearchSource {
        SearchSource::Clickhouse(self.sql())
    }

    fn sub_search_source(&self) -> Option<String> {
        self.builder.fill_clause()
    }

    fn append_bool_filter(&mut self, key: &str, value: Json) {
        let key = self.resolver.resolve_filter_key(key);
        self.builder
            .and_where(Cond::Expr(format!("({key} = {})", format_text(&value))));
    }

    fn parse_result(&self, resp: Response<'_>) -> Result<Data> {
        match resp {
            Response::Clickhouse(cursor) => self.decode(cursor),
            other => Err(TsqlError::decode(format!(
                "clickhouse query got a {} response",
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
        Kind::Clickhouse
    }
}
