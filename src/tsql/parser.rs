//! Entry point: holds one statement text with its settings, parses it and
//! compiles every statement for the requested backend.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::config::TsqlConfig;
use crate::error::{Result, TsqlError};
use crate::models::{Filter, Kind, MetaProvider, DEFAULT_LIMIT_SIZE};
use crate::tsql::ast::{SelectStatement, Statement};
use crate::tsql::clickhouse::CkPlanner;
use crate::tsql::context::{Context, DEFAULT_MAX_TIME_POINTS};
use crate::tsql::elasticsearch::EsPlanner;
use crate::tsql::grammar::parse_statements;
use crate::tsql::planner::from_sources;
use crate::tsql::query::Query;
use crate::tsql::resolver::TIMESTAMP_KEY;
use crate::tsql::timeunit::TimeUnit;

pub struct Parser {
    start: i64,
    end: i64,
    stmt: String,
    params: HashMap<String, Json>,
    filters: Vec<Filter>,
    original_time_unit: TimeUnit,
    target_time_unit: TimeUnit,
    time_key: String,
    max_time_points: i64,
    default_limit: i64,
    table: Option<String>,
    org_name: String,
    terminus_key: String,
    meta: Option<Arc<dyn MetaProvider>>,
    debug: bool,
    statements: Option<Vec<Statement>>,
}

impl Parser {
    /// `start` and `end` are unix nanoseconds.
    pub fn new(start: i64, end: i64, stmt: impl Into<String>) -> Self {
        Self {
            start,
            end,
            stmt: stmt.into(),
            params: HashMap::new(),
            filters: Vec::new(),
            original_time_unit: TimeUnit::Nanosecond,
            target_time_unit: TimeUnit::Unset,
            time_key: TIMESTAMP_KEY.to_string(),
            max_time_points: DEFAULT_MAX_TIME_POINTS,
            default_limit: DEFAULT_LIMIT_SIZE,
            table: None,
            org_name: String::new(),
            terminus_key: String::new(),
            meta: None,
            debug: false,
            statements: None,
        }
    }

    pub fn with_config(cfg: &TsqlConfig, start: i64, end: i64, stmt: impl Into<String>) -> Result<Self> {
        let unit = |s: &str| s.parse::<TimeUnit>().map_err(TsqlError::Parse);
        let planner = &cfg.planner;
        let mut parser = Self::new(start, end, stmt);
        parser
            .set_original_time_unit(unit(&planner.original_time_unit)?)
            .set_target_time_unit(unit(&planner.target_time_unit)?)
            .set_time_key(planner.time_key.clone())
            .set_max_time_points(planner.max_time_points)
            .set_debug(planner.debug);
        parser.default_limit = planner.default_limit;
        parser.table = cfg.clickhouse.table.clone();
        Ok(parser)
    }

    pub fn set_params(&mut self, params: HashMap<String, Json>) -> &mut Self {
        self.params = params;
        self
    }

    pub fn set_filter(&mut self, filters: Vec<Filter>) -> &mut Self {
        self.filters = filters;
        self
    }

    pub fn set_original_time_unit(&mut self, unit: TimeUnit) -> &mut Self {
        self.original_time_unit = unit;
        self
    }

    pub fn set_target_time_unit(&mut self, unit: TimeUnit) -> &mut Self {
        self.target_time_unit = unit;
        self
    }

    pub fn set_time_key(&mut self, key: impl Into<String>) -> &mut Self {
        let key = key.into();
        if !key.is_empty() {
            self.time_key = key;
        }
        self
    }

    pub fn set_max_time_points(&mut self, points: i64) -> &mut Self {
        self.max_time_points = points;
        self
    }

    pub fn set_org_name(&mut self, org: impl Into<String>) -> &mut Self {
        self.org_name = org.into();
        self
    }

    pub fn set_terminus_key(&mut self, key: impl Into<String>) -> &mut Self {
        self.terminus_key = key.into();
        self
    }

    pub fn set_meta(&mut self, meta: Arc<dyn MetaProvider>) -> &mut Self {
        self.meta = Some(meta);
        self
    }

    pub fn set_debug(&mut self, debug: bool) -> &mut Self {
        self.debug = debug;
        self
    }

    /// Parses the statement text with the bound parameters.
    pub fn build(&mut self) -> Result<()> {
        self.statements = Some(parse_statements(&self.stmt, &self.params)?);
        Ok(())
    }

    fn statements(&self) -> Result<&[Statement]> {
        self.statements.as_deref().ok_or(TsqlError::NotBuilt)
    }

    /// Measurement names of every statement, in order.
    pub fn metrics(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for stmt in self.statements()? {
            let Statement::Select(select) = stmt else {
                return Err(TsqlError::NotSupportNonQueryStatement);
            };
            names.extend(from_sources(&select.sources)?.into_iter().map(|s| s.name));
        }
        Ok(names)
    }

    /// Compiles every statement for `kind`. Each statement gets its own
    /// context.
    pub fn parse_query(&self, kind: Kind) -> Result<Vec<Box<dyn Query>>> {
        let statements = self.statements()?;
        let mut queries: Vec<Box<dyn Query>> = Vec::with_capacity(statements.len());
        for stmt in statements {
            let Statement::Select(select) = stmt else {
                return Err(TsqlError::NotSupportNonQueryStatement);
            };
            let mut query: Box<dyn Query> = match kind {
                Kind::Elasticsearch => Box::new(
                    EsPlanner::new(self.context(), &self.filters)
                        .with_default_limit(self.default_limit)
                        .with_debug(self.debug)
                        .plan(select)?,
                ),
                Kind::Clickhouse => Box::new(
                    CkPlanner::new(self.context(), &self.filters)
                        .with_default_limit(self.default_limit)
                        .with_table(self.table.clone())
                        .with_string_fields(self.string_fields(select)?)
                        .with_debug(self.debug)
                        .plan(select)?,
                ),
            };
            if !self.org_name.is_empty() {
                query.append_bool_filter("org_name", Json::String(self.org_name.clone()));
            }
            if !self.terminus_key.is_empty() {
                query.append_bool_filter("tags.terminus_key", Json::String(self.terminus_key.clone()));
            }
            if self.debug {
                tracing::debug!(kind = %kind, source = %query.search_source(), "compiled tsql statement");
            }
            queries.push(query);
        }
        Ok(queries)
    }

    fn context(&self) -> Context {
        let mut ctx = Context::new(self.start, self.end);
        ctx.set_original_time_unit(self.original_time_unit);
        ctx.set_target_time_unit(self.target_time_unit);
        ctx.set_time_key(self.time_key.clone());
        ctx.set_max_time_points(self.max_time_points);
        ctx
    }

    /// String-typed field names of the statement's metrics. A failing lookup
    /// only loses the string-field hint.
    fn string_fields(&self, select: &SelectStatement) -> Result<Vec<String>> {
        let Some(meta) = &self.meta else {
            return Ok(Vec::new());
        };
        let names: Vec<String> = from_sources(&select.sources)?.into_iter().map(|s| s.name).collect();
        match meta.metric_meta(&self.org_name, &self.terminus_key, &names) {
            Ok(metas) => Ok(metas.into_iter().flat_map(|m| m.string_keys).collect()),
            Err(err) => {
                tracing::warn!(metrics = ?names, "failed to load metric meta: {err}");
                Ok(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricMeta, StaticMeta};
    use crate::tsql::query::SearchSource;
    use serde_json::json;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn built(stmt: &str) -> Parser {
        let mut p = Parser::new(0, 0, stmt);
        p.build().unwrap();
        p
    }

    fn ck_sql(q: &dyn Query) -> String {
        match q.search_source() {
            SearchSource::Clickhouse(sql) => sql,
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn requires_build() {
        let p = Parser::new(0, 0, "select * from cpu");
        assert!(matches!(p.metrics(), Err(TsqlError::NotBuilt)));
        assert!(matches!(p.parse_query(Kind::Clickhouse), Err(TsqlError::NotBuilt)));
    }

    #[test]
    fn build_binds_params() {
        let mut p = Parser::new(0, 0, "select cpu from cpu where host = $host");
        assert!(p.build().is_err());
        p.set_params(HashMap::from([("host".to_string(), json!("a"))]));
        p.build().unwrap();
        let queries = p.parse_query(Kind::Clickhouse).unwrap();
        assert!(ck_sql(queries[0].as_ref()).contains("(tag_values[indexOf(tag_keys,'host')] = 'a')"));
    }

    #[test]
    fn metrics_lists_sources() {
        let p = built("select * from cpu, mem; select * from disk");
        assert_eq!(p.metrics().unwrap(), vec!["cpu", "mem", "disk"]);
        let p = built("show databases");
        assert!(matches!(p.metrics(), Err(TsqlError::NotSupportNonQueryStatement)));
        assert!(matches!(
            p.parse_query(Kind::Elasticsearch),
            Err(TsqlError::NotSupportNonQueryStatement)
        ));
    }

    #[test]
    fn one_query_per_statement() {
        init_tracing();
        let mut p = built("select max(cpu) from cpu; select * from mem");
        p.set_debug(true);
        let queries = p.parse_query(Kind::Elasticsearch).unwrap();
        assert_eq!(queries.len(), 2);
        assert!(queries.iter().all(|q| q.kind() == Kind::Elasticsearch && q.debug()));
        assert_eq!(queries[1].sources()[0].name, "mem");
    }

    #[test]
    fn compilation_is_deterministic() {
        let stmt = "SELECT host, avg(cpu), max(cpu) * 2 + 1, diffps(mem) FROM cpu \
                    WHERE host =~ /web.*/ AND cpu > $min \
                    GROUP BY host, time(1m) ORDER BY count(cpu) LIMIT 5 OFFSET 2";
        let compile = |kind: Kind| {
            let mut p = Parser::new(0, 6 * 3_600_000_000_000, stmt);
            p.set_params(HashMap::from([("min".to_string(), json!(0.5))]));
            p.set_org_name("erda");
            p.build().unwrap();
            p.parse_query(kind).unwrap().remove(0)
        };
        for kind in [Kind::Elasticsearch, Kind::Clickhouse] {
            let (a, b) = (compile(kind), compile(kind));
            assert_eq!(a.search_source(), b.search_source());
            assert_eq!(a.sub_search_source(), b.sub_search_source());
            let ids = |q: &dyn Query| {
                let mut ids: Vec<String> = q.context().func_ids().cloned().collect();
                ids.sort();
                ids
            };
            assert_eq!(ids(a.as_ref()), ids(b.as_ref()));
            assert!(!ids(a.as_ref()).is_empty());
        }
    }

    #[test]
    fn tenant_filters_apply_to_every_backend() {
        let mut p = built("select * from cpu");
        p.set_org_name("erda").set_terminus_key("tk");
        let queries = p.parse_query(Kind::Clickhouse).unwrap();
        assert_eq!(
            ck_sql(queries[0].as_ref()),
            "SELECT * FROM \"cpu\" WHERE (org_name = 'erda') AND (tag_values[indexOf(tag_keys,'terminus_key')] = 'tk') LIMIT 100"
        );
        let queries = p.parse_query(Kind::Elasticsearch).unwrap();
        let SearchSource::Elasticsearch(Some(body)) = queries[0].search_source() else {
            panic!("expected a request body");
        };
        let filters = body.pointer("/query/bool/filter").unwrap().to_string();
        assert!(filters.contains("\"org_name\":\"erda\""));
        assert!(filters.contains("\"tags.terminus_key\":\"tk\""));
    }

    #[test]
    fn meta_selects_string_fields() {
        let mut p = built("select status from http");
        p.set_meta(Arc::new(StaticMeta {
            metrics: vec![MetricMeta {
                name: "http".to_string(),
                string_keys: vec!["status".to_string()],
                ..MetricMeta::default()
            }],
        }));
        let queries = p.parse_query(Kind::Clickhouse).unwrap();
        assert!(ck_sql(queries[0].as_ref())
            .starts_with("SELECT string_field_values[indexOf(string_field_keys,'status')] AS \"status\""));
    }

    #[test]
    fn config_applies() {
        let cfg = TsqlConfig::from_toml(
            r#"
            [planner]
            default_limit = 7
            target_time_unit = "ms"

            [clickhouse]
            table = "metrics_all"
            "#,
        )
        .unwrap();
        let mut p = Parser::with_config(&cfg, 0, 0, "select * from cpu").unwrap();
        p.build().unwrap();
        let queries = p.parse_query(Kind::Clickhouse).unwrap();
        assert_eq!(ck_sql(queries[0].as_ref()), "SELECT * FROM metrics_all LIMIT 7");
        assert_eq!(queries[0].context().target_time_unit(), TimeUnit::Millisecond);

        let cfg = TsqlConfig::from_toml("[planner]\noriginal_time_unit = \"fortnight\"").unwrap();
        assert!(matches!(
            Parser::with_config(&cfg, 0, 0, "select * from cpu"),
            Err(TsqlError::Parse(_))
        ));
    }
}
