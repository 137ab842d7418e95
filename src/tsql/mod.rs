//! The TSQL compiler: statement language, per-query context, expression
//! evaluation and the Elasticsearch/ClickHouse backends.

pub mod ast;
pub mod clickhouse;
pub mod context;
pub mod elasticsearch;
pub mod eval;
pub mod functions;
pub mod grammar;
pub mod interval;
pub mod lexer;
pub mod parser;
pub mod planner;
pub mod query;
pub mod resolver;
pub mod script;
pub mod timeunit;
pub mod value;
pub mod window;

pub use context::Context;
pub use parser::Parser;
pub use query::{Query, Response, Row, RowCursor, SearchSource};
pub use timeunit::TimeUnit;
pub use value::Value;
