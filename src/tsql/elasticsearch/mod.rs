//! Elasticsearch backend: query DSL, aggregate functions, planning and
//! response decoding.

pub mod decode;
pub mod dsl;
pub mod functions;
pub mod planner;
pub mod query;

pub use functions::{es_agg_functions, EsAggHandler};
pub use planner::EsPlanner;
pub use query::{EsQuery, QueryFlag};
