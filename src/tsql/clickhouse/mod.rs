//! ClickHouse backend: SELECT building, aggregate functions, planning and
//! row decoding.

pub mod decode;
pub mod functions;
pub mod planner;
pub mod query;
pub mod sql;

pub use decode::JsonEachRow;
pub use functions::{ck_agg_functions, CkAggHandler};
pub use planner::CkPlanner;
pub use query::{CkBucket, CkQuery};
