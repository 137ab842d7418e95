pub mod config;
pub mod error;
pub mod models;
pub mod tsql;

pub use config::TsqlConfig;
pub use error::{Result, TsqlError};
pub use models::{Column, ColumnFlag, Data, Filter, Kind, Source};
pub use tsql::{Parser, Query, Response, SearchSource};
