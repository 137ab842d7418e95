pub mod data;
pub mod filter;
pub mod meta;
pub mod source;

pub use data::{Column, ColumnFlag, Data, DEFAULT_LIMIT_SIZE};
pub use filter::{Filter, FilterOp};
pub use meta::{MetaProvider, MetricMeta, StaticMeta};
pub use source::{Kind, Source};
