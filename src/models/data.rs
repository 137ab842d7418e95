use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Row limit applied when a statement does not carry its own LIMIT.
pub const DEFAULT_LIMIT_SIZE: i64 = 100;

bitflags! {
    /// Provenance and role of an output column.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ColumnFlag: u32 {
        const HIDE = 1 << 0;
        const NAME = 1 << 1;
        const TIMESTAMP = 1 << 2;
        const TAG = 1 << 3;
        const FIELD = 1 << 4;
        const LITERAL = 1 << 5;
        const FUNC = 1 << 6;
        const AGG = 1 << 7;
        const GROUP_BY = 1 << 8;
        const GROUP_BY_INTERVAL = 1 << 9;
        const GROUP_BY_RANGE = 1 << 10;
        const ORDER_BY = 1 << 11;
    }
}

impl ColumnFlag {
    /// The empty flag set.
    pub const NONE: ColumnFlag = ColumnFlag::empty();
}

/// One output column. `key` is the backend key the value is read from, `name` the
/// display name (alias when one was given).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub key: String,
    pub flag: ColumnFlag,
}

impl Column {
    pub fn new(name: impl Into<String>, key: impl Into<String>, flag: ColumnFlag) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            flag,
        }
    }
}

/// Backend-agnostic query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Data {
    pub total: i64,
    pub interval: i64,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl Data {
    /// Index of the first column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// All values of the column named `name`, in row order.
    pub fn column_values(&self, name: &str) -> Vec<&serde_json::Value> {
        match self.column_index(name) {
            Some(idx) => self.rows.iter().filter_map(|row| row.get(idx)).collect(),
            None => Vec::new(),
        }
    }
}
