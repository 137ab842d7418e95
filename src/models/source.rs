use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A measurement named in FROM, with its optional database qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub database: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Elasticsearch,
    Clickhouse,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Elasticsearch => "elasticsearch",
            Kind::Clickhouse => "clickhouse",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "elasticsearch" | "es" => Ok(Kind::Elasticsearch),
            "clickhouse" | "ck" => Ok(Kind::Clickhouse),
            other => Err(format!("unknown query kind '{other}'")),
        }
    }
}
