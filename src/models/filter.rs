use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A flat predicate supplied next to the statement's own WHERE clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub key: String,
    #[serde(rename = "op", default)]
    pub operator: String,
    pub value: serde_json::Value,
}

impl Filter {
    pub fn new(key: impl Into<String>, operator: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            operator: operator.into(),
            value,
        }
    }

    pub fn op(&self) -> Result<FilterOp, String> {
        self.operator.parse()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Match,
    NotMatch,
    OrEq,
    OrIn,
}

impl FilterOp {
    /// Whether the filter joins the OR group instead of the AND chain.
    pub fn is_or(self) -> bool {
        matches!(self, FilterOp::OrEq | FilterOp::OrIn)
    }

    /// SQL comparison operator for the plain comparison variants.
    pub fn sql_operator(self) -> Option<&'static str> {
        match self {
            FilterOp::Eq | FilterOp::OrEq => Some("="),
            FilterOp::Neq => Some("!="),
            FilterOp::Gt => Some(">"),
            FilterOp::Gte => Some(">="),
            FilterOp::Lt => Some("<"),
            FilterOp::Lte => Some("<="),
            _ => None,
        }
    }
}

impl FromStr for FilterOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "eq" | "=" => Ok(FilterOp::Eq),
            "neq" | "!=" => Ok(FilterOp::Neq),
            "gt" | ">" => Ok(FilterOp::Gt),
            "gte" | ">=" => Ok(FilterOp::Gte),
            "lt" | "<" => Ok(FilterOp::Lt),
            "lte" | "<=" => Ok(FilterOp::Lte),
            "in" => Ok(FilterOp::In),
            "match" => Ok(FilterOp::Match),
            "nmatch" => Ok(FilterOp::NotMatch),
            "or_eq" => Ok(FilterOp::OrEq),
            "or_in" => Ok(FilterOp::OrIn),
            other => Err(format!("not support filter operator '{other}'")),
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::Match => "match",
            FilterOp::NotMatch => "nmatch",
            FilterOp::OrEq => "or_eq",
            FilterOp::OrIn => "or_in",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_symbolic_and_named_operators() {
        assert_eq!("=".parse::<FilterOp>().unwrap(), FilterOp::Eq);
        assert_eq!("".parse::<FilterOp>().unwrap(), FilterOp::Eq);
        assert_eq!("nmatch".parse::<FilterOp>().unwrap(), FilterOp::NotMatch);
        assert_eq!(">=".parse::<FilterOp>().unwrap(), FilterOp::Gte);
        assert!("like".parse::<FilterOp>().is_err());
    }

    #[test]
    fn deserialize_filter() {
        let f: Filter = serde_json::from_value(json!({"key": "tags.host", "op": "in", "value": ["a", "b"]})).unwrap();
        assert_eq!(f.op().unwrap(), FilterOp::In);
        assert_eq!(f.value, json!(["a", "b"]));
        assert!(FilterOp::OrIn.is_or());
        assert_eq!(FilterOp::Lte.sql_operator(), Some("<="));
    }
}
