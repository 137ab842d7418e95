use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, Mutex};

use regex::Regex;

use crate::error::{Result, TsqlError};
use crate::tsql::ast::{BinaryOp, Expr};

const REGEX_CACHE_SIZE: usize = 256;

static REGEX_CACHE: LazyLock<Mutex<HashMap<String, Regex>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

/// Compiles `pattern` once and hands out clones of the shared matcher.
fn cached_regex(pattern: &str) -> Result<Regex> {
    let mut cache = REGEX_CACHE.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(re) = cache.get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern).map_err(|e| TsqlError::eval(format!("invalid regex '{pattern}': {e}")))?;
    if cache.len() >= REGEX_CACHE_SIZE {
        cache.clear();
    }
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

/// A runtime value produced by literal reduction or row evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Regex(String),
    List(Vec<Value>),
}

impl Value {
    /// The literal value of a constant AST node, if it is one.
    pub fn from_literal(expr: &Expr) -> Option<Value> {
        Some(match expr {
            Expr::Integer(v) => Value::Int(*v),
            Expr::Unsigned(v) => Value::UInt(*v),
            Expr::Number(v) => Value::Float(*v),
            Expr::Boolean(v) => Value::Bool(*v),
            Expr::String(v) => Value::String(v.clone()),
            Expr::Duration(v) | Expr::Time(v) => Value::Int(*v),
            Expr::Regex(v) => Value::Regex(v.clone()),
            Expr::List(items) => Value::List(items.iter().filter_map(Value::from_literal).collect()),
            Expr::Nil => Value::Null,
            _ => return None,
        })
    }

    pub fn from_json(v: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match v {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            J::String(s) => Value::String(s.clone()),
            J::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            J::Object(_) => Value::String(v.to_string()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(i) => J::from(*i),
            Value::UInt(u) => J::from(*u),
            Value::Float(f) => serde_json::Number::from_f64(*f).map(J::Number).unwrap_or(J::Null),
            Value::String(s) | Value::Regex(s) => J::String(s.clone()),
            Value::List(items) => J::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view. Numeric strings parse, booleans map to 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            Value::Float(f) => Some(*f as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::String(s) => s.trim().parse::<i64>().ok().or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64)),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::UInt(u) => *u != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) | Value::Regex(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::UInt(_) | Value::Float(_))
    }

    /// Ordering used by comparison operators. Numbers compare numerically,
    /// everything else by its string form.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) if (a.is_numeric() || b.is_numeric()) && a.as_f64().is_some() && b.as_f64().is_some() => {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (a, b) => Some(a.to_string().cmp(&b.to_string())),
        }
    }

    /// Applies a binary operator to two values.
    pub fn operate(&self, op: BinaryOp, rhs: &Value) -> Result<Value> {
        match op {
            BinaryOp::And => Ok(Value::Bool(self.truthy() && rhs.truthy())),
            BinaryOp::Or => Ok(Value::Bool(self.truthy() || rhs.truthy())),
            BinaryOp::Eq => Ok(Value::Bool(self.compare(rhs) == Some(Ordering::Equal))),
            BinaryOp::Neq => Ok(Value::Bool(self.compare(rhs) != Some(Ordering::Equal))),
            BinaryOp::Lt => Ok(Value::Bool(self.compare(rhs) == Some(Ordering::Less))),
            BinaryOp::Lte => Ok(Value::Bool(matches!(self.compare(rhs), Some(Ordering::Less | Ordering::Equal)))),
            BinaryOp::Gt => Ok(Value::Bool(self.compare(rhs) == Some(Ordering::Greater))),
            BinaryOp::Gte => Ok(Value::Bool(matches!(
                self.compare(rhs),
                Some(Ordering::Greater | Ordering::Equal)
            ))),
            BinaryOp::EqRegex | BinaryOp::NeqRegex => {
                let (Value::String(s), Value::Regex(pattern)) = (self, rhs) else {
                    return Err(TsqlError::eval(format!("invalid operands for '{op}'")));
                };
                let re = cached_regex(pattern)?;
                Ok(Value::Bool(re.is_match(s) == (op == BinaryOp::EqRegex)))
            }
            _ => self.arithmetic(op, rhs),
        }
    }

    fn arithmetic(&self, op: BinaryOp, rhs: &Value) -> Result<Value> {
        if self.is_null() || rhs.is_null() {
            return Ok(Value::Null);
        }
        if op == BinaryOp::Add && (matches!(self, Value::String(_)) || matches!(rhs, Value::String(_))) {
            let numeric = (self.is_numeric() || rhs.is_numeric()) && self.as_f64().is_some() && rhs.as_f64().is_some();
            if !numeric {
                return Ok(Value::String(format!("{self}{rhs}")));
            }
        }
        if let (Value::Int(a), Value::Int(b)) = (self, rhs) {
            let (a, b) = (*a, *b);
            return match op {
                BinaryOp::Add => Ok(Value::Int(a.wrapping_add(b))),
                BinaryOp::Sub => Ok(Value::Int(a.wrapping_sub(b))),
                BinaryOp::Mul => Ok(Value::Int(a.wrapping_mul(b))),
                BinaryOp::Div if b == 0 => Err(TsqlError::DivideByZero),
                BinaryOp::Div => Ok(Value::Int(a.wrapping_div(b))),
                BinaryOp::Mod if b == 0 => Err(TsqlError::DivideByZero),
                BinaryOp::Mod => Ok(Value::Int(a.wrapping_rem(b))),
                BinaryOp::BitAnd => Ok(Value::Int(a & b)),
                BinaryOp::BitOr => Ok(Value::Int(a | b)),
                BinaryOp::BitXor => Ok(Value::Int(a ^ b)),
                _ => Err(TsqlError::eval(format!("invalid operator '{op}'"))),
            };
        }
        let (Some(a), Some(b)) = (self.as_f64(), rhs.as_f64()) else {
            return Err(TsqlError::eval(format!("invalid operands '{self}' {op} '{rhs}'")));
        };
        match op {
            BinaryOp::Add => Ok(Value::Float(a + b)),
            BinaryOp::Sub => Ok(Value::Float(a - b)),
            BinaryOp::Mul => Ok(Value::Float(a * b)),
            BinaryOp::Div if b == 0.0 => Err(TsqlError::DivideByZero),
            BinaryOp::Div => Ok(Value::Float(a / b)),
            BinaryOp::Mod if b == 0.0 => Err(TsqlError::DivideByZero),
            BinaryOp::Mod => Ok(Value::Float(a % b)),
            _ => Err(TsqlError::eval(format!("operator '{op}' requires integers"))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str(""),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::UInt(u) => write!(f, "{u}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) | Value::Regex(s) => f.write_str(s),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integer_and_float_arithmetic() {
        assert_eq!(Value::Int(7).operate(BinaryOp::Div, &Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(Value::Int(7).operate(BinaryOp::Div, &Value::Float(2.0)).unwrap(), Value::Float(3.5));
        assert!(matches!(
            Value::Int(1).operate(BinaryOp::Div, &Value::Int(0)),
            Err(TsqlError::DivideByZero)
        ));
        assert_eq!(Value::Null.operate(BinaryOp::Add, &Value::Int(1)).unwrap(), Value::Null);
    }

    #[test]
    fn integer_overflow_wraps() {
        let min = Value::Int(i64::MIN);
        assert_eq!(min.operate(BinaryOp::Div, &Value::Int(-1)).unwrap(), Value::Int(i64::MIN));
        assert_eq!(min.operate(BinaryOp::Mod, &Value::Int(-1)).unwrap(), Value::Int(0));
        assert_eq!(Value::Int(-7).operate(BinaryOp::Mod, &Value::Int(3)).unwrap(), Value::Int(-1));
    }

    #[test]
    fn string_concat_and_compare() {
        let v = Value::String("a".into()).operate(BinaryOp::Add, &Value::String("b".into())).unwrap();
        assert_eq!(v, Value::String("ab".into()));
        assert_eq!(
            Value::String("10".into()).operate(BinaryOp::Gt, &Value::Int(9)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(Value::Int(3).operate(BinaryOp::Eq, &Value::Float(3.0)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn regex_match() {
        let v = Value::String("web-01".into())
            .operate(BinaryOp::EqRegex, &Value::Regex("^web-\\d+$".into()))
            .unwrap();
        assert_eq!(v, Value::Bool(true));
        let v = Value::String("db-01".into())
            .operate(BinaryOp::NeqRegex, &Value::Regex("^web-\\d+$".into()))
            .unwrap();
        assert_eq!(v, Value::Bool(true));
        assert!(cached_regex("^web-\\d+$").is_ok());
        assert!(matches!(
            Value::String("x".into()).operate(BinaryOp::EqRegex, &Value::Regex("(".into())),
            Err(TsqlError::Eval(_))
        ));
    }

    #[test]
    fn json_conversions() {
        assert_eq!(Value::from_json(&json!("12")).as_f64(), Some(12.0));
        assert_eq!(Value::from_json(&json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::Float(f64::NAN).to_json(), serde_json::Value::Null);
        assert_eq!(Value::List(vec![Value::Int(1)]).to_json(), json!([1]));
    }
}
