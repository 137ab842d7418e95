use std::cmp::Ordering;
use std::sync::LazyLock;

use crate::error::{must_args_min_num, must_args_num, Result, TsqlError};
use crate::tsql::functions::FunctionTable;
use crate::tsql::value::Value;

/// A scalar function evaluated against already-computed argument values.
pub type BuiltinFn = fn(&[Value]) -> Result<Value>;

static BUILTIN_FUNCTIONS: LazyLock<FunctionTable<BuiltinFn>> = LazyLock::new(|| {
    FunctionTable::<BuiltinFn>::new()
        .with("default_value", |args| {
            must_args_num("default_value", args.len(), 2)?;
            Ok(if args[0].is_null() { args[1].clone() } else { args[0].clone() })
        })
        .with("format_bytes", |args| {
            must_args_num("format_bytes", args.len(), 1)?;
            Ok(Value::String(format_bytes(args[0].as_f64().unwrap_or_default())))
        })
        .with("format_duration", format_duration_fn)
        .with("round_float", |args| {
            must_args_num("round_float", args.len(), 2)?;
            let Value::Float(v) = args[0] else {
                return Ok(args[0].clone());
            };
            let digits = args[1].as_i64().unwrap_or(2).clamp(0, 15) as i32;
            let scale = 10f64.powi(digits);
            Ok(Value::Float((v * scale).round() / scale))
        })
        .with("trim", |args| trim("trim", args, |s, cut| s.trim_matches(|c| cut.contains(c)).to_string()))
        .with("trim_left", |args| {
            trim("trim_left", args, |s, cut| s.trim_start_matches(|c| cut.contains(c)).to_string())
        })
        .with("trim_right", |args| {
            trim("trim_right", args, |s, cut| s.trim_end_matches(|c| cut.contains(c)).to_string())
        })
        .with("trim_space", |args| {
            must_args_num("trim_space", args.len(), 1)?;
            Ok(Value::String(string_arg("trim_space", 0, &args[0])?.trim().to_string()))
        })
        .with("trim_prefix", |args| {
            trim("trim_prefix", args, |s, p| s.strip_prefix(p).unwrap_or(s).to_string())
        })
        .with("trim_suffix", |args| {
            trim("trim_suffix", args, |s, p| s.strip_suffix(p).unwrap_or(s).to_string())
        })
        .with("max_value", |args| {
            must_args_num("max_value", args.len(), 2)?;
            Ok(if args[0].compare(&args[1]) == Some(Ordering::Less) { args[1].clone() } else { args[0].clone() })
        })
        .with("min_value", |args| {
            must_args_num("min_value", args.len(), 2)?;
            Ok(if args[0].compare(&args[1]) == Some(Ordering::Greater) { args[1].clone() } else { args[0].clone() })
        })
        .with("int", |args| {
            must_args_num("int", args.len(), 1)?;
            args[0]
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| TsqlError::eval(format!("invalid integer '{}'", args[0])))
        })
        .with("float", |args| {
            must_args_num("float", args.len(), 1)?;
            args[0]
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| TsqlError::eval(format!("invalid float '{}'", args[0])))
        })
        .with("bool", |args| {
            must_args_num("bool", args.len(), 1)?;
            Ok(match &args[0] {
                Value::String(s) => Value::Bool(matches!(s.to_ascii_lowercase().as_str(), "true" | "1" | "t" | "yes")),
                other => Value::Bool(other.truthy()),
            })
        })
        .with("string", |args| {
            must_args_num("string", args.len(), 1)?;
            Ok(Value::String(args[0].to_string()))
        })
        .with("tostring", |args| {
            must_args_num("tostring", args.len(), 1)?;
            Ok(Value::String(args[0].to_string()))
        })
        .with("substring", substring)
        .with("if", |args| {
            must_args_num("if", args.len(), 3)?;
            match args[0] {
                Value::Bool(true) => Ok(args[1].clone()),
                Value::Bool(false) => Ok(args[2].clone()),
                _ => Err(TsqlError::eval("args[0] is not boolean")),
            }
        })
        .with("eq", |args| {
            must_args_num("eq", args.len(), 2)?;
            Ok(Value::Bool(args[0].compare(&args[1]) == Some(Ordering::Equal)))
        })
        .with("neq", |args| {
            must_args_num("neq", args.len(), 2)?;
            Ok(Value::Bool(args[0].compare(&args[1]) != Some(Ordering::Equal)))
        })
        .with("include", |args| {
            must_args_min_num("include", args.len(), 2)?;
            Ok(Value::Bool(args[1..].iter().any(|a| args[0].compare(a) == Some(Ordering::Equal))))
        })
        .with("not_include", |args| {
            must_args_min_num("not_include", args.len(), 2)?;
            Ok(Value::Bool(args[1..].iter().all(|a| args[0].compare(a) != Some(Ordering::Equal))))
        })
        .with("gt", |args| numeric_cmp("gt", args, |o| o == Ordering::Greater))
        .with("gte", |args| numeric_cmp("gte", args, |o| o != Ordering::Less))
        .with("lt", |args| numeric_cmp("lt", args, |o| o == Ordering::Less))
        .with("lte", |args| numeric_cmp("lte", args, |o| o != Ordering::Greater))
        .with("andf", |args| {
            must_args_min_num("andf", args.len(), 2)?;
            let bools = bool_args(args)?;
            Ok(Value::Bool(bools.iter().all(|b| *b)))
        })
        .with("orf", |args| {
            must_args_min_num("orf", args.len(), 2)?;
            let bools = bool_args(args)?;
            Ok(Value::Bool(bools.iter().any(|b| *b)))
        })
});

pub fn builtin_functions() -> &'static FunctionTable<BuiltinFn> {
    &BUILTIN_FUNCTIONS
}

fn string_arg<'a>(name: &str, idx: usize, v: &'a Value) -> Result<&'a str> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(TsqlError::eval(format!(
            "function '{name}' args[{idx}] must be string, got '{other}'"
        ))),
    }
}

fn trim(name: &str, args: &[Value], f: fn(&str, &str) -> String) -> Result<Value> {
    must_args_min_num(name, args.len(), 1)?;
    let text = string_arg(name, 0, &args[0])?;
    let cut = match args.get(1) {
        Some(v) => string_arg(name, 1, v)?,
        None => " ",
    };
    Ok(Value::String(f(text, cut)))
}

fn numeric_cmp(name: &str, args: &[Value], pred: fn(Ordering) -> bool) -> Result<Value> {
    must_args_num(name, args.len(), 2)?;
    let (Some(a), Some(b)) = (args[0].as_f64(), args[1].as_f64()) else {
        return Err(TsqlError::eval(format!("function '{name}' args is not numerical")));
    };
    Ok(Value::Bool(a.partial_cmp(&b).is_some_and(pred)))
}

fn bool_args(args: &[Value]) -> Result<Vec<bool>> {
    args.iter()
        .enumerate()
        .map(|(i, v)| match v {
            Value::Bool(b) => Ok(*b),
            _ => Err(TsqlError::eval(format!("args[{i}] is not boolean"))),
        })
        .collect()
}

fn substring(args: &[Value]) -> Result<Value> {
    must_args_min_num("substring", args.len(), 2)?;
    let text: Vec<char> = string_arg("substring", 0, &args[0])?.chars().collect();
    let len = text.len() as i64;
    let start = args[1].as_i64().unwrap_or(0).clamp(0, len);
    let end = match args.get(2) {
        Some(v) => v.as_i64().unwrap_or(len).clamp(start, len),
        None => len,
    };
    Ok(Value::String(text[start as usize..end as usize].iter().collect()))
}

pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut v = bytes;
    let mut unit = 0;
    while v.abs() >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        return format!("{v}{}", UNITS[0]);
    }
    format!("{v:.2}{}", UNITS[unit])
}

fn format_duration_fn(args: &[Value]) -> Result<Value> {
    must_args_min_num("format_duration", args.len(), 1)?;
    let mut v = args[0].as_f64().unwrap_or_default();
    let unit = match args.get(1) {
        Some(u) => string_arg("format_duration", 1, u)?,
        None => "ns",
    };
    v *= match unit {
        "us" | "µs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" | "min" => 60e9,
        "h" => 3600e9,
        "d" => 86400e9,
        _ => 1.0,
    };
    Ok(Value::String(humanize_nanos(v as i64)))
}

/// Renders nanoseconds as `1h2m3.5s`, `250ms`, `12µs` or `7ns`.
pub fn humanize_nanos(nanos: i64) -> String {
    let sign = if nanos < 0 { "-" } else { "" };
    let n = nanos.unsigned_abs();
    if n < 1_000 {
        return format!("{sign}{n}ns");
    }
    if n < 1_000_000 {
        return format!("{sign}{}µs", trim_float(n as f64 / 1e3));
    }
    if n < 1_000_000_000 {
        return format!("{sign}{}ms", trim_float(n as f64 / 1e6));
    }
    let hours = n / 3_600_000_000_000;
    let minutes = (n / 60_000_000_000) % 60;
    let seconds = (n % 60_000_000_000) as f64 / 1e9;
    let mut out = sign.to_string();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&format!("{}s", trim_float(seconds)));
    out
}

fn trim_float(v: f64) -> String {
    let s = format!("{v:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Value> {
        let f = builtin_functions().get(name).unwrap();
        f(args)
    }

    fn s(v: &str) -> Value {
        Value::String(v.to_string())
    }

    #[test]
    fn conditionals() {
        assert_eq!(call("if", &[Value::Bool(true), Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(1));
        assert!(call("if", &[Value::Int(1), Value::Int(1), Value::Int(2)]).is_err());
        assert_eq!(call("include", &[s("b"), s("a"), s("b")]).unwrap(), Value::Bool(true));
        assert_eq!(call("not_include", &[s("c"), s("a"), s("b")]).unwrap(), Value::Bool(true));
        assert_eq!(call("gte", &[Value::Int(3), Value::Float(3.0)]).unwrap(), Value::Bool(true));
        assert!(call("gt", &[s("x"), Value::Int(1)]).is_err());
        assert_eq!(call("andf", &[Value::Bool(true), Value::Bool(false)]).unwrap(), Value::Bool(false));
        assert_eq!(call("orf", &[Value::Bool(true), Value::Bool(false)]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn arity_is_checked() {
        let err = call("eq", &[Value::Int(1)]).unwrap_err();
        assert_eq!(err.to_string(), "function 'eq' expect 2 args, but got 1 args");
        let err = call("include", &[Value::Int(1)]).unwrap_err();
        assert_eq!(err.to_string(), "function 'include' must has 2 args");
    }

    #[test]
    fn strings() {
        assert_eq!(call("trim", &[s("--a--"), s("-")]).unwrap(), s("a"));
        assert_eq!(call("trim_prefix", &[s("tags.host"), s("tags.")]).unwrap(), s("host"));
        assert_eq!(call("trim_space", &[s("  x ")]).unwrap(), s("x"));
        assert_eq!(call("substring", &[s("hello"), Value::Int(1), Value::Int(3)]).unwrap(), s("el"));
        assert_eq!(call("substring", &[s("hello"), Value::Int(3), Value::Int(99)]).unwrap(), s("lo"));
        assert_eq!(call("tostring", &[Value::Null]).unwrap(), s(""));
        assert_eq!(call("trim_left", &[s("xxhixx"), s("x")]).unwrap(), s("hixx"));
        assert_eq!(call("trim_right", &[s("xxhixx"), s("x")]).unwrap(), s("xxhi"));
        assert_eq!(call("trim_suffix", &[s("cpu_total"), s("_total")]).unwrap(), s("cpu"));
    }

    #[test]
    fn numbers() {
        assert_eq!(call("round_float", &[Value::Float(1.23456), Value::Int(2)]).unwrap(), Value::Float(1.23));
        assert_eq!(call("round_float", &[Value::Int(5), Value::Int(2)]).unwrap(), Value::Int(5));
        assert_eq!(call("max_value", &[Value::Int(2), Value::Int(9)]).unwrap(), Value::Int(9));
        assert_eq!(call("min_value", &[Value::Int(2), Value::Int(9)]).unwrap(), Value::Int(2));
        assert_eq!(call("default_value", &[Value::Null, Value::Int(0)]).unwrap(), Value::Int(0));
        assert_eq!(call("int", &[s("42")]).unwrap(), Value::Int(42));
        assert_eq!(call("bool", &[s("true")]).unwrap(), Value::Bool(true));
        assert_eq!(call("float", &[s("1.5")]).unwrap(), Value::Float(1.5));
        assert_eq!(call("lt", &[Value::Int(1), Value::Int(2)]).unwrap(), Value::Bool(true));
        assert_eq!(call("lte", &[Value::Int(2), Value::Int(2)]).unwrap(), Value::Bool(true));
        assert_eq!(call("neq", &[s("a"), s("b")]).unwrap(), Value::Bool(true));
    }

    #[test]
    fn formatting() {
        assert_eq!(format_bytes(512.0), "512B");
        assert_eq!(format_bytes(1536.0), "1.50KB");
        assert_eq!(humanize_nanos(90_000_000_000), "1m30s");
        assert_eq!(humanize_nanos(250_000_000), "250ms");
        assert_eq!(call("format_duration", &[Value::Int(2), s("h")]).unwrap(), s("2h0m0s"));
    }
}
