use std::sync::LazyLock;

use crate::error::Result;
use crate::tsql::functions::{Arity, FunctionTable};

/// How a function renders into backend script text.
#[derive(Debug, Clone, Copy)]
pub enum ScriptForm {
    /// `(args[0]).method(args[1..])`
    Objective(&'static str),
    /// Free-form rendering of the already compiled arguments.
    Call(fn(&[String]) -> String),
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptFunction {
    pub arity: Arity,
    pub form: ScriptForm,
}

impl ScriptFunction {
    const fn call(arity: Arity, f: fn(&[String]) -> String) -> Self {
        Self {
            arity,
            form: ScriptForm::Call(f),
        }
    }

    const fn objective(arity: Arity, method: &'static str) -> Self {
        Self {
            arity,
            form: ScriptForm::Objective(method),
        }
    }

    pub fn render(&self, name: &str, args: &[String]) -> Result<String> {
        self.arity.check(name, args.len())?;
        Ok(match self.form {
            ScriptForm::Objective(method) => {
                format!("({}).{method}({})", args[0], args[1..].join(","))
            }
            ScriptForm::Call(f) => f(args),
        })
    }
}

fn infix(args: &[String], op: &str) -> String {
    format!("(({}){op}({}))", args[0], args[1])
}

fn membership(args: &[String], op: &str, join: &str) -> String {
    let parts: Vec<String> = args[1..].iter().map(|a| format!("({}){op}({a})", args[0])).collect();
    format!("({})", parts.join(join))
}

static PAINLESS_FUNCTIONS: LazyLock<FunctionTable<ScriptFunction>> = LazyLock::new(|| {
    FunctionTable::new()
        .with("substring", ScriptFunction::objective(Arity::Min(2), "substring"))
        .with("tostring", ScriptFunction::objective(Arity::Exact(1), "toString"))
        .with(
            "if",
            ScriptFunction::call(Arity::Exact(3), |a| format!("(({})?({}):({}))", a[0], a[1], a[2])),
        )
        .with("eq", ScriptFunction::call(Arity::Exact(2), |a| infix(a, "==")))
        .with("neq", ScriptFunction::call(Arity::Exact(2), |a| infix(a, "!=")))
        .with("gt", ScriptFunction::call(Arity::Exact(2), |a| infix(a, ">")))
        .with("gte", ScriptFunction::call(Arity::Exact(2), |a| infix(a, ">=")))
        .with("lt", ScriptFunction::call(Arity::Exact(2), |a| infix(a, "<")))
        .with("lte", ScriptFunction::call(Arity::Exact(2), |a| infix(a, "<=")))
        .with("include", ScriptFunction::call(Arity::Min(2), |a| membership(a, "==", " || ")))
        .with("not_include", ScriptFunction::call(Arity::Min(2), |a| membership(a, "!=", " && ")))
});

static CLICKHOUSE_FUNCTIONS: LazyLock<FunctionTable<ScriptFunction>> = LazyLock::new(|| {
    FunctionTable::new()
        .with(
            "substring",
            ScriptFunction::call(Arity::Min(2), |a| format!("substring({})", a.join(","))),
        )
        .with("tostring", ScriptFunction::call(Arity::Exact(1), |a| format!("toString({})", a[0])))
        .with("if", ScriptFunction::call(Arity::Exact(3), |a| format!("if({},{},{})", a[0], a[1], a[2])))
        .with("eq", ScriptFunction::call(Arity::Exact(2), |a| format!("{}={}", a[0], a[1])))
        .with("neq", ScriptFunction::call(Arity::Exact(2), |a| format!("{}!={}", a[0], a[1])))
        .with("gt", ScriptFunction::call(Arity::Exact(2), |a| format!("{}>{}", a[0], a[1])))
        .with("gte", ScriptFunction::call(Arity::Exact(2), |a| format!("{}>={}", a[0], a[1])))
        .with("lt", ScriptFunction::call(Arity::Exact(2), |a| format!("{}<{}", a[0], a[1])))
        .with("lte", ScriptFunction::call(Arity::Exact(2), |a| format!("{}<={}", a[0], a[1])))
        .with("include", ScriptFunction::call(Arity::Min(2), |a| membership(a, "=", " or ")))
        .with("not_include", ScriptFunction::call(Arity::Min(2), |a| membership(a, "!=", " and ")))
});

/// Functions callable from Elasticsearch Painless scripts.
pub fn painless_functions() -> &'static FunctionTable<ScriptFunction> {
    &PAINLESS_FUNCTIONS
}

/// Functions callable from ClickHouse SQL fragments.
pub fn clickhouse_functions() -> &'static FunctionTable<ScriptFunction> {
    &CLICKHOUSE_FUNCTIONS
}
