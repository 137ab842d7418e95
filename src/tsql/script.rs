//! Lowers expressions into backend script text: Painless for Elasticsearch,
//! SQL fragments for ClickHouse. Both share one tree walk and differ only in
//! how leaves, operators and function calls are rendered.

use std::collections::BTreeSet;

use crate::error::{Result, TsqlError};
use crate::tsql::ast::{BinaryOp, Call, DataType, Expr, VarRef};
use crate::tsql::context::Context;
use crate::tsql::functions::{
    clickhouse_functions, painless_functions, reduce_literal, FunctionTable, ScriptFunction,
};
use crate::tsql::resolver::{CkKeyResolver, EsKeyResolver, KeyResolver};
use crate::tsql::value::Value;

/// Backend-specific leaf rendering.
pub trait ScriptDialect {
    fn functions(&self) -> &'static FunctionTable<ScriptFunction>;

    fn operator(&self, op: BinaryOp) -> &'static str;

    fn boolean(&self, b: bool) -> &'static str;

    fn var_ref(&mut self, r: &VarRef, deftyp: DataType) -> String;
}

/// Painless over `doc[...]` values.
///
/// When created with [`PainlessScript::tracking`], every referenced field is
/// recorded so the caller can guard the script with `exists` filters and read
/// values directly.
pub struct PainlessScript<'a> {
    resolver: &'a EsKeyResolver,
    fields: Option<BTreeSet<String>>,
}

impl<'a> PainlessScript<'a> {
    pub fn new(resolver: &'a EsKeyResolver) -> Self {
        Self { resolver, fields: None }
    }

    pub fn tracking(resolver: &'a EsKeyResolver) -> Self {
        Self {
            resolver,
            fields: Some(BTreeSet::new()),
        }
    }

    pub fn into_fields(self) -> BTreeSet<String> {
        self.fields.unwrap_or_default()
    }
}

impl ScriptDialect for PainlessScript<'_> {
    fn functions(&self) -> &'static FunctionTable<ScriptFunction> {
        painless_functions()
    }

    fn operator(&self, op: BinaryOp) -> &'static str {
        match op {
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Eq => "==",
            other => other.as_str(),
        }
    }

    fn boolean(&self, b: bool) -> &'static str {
        if b { "true" } else { "false" }
    }

    fn var_ref(&mut self, r: &VarRef, deftyp: DataType) -> String {
        let (key, _) = self.resolver.resolve(r, deftyp);
        let k = escape(&key);
        match &mut self.fields {
            Some(fields) => {
                fields.insert(key);
                format!("doc['{k}'].value")
            }
            None => format!("(doc.containsKey('{k}')?doc['{k}'].value:'')"),
        }
    }
}

/// ClickHouse SQL expressions over the key/value array columns.
pub struct ClickhouseScript<'a> {
    resolver: &'a CkKeyResolver,
}

impl<'a> ClickhouseScript<'a> {
    pub fn new(resolver: &'a CkKeyResolver) -> Self {
        Self { resolver }
    }
}

impl ScriptDialect for ClickhouseScript<'_> {
    fn functions(&self) -> &'static FunctionTable<ScriptFunction> {
        clickhouse_functions()
    }

    fn operator(&self, op: BinaryOp) -> &'static str {
        op.as_str()
    }

    fn boolean(&self, b: bool) -> &'static str {
        if b { "1" } else { "0" }
    }

    fn var_ref(&mut self, r: &VarRef, deftyp: DataType) -> String {
        self.resolver.resolve(r, deftyp).0
    }
}

pub fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Renders `expr` as script text in the given dialect.
pub fn compile_script(ctx: &Context, expr: &Expr, deftyp: DataType, dialect: &mut dyn ScriptDialect) -> Result<String> {
    match expr {
        Expr::Binary(b) => {
            if b.op.is_regex() {
                return Err(TsqlError::compile("not support regexp in script expression"));
            }
            let lhs = compile_operand(ctx, &b.lhs, deftyp, dialect)?;
            let rhs = compile_operand(ctx, &b.rhs, deftyp, dialect)?;
            Ok(format!("{lhs} {} {rhs}", dialect.operator(b.op)))
        }
        Expr::Call(call) => {
            if let Some(v) = reduce_literal(ctx, expr)? {
                return render_value(&v, dialect);
            }
            compile_call(ctx, call, deftyp, dialect)
        }
        Expr::Paren(inner) => Ok(format!("({})", compile_script(ctx, inner, deftyp, dialect)?)),
        Expr::VarRef(r) => Ok(dialect.var_ref(r, deftyp)),
        Expr::Integer(i) => Ok(i.to_string()),
        Expr::Unsigned(u) => Ok(u.to_string()),
        Expr::Number(n) => Ok(n.to_string()),
        Expr::Boolean(b) => Ok(dialect.boolean(*b).to_string()),
        Expr::String(s) => Ok(format!("'{}'", escape(s))),
        Expr::Nil => Ok("null".to_string()),
        Expr::Duration(ns) | Expr::Time(ns) => Ok(ns.to_string()),
        Expr::Regex(_) => Err(TsqlError::compile("not support regexp in script expression")),
        Expr::List(_) => Err(TsqlError::compile("not support list in script expression")),
        Expr::Wildcard => Err(TsqlError::compile("invalid expression '*' in script expression")),
    }
}

/// Nested binary operands are parenthesized so the target language's
/// operator precedence cannot regroup them.
fn compile_operand(ctx: &Context, expr: &Expr, deftyp: DataType, dialect: &mut dyn ScriptDialect) -> Result<String> {
    let text = compile_script(ctx, expr, deftyp, dialect)?;
    match expr {
        Expr::Binary(_) => Ok(format!("({text})")),
        _ => Ok(text),
    }
}

fn compile_call(ctx: &Context, call: &Call, deftyp: DataType, dialect: &mut dyn ScriptDialect) -> Result<String> {
    let Some(func) = dialect.functions().get(&call.name) else {
        return Err(TsqlError::function(format!(
            "not support function '{}' in script expression",
            call.name
        )));
    };
    let args = call
        .args
        .iter()
        .map(|arg| compile_script(ctx, arg, deftyp, dialect))
        .collect::<Result<Vec<_>>>()?;
    func.render(&call.name, &args)
}

fn render_value(v: &Value, dialect: &dyn ScriptDialect) -> Result<String> {
    match v {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(dialect.boolean(*b).to_string()),
        Value::String(s) => Ok(format!("'{}'", escape(s))),
        Value::Int(_) | Value::UInt(_) | Value::Float(_) => Ok(v.to_string()),
        Value::Regex(_) => Err(TsqlError::compile("not support regexp in script expression")),
        Value::List(_) => Err(TsqlError::compile("not support list in script expression")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tsql::grammar::parse_expr;
    use std::collections::HashMap;

    fn expr(s: &str) -> Expr {
        parse_expr(s, &HashMap::new()).unwrap()
    }

    #[test]
    fn painless_translates_operators() {
        let ctx = Context::new(0, 0);
        let resolver = EsKeyResolver::new("timestamp");
        let mut dialect = PainlessScript::tracking(&resolver);
        let s = compile_script(&ctx, &expr("cpu > 1 AND host::tag = 'a'"), DataType::AnyField, &mut dialect).unwrap();
        assert_eq!(s, "(doc['fields.cpu'].value > 1) && (doc['tags.host'].value == 'a')");
        let fields: Vec<_> = dialect.into_fields().into_iter().collect();
        assert_eq!(fields, vec!["fields.cpu".to_string(), "tags.host".to_string()]);
    }

    #[test]
    fn painless_guards_untracked_refs() {
        let ctx = Context::new(0, 0);
        let resolver = EsKeyResolver::new("timestamp");
        let mut dialect = PainlessScript::new(&resolver);
        let s = compile_script(&ctx, &expr("(mem)"), DataType::AnyField, &mut dialect).unwrap();
        assert_eq!(s, "((doc.containsKey('fields.mem')?doc['fields.mem'].value:''))");
    }

    #[test]
    fn clickhouse_renders_sql() {
        let ctx = Context::new(0, 0);
        let resolver = CkKeyResolver::new("timestamp");
        let mut dialect = ClickhouseScript::new(&resolver);
        let s = compile_script(&ctx, &expr("if(cpu > 1, true, 'x')"), DataType::AnyField, &mut dialect).unwrap();
        assert_eq!(s, "if(number_field_values[indexOf(number_field_keys,'cpu')] > 1,1,'x')");
    }

    #[test]
    fn nested_operators_keep_their_grouping() {
        let ctx = Context::new(0, 0);
        let es = EsKeyResolver::new("timestamp");
        let mut painless = PainlessScript::tracking(&es);
        let s = compile_script(&ctx, &expr("a::field | b::field + 1"), DataType::AnyField, &mut painless).unwrap();
        assert_eq!(s, "(doc['fields.a'].value | doc['fields.b'].value) + 1");

        let ck = CkKeyResolver::new("timestamp");
        let mut sql = ClickhouseScript::new(&ck);
        let s = compile_script(&ctx, &expr("a::field | b::field + 1"), DataType::AnyField, &mut sql).unwrap();
        assert_eq!(
            s,
            "(number_field_values[indexOf(number_field_keys,'a')] | number_field_values[indexOf(number_field_keys,'b')]) + 1"
        );
        let s = compile_script(&ctx, &expr("a::field * (b::field + 1)"), DataType::AnyField, &mut sql).unwrap();
        assert_eq!(
            s,
            "number_field_values[indexOf(number_field_keys,'a')] * (number_field_values[indexOf(number_field_keys,'b')] + 1)"
        );
    }

    #[test]
    fn literal_calls_fold() {
        let mut ctx = Context::new(0, 60_000_000_000);
        ctx.set_now(0);
        let resolver = CkKeyResolver::new("timestamp");
        let mut dialect = ClickhouseScript::new(&resolver);
        let s = compile_script(&ctx, &expr("interval('s') * 2"), DataType::AnyField, &mut dialect).unwrap();
        assert_eq!(s, "60 * 2");
    }

    #[test]
    fn rejects_regex_and_unknown_functions() {
        let ctx = Context::new(0, 0);
        let resolver = CkKeyResolver::new("timestamp");
        let mut dialect = ClickhouseScript::new(&resolver);
        assert!(compile_script(&ctx, &expr("host =~ /a/"), DataType::AnyField, &mut dialect).is_err());
        let err = compile_script(&ctx, &expr("nope(1)"), DataType::AnyField, &mut dialect).unwrap_err();
        assert_eq!(err.to_string(), "not support function 'nope' in script expression");
    }
}
