use std::collections::HashMap;

use crate::error::{Result, TsqlError};
use crate::tsql::ast::*;
use crate::tsql::lexer::{tokenize, Token};

const NON_QUERY_KEYWORDS: &[&str] = &[
    "SHOW", "CREATE", "DROP", "DELETE", "ALTER", "GRANT", "REVOKE", "KILL", "EXPLAIN", "INSERT",
];

/// Parses one or more `;`-separated statements, binding `$name` parameters
/// from `params`.
pub fn parse_statements(input: &str, params: &HashMap<String, serde_json::Value>) -> Result<Vec<Statement>> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        params,
    };
    let mut statements = Vec::new();
    loop {
        while parser.eat(&Token::Semicolon) {}
        if parser.peek() == &Token::Eof {
            break;
        }
        statements.push(parser.parse_statement()?);
        match parser.peek() {
            Token::Semicolon | Token::Eof => {}
            other => return Err(parser.unexpected(other.clone(), "';' or end of statement")),
        }
    }
    if statements.is_empty() {
        return Err(TsqlError::Parse("empty statement".to_string()));
    }
    Ok(statements)
}

/// Parses a standalone expression, as used in conditions and tests.
pub fn parse_expr(input: &str, params: &HashMap<String, serde_json::Value>) -> Result<Expr> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
        params,
    };
    let expr = parser.parse_expr(0)?;
    match parser.peek() {
        Token::Eof => Ok(expr),
        other => Err(parser.unexpected(other.clone(), "end of expression")),
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    params: &'a HashMap<String, serde_json::Value>,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.peek().is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(self.peek().clone(), what))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected(self.peek().clone(), kw))
        }
    }

    fn unexpected(&self, found: Token, expected: &str) -> TsqlError {
        TsqlError::Parse(format!("found {found:?}, expected {expected} at token {}", self.pos))
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        if self.peek().is_keyword("SELECT") {
            return Ok(Statement::Select(Box::new(self.parse_select()?)));
        }
        let kind = match self.peek() {
            Token::Ident(word) if NON_QUERY_KEYWORDS.iter().any(|kw| word.eq_ignore_ascii_case(kw)) => {
                word.to_ascii_uppercase()
            }
            other => return Err(self.unexpected(other.clone(), "SELECT")),
        };
        while !matches!(self.peek(), Token::Semicolon | Token::Eof) {
            self.advance();
        }
        Ok(Statement::Other { kind })
    }

    fn parse_select(&mut self) -> Result<SelectStatement> {
        self.expect_keyword("SELECT")?;
        let mut stmt = SelectStatement {
            fields: self.parse_fields()?,
            ..Default::default()
        };

        self.expect_keyword("FROM")?;
        stmt.sources = self.parse_sources()?;

        if self.eat_keyword("WHERE") {
            stmt.condition = Some(self.parse_expr(0)?);
        }
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            stmt.dimensions = self.parse_expr_list()?;
        }
        if self.eat_keyword("FILL") {
            // fill() is accepted for compatibility; gaps are always filled.
            self.expect(Token::LParen, "(")?;
            self.advance();
            self.expect(Token::RParen, ")")?;
        }
        if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            stmt.sort_fields = self.parse_sort_fields()?;
        }
        if self.eat_keyword("LIMIT") {
            stmt.limit = self.parse_int("LIMIT")?;
        }
        if self.eat_keyword("OFFSET") {
            stmt.offset = self.parse_int("OFFSET")?;
        }
        Ok(stmt)
    }

    fn parse_int(&mut self, clause: &str) -> Result<i64> {
        match self.advance() {
            Token::Integer(v) => Ok(v),
            Token::Param(name) => match self.params.get(&name).and_then(|v| v.as_i64()) {
                Some(v) => Ok(v),
                None => Err(TsqlError::Parse(format!("{clause} parameter '{name}' is not an integer"))),
            },
            other => Err(self.unexpected(other, &format!("integer after {clause}"))),
        }
    }

    fn parse_fields(&mut self) -> Result<Vec<Field>> {
        let mut fields = Vec::new();
        loop {
            let expr = self.parse_expr(0)?;
            let alias = if self.eat_keyword("AS") {
                Some(self.parse_ident("alias")?)
            } else {
                None
            };
            fields.push(Field { expr, alias });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(fields)
    }

    fn parse_ident(&mut self, what: &str) -> Result<String> {
        match self.advance() {
            Token::Ident(s) | Token::QuotedIdent(s) => Ok(s),
            other => Err(self.unexpected(other, what)),
        }
    }

    fn parse_sources(&mut self) -> Result<Vec<SourceRef>> {
        let mut sources = Vec::new();
        loop {
            let source = match self.peek().clone() {
                Token::Regex(pattern) => {
                    self.advance();
                    SourceRef::Regex(pattern)
                }
                Token::LParen => {
                    self.advance();
                    let inner = self.parse_select()?;
                    self.expect(Token::RParen, ")")?;
                    SourceRef::SubQuery(Box::new(inner))
                }
                _ => {
                    let mut segments = vec![self.parse_ident("measurement")?];
                    while self.eat(&Token::Dot) {
                        segments.push(self.parse_ident("measurement")?);
                    }
                    let name = segments.pop().unwrap_or_default();
                    let retention_policy = segments.pop().unwrap_or_default();
                    let database = segments.pop().unwrap_or_default();
                    if !segments.is_empty() {
                        return Err(TsqlError::Parse(format!("too many qualifiers in source '{name}'")));
                    }
                    SourceRef::Measurement(Measurement {
                        database,
                        retention_policy,
                        name,
                    })
                }
            };
            sources.push(source);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(sources)
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>> {
        let mut exprs = vec![self.parse_expr(0)?];
        while self.eat(&Token::Comma) {
            exprs.push(self.parse_expr(0)?);
        }
        Ok(exprs)
    }

    fn parse_sort_fields(&mut self) -> Result<Vec<SortField>> {
        let mut fields = Vec::new();
        loop {
            let expr = self.parse_expr(0)?;
            let ascending = if self.eat_keyword("DESC") {
                false
            } else {
                self.eat_keyword("ASC");
                true
            };
            fields.push(SortField { expr, ascending });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(fields)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let op = match self.peek() {
            Token::Add => BinaryOp::Add,
            Token::Sub => BinaryOp::Sub,
            Token::Mul => BinaryOp::Mul,
            Token::Div => BinaryOp::Div,
            Token::Mod => BinaryOp::Mod,
            Token::BitAnd => BinaryOp::BitAnd,
            Token::BitOr => BinaryOp::BitOr,
            Token::BitXor => BinaryOp::BitXor,
            Token::Eq => BinaryOp::Eq,
            Token::Neq => BinaryOp::Neq,
            Token::EqRegex => BinaryOp::EqRegex,
            Token::NeqRegex => BinaryOp::NeqRegex,
            Token::Lt => BinaryOp::Lt,
            Token::Lte => BinaryOp::Lte,
            Token::Gt => BinaryOp::Gt,
            Token::Gte => BinaryOp::Gte,
            t if t.is_keyword("AND") => BinaryOp::And,
            t if t.is_keyword("OR") => BinaryOp::Or,
            _ => return None,
        };
        Some(op)
    }

    /// Precedence climbing; operators of equal precedence associate left.
    fn parse_expr(&mut self, min_prec: u8) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_binary_op() {
            if op.precedence() < min_prec {
                break;
            }
            self.advance();
            let rhs = if op.is_regex() {
                match self.advance() {
                    Token::Regex(pattern) => Expr::Regex(pattern),
                    other => return Err(self.unexpected(other, "regex")),
                }
            } else {
                self.parse_expr(op.precedence() + 1)?
            };
            lhs = build_binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Token::Sub => {
                self.advance();
                Ok(match self.parse_unary()? {
                    Expr::Integer(v) => Expr::Integer(-v),
                    Expr::Number(v) => Expr::Number(-v),
                    Expr::Duration(v) => Expr::Duration(-v),
                    other => Expr::binary(BinaryOp::Sub, Expr::Integer(0), other),
                })
            }
            Token::Add => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.advance() {
            Token::LParen => {
                let inner = self.parse_expr(0)?;
                self.expect(Token::RParen, ")")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            Token::Mul => Ok(Expr::Wildcard),
            Token::Integer(v) => Ok(Expr::Integer(v)),
            Token::Unsigned(v) => Ok(Expr::Unsigned(v)),
            Token::Number(v) => Ok(Expr::Number(v)),
            Token::Duration(v) => Ok(Expr::Duration(v)),
            Token::Str(s) => Ok(Expr::String(s)),
            Token::Regex(r) => Ok(Expr::Regex(r)),
            Token::Param(name) => self.bind_param(&name),
            Token::QuotedIdent(name) => self.parse_var_ref(name),
            Token::Ident(word) => {
                if word.eq_ignore_ascii_case("true") {
                    return Ok(Expr::Boolean(true));
                }
                if word.eq_ignore_ascii_case("false") {
                    return Ok(Expr::Boolean(false));
                }
                if self.peek() == &Token::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.eat(&Token::RParen) {
                        args = self.parse_expr_list()?;
                        self.expect(Token::RParen, ")")?;
                    }
                    return Ok(Expr::call(word.to_ascii_lowercase(), args));
                }
                self.parse_var_ref(word)
            }
            other => Err(self.unexpected(other, "expression")),
        }
    }

    fn parse_var_ref(&mut self, first: String) -> Result<Expr> {
        let mut name = first;
        while self.peek() == &Token::Dot
            && matches!(self.peek_at(1), Token::Ident(_) | Token::QuotedIdent(_))
        {
            self.advance();
            name.push('.');
            name.push_str(&self.parse_ident("identifier")?);
        }
        let mut ty = DataType::Unknown;
        if self.eat(&Token::DoubleColon) {
            let suffix = self.parse_ident("type")?;
            ty = DataType::from_suffix(&suffix)
                .ok_or_else(|| TsqlError::Parse(format!("unknown type '{suffix}' on '{name}'")))?;
        }
        Ok(Expr::var(name, ty))
    }

    fn bind_param(&self, name: &str) -> Result<Expr> {
        let value = self
            .params
            .get(name)
            .ok_or_else(|| TsqlError::Parse(format!("unable to bind parameter with name {name}")))?;
        json_to_literal(name, value)
    }
}

fn json_to_literal(name: &str, value: &serde_json::Value) -> Result<Expr> {
    use serde_json::Value;
    Ok(match value {
        Value::Null => Expr::Nil,
        Value::Bool(b) => Expr::Boolean(*b),
        Value::String(s) => Expr::String(s.clone()),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Expr::Integer(v)
            } else if let Some(v) = n.as_u64() {
                Expr::Unsigned(v)
            } else {
                Expr::Number(n.as_f64().unwrap_or_default())
            }
        }
        Value::Array(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                if item.is_array() || item.is_object() {
                    return Err(TsqlError::Parse(format!("parameter '{name}' has nested values")));
                }
                list.push(json_to_literal(name, item)?);
            }
            Expr::List(list)
        }
        Value::Object(_) => {
            return Err(TsqlError::Parse(format!("unable to bind object to parameter '{name}'")));
        }
    })
}

fn is_time_ref(expr: &Expr) -> bool {
    matches!(expr, Expr::VarRef(r) if r.name == "time" || r.name == "timestamp")
}

fn as_time_literal(expr: &Expr) -> Option<Expr> {
    if let Expr::String(s) = expr {
        let t = chrono::DateTime::parse_from_rfc3339(s).ok()?;
        return t.timestamp_nanos_opt().map(Expr::Time);
    }
    None
}

/// RFC3339 strings compared against the time column become time literals.
fn build_binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    if op.is_comparison() {
        if is_time_ref(&lhs) {
            if let Some(t) = as_time_literal(&rhs) {
                return Expr::binary(op, lhs, t);
            }
        } else if is_time_ref(&rhs) {
            if let Some(t) = as_time_literal(&lhs) {
                return Expr::binary(op, t, rhs);
            }
        }
    }
    Expr::binary(op, lhs, rhs)
}
