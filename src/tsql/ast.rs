use std::fmt;

/// Declared type of a variable reference (`name::tag`, `name::field`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    #[default]
    Unknown,
    AnyField,
    Tag,
    Field,
    Integer,
    Float,
    String,
    Boolean,
}

impl DataType {
    pub fn from_suffix(s: &str) -> Option<DataType> {
        match s.to_ascii_lowercase().as_str() {
            "tag" => Some(DataType::Tag),
            "field" => Some(DataType::Field),
            "integer" => Some(DataType::Integer),
            "float" => Some(DataType::Float),
            "string" => Some(DataType::String),
            "boolean" => Some(DataType::Boolean),
            _ => None,
        }
    }

    fn suffix(self) -> Option<&'static str> {
        match self {
            DataType::Tag => Some("tag"),
            DataType::Field => Some("field"),
            DataType::Integer => Some("integer"),
            DataType::Float => Some("float"),
            DataType::String => Some("string"),
            DataType::Boolean => Some("boolean"),
            DataType::Unknown | DataType::AnyField => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Eq,
    Neq,
    EqRegex,
    NeqRegex,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl BinaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::EqRegex
            | BinaryOp::NeqRegex
            | BinaryOp::Lt
            | BinaryOp::Lte
            | BinaryOp::Gt
            | BinaryOp::Gte => 4,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::BitOr | BinaryOp::BitXor => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::BitAnd => 6,
        }
    }

    pub fn is_comparison(self) -> bool {
        self.precedence() == 4
    }

    pub fn is_regex(self) -> bool {
        matches!(self, BinaryOp::EqRegex | BinaryOp::NeqRegex)
    }

    /// The operator that yields the same result with operands swapped.
    pub fn swapped(self) -> BinaryOp {
        match self {
            BinaryOp::Lt => BinaryOp::Gt,
            BinaryOp::Lte => BinaryOp::Gte,
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Gte => BinaryOp::Lte,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "!=",
            BinaryOp::EqRegex => "=~",
            BinaryOp::NeqRegex => "!~",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarRef {
    pub name: String,
    pub ty: DataType,
}

impl VarRef {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Self { name: name.into(), ty }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Binary(BinaryExpr),
    Call(Call),
    Paren(Box<Expr>),
    VarRef(VarRef),
    Wildcard,
    Integer(i64),
    Unsigned(u64),
    Number(f64),
    Boolean(bool),
    String(String),
    /// Nanoseconds.
    Duration(i64),
    /// Unix nanoseconds.
    Time(i64),
    Regex(String),
    List(Vec<Expr>),
    Nil,
}

impl Expr {
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(BinaryExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Call(Call {
            name: name.into(),
            args,
        })
    }

    pub fn var(name: impl Into<String>, ty: DataType) -> Expr {
        Expr::VarRef(VarRef::new(name, ty))
    }

    /// Strips any number of enclosing parentheses.
    pub fn unparen(&self) -> &Expr {
        let mut expr = self;
        while let Expr::Paren(inner) = expr {
            expr = inner;
        }
        expr
    }

    /// Visits every node depth first, parents before children.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Binary(b) => {
                b.lhs.walk(f);
                b.rhs.walk(f);
            }
            Expr::Call(c) => c.args.iter().for_each(|a| a.walk(f)),
            Expr::Paren(e) => e.walk(f),
            Expr::List(items) => items.iter().for_each(|a| a.walk(f)),
            _ => {}
        }
    }

    /// Short display name used for unaliased output columns.
    pub fn name(&self) -> String {
        match self {
            Expr::Call(c) => c.name.clone(),
            Expr::VarRef(r) => r.name.clone(),
            Expr::Paren(e) => e.name(),
            Expr::Binary(b) => {
                let (l, r) = (b.lhs.name(), b.rhs.name());
                match (l.is_empty(), r.is_empty()) {
                    (true, _) => r,
                    (_, true) => l,
                    _ => format!("{l}_{r}"),
                }
            }
            _ => String::new(),
        }
    }
}

pub fn format_duration(nanos: i64) -> String {
    const UNITS: [(i64, &str); 7] = [
        (7 * 24 * 3_600_000_000_000, "w"),
        (24 * 3_600_000_000_000, "d"),
        (3_600_000_000_000, "h"),
        (60_000_000_000, "m"),
        (1_000_000_000, "s"),
        (1_000_000, "ms"),
        (1_000, "u"),
    ];
    if nanos == 0 {
        return "0s".to_string();
    }
    for (size, unit) in UNITS {
        if nanos % size == 0 {
            return format!("{}{unit}", nanos / size);
        }
    }
    format!("{nanos}ns")
}

fn quote_ident(name: &str) -> String {
    let bare = name
        .chars()
        .enumerate()
        .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && (c.is_ascii_digit() || c == '.')));
    if bare && !name.is_empty() {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\\\""))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Binary(b) => write!(f, "{} {} {}", b.lhs, b.op, b.rhs),
            Expr::Call(c) => {
                write!(f, "{}(", c.name)?;
                for (i, arg) in c.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Expr::Paren(e) => write!(f, "({e})"),
            Expr::VarRef(r) => {
                f.write_str(&quote_ident(&r.name))?;
                if let Some(suffix) = r.ty.suffix() {
                    write!(f, "::{suffix}")?;
                }
                Ok(())
            }
            Expr::Wildcard => f.write_str("*"),
            Expr::Integer(v) => write!(f, "{v}"),
            Expr::Unsigned(v) => write!(f, "{v}"),
            Expr::Number(v) => write!(f, "{v}"),
            Expr::Boolean(v) => write!(f, "{v}"),
            Expr::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Expr::Duration(d) => f.write_str(&format_duration(*d)),
            Expr::Time(t) => write!(f, "'{}'", chrono::DateTime::from_timestamp_nanos(*t).to_rfc3339()),
            Expr::Regex(r) => write!(f, "/{}/", r.replace('/', "\\/")),
            Expr::List(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Expr::Nil => f.write_str("null"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl Field {
    /// Alias if present, otherwise a name derived from the expression.
    pub fn name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => self.expr.name(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {}", quote_ident(alias))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    pub expr: Expr,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub database: String,
    pub retention_policy: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceRef {
    Measurement(Measurement),
    Regex(String),
    SubQuery(Box<SelectStatement>),
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRef::Measurement(m) => {
                if !m.database.is_empty() {
                    write!(f, "{}.{}.", quote_ident(&m.database), quote_ident(&m.retention_policy))?;
                } else if !m.retention_policy.is_empty() {
                    write!(f, "{}.", quote_ident(&m.retention_policy))?;
                }
                f.write_str(&quote_ident(&m.name))
            }
            SourceRef::Regex(r) => write!(f, "/{r}/"),
            SourceRef::SubQuery(_) => f.write_str("(subquery)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    pub fields: Vec<Field>,
    pub sources: Vec<SourceRef>,
    pub condition: Option<Expr>,
    pub dimensions: Vec<Expr>,
    pub sort_fields: Vec<SortField>,
    /// 0 when absent.
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Box<SelectStatement>),
    /// Any statement other than SELECT, kept only so compilation can reject it.
    Other { kind: String },
}
