use std::collections::HashSet;

use crate::models::ColumnFlag;
use crate::tsql::ast::{DataType, Expr, VarRef};

pub const TIMESTAMP_KEY: &str = "timestamp";
pub const TIME_KEY: &str = "time";
pub const NAME_KEY: &str = "name";
const HIDDEN_NAME_KEY: &str = "_name";
pub const TAGS_PREFIX: &str = "tags.";
pub const FIELDS_PREFIX: &str = "fields.";

/// Physical ClickHouse columns that are addressed directly instead of through
/// the key/value arrays.
pub const CK_ORIGIN_COLUMNS: &[&str] = &["tenant_id", "org_name"];
pub const CK_NAME_COLUMN: &str = "metric_group";

/// What a reference points at, independent of backend syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Timestamp,
    Name,
    Tag,
    Field,
}

impl RefKind {
    pub fn classify(r: &VarRef, deftyp: DataType) -> RefKind {
        match r.ty {
            DataType::Unknown => {
                if r.name == TIMESTAMP_KEY || r.name == TIME_KEY {
                    RefKind::Timestamp
                } else if r.name == NAME_KEY || r.name == HIDDEN_NAME_KEY {
                    RefKind::Name
                } else if deftyp == DataType::Tag {
                    RefKind::Tag
                } else {
                    RefKind::Field
                }
            }
            DataType::Tag => RefKind::Tag,
            _ => RefKind::Field,
        }
    }

    pub fn flag(self) -> ColumnFlag {
        match self {
            RefKind::Timestamp => ColumnFlag::TIMESTAMP,
            RefKind::Name => ColumnFlag::NAME,
            RefKind::Tag => ColumnFlag::TAG,
            RefKind::Field => ColumnFlag::FIELD,
        }
    }
}

/// Maps a variable reference to a backend storage path plus its column flag.
pub trait KeyResolver {
    fn resolve(&self, r: &VarRef, deftyp: DataType) -> (String, ColumnFlag);
}

/// Dotted document paths: `tags.<k>`, `fields.<k>`.
#[derive(Debug, Clone)]
pub struct EsKeyResolver {
    time_key: String,
}

impl EsKeyResolver {
    pub fn new(time_key: impl Into<String>) -> Self {
        Self {
            time_key: time_key.into(),
        }
    }
}

impl KeyResolver for EsKeyResolver {
    fn resolve(&self, r: &VarRef, deftyp: DataType) -> (String, ColumnFlag) {
        let kind = RefKind::classify(r, deftyp);
        let key = match kind {
            RefKind::Timestamp => self.time_key.clone(),
            RefKind::Name => NAME_KEY.to_string(),
            RefKind::Tag => format!("{TAGS_PREFIX}{}", r.name),
            RefKind::Field => format!("{FIELDS_PREFIX}{}", r.name),
        };
        (key, kind.flag())
    }
}

/// Index lookups into the key/value array columns of the metrics table.
#[derive(Debug, Clone, Default)]
pub struct CkKeyResolver {
    time_key: String,
    string_fields: HashSet<String>,
}

fn quote_key(k: &str) -> String {
    k.replace('\\', "\\\\").replace('\'', "\\'")
}

pub fn ck_tag_column(k: &str) -> String {
    format!("tag_values[indexOf(tag_keys,'{}')]", quote_key(k))
}

pub fn ck_number_field_column(k: &str) -> String {
    format!("number_field_values[indexOf(number_field_keys,'{}')]", quote_key(k))
}

pub fn ck_string_field_column(k: &str) -> String {
    format!("string_field_values[indexOf(string_field_keys,'{}')]", quote_key(k))
}

impl CkKeyResolver {
    pub fn new(time_key: impl Into<String>) -> Self {
        Self {
            time_key: time_key.into(),
            string_fields: HashSet::new(),
        }
    }

    /// Field names known to hold strings rather than numbers.
    pub fn with_string_fields(mut self, fields: impl IntoIterator<Item = String>) -> Self {
        self.string_fields.extend(fields);
        self
    }

    pub fn time_key(&self) -> &str {
        &self.time_key
    }

    fn field_arrays(&self, k: &str) -> (&'static str, &'static str) {
        if self.string_fields.contains(k) {
            ("string_field_keys", "string_field_values")
        } else {
            ("number_field_keys", "number_field_values")
        }
    }

    /// Like `resolve`, but yields NULL instead of the array default when the
    /// key is absent from the row. Aggregates use this so missing keys do not
    /// count as zero.
    pub fn resolve_existing(&self, r: &VarRef, deftyp: DataType) -> (String, ColumnFlag) {
        let kind = RefKind::classify(r, deftyp);
        if CK_ORIGIN_COLUMNS.contains(&r.name.as_str()) {
            return (r.name.clone(), kind.flag());
        }
        let k = quote_key(&r.name);
        let key = match kind {
            RefKind::Tag => format!("if(indexOf(tag_keys,'{k}') == 0,null,tag_values[indexOf(tag_keys,'{k}')])"),
            RefKind::Field => {
                let (keys, values) = self.field_arrays(&r.name);
                format!("if(indexOf({keys},'{k}') == 0,null,{values}[indexOf({keys},'{k}')])")
            }
            _ => return self.resolve(r, deftyp),
        };
        (key, kind.flag())
    }

    /// Resolves a flat filter key such as `tags.host` or `fields.cpu`.
    pub fn resolve_filter_key(&self, key: &str) -> String {
        if let Some(tag) = key.strip_prefix(TAGS_PREFIX) {
            if CK_ORIGIN_COLUMNS.contains(&tag) {
                return tag.to_string();
            }
            return ck_tag_column(tag);
        }
        if let Some(field) = key.strip_prefix(FIELDS_PREFIX) {
            let (keys, values) = self.field_arrays(field);
            return format!("{values}[indexOf({keys},'{}')]", quote_key(field));
        }
        key.to_string()
    }
}

impl KeyResolver for CkKeyResolver {
    fn resolve(&self, r: &VarRef, deftyp: DataType) -> (String, ColumnFlag) {
        let kind = RefKind::classify(r, deftyp);
        if CK_ORIGIN_COLUMNS.contains(&r.name.as_str()) {
            return (r.name.clone(), kind.flag());
        }
        let key = match kind {
            RefKind::Timestamp => self.time_key.clone(),
            RefKind::Name => CK_NAME_COLUMN.to_string(),
            RefKind::Tag => ck_tag_column(&r.name),
            RefKind::Field => {
                if self.string_fields.contains(&r.name) {
                    ck_string_field_column(&r.name)
                } else {
                    ck_number_field_column(&r.name)
                }
            }
        };
        (key, kind.flag())
    }
}

/// Canonical text of an expression together with the union of its flags.
/// The text is what function ids are derived from, so it must not depend on
/// anything but the expression and the resolver.
pub fn expr_key_and_flag(expr: &Expr, deftyp: DataType, resolver: &dyn KeyResolver) -> (String, ColumnFlag) {
    match expr {
        Expr::Binary(b) => {
            let (left, lf) = expr_key_and_flag(&b.lhs, deftyp, resolver);
            let (right, rf) = expr_key_and_flag(&b.rhs, deftyp, resolver);
            (format!("{left}{}{right}", b.op), lf | rf)
        }
        Expr::Call(c) => {
            let mut flag = ColumnFlag::FUNC;
            if c.name == "time" || c.name == "timestamp" {
                flag |= ColumnFlag::GROUP_BY_INTERVAL;
            } else if c.name == "range" {
                flag |= ColumnFlag::GROUP_BY_RANGE;
            }
            let mut args = Vec::with_capacity(c.args.len());
            for arg in &c.args {
                let (k, f) = expr_key_and_flag(arg, deftyp, resolver);
                args.push(k);
                flag |= f;
            }
            (format!("{}({})", c.name, args.join(",")), flag)
        }
        Expr::Paren(inner) => expr_key_and_flag(inner, deftyp, resolver),
        Expr::VarRef(r) => resolver.resolve(r, deftyp),
        Expr::Wildcard => ("*".to_string(), ColumnFlag::NONE),
        Expr::Integer(_)
        | Expr::Unsigned(_)
        | Expr::Number(_)
        | Expr::Boolean(_)
        | Expr::String(_)
        | Expr::Duration(_)
        | Expr::Time(_)
        | Expr::Regex(_)
        | Expr::List(_)
        | Expr::Nil => (expr.to_string(), ColumnFlag::LITERAL),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, ty: DataType) -> VarRef {
        VarRef::new(name, ty)
    }

    #[test]
    fn es_paths() {
        let r = EsKeyResolver::new("timestamp");
        assert_eq!(r.resolve(&var("host", DataType::Tag), DataType::AnyField).0, "tags.host");
        assert_eq!(r.resolve(&var("host", DataType::Unknown), DataType::Tag).0, "tags.host");
        assert_eq!(r.resolve(&var("cpu", DataType::Unknown), DataType::AnyField).0, "fields.cpu");
        assert_eq!(
            r.resolve(&var("time", DataType::Unknown), DataType::AnyField),
            ("timestamp".to_string(), ColumnFlag::TIMESTAMP)
        );
        assert_eq!(
            r.resolve(&var("_name", DataType::Unknown), DataType::AnyField),
            ("name".to_string(), ColumnFlag::NAME)
        );
    }

    #[test]
    fn ck_paths() {
        let r = CkKeyResolver::new("timestamp").with_string_fields(["status".to_string()]);
        assert_eq!(
            r.resolve(&var("column", DataType::Unknown), DataType::AnyField).0,
            "number_field_values[indexOf(number_field_keys,'column')]"
        );
        assert_eq!(
            r.resolve(&var("status", DataType::Field), DataType::AnyField).0,
            "string_field_values[indexOf(string_field_keys,'status')]"
        );
        assert_eq!(
            r.resolve(&var("cluster_name", DataType::Tag), DataType::AnyField).0,
            "tag_values[indexOf(tag_keys,'cluster_name')]"
        );
        assert_eq!(r.resolve(&var("org_name", DataType::Tag), DataType::AnyField).0, "org_name");
        assert_eq!(
            r.resolve_existing(&var("error", DataType::Tag), DataType::AnyField).0,
            "if(indexOf(tag_keys,'error') == 0,null,tag_values[indexOf(tag_keys,'error')])"
        );
        assert_eq!(r.resolve_filter_key("tags.org_name"), "org_name");
        assert_eq!(r.resolve_filter_key("tags.addon_id"), "tag_values[indexOf(tag_keys,'addon_id')]");
        assert_eq!(r.resolve_filter_key("column"), "column");
    }

    #[test]
    fn both_backends_agree_on_flags() {
        let es = EsKeyResolver::new("timestamp");
        let ck = CkKeyResolver::new("timestamp");
        let cases = [
            ("host", DataType::Tag, DataType::AnyField),
            ("host", DataType::Unknown, DataType::Tag),
            ("cpu", DataType::Unknown, DataType::AnyField),
            ("cpu", DataType::Field, DataType::Tag),
            ("org_name", DataType::Unknown, DataType::AnyField),
            ("timestamp", DataType::Unknown, DataType::Tag),
            ("name", DataType::Unknown, DataType::AnyField),
        ];
        for (name, ty, deftyp) in cases {
            let v = var(name, ty);
            let (es_key, es_flag) = es.resolve(&v, deftyp);
            let (ck_key, ck_flag) = ck.resolve(&v, deftyp);
            assert_eq!(es_flag, ck_flag, "flag mismatch for {name}");
            if name == "cpu" || name == "host" {
                assert_ne!(es_key, ck_key);
            }
        }
    }

    #[test]
    fn canonical_call_text() {
        let call = Expr::call(
            "sum",
            vec![Expr::binary(
                crate::tsql::ast::BinaryOp::Mul,
                Expr::var("a", DataType::Unknown),
                Expr::Integer(2),
            )],
        );
        let (key, flag) = expr_key_and_flag(&call, DataType::AnyField, &EsKeyResolver::new("timestamp"));
        assert_eq!(key, "sum(fields.a*2)");
        assert!(flag.contains(ColumnFlag::FUNC | ColumnFlag::FIELD | ColumnFlag::LITERAL));
    }
}
