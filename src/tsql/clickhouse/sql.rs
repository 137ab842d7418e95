//! A small SELECT builder for ClickHouse. Conditions and the `WITH FILL`
//! tail are kept structured until [`SelectBuilder::to_sql`] renders them.

use serde_json::Value as Json;

use crate::tsql::script::escape;

/// Renders a JSON value as a SQL literal.
pub fn format_value(value: &Json) -> String {
    match value {
        Json::String(s) => format!("'{}'", escape(s)),
        Json::Number(n) => n.to_string(),
        Json::Bool(b) => {
            if *b {
                "1".to_string()
            } else {
                "0".to_string()
            }
        }
        Json::Null => "NULL".to_string(),
        Json::Array(_) => format_array_value(value),
        Json::Object(_) => format!("'{}'", escape(&value.to_string())),
    }
}

/// Renders a value as a quoted string literal, whatever its JSON type.
pub fn format_text(value: &Json) -> String {
    match value {
        Json::String(s) => format!("'{}'", escape(s)),
        other => format!("'{}'", escape(&other.to_string())),
    }
}

/// `(a, b, c)` with every item quoted as text.
pub fn format_array_value(value: &Json) -> String {
    match value {
        Json::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_text).collect();
            format!("({})", items.join(", "))
        }
        _ => format!("({})", format_text(value)),
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\\\""))
}

/// A WHERE predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Expr(String),
    And(Vec<Cond>),
    Or(Vec<Cond>),
}

impl Cond {
    pub fn is_empty(&self) -> bool {
        match self {
            Cond::Expr(s) => s.is_empty(),
            Cond::And(items) | Cond::Or(items) => items.iter().all(Cond::is_empty),
        }
    }

    pub fn render(&self) -> String {
        let (items, sep) = match self {
            Cond::Expr(s) => return s.clone(),
            Cond::And(items) => (items, " AND "),
            Cond::Or(items) => (items, " OR "),
        };
        let parts: Vec<String> = items.iter().filter(|c| !c.is_empty()).map(Cond::render).collect();
        match parts.len() {
            0 => String::new(),
            1 => parts.into_iter().next().unwrap_or_default(),
            _ => format!("({})", parts.join(sep)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: String,
    pub ascending: bool,
}

/// `ORDER BY <column> WITH FILL FROM .. TO .. STEP ..`, always the last
/// ordering term.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub column: String,
    pub from: String,
    pub to: String,
    pub step: String,
}

impl Fill {
    fn render(&self) -> String {
        format!(
            "{} ASC WITH FILL FROM {} TO {} STEP {}",
            self.column, self.from, self.to, self.step
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectBuilder {
    columns: Vec<String>,
    table: String,
    conds: Vec<Cond>,
    group_by: Vec<String>,
    order_by: Vec<OrderBy>,
    fill: Option<Fill>,
    limit: Option<i64>,
    offset: i64,
}

impl SelectBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn column(&mut self, column: impl Into<String>) -> &mut Self {
        self.columns.push(column.into());
        self
    }

    /// Appends `expr AS "alias"`.
    pub fn column_as(&mut self, expr: &str, alias: &str) -> &mut Self {
        self.column(format!("{expr} AS {}", quote_ident(alias)))
    }

    /// ANDs a predicate into WHERE.
    pub fn and_where(&mut self, cond: Cond) -> &mut Self {
        if !cond.is_empty() {
            self.conds.push(cond);
        }
        self
    }

    pub fn group_by(&mut self, expr: impl Into<String>) -> &mut Self {
        let expr = expr.into();
        if !self.group_by.contains(&expr) {
            self.group_by.push(expr);
        }
        self
    }

    pub fn groups(&self) -> &[String] {
        &self.group_by
    }

    pub fn order_by(&mut self, expr: impl Into<String>, ascending: bool) -> &mut Self {
        self.order_by.push(OrderBy {
            expr: expr.into(),
            ascending,
        });
        self
    }

    pub fn is_ordered(&self, expr: &str) -> bool {
        self.order_by.iter().any(|o| o.expr == expr)
    }

    pub fn fill(&mut self, fill: Fill) -> &mut Self {
        self.fill = Some(fill);
        self
    }

    pub fn limit(&mut self, limit: i64) -> &mut Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    pub fn offset(&mut self, offset: i64) -> &mut Self {
        self.offset = offset.max(0);
        self
    }

    /// The fill clause on its own, e.g. for logging next to the SQL.
    pub fn fill_clause(&self) -> Option<String> {
        self.fill.as_ref().map(|f| format!("ORDER BY {}", f.render()))
    }

    pub fn to_sql(&self) -> String {
        let mut sql = String::from("SELECT ");
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.table);

        let conds: Vec<String> = self.conds.iter().map(Cond::render).filter(|c| !c.is_empty()).collect();
        if !conds.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conds.join(" AND "));
        }
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }

        let mut orders: Vec<String> = self
            .order_by
            .iter()
            .map(|o| format!("{} {}", o.expr, if o.ascending { "ASC" } else { "DESC" }))
            .collect();
        if let Some(fill) = &self.fill {
            orders.push(fill.render());
        }
        if !orders.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if self.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", self.offset));
        }
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn literal_rendering() {
        assert_eq!(format_value(&json!("it's")), "'it\\'s'");
        assert_eq!(format_value(&json!(42)), "42");
        assert_eq!(format_value(&json!(true)), "1");
        assert_eq!(format_value(&json!(null)), "NULL");
        assert_eq!(format_text(&json!(123)), "'123'");
        assert_eq!(format_array_value(&json!(["a", 2])), "('a', '2')");
        assert_eq!(format_array_value(&json!("a")), "('a')");
    }

    #[test]
    fn nested_conditions_parenthesise() {
        let cond = Cond::And(vec![
            Cond::Expr("(a = 1)".into()),
            Cond::Or(vec![Cond::Expr("(b = 2)".into()), Cond::Expr("(c = 3)".into())]),
        ]);
        assert_eq!(cond.render(), "((a = 1) AND ((b = 2) OR (c = 3)))");
        assert_eq!(Cond::And(vec![Cond::Expr("x".into())]).render(), "x");
        assert!(Cond::Or(vec![Cond::And(Vec::new())]).is_empty());
    }

    #[test]
    fn full_statement() {
        let mut b = SelectBuilder::new(quote_ident("cpu"));
        b.column_as("MAX(x)", "m")
            .and_where(Cond::Expr("(a = 1)".into()))
            .and_where(Cond::And(Vec::new()))
            .and_where(Cond::Expr("(b = 2)".into()))
            .group_by("\"host\"")
            .group_by("\"host\"")
            .order_by("\"m\"", false)
            .fill(Fill {
                column: "\"bucket_timestamp\"".into(),
                from: "0".into(),
                to: "60".into(),
                step: "10".into(),
            })
            .limit(5)
            .offset(-3);
        assert_eq!(
            b.to_sql(),
            "SELECT MAX(x) AS \"m\" FROM \"cpu\" WHERE (a = 1) AND (b = 2) GROUP BY \"host\" \
             ORDER BY \"m\" DESC, \"bucket_timestamp\" ASC WITH FILL FROM 0 TO 60 STEP 10 LIMIT 5"
        );
        assert_eq!(
            b.fill_clause().as_deref(),
            Some("ORDER BY \"bucket_timestamp\" ASC WITH FILL FROM 0 TO 60 STEP 10")
        );
    }

    #[test]
    fn empty_select_is_star() {
        let mut b = SelectBuilder::new("\"t\"");
        b.limit(0).offset(10);
        assert_eq!(b.to_sql(), "SELECT * FROM \"t\" OFFSET 10");
    }
}
