//! Minimal statement builder that renders placeholders per dialect.

use sqlx::any::AnyArguments;
use sqlx::query::Query;
use sqlx::Any;

use super::dialect::SqlDialect;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlValue {
    Text(String),
    OptText(Option<String>),
    Int(i64),
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        SqlValue::OptText(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

pub(crate) struct SqlBuilder {
    dialect: SqlDialect,
    sql: String,
    values: Vec<SqlValue>,
}

impl SqlBuilder {
    pub fn new(dialect: SqlDialect, initial: &str) -> Self {
        Self {
            dialect,
            sql: initial.to_string(),
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, fragment: &str) -> &mut Self {
        self.sql.push_str(fragment);
        self
    }

    pub fn push_bind(&mut self, value: impl Into<SqlValue>) -> &mut Self {
        self.values.push(value.into());
        let placeholder = self.dialect.placeholder(self.values.len());
        self.sql.push_str(&placeholder);
        self
    }

    /// Comma-separated placeholders for each value.
    pub fn push_bind_list<V: Into<SqlValue>>(
        &mut self,
        values: impl IntoIterator<Item = V>,
    ) -> &mut Self {
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.push_bind(value);
        }
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn build(&self) -> Query<'_, Any, AnyArguments<'_>> {
        let mut query = sqlx::query(&self.sql);
        for value in &self.values {
            query = match value {
                SqlValue::Text(v) => query.bind(v.clone()),
                SqlValue::OptText(v) => query.bind(v.clone()),
                SqlValue::Int(v) => query.bind(*v),
            };
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_follow_bind_order() {
        let mut pg = SqlBuilder::new(SqlDialect::Postgres, "SELECT * FROM files WHERE tenant_id = ");
        pg.push_bind("t1").push(" AND tag IN (").push_bind_list(["a", "b"]).push(")");
        assert_eq!(
            pg.sql(),
            "SELECT * FROM files WHERE tenant_id = $1 AND tag IN ($2, $3)"
        );

        let mut my = SqlBuilder::new(SqlDialect::MySql, "x = ");
        my.push_bind(1i64).push(" AND y = ").push_bind("z");
        assert_eq!(my.sql(), "x = ? AND y = ?");
    }
}
