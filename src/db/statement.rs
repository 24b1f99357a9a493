//! Statement construction.
//!
//! Entity operations are expressed as parameterized statements over a single
//! table. Identifiers are quoted for the dialect and every value is bound as
//! a parameter, never interpolated.

use crate::models::{DatabaseType, FieldValue, Fields};

/// SQL text plus the values bound to its placeholders, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<FieldValue>,
}

/// Quote an identifier for the dialect.
pub fn quote_ident(db: DatabaseType, ident: &str) -> String {
    match db {
        DatabaseType::MySQL => format!("`{}`", ident.replace('`', "``")),
        DatabaseType::PostgreSQL | DatabaseType::SQLite => {
            format!("\"{}\"", ident.replace('"', "\"\""))
        }
    }
}

/// Whether `INSERT ... RETURNING *` is available.
pub fn supports_returning(db: DatabaseType) -> bool {
    !matches!(db, DatabaseType::MySQL)
}

struct Builder {
    db: DatabaseType,
    sql: String,
    params: Vec<FieldValue>,
}

impl Builder {
    fn new(db: DatabaseType) -> Self {
        Self {
            db,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn ident(&self, name: &str) -> String {
        quote_ident(self.db, name)
    }

    fn bind(&mut self, value: &FieldValue) -> String {
        self.params.push(value.clone());
        match self.db {
            DatabaseType::PostgreSQL => format!("${}", self.params.len()),
            DatabaseType::MySQL | DatabaseType::SQLite => "?".to_string(),
        }
    }

    /// Conjunction of equality predicates. A null filter matches NULL.
    fn push_where(&mut self, filters: &Fields) {
        if filters.is_empty() {
            return;
        }
        let predicates: Vec<String> = filters
            .iter()
            .map(|(column, value)| {
                let column = self.ident(column);
                if value.is_null() {
                    format!("{} IS NULL", column)
                } else {
                    format!("{} = {}", column, self.bind(value))
                }
            })
            .collect();
        self.sql.push_str(" WHERE ");
        self.sql.push_str(&predicates.join(" AND "));
    }

    fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// `INSERT` of one row, with `RETURNING *` where the dialect supports it.
pub fn insert(db: DatabaseType, table: &str, fields: &Fields) -> Statement {
    let mut b = Builder::new(db);
    b.sql = format!("INSERT INTO {}", b.ident(table));

    if fields.is_empty() {
        match db {
            DatabaseType::MySQL => b.sql.push_str(" () VALUES ()"),
            _ => b.sql.push_str(" DEFAULT VALUES"),
        }
    } else {
        let columns: Vec<String> = fields.keys().map(|c| b.ident(c)).collect();
        let placeholders: Vec<String> = fields.values().map(|v| b.bind(v)).collect();
        b.sql.push_str(&format!(
            " ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        ));
    }

    if supports_returning(db) {
        b.sql.push_str(" RETURNING *");
    }
    b.finish()
}

/// `SELECT *` filtered by equality, optionally limited.
pub fn select(db: DatabaseType, table: &str, filters: &Fields, limit: Option<u32>) -> Statement {
    let mut b = Builder::new(db);
    b.sql = format!("SELECT * FROM {}", b.ident(table));
    b.push_where(filters);
    if let Some(limit) = limit {
        b.sql.push_str(&format!(" LIMIT {}", limit));
    }
    b.finish()
}

/// Bulk `UPDATE` of every row matching `filters`.
pub fn update(db: DatabaseType, table: &str, filters: &Fields, values: &Fields) -> Statement {
    let mut b = Builder::new(db);
    let assignments: Vec<String> = values
        .iter()
        .map(|(column, value)| format!("{} = {}", b.ident(column), b.bind(value)))
        .collect();
    b.sql = format!(
        "UPDATE {} SET {}",
        b.ident(table),
        assignments.join(", ")
    );
    b.push_where(filters);
    b.finish()
}

/// Bulk `DELETE` of every row matching `filters`.
pub fn delete(db: DatabaseType, table: &str, filters: &Fields) -> Statement {
    let mut b = Builder::new(db);
    b.sql = format!("DELETE FROM {}", b.ident(table));
    b.push_where(filters);
    b.finish()
}

/// Trivial round trip against a table, used to check it is still reachable.
pub fn touch(db: DatabaseType, table: &str) -> Statement {
    Statement {
        sql: format!("SELECT 1 FROM {} LIMIT 1", quote_ident(db, table)),
        params: Vec::new(),
    }
}
