//! Transactional sessions.
//!
//! A [`Session`] holds one pooled connection inside an open transaction until
//! it is committed or rolled back. Dropping an unfinished session rolls it
//! back and returns the connection to its pool.

use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::pool::DbPool;
use crate::db::statement::Statement;
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Record};
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use tracing::debug;

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    /// Begin a transaction on a pooled connection.
    pub async fn begin(pool: &DbPool) -> DbResult<Self> {
        Ok(match pool {
            DbPool::MySql(p) => DbTransaction::MySql(p.begin().await?),
            DbPool::Postgres(p) => DbTransaction::Postgres(p.begin().await?),
            DbPool::SQLite(p) => DbTransaction::SQLite(p.begin().await?),
        })
    }

    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Generated key of the last inserted row, where the dialect reports one
    pub last_insert_id: Option<i64>,
}

/// A unit of work against one instance.
pub struct Session {
    tx: DbTransaction,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("db_type", &self.db_type())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub async fn begin(pool: &DbPool) -> DbResult<Self> {
        let tx = DbTransaction::begin(pool).await?;
        debug!(db_type = %tx.db_type(), "Session started");
        Ok(Self { tx })
    }

    pub fn db_type(&self) -> DatabaseType {
        self.tx.db_type()
    }

    /// Execute a statement that returns no rows.
    pub async fn execute(&mut self, stmt: &Statement) -> DbResult<ExecOutcome> {
        debug!(sql = %stmt.sql, params = stmt.params.len(), "Executing statement");
        match &mut self.tx {
            DbTransaction::MySql(tx) => {
                let mut query = sqlx::query(&stmt.sql);
                for value in &stmt.params {
                    query = bind_mysql_param(query, value);
                }
                let result = query.execute(&mut **tx).await?;
                Ok(ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: i64::try_from(result.last_insert_id())
                        .ok()
                        .filter(|id| *id > 0),
                })
            }
            DbTransaction::Postgres(tx) => {
                let mut query = sqlx::query(&stmt.sql);
                for value in &stmt.params {
                    query = bind_postgres_param(query, value);
                }
                let result = query.execute(&mut **tx).await?;
                Ok(ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: None,
                })
            }
            DbTransaction::SQLite(tx) => {
                let mut query = sqlx::query(&stmt.sql);
                for value in &stmt.params {
                    query = bind_sqlite_param(query, value);
                }
                let result = query.execute(&mut **tx).await?;
                Ok(ExecOutcome {
                    rows_affected: result.rows_affected(),
                    last_insert_id: Some(result.last_insert_rowid()),
                })
            }
        }
    }

    /// Fetch every row a statement yields, in the order the engine yields them.
    pub async fn fetch_all(&mut self, stmt: &Statement) -> DbResult<Vec<Record>> {
        debug!(sql = %stmt.sql, params = stmt.params.len(), "Fetching rows");
        match &mut self.tx {
            DbTransaction::MySql(tx) => {
                let mut query = sqlx::query(&stmt.sql);
                for value in &stmt.params {
                    query = bind_mysql_param(query, value);
                }
                let rows = query.fetch_all(&mut **tx).await?;
                Ok(rows.iter().map(RowToJson::to_record).collect())
            }
            DbTransaction::Postgres(tx) => {
                let mut query = sqlx::query(&stmt.sql);
                for value in &stmt.params {
                    query = bind_postgres_param(query, value);
                }
                let rows = query.fetch_all(&mut **tx).await?;
                Ok(rows.iter().map(RowToJson::to_record).collect())
            }
            DbTransaction::SQLite(tx) => {
                let mut query = sqlx::query(&stmt.sql);
                for value in &stmt.params {
                    query = bind_sqlite_param(query, value);
                }
                let rows = query.fetch_all(&mut **tx).await?;
                Ok(rows.iter().map(RowToJson::to_record).collect())
            }
        }
    }

    /// Fetch the first row a statement yields, if any.
    pub async fn fetch_optional(&mut self, stmt: &Statement) -> DbResult<Option<Record>> {
        debug!(sql = %stmt.sql, params = stmt.params.len(), "Fetching one row");
        match &mut self.tx {
            DbTransaction::MySql(tx) => {
                let mut query = sqlx::query(&stmt.sql);
                for value in &stmt.params {
                    query = bind_mysql_param(query, value);
                }
                let row = query.fetch_optional(&mut **tx).await?;
                Ok(row.as_ref().map(RowToJson::to_record))
            }
            DbTransaction::Postgres(tx) => {
                let mut query = sqlx::query(&stmt.sql);
                for value in &stmt.params {
                    query = bind_postgres_param(query, value);
                }
                let row = query.fetch_optional(&mut **tx).await?;
                Ok(row.as_ref().map(RowToJson::to_record))
            }
            DbTransaction::SQLite(tx) => {
                let mut query = sqlx::query(&stmt.sql);
                for value in &stmt.params {
                    query = bind_sqlite_param(query, value);
                }
                let row = query.fetch_optional(&mut **tx).await?;
                Ok(row.as_ref().map(RowToJson::to_record))
            }
        }
    }

    /// Commit the session's transaction.
    pub async fn commit(self) -> DbResult<()> {
        match self.tx {
            DbTransaction::MySql(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.commit().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.commit().await.map_err(DbError::from),
        }
    }

    /// Roll back the session's transaction.
    pub async fn rollback(self) -> DbResult<()> {
        match self.tx {
            DbTransaction::MySql(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::Postgres(tx) => tx.rollback().await.map_err(DbError::from),
            DbTransaction::SQLite(tx) => tx.rollback().await.map_err(DbError::from),
        }
    }
}
