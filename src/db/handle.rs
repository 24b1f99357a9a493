//! Connection handles.
//!
//! A [`ConnectionHandle`] owns the pool for one instance. It hands out
//! transactional sessions, runs scoped units of work, and exposes the
//! generic CRUD surface over any [`Crud`] entity.
//!
//! # Scoped sessions
//!
//! ```ignore
//! let name = handle
//!     .scoped(|session| {
//!         Box::pin(async move {
//!             let row = users.read_one(session, filters).await?;
//!             Ok(row)
//!         })
//!     })
//!     .await?;
//! ```
//!
//! The closure's `Ok` commits, its `Err` rolls back. Either way the
//! connection goes back to the pool.

use crate::config::PoolOptions;
use crate::db::pool::{DbPool, open_pool};
use crate::db::schema::SchemaInspector;
use crate::db::session::Session;
use crate::entity::Crud;
use crate::error::{DbError, DbResult};
use crate::models::instance::mask_connection_string;
use crate::models::{DatabaseType, Fields, Record, TableDescriptor};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub struct ConnectionHandle {
    pool: DbPool,
    /// Connection string with the password masked, safe to log
    url: String,
    acquire_timeout_secs: u32,
    closed: AtomicBool,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("db_type", &self.db_type())
            .field("url", &self.url)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ConnectionHandle {
    /// Create a handle for a connection string.
    ///
    /// The pool connects lazily; an unreachable target is only reported by
    /// the first operation that needs a connection.
    pub fn open(connection_string: &str, options: &PoolOptions) -> DbResult<Self> {
        let pool = open_pool(connection_string, options)?;
        let url = mask_connection_string(connection_string);
        info!(url = %url, db_type = %pool.db_type(), "Connection handle opened");
        Ok(Self {
            pool,
            url,
            acquire_timeout_secs: u32::try_from(options.acquire_timeout_or_default())
                .unwrap_or(u32::MAX),
            closed: AtomicBool::new(false),
        })
    }

    pub fn db_type(&self) -> DatabaseType {
        self.pool.db_type()
    }

    /// Masked connection string.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn live_pool(&self) -> DbResult<&DbPool> {
        if self.is_closed() {
            return Err(DbError::closed_handle(&self.url));
        }
        Ok(&self.pool)
    }

    /// Attach this handle's URL and acquire timeout to pool errors.
    fn pool_context(&self, err: DbError) -> DbError {
        match err {
            DbError::ClosedHandle { .. } => DbError::closed_handle(&self.url),
            DbError::Timeout { operation, .. } => {
                DbError::timeout(operation, self.acquire_timeout_secs)
            }
            other => other,
        }
    }

    /// Round trip a trivial statement. Never fails: any error, including a
    /// disposed handle, reads as `false`.
    pub async fn ping(&self) -> bool {
        let Ok(pool) = self.live_pool() else {
            return false;
        };
        let result = impl_db_dispatch!(pool, {
            MySql(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
            Postgres(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
            SQLite(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
        });
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Ping failed");
                false
            }
        }
    }

    /// Begin a caller-controlled session. Dropping it without commit rolls
    /// back.
    pub async fn begin(&self) -> DbResult<Session> {
        let pool = self.live_pool()?;
        Session::begin(pool)
            .await
            .map_err(|e| self.pool_context(e))
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// A rollback failure is logged and the original error returned.
    pub async fn scoped<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send,
        F: for<'s> FnOnce(&'s mut Session) -> BoxFuture<'s, DbResult<T>>,
    {
        let mut session = self.begin().await?;
        match f(&mut session).await {
            Ok(value) => {
                session.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    warn!(
                        url = %self.url,
                        error = %rollback_err,
                        "Rollback failed after error"
                    );
                }
                Err(err)
            }
        }
    }

    /// Close the pool. Idempotent; waits for checked-out connections to be
    /// returned.
    pub async fn dispose(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.close().await;
        info!(url = %self.url, "Connection handle disposed");
    }

    pub async fn list_tables(&self) -> DbResult<Vec<String>> {
        let pool = self.live_pool()?;
        SchemaInspector::list_tables(pool)
            .await
            .map_err(|e| self.pool_context(e))
    }

    pub async fn describe_table(&self, table: &str) -> DbResult<TableDescriptor> {
        let pool = self.live_pool()?;
        SchemaInspector::describe_table(pool, table)
            .await
            .map_err(|e| self.pool_context(e))
    }

    pub async fn create<M>(&self, model: &Arc<M>, fields: Fields) -> DbResult<Record>
    where
        M: Crud + 'static,
    {
        let model = Arc::clone(model);
        debug!(table = %model.table().table_name, "Scoped create");
        self.scoped(move |session| Box::pin(async move { model.create(session, fields).await }))
            .await
    }

    pub async fn read_all<M>(&self, model: &Arc<M>) -> DbResult<Vec<Record>>
    where
        M: Crud + 'static,
    {
        let model = Arc::clone(model);
        self.scoped(move |session| Box::pin(async move { model.read_all(session).await }))
            .await
    }

    pub async fn read_one<M>(&self, model: &Arc<M>, filters: Fields) -> DbResult<Option<Record>>
    where
        M: Crud + 'static,
    {
        let model = Arc::clone(model);
        self.scoped(move |session| {
            Box::pin(async move { model.read_one(session, filters).await })
        })
        .await
    }

    /// Bulk update of rows matching `filters`; returns the affected count.
    pub async fn update<M>(&self, model: &Arc<M>, filters: Fields, values: Fields) -> DbResult<u64>
    where
        M: Crud + 'static,
    {
        let model = Arc::clone(model);
        self.scoped(move |session| {
            Box::pin(async move { model.update(session, filters, values).await })
        })
        .await
    }

    /// Bulk delete of rows matching `filters`; returns the affected count.
    pub async fn delete<M>(&self, model: &Arc<M>, filters: Fields) -> DbResult<u64>
    where
        M: Crud + 'static,
    {
        let model = Arc::clone(model);
        self.scoped(move |session| Box::pin(async move { model.delete(session, filters).await }))
            .await
    }
}
