//! Generic data access over a reflected table.
//!
//! Every operation runs inside a caller-provided [`Session`] and never
//! commits; the transaction boundary belongs to the caller.

use crate::db::session::Session;
use crate::db::statement::{self, supports_returning};
use crate::error::{DbError, DbResult};
use crate::models::{Fields, Record, TableDescriptor};
use std::future::Future;

/// CRUD capability for any type bound to a [`TableDescriptor`].
///
/// Implementors only provide [`Crud::table`]; the operations are built from
/// the descriptor's table name and columns.
pub trait Crud: Send + Sync {
    fn table(&self) -> &TableDescriptor;

    /// Insert one row and return it as stored.
    fn create<'a>(
        &'a self,
        session: &'a mut Session,
        fields: Fields,
    ) -> impl Future<Output = DbResult<Record>> + Send + 'a {
        async move {
            let table = self.table();
            check_columns(table, &fields)?;
            let db = session.db_type();
            let stmt = statement::insert(db, &table.table_name, &fields);

            if supports_returning(db) {
                return session
                    .fetch_optional(&stmt)
                    .await?
                    .ok_or_else(|| DbError::internal("Insert returned no row"));
            }

            let outcome = session.execute(&stmt).await?;
            match key_filter(table, &fields, outcome.last_insert_id) {
                Some(filter) => {
                    let reload = statement::select(db, &table.table_name, &filter, Some(1));
                    Ok(session
                        .fetch_optional(&reload)
                        .await?
                        .unwrap_or_else(|| to_record(&fields)))
                }
                None => Ok(to_record(&fields)),
            }
        }
    }

    /// Every row, in the order the engine yields them.
    fn read_all<'a>(
        &'a self,
        session: &'a mut Session,
    ) -> impl Future<Output = DbResult<Vec<Record>>> + Send + 'a {
        async move {
            let table = self.table();
            let stmt = statement::select(session.db_type(), &table.table_name, &Fields::new(), None);
            session.fetch_all(&stmt).await
        }
    }

    /// First row matching every filter, if any.
    fn read_one<'a>(
        &'a self,
        session: &'a mut Session,
        filters: Fields,
    ) -> impl Future<Output = DbResult<Option<Record>>> + Send + 'a {
        async move {
            let table = self.table();
            check_columns(table, &filters)?;
            let stmt = statement::select(session.db_type(), &table.table_name, &filters, Some(1));
            session.fetch_optional(&stmt).await
        }
    }

    /// Statement-level update. Records read earlier are not refreshed.
    fn update<'a>(
        &'a self,
        session: &'a mut Session,
        filters: Fields,
        values: Fields,
    ) -> impl Future<Output = DbResult<u64>> + Send + 'a {
        async move {
            let table = self.table();
            if values.is_empty() {
                return Err(DbError::validation(format!(
                    "No values to update in table '{}'",
                    table.table_name
                )));
            }
            check_columns(table, &filters)?;
            check_columns(table, &values)?;
            let stmt = statement::update(session.db_type(), &table.table_name, &filters, &values);
            Ok(session.execute(&stmt).await?.rows_affected)
        }
    }

    /// Statement-level delete. Records read earlier are not refreshed.
    fn delete<'a>(
        &'a self,
        session: &'a mut Session,
        filters: Fields,
    ) -> impl Future<Output = DbResult<u64>> + Send + 'a {
        async move {
            let table = self.table();
            check_columns(table, &filters)?;
            let stmt = statement::delete(session.db_type(), &table.table_name, &filters);
            Ok(session.execute(&stmt).await?.rows_affected)
        }
    }
}

/// Fail on the first column the table does not have.
pub fn check_columns(table: &TableDescriptor, fields: &Fields) -> DbResult<()> {
    match fields.keys().find(|column| !table.has_column(column)) {
        Some(column) => Err(DbError::validation(format!(
            "Unknown column '{}' for table '{}'",
            column, table.table_name
        ))),
        None => Ok(()),
    }
}

/// Primary key filter for a row just inserted without `RETURNING`.
fn key_filter(table: &TableDescriptor, fields: &Fields, last_insert_id: Option<i64>) -> Option<Fields> {
    let mut filter = Fields::new();
    for column in &table.primary_key {
        match fields.get(column) {
            Some(value) => {
                filter.insert(column.clone(), value.clone());
            }
            // Only a single-column key can be generated by the engine
            None if table.primary_key.len() == 1 => {
                filter.insert(column.clone(), last_insert_id?.into());
            }
            None => return None,
        }
    }
    if filter.is_empty() { None } else { Some(filter) }
}

fn to_record(fields: &Fields) -> Record {
    fields
        .iter()
        .map(|(column, value)| (column.clone(), value.to_json()))
        .collect()
}
