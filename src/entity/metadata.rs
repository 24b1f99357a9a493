//! Per-instance table metadata.
//!
//! Each instance keeps its own registry of reflected table structures.
//! Registering a table that is already present is a conflict, so
//! re-synthesis evicts the old entry first.

use crate::error::{DbError, DbResult};
use crate::models::TableDescriptor;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct MetadataRegistry {
    tables: HashMap<String, Arc<TableDescriptor>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table's structure. Fails if the table is already defined.
    pub fn register(&mut self, descriptor: TableDescriptor) -> DbResult<Arc<TableDescriptor>> {
        if self.tables.contains_key(&descriptor.table_name) {
            return Err(DbError::schema(
                format!("Table '{}' is already defined", descriptor.table_name),
                descriptor.table_name,
            ));
        }
        let descriptor = Arc::new(descriptor);
        self.tables
            .insert(descriptor.table_name.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn evict(&mut self, table: &str) -> Option<Arc<TableDescriptor>> {
        self.tables.remove(table)
    }

    pub fn get(&self, table: &str) -> Option<&Arc<TableDescriptor>> {
        self.tables.get(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}
