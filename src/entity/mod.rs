//! Schema-driven entity types.
//!
//! An [`EntityType`] is the runtime representation of one reflected table:
//! its type name, its column structure and, through [`Crud`], the generic
//! data-access operations.

pub mod crud;
pub mod metadata;
pub mod model_map;
pub mod synth;
pub mod template;

pub use crud::Crud;
pub use metadata::MetadataRegistry;
pub use model_map::{ModelMap, create_instance_record};
pub use synth::{generate_all, reflect_table, synthesize, type_name_for};
pub use template::{ModelTemplate, TemplateBinding};

use crate::models::{ColumnDefinition, TableDescriptor};
use std::sync::Arc;

/// Entity type bound to one table of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    type_name: String,
    table: Arc<TableDescriptor>,
}

impl EntityType {
    pub fn new(type_name: impl Into<String>, table: Arc<TableDescriptor>) -> Self {
        Self {
            type_name: type_name.into(),
            table,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn table_name(&self) -> &str {
        &self.table.table_name
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.table.columns
    }
}

impl Crud for EntityType {
    fn table(&self) -> &TableDescriptor {
        &self.table
    }
}
