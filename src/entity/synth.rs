//! Entity type synthesis.
//!
//! Reflects tables through a live handle and binds each one to an
//! [`EntityType`] using the instance's template and metadata registry.

use crate::db::handle::ConnectionHandle;
use crate::entity::metadata::MetadataRegistry;
use crate::entity::model_map::ModelMap;
use crate::entity::template::ModelTemplate;
use crate::entity::EntityType;
use crate::error::{DbError, DbResult};
use crate::models::TableDescriptor;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Type name for a table: first character upper-cased, nothing else changed.
pub fn type_name_for(table: &str) -> String {
    let mut chars = table.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Reflect one table. Fails with a schema error if the live schema does not
/// list it.
pub async fn reflect_table(handle: &ConnectionHandle, table: &str) -> DbResult<TableDescriptor> {
    let tables = handle.list_tables().await?;
    if !tables.iter().any(|t| t == table) {
        return Err(DbError::schema(format!("Table '{}' not found", table), table));
    }
    handle.describe_table(table).await
}

/// Bind a reflected table to a new entity type.
///
/// Metadata previously registered for the table is evicted first, so
/// synthesizing the same table again replaces rather than conflicts.
pub fn synthesize(
    template: &ModelTemplate,
    metadata: &mut MetadataRegistry,
    descriptor: TableDescriptor,
) -> DbResult<EntityType> {
    let binding = template.bind(&type_name_for(&descriptor.table_name), &descriptor.table_name)?;
    if metadata.evict(&descriptor.table_name).is_some() {
        debug!(table = %descriptor.table_name, "Evicted previous table metadata");
    }
    let table = metadata.register(descriptor)?;
    debug!(table = %table.table_name, type_name = %binding.type_name, "Synthesized entity type");
    Ok(EntityType::new(binding.type_name, table))
}

/// Reflect and synthesize every table of the handle's schema.
pub async fn generate_all(
    handle: &ConnectionHandle,
    template: &ModelTemplate,
    metadata: &mut MetadataRegistry,
) -> DbResult<ModelMap> {
    let mut models = ModelMap::new();
    let mut type_names: HashMap<String, String> = HashMap::new();

    for table in handle.list_tables().await? {
        let descriptor = handle.describe_table(&table).await?;
        let entity = synthesize(template, metadata, descriptor)?;
        if let Some(other) = type_names.insert(entity.type_name().to_string(), table.clone()) {
            warn!(
                type_name = %entity.type_name(),
                table = %table,
                other_table = %other,
                "Tables share a type name"
            );
        }
        models.insert(table, Arc::new(entity));
    }
    Ok(models)
}
