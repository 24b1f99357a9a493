//! Per-instance map of synthesized entity types.

use crate::db::session::Session;
use crate::entity::{Crud, EntityType};
use crate::error::{DbError, DbResult};
use crate::models::{Fields, Record};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Table name to entity type. Keys are case-sensitive.
#[derive(Debug, Clone, Default)]
pub struct ModelMap {
    models: BTreeMap<String, Arc<EntityType>>,
}

impl ModelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the type for `table`, returning the previous one.
    pub fn insert(&mut self, table: impl Into<String>, model: Arc<EntityType>) -> Option<Arc<EntityType>> {
        self.models.insert(table.into(), model)
    }

    /// Exact lookup.
    pub fn get(&self, table: &str) -> Option<&Arc<EntityType>> {
        self.models.get(table)
    }

    /// Lookup by exact, then lower-case, then upper-case, then
    /// case-insensitive match.
    pub fn resolve(&self, table: &str) -> Option<&Arc<EntityType>> {
        self.models
            .get(table)
            .or_else(|| self.models.get(&table.to_lowercase()))
            .or_else(|| self.models.get(&table.to_uppercase()))
            .or_else(|| {
                self.models
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(table))
                    .map(|(_, model)| model)
            })
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<EntityType>)> {
        self.models.iter().map(|(name, model)| (name.as_str(), model))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Insert `data` into `table` through the table's entity type, inside the
/// caller's session.
pub async fn create_instance_record(
    models: &ModelMap,
    session: &mut Session,
    table: &str,
    data: Fields,
) -> DbResult<Record> {
    if data.is_empty() {
        return Err(DbError::validation(format!(
            "No data provided for table '{}'",
            table
        )));
    }
    let model = models
        .resolve(table)
        .ok_or_else(|| DbError::model_not_found(table))?;
    model.create(session, data).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::synth::type_name_for;
    use crate::models::{ColumnDefinition, TableDescriptor};

    fn entity(table: &str) -> Arc<EntityType> {
        let descriptor = TableDescriptor::new(table, vec![ColumnDefinition::new("id", "INTEGER", false)]);
        Arc::new(EntityType::new(type_name_for(table), Arc::new(descriptor)))
    }

    fn map(tables: &[&str]) -> ModelMap {
        let mut models = ModelMap::new();
        for table in tables {
            models.insert(*table, entity(table));
        }
        models
    }

    #[test]
    fn test_resolve_fallbacks() {
        let models = map(&["users", "ORDERS", "MixedCase"]);
        assert_eq!(models.resolve("users").unwrap().table_name(), "users");
        assert_eq!(models.resolve("USERS").unwrap().table_name(), "users");
        assert_eq!(models.resolve("orders").unwrap().table_name(), "ORDERS");
        assert_eq!(models.resolve("mixedcase").unwrap().table_name(), "MixedCase");
        assert!(models.resolve("missing").is_none());
    }

    #[test]
    fn test_exact_match_wins() {
        let models = map(&["users", "Users"]);
        assert_eq!(models.resolve("Users").unwrap().table_name(), "Users");
        assert_eq!(models.resolve("USERS").unwrap().table_name(), "users");
    }

    #[test]
    fn test_insert_replaces() {
        let mut models = map(&["users"]);
        assert!(models.insert("users", entity("users")).is_some());
        assert_eq!(models.len(), 1);
        assert_eq!(models.table_names().collect::<Vec<_>>(), vec!["users"]);
    }
}
