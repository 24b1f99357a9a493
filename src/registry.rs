//! Instance registry.
//!
//! The registry owns every configured instance: its connection handle, its
//! synthesized entity types and its table metadata. Configuration changes
//! are persisted to the store first and then applied by rebuilding exactly
//! the affected instance.
//!
//! # Locking
//!
//! - `sections` guards the in-memory copy of the store. Every mutation
//!   clones it, writes the clone to disk and only then replaces it, all
//!   while holding the lock.
//! - A per-name rebuild lock serializes the read config, open, generate and
//!   swap sequence for one instance, and on-demand synthesis against it.
//! - `instances` is held only to clone `Arc`s out or to swap entries, never
//!   across I/O.
//!
//! Lock order is rebuild lock, then `sections`, then `instances`.

use crate::config::RegistryOptions;
use crate::db::handle::ConnectionHandle;
use crate::db::session::Session;
use crate::db::statement;
use crate::entity::{
    EntityType, MetadataRegistry, ModelMap, ModelTemplate, generate_all, reflect_table,
    synthesize,
};
use crate::error::{DbError, DbResult};
use crate::models::instance::{
    connection_string, mask_connection_string, validate_instance_name, validate_section,
};
use crate::models::{REQUIRED_KEYS, Section};
use crate::store::{self, Sections};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

struct InstanceEntry {
    handle: Arc<ConnectionHandle>,
    models: ModelMap,
    metadata: MetadataRegistry,
}

pub struct InstanceRegistry {
    options: RegistryOptions,
    template: ModelTemplate,
    sections: Mutex<Sections>,
    instances: RwLock<HashMap<String, InstanceEntry>>,
    rebuild_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("config_path", &self.options.config_path)
            .field("template", &self.template.origin())
            .finish_non_exhaustive()
    }
}

impl InstanceRegistry {
    /// Load the store and build every configured instance.
    ///
    /// An instance that fails to build is logged and left without a handle;
    /// the registry still opens.
    pub async fn open(options: RegistryOptions) -> DbResult<Self> {
        options
            .pool_options
            .validate()
            .map_err(DbError::invalid_input)?;
        let template = ModelTemplate::load(options.template_path.as_deref())?;
        let sections = store::read(&options.config_path)?;
        let names: Vec<String> = sections.keys().cloned().collect();

        info!(
            path = %options.config_path.display(),
            instances = names.len(),
            "Opening instance registry"
        );

        let registry = Self {
            options,
            template,
            sections: Mutex::new(sections),
            instances: RwLock::new(HashMap::new()),
            rebuild_locks: Mutex::new(HashMap::new()),
        };

        for name in &names {
            if let Err(e) = registry.rebuild_one(name).await {
                warn!(instance = %name, error = %e, "Instance failed to build");
            }
        }
        Ok(registry)
    }

    /// Dispose every handle and drop all entity types.
    pub async fn close(&self) {
        let entries: Vec<(String, InstanceEntry)> =
            self.instances.write().await.drain().collect();
        for (name, entry) in entries {
            self.retire(&name, &entry.handle).await;
            debug!(instance = %name, "Instance closed");
        }
        info!("Instance registry closed");
    }

    /// Configured instance names, sorted.
    pub async fn list_names(&self) -> Vec<String> {
        self.sections.lock().await.keys().cloned().collect()
    }

    /// Persisted section of an instance.
    pub async fn config(&self, name: &str) -> DbResult<Section> {
        self.sections
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::instance_not_found(name))
    }

    pub async fn get_handle(&self, name: &str) -> DbResult<Arc<ConnectionHandle>> {
        self.instances
            .read()
            .await
            .get(name)
            .map(|entry| Arc::clone(&entry.handle))
            .ok_or_else(|| DbError::instance_not_found(name))
    }

    /// Caller-controlled session on an instance.
    pub async fn new_session(&self, name: &str) -> DbResult<Session> {
        self.get_handle(name).await?.begin().await
    }

    /// Health check of an instance. Only an unknown name is an error.
    pub async fn ping(&self, name: &str) -> DbResult<bool> {
        Ok(self.get_handle(name).await?.ping().await)
    }

    /// Snapshot of an instance's entity types.
    pub async fn models(&self, name: &str) -> DbResult<ModelMap> {
        self.instances
            .read()
            .await
            .get(name)
            .map(|entry| entry.models.clone())
            .ok_or_else(|| DbError::instance_not_found(name))
    }

    /// Add an instance. Only the required keys of `data` are stored.
    pub async fn add_instance(&self, name: &str, data: &Section, overwrite: bool) -> DbResult<()> {
        validate_instance_name(name)?;
        validate_section(data)?;
        let section: Section = REQUIRED_KEYS
            .iter()
            .filter_map(|key| data.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect();

        {
            let mut sections = self.sections.lock().await;
            if sections.contains_key(name) && !overwrite {
                return Err(DbError::already_exists(name));
            }
            let mut next = sections.clone();
            next.insert(name.to_string(), section);
            store::write_atomic(&self.options.config_path, &next)?;
            *sections = next;
        }

        info!(instance = %name, overwrite, "Instance added");
        self.rebuild_one(name).await
    }

    /// Merge `data` into an existing instance. The merged section must still
    /// carry every required key.
    pub async fn update_instance(&self, name: &str, data: &Section) -> DbResult<()> {
        {
            let mut sections = self.sections.lock().await;
            let mut merged = sections
                .get(name)
                .cloned()
                .ok_or_else(|| DbError::instance_not_found(name))?;
            merged.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
            validate_section(&merged)?;

            let mut next = sections.clone();
            next.insert(name.to_string(), merged);
            store::write_atomic(&self.options.config_path, &next)?;
            *sections = next;
        }

        info!(instance = %name, keys = data.len(), "Instance updated");
        self.rebuild_one(name).await
    }

    /// Remove an instance, disposing its handle and dropping its types.
    pub async fn remove_instance(&self, name: &str) -> DbResult<()> {
        {
            let mut sections = self.sections.lock().await;
            if !sections.contains_key(name) {
                return Err(DbError::instance_not_found(name));
            }
            let mut next = sections.clone();
            next.remove(name);
            store::write_atomic(&self.options.config_path, &next)?;
            *sections = next;
        }

        info!(instance = %name, "Instance removed");
        self.rebuild_one(name).await
    }

    /// Dispose a replaced or removed handle. Waits at most the acquire
    /// timeout for checked-out connections; the pool is closed either way
    /// and stragglers are closed as their sessions end.
    async fn retire(&self, name: &str, handle: &ConnectionHandle) {
        let wait = Duration::from_secs(self.options.pool_options.acquire_timeout_or_default());
        if tokio::time::timeout(wait, handle.dispose()).await.is_err() {
            warn!(
                instance = %name,
                url = %handle.url(),
                "Connections still checked out, closing them as they return"
            );
        }
    }

    /// Forget the rebuild lock for `name` unless another caller is waiting on it.
    async fn prune_rebuild_lock(&self, name: &str) {
        let mut locks = self.rebuild_locks.lock().await;
        // One reference in the map, one held by the caller.
        if locks.get(name).is_some_and(|lock| Arc::strong_count(lock) <= 2) {
            locks.remove(name);
        }
    }

    async fn rebuild_lock(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.rebuild_locks.lock().await;
        Arc::clone(locks.entry(name.to_string()).or_default())
    }

    /// Bring an instance in line with its persisted section.
    ///
    /// With no section the instance is torn down. Otherwise a new handle is
    /// opened and every table regenerated; the new entry is installed before
    /// the previous handle is disposed. If generation fails the new handle
    /// is still installed, with no entity types, and the error returned.
    pub async fn rebuild_one(&self, name: &str) -> DbResult<()> {
        let lock = self.rebuild_lock(name).await;
        let _guard = lock.lock().await;

        let section = self.sections.lock().await.get(name).cloned();
        let Some(section) = section else {
            let removed = self.instances.write().await.remove(name);
            if let Some(entry) = removed {
                self.retire(name, &entry.handle).await;
                debug!(instance = %name, "Instance torn down");
            }
            self.prune_rebuild_lock(name).await;
            return Ok(());
        };

        let url = connection_string(&section);
        let handle = match ConnectionHandle::open(&url, &self.options.pool_options) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                // The old handle no longer matches the configuration.
                let removed = self.instances.write().await.remove(name);
                if let Some(entry) = removed {
                    self.retire(name, &entry.handle).await;
                }
                return Err(e);
            }
        };

        let mut metadata = MetadataRegistry::new();
        let (models, result) = match generate_all(&handle, &self.template, &mut metadata).await {
            Ok(models) => (models, Ok(())),
            Err(e) => {
                warn!(
                    instance = %name,
                    url = %mask_connection_string(&url),
                    error = %e,
                    "Entity generation failed"
                );
                metadata.clear();
                (ModelMap::new(), Err(e))
            }
        };
        let tables = models.len();

        let previous = self.instances.write().await.insert(
            name.to_string(),
            InstanceEntry {
                handle,
                models,
                metadata,
            },
        );
        if let Some(entry) = previous {
            self.retire(name, &entry.handle).await;
        }

        info!(instance = %name, tables, "Instance rebuilt");
        result
    }

    /// Entity type for a table of an instance.
    ///
    /// A cached type is returned after a trivial round trip against its
    /// table. Otherwise the table is reflected and synthesized, cached, and
    /// checked the same way.
    pub async fn get_db_instance(&self, name: &str, table: &str) -> DbResult<Arc<EntityType>> {
        if let Some((handle, model)) = self.cached_model(name, table).await? {
            round_trip(&handle, model.table_name()).await?;
            return Ok(model);
        }

        let lock = self.rebuild_lock(name).await;
        let _guard = lock.lock().await;

        // A rebuild may have run while waiting for the lock.
        if let Some((handle, model)) = self.cached_model(name, table).await? {
            round_trip(&handle, model.table_name()).await?;
            return Ok(model);
        }
        let handle = self.get_handle(name).await?;

        let descriptor = reflect_table(&handle, table).await.map_err(|e| match e {
            DbError::Schema { .. } => DbError::table_not_found(table, name),
            other => other,
        })?;

        let model = {
            let mut instances = self.instances.write().await;
            let entry = instances
                .get_mut(name)
                .ok_or_else(|| DbError::instance_not_found(name))?;
            let model = Arc::new(synthesize(&self.template, &mut entry.metadata, descriptor)?);
            entry.models.insert(table, Arc::clone(&model));
            model
        };
        debug!(instance = %name, table = %table, "Entity type synthesized on demand");

        round_trip(&handle, table).await?;
        Ok(model)
    }

    async fn cached_model(
        &self,
        name: &str,
        table: &str,
    ) -> DbResult<Option<(Arc<ConnectionHandle>, Arc<EntityType>)>> {
        let instances = self.instances.read().await;
        let entry = instances
            .get(name)
            .ok_or_else(|| DbError::instance_not_found(name))?;
        Ok(entry
            .models
            .resolve(table)
            .map(|model| (Arc::clone(&entry.handle), Arc::clone(model))))
    }
}

/// `SELECT 1 FROM table LIMIT 1` in its own session.
async fn round_trip(handle: &ConnectionHandle, table: &str) -> DbResult<()> {
    let stmt = statement::touch(handle.db_type(), table);
    handle
        .scoped(move |session| Box::pin(async move { session.fetch_all(&stmt).await.map(|_| ()) }))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InstanceConfig;
    use tempfile::TempDir;

    fn options(dir: &TempDir) -> RegistryOptions {
        RegistryOptions::new(dir.path().join("source.toml"))
    }

    #[tokio::test]
    async fn test_open_empty_store() {
        let dir = TempDir::new().unwrap();
        let registry = InstanceRegistry::open(options(&dir)).await.unwrap();
        assert!(registry.list_names().await.is_empty());
        assert!(registry.get_handle("main").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_add_rejects_missing_keys_without_persisting() {
        let dir = TempDir::new().unwrap();
        let registry = InstanceRegistry::open(options(&dir)).await.unwrap();

        let mut data = Section::new();
        data.insert("source".into(), "sqlite".into());
        let err = registry.add_instance("main", &data, false).await.unwrap_err();
        match err {
            DbError::Validation { missing, .. } => {
                assert_eq!(missing, vec!["username", "password", "host", "port", "base"])
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(registry.list_names().await.is_empty());
        assert!(!dir.path().join("source.toml").exists());
    }

    #[tokio::test]
    async fn test_add_stores_required_keys_only() {
        let dir = TempDir::new().unwrap();
        let registry = InstanceRegistry::open(options(&dir)).await.unwrap();

        let mut data = InstanceConfig::sqlite("").to_section();
        data.insert("comment".into(), "scratch".into());
        registry.add_instance("mem", &data, false).await.unwrap();

        let stored = registry.config("mem").await.unwrap();
        assert_eq!(stored.len(), REQUIRED_KEYS.len());
        assert!(!stored.contains_key("comment"));
        assert!(registry.ping("mem").await.unwrap());
        registry.close().await;
    }

    #[tokio::test]
    async fn test_remove_forgets_rebuild_lock() {
        let dir = TempDir::new().unwrap();
        let registry = InstanceRegistry::open(options(&dir)).await.unwrap();

        let data = InstanceConfig::sqlite("").to_section();
        registry.add_instance("mem", &data, false).await.unwrap();
        assert!(registry.rebuild_locks.lock().await.contains_key("mem"));

        registry.remove_instance("mem").await.unwrap();
        assert!(registry.rebuild_locks.lock().await.is_empty());

        // Tearing down an unknown name leaves nothing behind either.
        registry.rebuild_one("ghost").await.unwrap();
        assert!(registry.rebuild_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_pool_options_rejected() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir).with_pool_options(crate::config::PoolOptions {
            max_connections: Some(0),
            ..Default::default()
        });
        let err = InstanceRegistry::open(opts).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }
}
