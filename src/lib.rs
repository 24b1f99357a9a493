//! dynaconn
//!
//! A registry of named database instances (SQLite, PostgreSQL, MySQL).
//! Each instance's tables are reflected at runtime into entity types that
//! support generic CRUD through the instance's connection handle.

pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod models;
pub mod registry;
pub mod store;

pub use config::{Config, PoolOptions, RegistryOptions};
pub use db::{ConnectionHandle, Session};
pub use entity::{Crud, EntityType, ModelMap, create_instance_record};
pub use error::{DbError, DbResult};
pub use registry::InstanceRegistry;
