//! Data models.
//!
//! This module re-exports all model types used throughout the crate.

pub mod instance;
pub mod schema;
pub mod value;

// Re-export commonly used types
pub use instance::{DatabaseType, InstanceConfig, REQUIRED_KEYS, Section};
pub use schema::{ColumnDefinition, TableDescriptor};
pub use value::{FieldValue, Fields, Record, fields};
