//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pools and handles
//! - Transactional sessions
//! - Statement building and parameter binding
//! - Schema introspection
//! - Type mappings
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod handle;
pub mod params;
pub mod pool;
pub mod schema;
pub mod session;
pub mod statement;
pub mod types;

pub use handle::ConnectionHandle;
pub use pool::{DbPool, open_pool};
pub use schema::SchemaInspector;
pub use session::{ExecOutcome, Session};
pub use statement::Statement;
