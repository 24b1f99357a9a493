//! Error types for the instance registry.
//!
//! All fallible operations return [`DbResult`]. Variants carry enough context
//! (instance, table, missing keys) for the caller to report the failure
//! without re-deriving it.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        /// Required keys absent from the submitted configuration
        missing: Vec<String>,
    },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Instance '{name}' already exists. Use overwrite to replace it.")]
    AlreadyExists { name: String },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Connection handle for '{target}' is closed")]
    ClosedHandle { target: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u32,
    },

    #[error("Configuration store error: {message} ({path})")]
    Config { message: String, path: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a validation error listing the missing required keys.
    pub fn missing_keys(missing: Vec<String>) -> Self {
        Self::Validation {
            message: format!("Missing required keys: {}", missing.join(", ")),
            missing,
        }
    }

    /// Create a validation error without missing-key details.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            missing: Vec::new(),
        }
    }

    /// Create an instance not found error.
    pub fn instance_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Instance",
            name: name.into(),
        }
    }

    /// Create a table not found error, naming the instance it was looked up in.
    pub fn table_not_found(table: impl AsRef<str>, instance: impl AsRef<str>) -> Self {
        Self::NotFound {
            kind: "Table",
            name: format!("{}' in database '{}", table.as_ref(), instance.as_ref()),
        }
    }

    /// Create a model lookup error for a table with no synthesized type.
    pub fn model_not_found(table: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Model for table",
            name: table.into(),
        }
    }

    /// Create an already-exists error.
    pub fn already_exists(name: impl Into<String>) -> Self {
        Self::AlreadyExists { name: name.into() }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a closed handle error.
    pub fn closed_handle(target: impl Into<String>) -> Self {
        Self::ClosedHandle {
            target: target.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create a configuration store error.
    pub fn config(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: path.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Hint for a statement failure, keyed on SQLSTATE (PostgreSQL, SQLite)
/// or the MySQL error number.
fn statement_suggestion(code: Option<&str>) -> &'static str {
    match code {
        Some("23505") | Some("1062") | Some("2067") | Some("1555") => {
            "A row with the same key already exists"
        }
        Some("23502") | Some("1048") | Some("1364") | Some("1299") => {
            "Provide values for every NOT NULL column without a default"
        }
        Some("23503") | Some("1452") | Some("787") => {
            "The referenced row does not exist in the parent table"
        }
        Some("42P01") | Some("1146") => {
            "The table no longer exists; rebuild the instance to refresh its types"
        }
        Some("42703") | Some("1054") => {
            "The column no longer exists; rebuild the instance to refresh its types"
        }
        _ => "Check the values against the reflected column types",
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                let suggestion = statement_suggestion(code.as_deref());
                DbError::database(db_err.message(), code, suggestion)
            }
            sqlx::Error::PoolClosed => DbError::closed_handle("pool"),
            // Handles replace the default with their configured timeout.
            sqlx::Error::PoolTimedOut => DbError::timeout(
                "acquiring a pooled connection",
                u32::try_from(crate::config::DEFAULT_ACQUIRE_TIMEOUT_SECS).unwrap_or(u32::MAX),
            ),
            sqlx::Error::Configuration(source) => DbError::connection(
                source.to_string(),
                "Check the instance source, host, port and credentials",
            ),
            sqlx::Error::Io(source) => DbError::connection(
                format!("I/O error: {}", source),
                "Check that the instance host is reachable and the server is running",
            ),
            sqlx::Error::Tls(source) => DbError::connection(
                format!("TLS error: {}", source),
                "Check the server certificate and the crate's TLS feature",
            ),
            sqlx::Error::Protocol(message) => DbError::connection(
                format!("Protocol error: {}", message),
                "Check that the instance source matches the server dialect",
            ),
            sqlx::Error::ColumnNotFound(column) => DbError::schema(
                format!("Row has no column '{}'", column),
                column,
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Unknown column type '{}'", type_name),
                type_name,
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Column {} could not be decoded: {}", index, source))
            }
            other => DbError::internal(other.to_string()),
        }
    }
}

/// Result type alias for registry operations.
pub type DbResult<T> = Result<T, DbError>;
