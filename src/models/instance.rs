//! Instance configuration models.
//!
//! An instance is one named section of the configuration store. This module
//! owns the required-key contract and the derivation of a connection string
//! from a section.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keys every persisted instance section must carry.
pub const REQUIRED_KEYS: [&str; 6] = ["source", "username", "password", "host", "port", "base"];

/// Connection string used for a file dialect instance without a `base`.
pub const MEMORY_CONNECTION_STRING: &str = "sqlite:///:memory:";

/// Flat key/value view of one instance section.
pub type Section = BTreeMap<String, String>;

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Resolve the dialect named by a section's `source` key.
    ///
    /// A driver suffix (`postgresql+psycopg2`) is ignored.
    pub fn from_source(source: &str) -> Option<Self> {
        let lower = source.trim().to_lowercase();
        let dialect = lower.split('+').next().unwrap_or_default();
        match dialect {
            "postgresql" | "postgres" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let scheme = connection_string
            .split_once(':')
            .map(|(scheme, _)| scheme)
            .unwrap_or_default();
        Self::from_source(scheme)
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }

    pub fn is_file_based(&self) -> bool {
        matches!(self, Self::SQLite)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Typed form of an instance section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub source: String,
    pub username: String,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    pub password: String,
    pub host: String,
    pub port: String,
    pub base: String,
}

impl InstanceConfig {
    /// File dialect instance. An empty `base` selects an in-memory database.
    pub fn sqlite(base: impl Into<String>) -> Self {
        Self {
            source: "sqlite".to_string(),
            username: String::new(),
            password: String::new(),
            host: String::new(),
            port: String::new(),
            base: base.into(),
        }
    }

    /// Network dialect instance.
    pub fn network(
        source: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        port: impl Into<String>,
        base: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            username: username.into(),
            password: password.into(),
            host: host.into(),
            port: port.into(),
            base: base.into(),
        }
    }

    /// Build from a section, failing with the list of missing required keys.
    pub fn from_section(section: &Section) -> DbResult<Self> {
        validate_section(section)?;
        let get = |key: &str| section.get(key).cloned().unwrap_or_default();
        Ok(Self {
            source: get("source"),
            username: get("username"),
            password: get("password"),
            host: get("host"),
            port: get("port"),
            base: get("base"),
        })
    }

    /// Section holding exactly the required keys.
    pub fn to_section(&self) -> Section {
        [
            ("source", &self.source),
            ("username", &self.username),
            ("password", &self.password),
            ("host", &self.host),
            ("port", &self.port),
            ("base", &self.base),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
    }

    pub fn connection_string(&self) -> String {
        connection_string(&self.to_section())
    }
}

/// Required keys absent from `section`, in declaration order.
pub fn missing_keys(section: &Section) -> Vec<String> {
    REQUIRED_KEYS
        .iter()
        .filter(|key| !section.contains_key(**key))
        .map(|key| key.to_string())
        .collect()
}

/// Fail with a validation error when any required key is missing.
pub fn validate_section(section: &Section) -> DbResult<()> {
    let missing = missing_keys(section);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DbError::missing_keys(missing))
    }
}

/// Instance names end up as store table names and log fields.
pub fn validate_instance_name(name: &str) -> DbResult<()> {
    if name.trim().is_empty() {
        return Err(DbError::validation("Instance name cannot be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DbError::validation(format!(
            "Instance name contains invalid characters: {}",
            name
        )));
    }
    Ok(())
}

/// Derive the connection string for a section.
///
/// Missing keys read as empty strings. The password is percent-encoded with
/// every reserved character escaped.
pub fn connection_string(section: &Section) -> String {
    let get = |key: &str| section.get(key).map(|v| v.trim()).unwrap_or_default();
    let source = get("source");

    if DatabaseType::from_source(source) == Some(DatabaseType::SQLite) {
        let base = get("base");
        if base.is_empty() {
            return MEMORY_CONNECTION_STRING.to_string();
        }
        return format!("sqlite:///{}", base);
    }

    let password = section.get("password").map(String::as_str).unwrap_or_default();
    let base = get("base");
    let authority = format!(
        "{}://{}:{}@{}:{}",
        source,
        get("username"),
        urlencoding::encode(password),
        get("host"),
        get("port")
    );
    if base.is_empty() {
        authority
    } else {
        format!("{}/{}", authority, base)
    }
}

/// Get a display-safe version of a connection string (credentials masked).
pub fn mask_connection_string(connection_string: &str) -> String {
    if let Some(at_pos) = connection_string.rfind('@') {
        let scheme_end = connection_string.find("://").map(|p| p + 3).unwrap_or(0);
        if let Some(colon_pos) = connection_string[scheme_end..at_pos].find(':') {
            let prefix = &connection_string[..scheme_end + colon_pos + 1];
            let suffix = &connection_string[at_pos..];
            return format!("{}****{}", prefix, suffix);
        }
    }
    connection_string.to_string()
}
