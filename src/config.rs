//! Configuration handling.
//!
//! Pool tuning shared by every instance, the options a registry is opened
//! with, and the command line of the `dynaconn` binary (CLI arguments and
//! environment variables).

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "source.toml";

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 0;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connection pool configuration applied to every instance handle.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10). In-memory SQLite always uses 1.
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 0)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value.
    pub fn max_connections_or_default(&self) -> u32 {
        self.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
    }

    /// Get min_connections with default value.
    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    /// Get idle_timeout with default value.
    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    /// Get acquire_timeout with default value.
    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Get test_before_acquire with default value.
    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
            if let Some(min) = self.min_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Options an [`InstanceRegistry`](crate::registry::InstanceRegistry) is opened with.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Path of the instance configuration store.
    pub config_path: PathBuf,
    /// Entity template location. `None` selects the bundled template.
    pub template_path: Option<PathBuf>,
    pub pool_options: PoolOptions,
}

impl RegistryOptions {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            template_path: None,
            pool_options: PoolOptions::default(),
        }
    }

    pub fn with_template(mut self, template_path: impl Into<PathBuf>) -> Self {
        self.template_path = Some(template_path.into());
        self
    }

    pub fn with_pool_options(mut self, pool_options: PoolOptions) -> Self {
        self.pool_options = pool_options;
        self
    }
}

/// Command line configuration for the `dynaconn` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dynaconn",
    about = "Manage named database instances and work with their tables",
    version,
    author
)]
pub struct Config {
    /// Instance configuration store (one table per instance)
    #[arg(
        short,
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        env = "DYNACONN_CONFIG"
    )]
    pub config_path: PathBuf,

    /// Entity template file. Uses the bundled template when omitted.
    #[arg(long = "template", value_name = "PATH", env = "DYNACONN_TEMPLATE")]
    pub template_path: Option<PathBuf>,

    /// Maximum connections per instance pool
    #[arg(long, env = "DYNACONN_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,

    /// Pool acquire timeout in seconds
    #[arg(long, env = "DYNACONN_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "DYNACONN_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DYNACONN_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List configured instance names
    List,
    /// Add an instance
    Add {
        name: String,
        /// Dialect: sqlite, postgresql, mysql
        #[arg(long)]
        source: String,
        #[arg(long, default_value = "")]
        username: String,
        #[arg(long, default_value = "", env = "DYNACONN_PASSWORD")]
        password: String,
        #[arg(long, default_value = "")]
        host: String,
        #[arg(long, default_value = "")]
        port: String,
        /// Database name, or file path for sqlite
        #[arg(long, default_value = "")]
        base: String,
        /// Replace an existing instance with the same name
        #[arg(long)]
        overwrite: bool,
    },
    /// Update keys of an existing instance
    Update {
        name: String,
        /// Assignments in key=value form
        #[arg(value_name = "KEY=VALUE", required = true)]
        assignments: Vec<String>,
    },
    /// Remove an instance
    Remove { name: String },
    /// Check that an instance answers a trivial query
    Ping { name: String },
    /// List the synthesized entity types of an instance
    Tables { name: String },
    /// Print every row of a table as JSON
    Rows { name: String, table: String },
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            max_connections: self.max_connections,
            acquire_timeout_secs: self.acquire_timeout,
            ..PoolOptions::default()
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            config_path: self.config_path.clone(),
            template_path: self.template_path.clone(),
            pool_options: self.pool_options(),
        }
    }
}

/// Split a `key=value` assignment. The value may itself contain `=`.
pub fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Expected key=value, got '{}'", s)),
    }
}
