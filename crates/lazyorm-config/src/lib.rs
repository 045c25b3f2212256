//! Settings for the LazyORM store, sessions and logging.
//!
//! [`OrmConfig`] is assembled by [`ConfigLoader`] from up to two TOML files
//! (`~/.lazyorm/config.toml`, then `<workspace>/.lazyorm/config.toml`) and
//! finally from command-line [`ConfigOverrides`]. Every section has
//! defaults, so an empty or missing file is a valid configuration.

mod error;
mod loader;

pub use error::{ConfigError, FileOp};
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete configuration after all layers have been merged.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct OrmConfig {
    /// Backing store configuration
    pub store: StoreConfig,

    /// Session and unit-of-work behaviour
    pub session: SessionConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Backing store configuration.
///
/// # Example TOML
///
/// ```toml
/// [store]
/// database = "data/staff.db"
/// journal_mode = "wal"
/// busy_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file (relative paths resolve against the workspace root)
    pub database: PathBuf,

    /// SQLite journal mode
    pub journal_mode: JournalMode,

    /// How long a statement waits on a locked database, in milliseconds
    pub busy_timeout_ms: u64,

    /// Capacity of the prepared statement cache
    pub statement_cache_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("lazyorm.db"),
            journal_mode: JournalMode::default(),
            busy_timeout_ms: 5000,
            statement_cache_capacity: 64,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log (default)
    #[default]
    Wal,
    /// Rollback journal deleted at the end of each transaction
    Delete,
    /// Journal kept in memory
    Memory,
}

impl JournalMode {
    /// Pragma value understood by SQLite.
    pub fn as_pragma(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

impl std::fmt::Display for JournalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wal => write!(f, "wal"),
            Self::Delete => write!(f, "delete"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for JournalMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "wal" => Ok(Self::Wal),
            "delete" => Ok(Self::Delete),
            "memory" => Ok(Self::Memory),
            _ => Err(ConfigError::invalid(
                "store.journal_mode",
                format!("unknown journal mode '{}'. Valid values: wal, delete, memory", s),
            )),
        }
    }
}

/// Session and unit-of-work configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Wrap each commit in a store transaction, rolling back on failure
    pub transactional_commit: bool,

    /// Number of identifiers reserved per round trip to the sequence table
    pub id_block_size: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transactional_commit: true,
            id_block_size: 1,
        }
    }
}

/// `[logging]` section, read by the `lazyorm` binary when it installs
/// its subscriber.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

/// Most verbose level that is emitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ConfigError::invalid(
                "logging.level",
                format!("unknown level '{}' (expected trace, debug, info, warn or error)", other),
            )),
        }
    }
}

/// Line format of log output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Values given on the command line. `None` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub database: Option<PathBuf>,
    pub journal_mode: Option<JournalMode>,
    pub transactional_commit: Option<bool>,
    pub log_level: Option<LogLevel>,
}

impl OrmConfig {
    /// Replace file values with any values set in `overrides`.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(database) = &overrides.database {
            self.store.database = database.clone();
        }
        if let Some(mode) = overrides.journal_mode {
            self.store.journal_mode = mode;
        }
        if let Some(transactional) = overrides.transactional_commit {
            self.session.transactional_commit = transactional;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.database.as_os_str().is_empty() {
            return Err(ConfigError::invalid(
                "store.database",
                "database path must not be empty",
            ));
        }
        if self.session.id_block_size == 0 {
            return Err(ConfigError::invalid(
                "session.id_block_size",
                "must be at least 1",
            ));
        }
        if self.store.statement_cache_capacity == 0 {
            return Err(ConfigError::invalid(
                "store.statement_cache_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Get the effective database path for a workspace.
    pub fn database_path(&self, workspace_root: &Path) -> PathBuf {
        if self.store.database.is_absolute() {
            self.store.database.clone()
        } else {
            workspace_root.join(&self.store.database)
        }
    }
}
