// crates/phr-store-sqlite/src/config.rs
// ============================================================================
// Module: SQLite Store Configuration
// Description: Deserializable configuration for the SQLite PHR store.
// Purpose: Load, default, and validate store paths and operational limits.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! [`SqliteStoreConfig`] is deserialized from TOML. Every limit has a
//! default; only the database path is required. Validation runs on load and
//! again when the store opens.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::SqliteStoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default per-application data source cap.
const DEFAULT_MAX_DATA_SOURCES_PER_APP: usize = 20;
/// Default largest accepted scan page.
const DEFAULT_MAX_PAGE_SIZE: u32 = 5_000;
/// Default access log retention window in days.
const DEFAULT_ACCESS_LOG_RETENTION_DAYS: u32 = 7;
/// Maximum config file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 64 * 1024;

// ============================================================================
// SECTION: Modes
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteStoreMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl SqliteStoreMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SqliteSyncMode {
    /// Full synchronous mode (safest).
    #[default]
    Full,
    /// Normal synchronous mode.
    Normal,
}

impl SqliteSyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
        }
    }
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration for the `SQLite` PHR store.
///
/// # Invariants
/// - `path` must resolve to a file path (not a directory).
/// - `busy_timeout_ms` is interpreted as milliseconds.
/// - `max_data_sources_per_app`, `max_page_size`, and
///   `access_log_retention_days` must be greater than zero.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteStoreConfig {
    /// Path to the `SQLite` database file.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Maximum data sources a single application may own.
    #[serde(default = "default_max_data_sources_per_app")]
    pub max_data_sources_per_app: usize,
    /// Largest page size accepted by category scans.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
    /// Access log entries older than this many days are pruned.
    #[serde(default = "default_access_log_retention_days")]
    pub access_log_retention_days: u32,
}

impl SqliteStoreConfig {
    /// Creates a configuration with defaults for the given database path.
    #[must_use]
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            max_data_sources_per_app: DEFAULT_MAX_DATA_SOURCES_PER_APP,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            access_log_retention_days: DEFAULT_ACCESS_LOG_RETENTION_DAYS,
        }
    }

    /// Parses and validates a TOML configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] when parsing or validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, SqliteStoreError> {
        let config: Self = toml::from_str(content)
            .map_err(|err| SqliteStoreError::Invalid(format!("config parse error: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when reading, parsing, or validation fails.
    pub fn load(path: &Path) -> Result<Self, SqliteStoreError> {
        let bytes = fs::read(path).map_err(|err| SqliteStoreError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(SqliteStoreError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| SqliteStoreError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Validates operational limits.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::Invalid`] when a limit is zero.
    pub fn validate(&self) -> Result<(), SqliteStoreError> {
        if self.max_data_sources_per_app == 0 {
            return Err(SqliteStoreError::Invalid(
                "max_data_sources_per_app must be greater than zero".to_string(),
            ));
        }
        if self.max_page_size == 0 {
            return Err(SqliteStoreError::Invalid(
                "max_page_size must be greater than zero".to_string(),
            ));
        }
        if self.access_log_retention_days == 0 {
            return Err(SqliteStoreError::Invalid(
                "access_log_retention_days must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the access log retention window in milliseconds.
    #[must_use]
    pub fn access_log_retention_ms(&self) -> i64 {
        i64::from(self.access_log_retention_days) * 24 * 60 * 60 * 1_000
    }
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default per-application data source cap.
const fn default_max_data_sources_per_app() -> usize {
    DEFAULT_MAX_DATA_SOURCES_PER_APP
}

/// Returns the default largest scan page.
const fn default_max_page_size() -> u32 {
    DEFAULT_MAX_PAGE_SIZE
}

/// Returns the default access log retention window.
const fn default_access_log_retention_days() -> u32 {
    DEFAULT_ACCESS_LOG_RETENTION_DAYS
}

// ============================================================================
// SECTION: Tests
// ============================================================================
