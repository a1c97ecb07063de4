// crates/phr-store-sqlite/src/schema.rs
// ============================================================================
// Module: SQLite Schema
// Description: Connection setup and schema initialization for the PHR store.
// Purpose: Open connections with safe pragmas and create versioned tables.
// Dependencies: log, rusqlite
// ============================================================================

//! ## Overview
//! The store persists four row families (data sources, resources, resource
//! index rows, and access logs) plus an application table owned by the
//! application registry. Foreign keys cascade from data sources to resources
//! and from resources to their index rows; `PRAGMA foreign_keys` is enabled
//! on every connection.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use log::debug;
use rusqlite::Connection;
use rusqlite::OpenFlags;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::config::SqliteStoreConfig;
use crate::error::SqliteStoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// `SQLite` schema version for the store.
pub const SCHEMA_VERSION: i64 = 1;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Connections
// ============================================================================

/// Ensures the parent directory for the store exists.
pub(crate) fn ensure_parent_dir(path: &Path) -> Result<(), SqliteStoreError> {
    let Some(parent) = path.parent() else {
        return Err(SqliteStoreError::Io("store path missing parent directory".to_string()));
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(parent).map_err(|err| SqliteStoreError::Io(err.to_string()))
}

/// Validates store paths for safety limits.
pub(crate) fn validate_store_path(path: &Path) -> Result<(), SqliteStoreError> {
    if path.as_os_str().is_empty() {
        return Err(SqliteStoreError::Invalid("store path must not be empty".to_string()));
    }
    let path_string = path.display().to_string();
    if path_string.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(SqliteStoreError::Invalid("store path exceeds length limit".to_string()));
    }
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if name.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(SqliteStoreError::Invalid(
                "store path contains an overlong component".to_string(),
            ));
        }
    }
    if path.exists() && path.is_dir() {
        return Err(SqliteStoreError::Invalid(
            "store path must be a file, not a directory".to_string(),
        ));
    }
    Ok(())
}

/// Opens an `SQLite` connection with secure defaults.
pub(crate) fn open_connection(config: &SqliteStoreConfig) -> Result<Connection, SqliteStoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let connection = Connection::open_with_flags(&config.path, flags)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    apply_pragmas(&connection, config)?;
    Ok(connection)
}

/// Applies `SQLite` pragmas required for durability and cascading deletes.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteStoreConfig,
) -> Result<(), SqliteStoreError> {
    connection
        .execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Initializes the `SQLite` schema or validates the existing version.
pub(crate) fn initialize_schema(connection: &mut Connection) -> Result<(), SqliteStoreError> {
    let tx = connection.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS store_meta (version INTEGER NOT NULL);")
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let version: Option<i64> = tx
        .query_row("SELECT version FROM store_meta LIMIT 1", params![], |row| row.get(0))
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    match version {
        None => {
            tx.execute("INSERT INTO store_meta (version) VALUES (?1)", params![SCHEMA_VERSION])
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute_batch(
                "CREATE TABLE IF NOT EXISTS application_info (
                    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    package_name TEXT NOT NULL UNIQUE
                );
                CREATE TABLE IF NOT EXISTS medical_data_sources (
                    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    data_source_uuid TEXT NOT NULL UNIQUE,
                    app_info_id INTEGER NOT NULL,
                    display_name TEXT NOT NULL,
                    fhir_base_uri TEXT NOT NULL,
                    fhir_version TEXT NOT NULL,
                    last_modified_time INTEGER NOT NULL,
                    UNIQUE (app_info_id, display_name),
                    FOREIGN KEY (app_info_id)
                        REFERENCES application_info(row_id) ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_medical_data_sources_app
                    ON medical_data_sources (app_info_id);
                CREATE TABLE IF NOT EXISTS medical_resources (
                    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    resource_uuid TEXT NOT NULL UNIQUE,
                    fhir_resource_type TEXT NOT NULL,
                    fhir_resource_id TEXT NOT NULL,
                    fhir_version TEXT NOT NULL,
                    fhir_data TEXT NOT NULL,
                    data_source_id INTEGER NOT NULL,
                    last_modified_time INTEGER NOT NULL,
                    FOREIGN KEY (data_source_id)
                        REFERENCES medical_data_sources(row_id) ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_medical_resources_data_source
                    ON medical_resources (data_source_id);
                CREATE TABLE IF NOT EXISTS medical_resource_indices (
                    resource_row_id INTEGER PRIMARY KEY,
                    medical_category INTEGER NOT NULL,
                    FOREIGN KEY (resource_row_id)
                        REFERENCES medical_resources(row_id) ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_medical_resource_indices_category
                    ON medical_resource_indices (medical_category, resource_row_id);
                CREATE TABLE IF NOT EXISTS access_logs (
                    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                    app_info_id INTEGER NOT NULL,
                    record_types TEXT NOT NULL DEFAULT '[]',
                    medical_categories TEXT NOT NULL,
                    operation INTEGER NOT NULL,
                    data_source_accessed INTEGER NOT NULL,
                    access_time INTEGER NOT NULL,
                    FOREIGN KEY (app_info_id)
                        REFERENCES application_info(row_id) ON DELETE CASCADE
                );
                CREATE INDEX IF NOT EXISTS idx_access_logs_time
                    ON access_logs (access_time);",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            debug!("initialized phr store schema version {SCHEMA_VERSION}");
        }
        Some(value) if value == SCHEMA_VERSION => {}
        Some(value) => {
            return Err(SqliteStoreError::VersionMismatch(format!(
                "unsupported schema version: {value}"
            )));
        }
    }
    tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the current unix epoch in milliseconds.
pub(crate) fn unix_millis() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    i64::try_from(now.as_millis()).unwrap_or(i64::MAX)
}
