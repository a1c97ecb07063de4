// crates/phr-store-sqlite/src/apps.rs
// ============================================================================
// Module: SQLite Application Registry
// Description: Package name to application id mapping with an explicit cache.
// Purpose: Resolve owning applications for data sources and access logs.
// Dependencies: phr-store-core, rusqlite
// ============================================================================

//! ## Overview
//! Application ids live in the `application_info` table and are created on
//! first use. Resolved ids are cached per registry instance; the cache is an
//! ordinary field, never process-global, and [`SqliteAppRegistry::clear_cache`]
//! drops it for test harnesses.
//!
//! The `*_in_tx` helpers operate inside a caller-owned transaction and bypass
//! the cache so that rolled-back inserts can never leak into it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use phr_store_core::AppId;
use phr_store_core::AppIdentityError;
use phr_store_core::AppIdentityResolver;
use phr_store_core::PackageName;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;

use crate::error::SqliteStoreError;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// `SQLite`-backed application identity resolver.
///
/// # Invariants
/// - Cached ids always correspond to committed `application_info` rows.
#[derive(Debug, Clone)]
pub struct SqliteAppRegistry {
    /// Shared store connection.
    connection: Arc<Mutex<Connection>>,
    /// Resolved ids by package name.
    cache: Arc<Mutex<HashMap<PackageName, AppId>>>,
}

impl SqliteAppRegistry {
    /// Creates a registry over the shared store connection.
    pub(crate) fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self {
            connection,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Drops every cached id.
    ///
    /// A poisoned cache is recovered and cleared.
    pub fn clear_cache(&self) {
        self.cache_guard().clear();
    }

    /// Returns the number of cached ids.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache_guard().len()
    }

    /// Locks the cache, recovering it after a panic in another holder.
    fn cache_guard(&self) -> MutexGuard<'_, HashMap<PackageName, AppId>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a cached id.
    fn cached(&self, package: &PackageName) -> Option<AppId> {
        self.cache_guard().get(package).copied()
    }

    /// Caches a committed id.
    fn remember(&self, package: &PackageName, app_id: AppId) {
        self.cache_guard().insert(package.clone(), app_id);
    }

    /// Runs a closure inside a transaction on the shared connection.
    fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, SqliteStoreError>,
    ) -> Result<T, SqliteStoreError> {
        let mut guard = self
            .connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite mutex poisoned".to_string()))?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let value = f(&tx)?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(value)
    }
}

impl AppIdentityResolver for SqliteAppRegistry {
    fn resolve_or_create(&self, package: &PackageName) -> Result<AppId, AppIdentityError> {
        if let Some(app_id) = self.cached(package) {
            return Ok(app_id);
        }
        let app_id = self.with_tx(|tx| resolve_or_create_in_tx(tx, package))?;
        self.remember(package, app_id);
        Ok(app_id)
    }

    fn resolve(&self, package: &PackageName) -> Result<Option<AppId>, AppIdentityError> {
        if let Some(app_id) = self.cached(package) {
            return Ok(Some(app_id));
        }
        let app_id = self.with_tx(|tx| resolve_in_tx(tx, package))?;
        if let Some(app_id) = app_id {
            self.remember(package, app_id);
        }
        Ok(app_id)
    }
}

// ============================================================================
// SECTION: Transaction Helpers
// ============================================================================

/// Looks up an application id inside a transaction.
pub(crate) fn resolve_in_tx(
    tx: &Transaction<'_>,
    package: &PackageName,
) -> Result<Option<AppId>, SqliteStoreError> {
    let row_id: Option<i64> = tx
        .query_row(
            "SELECT row_id FROM application_info WHERE package_name = ?1",
            params![package.as_str()],
            |row| row.get(0),
        )
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    row_id.map(app_id_from_row).transpose()
}

/// Looks up or inserts an application id inside a transaction.
pub(crate) fn resolve_or_create_in_tx(
    tx: &Transaction<'_>,
    package: &PackageName,
) -> Result<AppId, SqliteStoreError> {
    if package.as_str().is_empty() {
        return Err(SqliteStoreError::invalid_argument("package name must not be empty"));
    }
    tx.execute(
        "INSERT OR IGNORE INTO application_info (package_name) VALUES (?1)",
        params![package.as_str()],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    resolve_in_tx(tx, package)?.ok_or_else(|| {
        SqliteStoreError::Corrupt(format!("application row missing after insert: {package}"))
    })
}

/// Converts a stored row id into an application id.
pub(crate) fn app_id_from_row(row_id: i64) -> Result<AppId, SqliteStoreError> {
    u64::try_from(row_id)
        .ok()
        .and_then(AppId::from_raw)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("invalid application row id: {row_id}")))
}

/// Converts an application id into a bindable row id.
pub(crate) fn app_id_param(app_id: AppId) -> Result<i64, SqliteStoreError> {
    i64::try_from(app_id.get())
        .map_err(|_| SqliteStoreError::Corrupt(format!("application id out of range: {app_id}")))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
