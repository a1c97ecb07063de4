// crates/phr-store-sqlite/src/access_logs.rs
// ============================================================================
// Module: Access Log Recorder
// Description: Append-only audit log merged with system access history.
// Purpose: Record one entry per logical operation and answer audit queries.
// Dependencies: log, phr-store-core, rusqlite, serde_json
// ============================================================================

//! ## Overview
//! Entries are appended inside the transaction of the operation they
//! describe, so an audit row commits or rolls back with its data change.
//! Category sets are stored as a JSON array of category codes.
//!
//! Read and delete entries never carry system-owned categories: those are
//! subtracted before writing, and a resource-level entry left empty is not
//! written at all. Queries add system-owned accesses back from the external
//! history provider, restricted to the requested user scope.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use log::debug;
use log::warn;
use phr_store_core::AccessLogEntry;
use phr_store_core::MedicalCategory;
use phr_store_core::OperationKind;
use phr_store_core::PackageName;
use phr_store_core::UserScope;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::params;

use crate::apps::app_id_param;
use crate::apps::resolve_in_tx;
use crate::apps::resolve_or_create_in_tx;
use crate::error::SqliteStoreError;
use crate::schema::unix_millis;
use crate::store::SqlitePhrStore;
use crate::store::decode_category;

// ============================================================================
// SECTION: Recorder
// ============================================================================

impl SqlitePhrStore {
    /// Appends one access log entry.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the write fails.
    pub fn append_access_log(&self, entry: &AccessLogEntry) -> Result<(), SqliteStoreError> {
        let system_owned = self.system_owned_categories();
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        append_access_log_in_tx(&tx, &system_owned, entry)?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(())
    }

    /// Returns persisted entries merged with system access history, oldest first.
    ///
    /// History entries are limited to `scope` and to system-owned categories.
    /// A failing history provider degrades to persisted entries only.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when persisted entries cannot be read.
    pub fn query_access_logs(
        &self,
        scope: UserScope,
    ) -> Result<Vec<AccessLogEntry>, SqliteStoreError> {
        let mut entries = self.persisted_access_logs()?;
        let system_owned = self.system_owned_categories();
        match self.history().historical_accesses(scope) {
            Ok(accesses) => {
                entries.extend(
                    accesses
                        .into_iter()
                        .filter(|access| scope.contains_uid(access.uid))
                        .filter(|access| system_owned.contains(&access.category))
                        .map(|access| {
                            AccessLogEntry::resources(
                                access.reader_package,
                                BTreeSet::from([access.category]),
                                OperationKind::Read,
                                access.access_time_ms,
                            )
                        }),
                );
            }
            Err(err) => warn!("system access history unavailable: {err}"),
        }
        entries.sort_by_key(|entry| entry.access_time_ms);
        Ok(entries)
    }

    /// Deletes entries older than the configured retention window.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the delete fails.
    pub fn prune_access_logs(&self, now_ms: i64) -> Result<usize, SqliteStoreError> {
        let cutoff = now_ms.saturating_sub(self.config().access_log_retention_ms());
        let guard = self.lock()?;
        let removed = guard
            .execute("DELETE FROM access_logs WHERE access_time < ?1", params![cutoff])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        debug!("pruned {removed} access log entries");
        Ok(removed)
    }

    /// Returns the latest upsert or read access time recorded for a package.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the query fails.
    pub fn latest_upsert_or_read_access_time(
        &self,
        package: &PackageName,
    ) -> Result<Option<i64>, SqliteStoreError> {
        let guard = self.lock()?;
        guard
            .query_row(
                "SELECT MAX(l.access_time) FROM access_logs l JOIN application_info a ON a.row_id \
                 = l.app_info_id WHERE a.package_name = ?1 AND l.operation IN (?2, ?3)",
                params![
                    package.as_str(),
                    OperationKind::Upsert.code(),
                    OperationKind::Read.code()
                ],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()
            .map(Option::flatten)
            .map_err(|err| SqliteStoreError::Db(err.to_string()))
    }

    /// Reads every persisted entry in append order.
    fn persisted_access_logs(&self) -> Result<Vec<AccessLogEntry>, SqliteStoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare(
                "SELECT a.package_name, l.medical_categories, l.operation, \
                 l.data_source_accessed, l.access_time FROM access_logs l JOIN application_info a \
                 ON a.row_id = l.app_info_id ORDER BY l.access_time, l.row_id",
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map(params![], map_access_log_row)
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        rows.map(|row| row.map_err(|err| SqliteStoreError::Db(err.to_string()))?.decode())
            .collect()
    }
}

// ============================================================================
// SECTION: Transaction Helpers
// ============================================================================

/// Appends an entry inside a caller-owned transaction.
///
/// Returns whether a row was written.
pub(crate) fn append_access_log_in_tx(
    tx: &Transaction<'_>,
    system_owned: &BTreeSet<MedicalCategory>,
    entry: &AccessLogEntry,
) -> Result<bool, SqliteStoreError> {
    if entry.package_name.as_str().is_empty() {
        warn!("skipping access log entry without package name");
        return Ok(false);
    }
    let categories: BTreeSet<MedicalCategory> = match entry.operation {
        OperationKind::Read | OperationKind::Delete => {
            entry.categories.difference(system_owned).copied().collect()
        }
        OperationKind::Upsert => entry.categories.clone(),
    };
    if categories.is_empty() && !entry.data_source_accessed {
        return Ok(false);
    }
    let app_id = match resolve_in_tx(tx, &entry.package_name)? {
        Some(app_id) => app_id,
        None => resolve_or_create_in_tx(tx, &entry.package_name)?,
    };
    let codes: Vec<i64> = categories.iter().map(|category| category.code()).collect();
    let encoded =
        serde_json::to_string(&codes).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    tx.execute(
        "INSERT INTO access_logs (app_info_id, medical_categories, operation, \
         data_source_accessed, access_time) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            app_id_param(app_id)?,
            encoded,
            entry.operation.code(),
            entry.data_source_accessed,
            entry.access_time_ms
        ],
    )
    .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(true)
}

/// Builds a resource-level entry stamped with the current time.
pub(crate) fn resource_entry(
    package: &PackageName,
    categories: BTreeSet<MedicalCategory>,
    operation: OperationKind,
) -> AccessLogEntry {
    AccessLogEntry::resources(package.clone(), categories, operation, unix_millis())
}

/// Builds a data-source-level entry stamped with the current time.
pub(crate) fn data_source_entry(
    package: &PackageName,
    categories: BTreeSet<MedicalCategory>,
    operation: OperationKind,
) -> AccessLogEntry {
    AccessLogEntry::data_sources(package.clone(), categories, operation, unix_millis())
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Raw access log row.
struct AccessLogRow {
    /// Accessing package.
    package_name: String,
    /// JSON array of category codes.
    categories_json: String,
    /// Operation code.
    operation: i64,
    /// Data source level flag.
    data_source_accessed: bool,
    /// Access time.
    access_time_ms: i64,
}

/// Maps an access log row.
fn map_access_log_row(row: &Row<'_>) -> rusqlite::Result<AccessLogRow> {
    Ok(AccessLogRow {
        package_name: row.get(0)?,
        categories_json: row.get(1)?,
        operation: row.get(2)?,
        data_source_accessed: row.get(3)?,
        access_time_ms: row.get(4)?,
    })
}

impl AccessLogRow {
    /// Decodes stored columns into an entry.
    fn decode(self) -> Result<AccessLogEntry, SqliteStoreError> {
        let codes: Vec<i64> = serde_json::from_str(&self.categories_json)
            .map_err(|_| SqliteStoreError::Corrupt("invalid access log categories".to_string()))?;
        let categories =
            codes.into_iter().map(decode_category).collect::<Result<BTreeSet<_>, _>>()?;
        let operation = OperationKind::from_code(self.operation).ok_or_else(|| {
            SqliteStoreError::Corrupt(format!("unknown operation code: {}", self.operation))
        })?;
        Ok(AccessLogEntry {
            package_name: PackageName::new(self.package_name),
            categories,
            operation,
            data_source_accessed: self.data_source_accessed,
            access_time_ms: self.access_time_ms,
        })
    }
}
