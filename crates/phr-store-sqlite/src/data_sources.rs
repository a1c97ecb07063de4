// crates/phr-store-sqlite/src/data_sources.rs
// ============================================================================
// Module: Data Source Store
// Description: Create, read, and delete data sources owned by applications.
// Purpose: Manage the parent rows every medical resource is foreign-keyed to.
// Dependencies: log, phr-store-core, rusqlite
// ============================================================================

//! ## Overview
//! Each data source belongs to exactly one application. Display names are
//! unique per application and each application may own a bounded number of
//! sources. Deleting a source cascades to its resources and index rows.
//!
//! A single-source delete under a mismatched ownership restriction fails and
//! leaves everything untouched; contrast with id-list resource deletes, which
//! skip rows they may not touch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use log::debug;
use phr_store_core::AccessClass;
use phr_store_core::CreateDataSourceRequest;
use phr_store_core::DataSource;
use phr_store_core::DataSourceId;
use phr_store_core::MedicalCategory;
use phr_store_core::OperationKind;
use phr_store_core::PackageName;
use phr_store_core::ReadPermissions;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use rusqlite::params_from_iter;

use crate::access_logs::append_access_log_in_tx;
use crate::access_logs::data_source_entry;
use crate::apps::app_id_param;
use crate::error::SqliteStoreError;
use crate::schema::unix_millis;
use crate::store::DATA_SOURCE_COLUMNS;
use crate::store::DATA_SOURCE_JOINS;
use crate::store::DataSourceRow;
use crate::store::OwnedDataSource;
use crate::store::SqlitePhrStore;
use crate::store::decode_category;
use crate::store::dedup_in_order;
use crate::store::map_data_source_row;
use crate::store::placeholders;

// ============================================================================
// SECTION: Data Source Store
// ============================================================================

impl SqlitePhrStore {
    /// Creates a data source owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::InvalidArgument`] for an empty display name,
    /// a display name already used by the owner, or when the owner has reached
    /// the configured data source limit.
    pub fn create_data_source(
        &self,
        owner: &PackageName,
        request: &CreateDataSourceRequest,
    ) -> Result<DataSource, SqliteStoreError> {
        if request.display_name.trim().is_empty() {
            return Err(SqliteStoreError::invalid_argument("display name must not be empty"));
        }
        let app_id = self.resolve_or_create_app(owner)?;
        let app_row_id = app_id_param(app_id)?;
        let system_owned = self.system_owned_categories();
        let max_sources = self.config().max_data_sources_per_app;

        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let owned: i64 = tx
            .query_row(
                "SELECT COUNT(1) FROM medical_data_sources WHERE app_info_id = ?1",
                params![app_row_id],
                |row| row.get(0),
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        if usize::try_from(owned).unwrap_or(usize::MAX) >= max_sources {
            return Err(SqliteStoreError::invalid_argument(format!(
                "app has reached the maximum of {max_sources} data sources"
            )));
        }
        let id = DataSourceId::generate();
        let now = unix_millis();
        tx.execute(
            "INSERT INTO medical_data_sources (data_source_uuid, app_info_id, display_name, \
             fhir_base_uri, fhir_version, last_modified_time) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                app_row_id,
                request.display_name,
                request.fhir_base_uri,
                request.fhir_version.as_str(),
                now
            ],
        )
        .map_err(|err| map_create_error(&err))?;
        append_access_log_in_tx(
            &tx,
            &system_owned,
            &data_source_entry(owner, BTreeSet::new(), OperationKind::Upsert),
        )?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        debug!("created data source {id}");
        Ok(DataSource {
            id,
            package_name: owner.clone(),
            display_name: request.display_name.clone(),
            fhir_base_uri: request.fhir_base_uri.clone(),
            fhir_version: request.fhir_version.clone(),
            last_data_update_ms: None,
        })
    }

    /// Returns data sources by id, in request order.
    ///
    /// With `app_restriction`, sources owned by other applications are
    /// silently omitted. Missing ids are omitted. No access log is written.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the read fails.
    pub fn get_data_sources_by_ids(
        &self,
        ids: &[DataSourceId],
        app_restriction: Option<&PackageName>,
    ) -> Result<Vec<DataSource>, SqliteStoreError> {
        let owner = match app_restriction {
            Some(package) => match self.resolve_app(package)? {
                Some(app_id) => Some(app_id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut sources = Vec::new();
        for id in dedup_in_order(ids) {
            if let Some(found) = fetch_data_source(&tx, &id)?
                && owner.is_none_or(|owner| owner == found.owner)
            {
                sources.push(found.data_source);
            }
        }
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(sources)
    }

    /// Returns the data sources `caller` may see, auditing non-self access.
    ///
    /// A source is reachable through a grant when it holds at least one
    /// resource of a granted category.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::IllegalState`] without write permission and
    /// grants, and [`SqliteStoreError::InvalidArgument`] when the caller has
    /// never written data and holds no grants.
    pub fn get_data_sources_by_ids_with_permission_checks(
        &self,
        ids: &[DataSourceId],
        permissions: &ReadPermissions,
        caller: &PackageName,
    ) -> Result<Vec<DataSource>, SqliteStoreError> {
        permissions.ensure_authorized()?;
        let caller_id = self.resolve_writer(caller)?;
        if caller_id.is_none() && permissions.granted_categories.is_empty() {
            return Err(SqliteStoreError::invalid_argument(
                "app has not written any data and does not have any read permission",
            ));
        }
        let scope = permissions.scope();
        let system_owned = self.system_owned_categories();

        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut sources = Vec::new();
        let mut reached_granted = false;
        for id in dedup_in_order(ids) {
            let Some(found) = fetch_data_source(&tx, &id)? else {
                continue;
            };
            let is_own = AccessClass::of(caller_id, found.owner) == AccessClass::SelfAccess;
            let held = categories_in_source(&tx, found.row_id)?;
            let is_granted = held.iter().any(|category| permissions.is_granted(*category));
            if scope.admits(is_own, is_granted) {
                reached_granted |= !permissions.audited_categories(held).is_empty();
                sources.push(found.data_source);
            }
        }
        if reached_granted {
            append_access_log_in_tx(
                &tx,
                &system_owned,
                &data_source_entry(caller, BTreeSet::new(), OperationKind::Read),
            )?;
        }
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(sources)
    }

    /// Returns data sources owned by the given packages; empty means all.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the read fails.
    pub fn get_data_sources_by_packages(
        &self,
        packages: &[PackageName],
    ) -> Result<Vec<DataSource>, SqliteStoreError> {
        let guard = self.lock()?;
        let names: Vec<&str> = packages.iter().map(PackageName::as_str).collect();
        let sql = if names.is_empty() {
            format!("SELECT {DATA_SOURCE_COLUMNS} {DATA_SOURCE_JOINS} ORDER BY ds.row_id")
        } else {
            format!(
                "SELECT {DATA_SOURCE_COLUMNS} {DATA_SOURCE_JOINS} WHERE a.package_name IN ({}) \
                 ORDER BY ds.row_id",
                placeholders(1, names.len())
            )
        };
        let mut stmt = guard.prepare(&sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(names.iter()), map_data_source_row)
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        rows.map(|row| -> Result<DataSource, SqliteStoreError> {
            let owned = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?.decode()?;
            Ok(owned.data_source)
        })
        .collect()
    }

    /// Returns the data sources of `packages` that `caller` may see, auditing
    /// non-self access. An empty `packages` means every owner.
    ///
    /// Sources reached through a grant must belong to a listed package; the
    /// caller's own sources are included only when the filter is empty or
    /// names the caller.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::IllegalState`] without write permission and
    /// grants. Returns [`SqliteStoreError::InvalidArgument`] when the caller
    /// has never written data and holds no grants, or when it may only read
    /// its own data but the filter names other packages only.
    pub fn get_data_sources_by_packages_with_permission_checks(
        &self,
        packages: &[PackageName],
        permissions: &ReadPermissions,
        caller: &PackageName,
    ) -> Result<Vec<DataSource>, SqliteStoreError> {
        permissions.ensure_authorized()?;
        let caller_id = self.resolve_writer(caller)?;
        if caller_id.is_none() && permissions.granted_categories.is_empty() {
            return Err(SqliteStoreError::invalid_argument(
                "app has not written any data and does not have any read permission",
            ));
        }
        let caller_listed = packages.is_empty() || packages.contains(caller);
        let self_read_only = permissions.background_without_background_read
            || (permissions.has_write_permission && permissions.granted_categories.is_empty());
        if self_read_only && !caller_listed {
            return Err(SqliteStoreError::invalid_argument(
                "app doesn't have permission to read based on the given packages",
            ));
        }
        let listed_owners = if packages.is_empty() {
            None
        } else {
            let mut owners = BTreeSet::new();
            for package in packages {
                if let Some(app_id) = self.resolve_app(package)? {
                    owners.insert(app_id);
                }
            }
            Some(owners)
        };
        let scope = permissions.scope();
        let system_owned = self.system_owned_categories();

        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut sources = Vec::new();
        let mut reached_granted = false;
        for found in all_data_sources(&tx)? {
            let is_own = AccessClass::of(caller_id, found.owner) == AccessClass::SelfAccess;
            let is_listed =
                listed_owners.as_ref().is_none_or(|owners| owners.contains(&found.owner));
            let held = categories_in_source(&tx, found.row_id)?;
            let is_granted = held.iter().any(|category| permissions.is_granted(*category));
            if scope.admits(is_own && caller_listed, is_granted && is_listed) {
                reached_granted |= !permissions.audited_categories(held).is_empty();
                sources.push(found.data_source);
            }
        }
        if reached_granted {
            append_access_log_in_tx(
                &tx,
                &system_owned,
                &data_source_entry(caller, BTreeSet::new(), OperationKind::Read),
            )?;
        }
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        debug!("read {} data sources by package", sources.len());
        Ok(sources)
    }

    /// Deletes one data source with all of its resources and index rows.
    ///
    /// With `app_restriction`, the source must be owned by that package and
    /// one data-source-level delete entry is audited.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::InvalidArgument`] when the id does not
    /// exist, the restricting package has no data, or the source is owned by
    /// another package. Nothing is deleted on failure.
    pub fn delete_data_source(
        &self,
        id: &DataSourceId,
        app_restriction: Option<&PackageName>,
    ) -> Result<(), SqliteStoreError> {
        let owner = match app_restriction {
            Some(package) => Some(self.resolve_writer(package)?.ok_or_else(|| {
                SqliteStoreError::invalid_argument(
                    "deletion not permitted as app has inserted no data",
                )
            })?),
            None => None,
        };
        let system_owned = self.system_owned_categories();

        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let Some(found) = fetch_data_source(&tx, id)? else {
            return Err(SqliteStoreError::invalid_argument(format!("id {id} does not exist")));
        };
        if owner.is_some_and(|owner| owner != found.owner) {
            return Err(SqliteStoreError::invalid_argument(format!(
                "id {id} does not exist or is owned by another app"
            )));
        }
        let held = categories_in_source(&tx, found.row_id)?;
        tx.execute("DELETE FROM medical_data_sources WHERE row_id = ?1", params![found.row_id])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        if let Some(package) = app_restriction {
            append_access_log_in_tx(
                &tx,
                &system_owned,
                &data_source_entry(package, held, OperationKind::Delete),
            )?;
        }
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        debug!("deleted data source {id}");
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Fetches one data source by external id.
pub(crate) fn fetch_data_source(
    tx: &Transaction<'_>,
    id: &DataSourceId,
) -> Result<Option<OwnedDataSource>, SqliteStoreError> {
    let sql =
        format!("SELECT {DATA_SOURCE_COLUMNS} {DATA_SOURCE_JOINS} WHERE ds.data_source_uuid = ?1");
    let row = tx
        .query_row(&sql, params![id.to_string()], map_data_source_row)
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    row.map(DataSourceRow::decode).transpose()
}

/// Fetches every data source in creation order.
pub(crate) fn all_data_sources(
    tx: &Transaction<'_>,
) -> Result<Vec<OwnedDataSource>, SqliteStoreError> {
    let sql = format!("SELECT {DATA_SOURCE_COLUMNS} {DATA_SOURCE_JOINS} ORDER BY ds.row_id");
    let mut stmt = tx.prepare(&sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows = stmt
        .query_map(params![], map_data_source_row)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    rows.map(|row| row.map_err(|err| SqliteStoreError::Db(err.to_string()))?.decode()).collect()
}

/// Returns the distinct categories of resources under a data source row.
pub(crate) fn categories_in_source(
    tx: &Transaction<'_>,
    data_source_row_id: i64,
) -> Result<BTreeSet<MedicalCategory>, SqliteStoreError> {
    let mut stmt = tx
        .prepare(
            "SELECT DISTINCT i.medical_category FROM medical_resources r JOIN \
             medical_resource_indices i ON i.resource_row_id = r.row_id WHERE r.data_source_id = \
             ?1",
        )
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows = stmt
        .query_map(params![data_source_row_id], |row| row.get::<_, i64>(0))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    rows.map(|row| decode_category(row.map_err(|err| SqliteStoreError::Db(err.to_string()))?))
        .collect()
}

/// Maps data source insert failures, turning constraint violations into argument errors.
fn map_create_error(err: &rusqlite::Error) -> SqliteStoreError {
    if err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
        return SqliteStoreError::invalid_argument("display name should be unique per calling app");
    }
    SqliteStoreError::Db(err.to_string())
}
