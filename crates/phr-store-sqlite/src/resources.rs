// crates/phr-store-sqlite/src/resources.rs
// ============================================================================
// Module: Resource Store
// Description: Upsert, permission-aware reads, and deletes of medical resources.
// Purpose: Maintain resource rows with their category index and audit trail.
// Dependencies: log, phr-store-core, rusqlite
// ============================================================================

//! ## Overview
//! Resources are keyed by a derived UUID, so upserting the same
//! (data source, FHIR type, FHIR id) triple replaces content in place. Each
//! resource row has exactly one index row recording its [`MedicalCategory`],
//! written in the same statement sequence and transaction.
//!
//! Permission-aware reads apply [`ReadPermissions::scope`] to every candidate
//! row and audit the returned categories that were reached through grants.
//! Deletes by id list skip rows outside an ownership restriction instead of
//! failing.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use log::debug;
use phr_store_core::AccessClass;
use phr_store_core::AppId;
use phr_store_core::DataSource;
use phr_store_core::DataSourceId;
use phr_store_core::DeleteResourcesRequest;
use phr_store_core::FhirPayload;
use phr_store_core::FhirVersion;
use phr_store_core::MedicalCategory;
use phr_store_core::MedicalResource;
use phr_store_core::OperationKind;
use phr_store_core::PackageName;
use phr_store_core::ReadPermissions;
use phr_store_core::ReadResourcesPage;
use phr_store_core::ReadResourcesRequest;
use phr_store_core::ResourceUuid;
use phr_store_core::UpsertResourceRequest;
use phr_store_core::derive_resource_uuid;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use rusqlite::params_from_iter;
use rusqlite::types::Value;

use crate::access_logs::append_access_log_in_tx;
use crate::access_logs::resource_entry;
use crate::apps::app_id_param;
use crate::data_sources::all_data_sources;
use crate::error::SqliteStoreError;
use crate::scanner::ScanFilter;
use crate::scanner::empty_page;
use crate::scanner::scan_in_tx;
use crate::schema::unix_millis;
use crate::store::OwnedResource;
use crate::store::RESOURCE_COLUMNS;
use crate::store::RESOURCE_JOINS;
use crate::store::ResourceRow;
use crate::store::SqlitePhrStore;
use crate::store::decode_category;
use crate::store::dedup_in_order;
use crate::store::map_resource_row;
use crate::store::placeholders;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Error message when a restricted delete targets an app with no data.
const DELETE_WITHOUT_DATA: &str = "deletion not permitted as app has inserted no data";
/// Error message when a delete names nothing.
const NOTHING_TO_DELETE: &str = "nothing to delete specified";

// ============================================================================
// SECTION: Writes
// ============================================================================

impl SqlitePhrStore {
    /// Inserts or replaces resources for `caller`, returning them in input order.
    ///
    /// The whole batch, its index rows, and one upsert audit entry listing the
    /// union of written categories commit in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::InvalidArgument`] when a payload lacks its
    /// type or id, a data source is unknown or not owned by `caller`, or a
    /// request's FHIR version differs from its data source. Nothing is written
    /// on failure.
    pub fn upsert_resources(
        &self,
        caller: &PackageName,
        requests: &[UpsertResourceRequest],
    ) -> Result<Vec<MedicalResource>, SqliteStoreError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let payloads = requests
            .iter()
            .map(|request| FhirPayload::parse(&request.payload))
            .collect::<Result<Vec<_>, _>>()?;
        let caller_id = self.resolve_app(caller)?;
        let system_owned = self.system_owned_categories();

        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut sources: BTreeMap<DataSourceId, (i64, FhirVersion)> = BTreeMap::new();
        let mut written = Vec::with_capacity(requests.len());
        let now = unix_millis();
        for (request, payload) in requests.iter().zip(payloads) {
            let (source_row_id, source_version) = match sources.get(&request.data_source_id) {
                Some(found) => found.clone(),
                None => {
                    let found = owned_source_row(&tx, &request.data_source_id, caller_id)?
                        .ok_or_else(|| {
                            SqliteStoreError::invalid_argument(format!(
                                "invalid data source id: {}",
                                request.data_source_id
                            ))
                        })?;
                    sources.insert(request.data_source_id, found.clone());
                    found
                }
            };
            if source_version != request.fhir_version {
                return Err(SqliteStoreError::invalid_argument(format!(
                    "invalid fhir version {} for data source {} with version {}",
                    request.fhir_version, request.data_source_id, source_version
                )));
            }
            let uuid = derive_resource_uuid(
                &request.data_source_id,
                &payload.fhir_type,
                &payload.fhir_resource_id,
            );
            let row_id: i64 = tx
                .query_row(
                    "INSERT INTO medical_resources (resource_uuid, fhir_resource_type, \
                     fhir_resource_id, fhir_version, fhir_data, data_source_id, \
                     last_modified_time) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) ON \
                     CONFLICT(resource_uuid) DO UPDATE SET fhir_version = excluded.fhir_version, \
                     fhir_data = excluded.fhir_data, last_modified_time = \
                     excluded.last_modified_time RETURNING row_id",
                    params![
                        uuid.to_string(),
                        payload.fhir_type,
                        payload.fhir_resource_id,
                        request.fhir_version.as_str(),
                        request.payload,
                        source_row_id,
                        now
                    ],
                    |row| row.get(0),
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            tx.execute(
                "INSERT INTO medical_resource_indices (resource_row_id, medical_category) VALUES \
                 (?1, ?2) ON CONFLICT(resource_row_id) DO UPDATE SET medical_category = \
                 excluded.medical_category",
                params![row_id, payload.category.code()],
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            written.push(MedicalResource {
                uuid,
                category: payload.category,
                data_source_id: request.data_source_id,
                fhir_type: payload.fhir_type,
                fhir_resource_id: payload.fhir_resource_id,
                fhir_version: request.fhir_version.clone(),
                payload: request.payload.clone(),
                last_modified_ms: now,
            });
        }
        let categories: BTreeSet<MedicalCategory> =
            written.iter().map(|resource| resource.category).collect();
        append_access_log_in_tx(
            &tx,
            &system_owned,
            &resource_entry(caller, categories, OperationKind::Upsert),
        )?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        debug!("upserted {} medical resources", written.len());
        Ok(written)
    }

    /// Deletes resources by id.
    ///
    /// Missing ids are ignored. With `app_restriction`, rows owned by other
    /// applications are skipped and one delete audit entry lists the deleted
    /// categories. Returns the number of resources deleted.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::InvalidArgument`] when `ids` is empty or the
    /// restricting package has never written data.
    pub fn delete_resources_by_ids(
        &self,
        ids: &[ResourceUuid],
        app_restriction: Option<&PackageName>,
    ) -> Result<usize, SqliteStoreError> {
        if ids.is_empty() {
            return Err(SqliteStoreError::invalid_argument(NOTHING_TO_DELETE));
        }
        let owner = self.resolve_delete_owner(app_restriction)?;
        let system_owned = self.system_owned_categories();

        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut targets = Vec::new();
        for uuid in dedup_in_order(ids) {
            if let Some(found) = fetch_resource(&tx, &uuid)?
                && owner.is_none_or(|owner| owner == found.owner)
            {
                targets.push((found.row_id, found.resource.category));
            }
        }
        let deleted = delete_rows(&tx, &targets)?;
        if let Some(package) = app_restriction {
            let categories = targets.iter().map(|(_, category)| *category).collect();
            append_access_log_in_tx(
                &tx,
                &system_owned,
                &resource_entry(package, categories, OperationKind::Delete),
            )?;
        }
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        debug!("deleted {deleted} medical resources by id");
        Ok(deleted)
    }

    /// Deletes every resource under the given data sources.
    ///
    /// An empty `data_source_ids` is a no-op. With `app_restriction`, sources
    /// owned by other applications are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::InvalidArgument`] when the restricting
    /// package has never written data.
    pub fn delete_resources_by_data_sources(
        &self,
        data_source_ids: &[DataSourceId],
        app_restriction: Option<&PackageName>,
    ) -> Result<usize, SqliteStoreError> {
        if data_source_ids.is_empty() {
            return Ok(0);
        }
        let request = DeleteResourcesRequest {
            data_source_ids: data_source_ids.iter().copied().collect(),
            categories: BTreeSet::new(),
        };
        self.delete_resources_by_request(&request, app_restriction)
    }

    /// Deletes resources matching a data source and/or category filter.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::InvalidArgument`] when the filter is empty
    /// or the restricting package has never written data.
    pub fn delete_resources_by_request(
        &self,
        request: &DeleteResourcesRequest,
        app_restriction: Option<&PackageName>,
    ) -> Result<usize, SqliteStoreError> {
        if request.is_empty() {
            return Err(SqliteStoreError::invalid_argument(NOTHING_TO_DELETE));
        }
        let owner = self.resolve_delete_owner(app_restriction)?;
        let system_owned = self.system_owned_categories();

        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let targets = matching_rows(&tx, request, owner)?;
        let deleted = delete_rows(&tx, &targets)?;
        if let Some(package) = app_restriction {
            let categories = targets.iter().map(|(_, category)| *category).collect();
            append_access_log_in_tx(
                &tx,
                &system_owned,
                &resource_entry(package, categories, OperationKind::Delete),
            )?;
        }
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        debug!("deleted {deleted} medical resources by request");
        Ok(deleted)
    }

    /// Resolves the owner a restricted delete is limited to.
    fn resolve_delete_owner(
        &self,
        app_restriction: Option<&PackageName>,
    ) -> Result<Option<AppId>, SqliteStoreError> {
        match app_restriction {
            Some(package) => self
                .resolve_writer(package)?
                .map(Some)
                .ok_or_else(|| SqliteStoreError::invalid_argument(DELETE_WITHOUT_DATA)),
            None => Ok(None),
        }
    }
}

// ============================================================================
// SECTION: Reads
// ============================================================================

impl SqlitePhrStore {
    /// Reads resources by id without permission checks or auditing.
    ///
    /// Missing ids are omitted; results follow request order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the read fails.
    pub fn read_resources_by_ids(
        &self,
        ids: &[ResourceUuid],
    ) -> Result<Vec<MedicalResource>, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut resources = Vec::new();
        for uuid in dedup_in_order(ids) {
            if let Some(found) = fetch_resource(&tx, &uuid)? {
                resources.push(found.resource);
            }
        }
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(resources)
    }

    /// Reads the resources `caller` may see and audits grant-reached categories.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::IllegalState`] when `permissions` carry
    /// neither write permission nor grants.
    pub fn read_resources_by_ids_with_permission_checks(
        &self,
        ids: &[ResourceUuid],
        permissions: &ReadPermissions,
        caller: &PackageName,
    ) -> Result<Vec<MedicalResource>, SqliteStoreError> {
        permissions.ensure_authorized()?;
        let caller_id = self.resolve_app(caller)?;
        let scope = permissions.scope();
        let system_owned = self.system_owned_categories();

        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let mut resources = Vec::new();
        for uuid in dedup_in_order(ids) {
            let Some(found) = fetch_resource(&tx, &uuid)? else {
                continue;
            };
            let is_own = AccessClass::of(caller_id, found.owner) == AccessClass::SelfAccess;
            let is_granted = permissions.is_granted(found.resource.category);
            if scope.admits(is_own, is_granted) {
                resources.push(found.resource);
            }
        }
        let audited =
            permissions.audited_categories(resources.iter().map(|resource| resource.category));
        if !audited.is_empty() {
            append_access_log_in_tx(
                &tx,
                &system_owned,
                &resource_entry(caller, audited, OperationKind::Read),
            )?;
        }
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        debug!("read {} medical resources by id", resources.len());
        Ok(resources)
    }

    /// Reads one page of a category on behalf of `caller`.
    ///
    /// With `enforce_self_read`, only `caller`'s own data is scanned and no
    /// audit entry is written; otherwise one read entry names the requested
    /// category.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::InvalidArgument`] for an out-of-range page
    /// size or a malformed or mismatched page token.
    pub fn read_resources_by_request_with_permission_checks(
        &self,
        request: &ReadResourcesRequest,
        caller: &PackageName,
        enforce_self_read: bool,
    ) -> Result<ReadResourcesPage, SqliteStoreError> {
        let after_row_id = self.validate_scan(request)?;
        let caller_id = self.resolve_app(caller)?;
        let owner = if enforce_self_read {
            match caller_id {
                Some(app_id) => Some(app_id),
                None => return Ok(empty_page()),
            }
        } else {
            None
        };
        let system_owned = self.system_owned_categories();

        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let filter = ScanFilter {
            category: request.category,
            data_source_ids: &request.data_source_ids,
            owner,
            after_row_id,
            page_size: request.page_size,
        };
        let page = scan_in_tx(&tx, &filter)?;
        if !enforce_self_read {
            append_access_log_in_tx(
                &tx,
                &system_owned,
                &resource_entry(caller, BTreeSet::from([request.category]), OperationKind::Read),
            )?;
        }
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(page)
    }

    /// Maps each category with stored resources to the data sources holding them.
    ///
    /// Sources appear in creation order. No permission check or access log.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when the read fails.
    pub fn get_category_to_contributing_data_sources(
        &self,
    ) -> Result<BTreeMap<MedicalCategory, Vec<DataSource>>, SqliteStoreError> {
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let by_row: BTreeMap<i64, DataSource> = all_data_sources(&tx)?
            .into_iter()
            .map(|owned| (owned.row_id, owned.data_source))
            .collect();
        let pairs = {
            let mut stmt = tx
                .prepare(
                    "SELECT DISTINCT i.medical_category, r.data_source_id FROM medical_resources \
                     r JOIN medical_resource_indices i ON i.resource_row_id = r.row_id ORDER BY \
                     i.medical_category, r.data_source_id",
                )
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            let rows = stmt
                .query_map(params![], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|err| SqliteStoreError::Db(err.to_string()))?
        };
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;

        let mut contributing: BTreeMap<MedicalCategory, Vec<DataSource>> = BTreeMap::new();
        for (code, data_source_row) in pairs {
            let source = by_row.get(&data_source_row).ok_or_else(|| {
                SqliteStoreError::Corrupt(format!("missing data source row {data_source_row}"))
            })?;
            contributing.entry(decode_category(code)?).or_default().push(source.clone());
        }
        Ok(contributing)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Looks up a data source row and version, restricted to its owner.
fn owned_source_row(
    tx: &Transaction<'_>,
    id: &DataSourceId,
    owner: Option<AppId>,
) -> Result<Option<(i64, FhirVersion)>, SqliteStoreError> {
    let Some(owner) = owner else {
        return Ok(None);
    };
    let row: Option<(i64, String)> = tx
        .query_row(
            "SELECT row_id, fhir_version FROM medical_data_sources WHERE data_source_uuid = ?1 \
             AND app_info_id = ?2",
            params![id.to_string(), app_id_param(owner)?],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(row.map(|(row_id, version)| (row_id, FhirVersion::new(version))))
}

/// Fetches one resource by derived id.
fn fetch_resource(
    tx: &Transaction<'_>,
    uuid: &ResourceUuid,
) -> Result<Option<OwnedResource>, SqliteStoreError> {
    let sql = format!("SELECT {RESOURCE_COLUMNS} {RESOURCE_JOINS} WHERE r.resource_uuid = ?1");
    let row = tx
        .query_row(&sql, params![uuid.to_string()], map_resource_row)
        .optional()
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    row.map(ResourceRow::decode).transpose()
}

/// Returns row ids and categories of resources matching a delete request.
fn matching_rows(
    tx: &Transaction<'_>,
    request: &DeleteResourcesRequest,
    owner: Option<AppId>,
) -> Result<Vec<(i64, MedicalCategory)>, SqliteStoreError> {
    let mut clauses = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if !request.data_source_ids.is_empty() {
        let start = values.len() + 1;
        values.extend(request.data_source_ids.iter().map(|id| Value::Text(id.to_string())));
        clauses.push(format!(
            "ds.data_source_uuid IN ({})",
            placeholders(start, request.data_source_ids.len())
        ));
    }
    if !request.categories.is_empty() {
        let start = values.len() + 1;
        values.extend(request.categories.iter().map(|category| Value::Integer(category.code())));
        clauses.push(format!(
            "i.medical_category IN ({})",
            placeholders(start, request.categories.len())
        ));
    }
    if let Some(owner) = owner {
        values.push(Value::Integer(app_id_param(owner)?));
        clauses.push(format!("ds.app_info_id = ?{}", values.len()));
    }
    let sql = format!(
        "SELECT r.row_id, i.medical_category {RESOURCE_JOINS} WHERE {} ORDER BY r.row_id",
        clauses.join(" AND ")
    );
    let mut stmt = tx.prepare(&sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    rows.map(|row| {
        let (row_id, code) = row.map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok((row_id, decode_category(code)?))
    })
    .collect()
}

/// Deletes resource rows; index rows cascade.
fn delete_rows(
    tx: &Transaction<'_>,
    targets: &[(i64, MedicalCategory)],
) -> Result<usize, SqliteStoreError> {
    let mut deleted = 0;
    for (row_id, _) in targets {
        deleted += tx
            .execute("DELETE FROM medical_resources WHERE row_id = ?1", params![row_id])
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    }
    Ok(deleted)
}
