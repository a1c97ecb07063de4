// crates/phr-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite PHR Store
// Description: Durable medical record store handle and shared row helpers.
// Purpose: Own the connection, collaborators, and row decoding for all operations.
// Dependencies: log, phr-store-core, rusqlite
// ============================================================================

//! ## Overview
//! [`SqlitePhrStore`] owns a single `SQLite` connection behind a mutex, the
//! application registry sharing that connection, and the system access
//! history provider. Operations are grouped by component in sibling modules
//! (`data_sources`, `resources`, `scanner`, `access_logs`); this module holds
//! the handle and the row decoding they share.
//!
//! Every mutation runs inside one transaction. Application ids are resolved
//! through the registry *before* the connection lock is taken because the
//! registry locks the same connection.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use log::debug;
use phr_store_core::AccessHistoryProvider;
use phr_store_core::AppId;
use phr_store_core::AppIdentityResolver;
use phr_store_core::DataSource;
use phr_store_core::DataSourceId;
use phr_store_core::FhirVersion;
use phr_store_core::MedicalCategory;
use phr_store_core::MedicalResource;
use phr_store_core::NoSystemAccessHistory;
use phr_store_core::PackageName;
use phr_store_core::ResourceUuid;
use rusqlite::Connection;
use rusqlite::Row;
use rusqlite::params;

use crate::apps::SqliteAppRegistry;
use crate::apps::app_id_from_row;
use crate::apps::app_id_param;
use crate::config::SqliteStoreConfig;
use crate::error::SqliteStoreError;
use crate::schema::ensure_parent_dir;
use crate::schema::initialize_schema;
use crate::schema::open_connection;
use crate::schema::validate_store_path;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Column list selecting a resource with its index row and owner.
pub(crate) const RESOURCE_COLUMNS: &str = "r.row_id, r.resource_uuid, i.medical_category, \
                                           ds.data_source_uuid, r.fhir_resource_type, \
                                           r.fhir_resource_id, r.fhir_version, r.fhir_data, \
                                           r.last_modified_time, ds.app_info_id";
/// Join clause linking resources to index rows and data sources.
pub(crate) const RESOURCE_JOINS: &str = "FROM medical_resources r JOIN medical_resource_indices \
                                         i ON i.resource_row_id = r.row_id JOIN \
                                         medical_data_sources ds ON ds.row_id = r.data_source_id";
/// Column list selecting a data source with its owner and last write time.
pub(crate) const DATA_SOURCE_COLUMNS: &str = "ds.row_id, ds.data_source_uuid, a.package_name, \
                                              ds.app_info_id, ds.display_name, ds.fhir_base_uri, \
                                              ds.fhir_version, (SELECT MAX(r.last_modified_time) \
                                              FROM medical_resources r WHERE r.data_source_id = \
                                              ds.row_id)";
/// Join clause linking data sources to their owning application.
pub(crate) const DATA_SOURCE_JOINS: &str =
    "FROM medical_data_sources ds JOIN application_info a ON a.row_id = ds.app_info_id";

// ============================================================================
// SECTION: Store
// ============================================================================

/// `SQLite`-backed personal health record store.
///
/// # Invariants
/// - `SQLite` connection access is serialized through a mutex.
/// - Foreign keys are enforced, so source deletion cascades to resources and index rows.
#[derive(Clone)]
pub struct SqlitePhrStore {
    /// Shared `SQLite` connection.
    connection: Arc<Mutex<Connection>>,
    /// Store configuration.
    config: SqliteStoreConfig,
    /// Application identity resolver sharing the connection.
    apps: SqliteAppRegistry,
    /// System access history for categories served outside the store.
    history: Arc<dyn AccessHistoryProvider + Send + Sync>,
}

impl fmt::Debug for SqlitePhrStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlitePhrStore")
            .field("config", &self.config)
            .field("apps", &self.apps)
            .finish_non_exhaustive()
    }
}

impl SqlitePhrStore {
    /// Opens a store without system access history.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when configuration, path, or schema checks fail.
    pub fn new(config: SqliteStoreConfig) -> Result<Self, SqliteStoreError> {
        Self::with_access_history(config, Arc::new(NoSystemAccessHistory))
    }

    /// Opens a store that merges the given system access history.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError`] when configuration, path, or schema checks fail.
    pub fn with_access_history(
        config: SqliteStoreConfig,
        history: Arc<dyn AccessHistoryProvider + Send + Sync>,
    ) -> Result<Self, SqliteStoreError> {
        config.validate()?;
        validate_store_path(&config.path)?;
        ensure_parent_dir(&config.path)?;
        let mut connection = open_connection(&config)?;
        initialize_schema(&mut connection)?;
        let connection = Arc::new(Mutex::new(connection));
        let apps = SqliteAppRegistry::new(Arc::clone(&connection));
        debug!("opened phr store at {}", config.path.display());
        Ok(Self {
            connection,
            config,
            apps,
            history,
        })
    }

    /// Returns the store configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    /// Returns the application registry.
    #[must_use]
    pub const fn app_registry(&self) -> &SqliteAppRegistry {
        &self.apps
    }

    /// Returns the system access history provider.
    pub(crate) fn history(&self) -> &(dyn AccessHistoryProvider + Send + Sync) {
        self.history.as_ref()
    }

    /// Returns the system-owned categories reported by the history provider.
    pub(crate) fn system_owned_categories(&self) -> BTreeSet<MedicalCategory> {
        self.history.system_owned_categories()
    }

    /// Resolves an application id without creating it.
    pub(crate) fn resolve_app(
        &self,
        package: &PackageName,
    ) -> Result<Option<AppId>, SqliteStoreError> {
        Ok(self.apps.resolve(package)?)
    }

    /// Resolves the application id of a package that owns at least one data source.
    ///
    /// Packages registered only through audited reads resolve to `None`.
    pub(crate) fn resolve_writer(
        &self,
        package: &PackageName,
    ) -> Result<Option<AppId>, SqliteStoreError> {
        let Some(app_id) = self.resolve_app(package)? else {
            return Ok(None);
        };
        let guard = self.lock()?;
        let owns_data: bool = guard
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM medical_data_sources WHERE app_info_id = ?1)",
                params![app_id_param(app_id)?],
                |row| row.get(0),
            )
            .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(owns_data.then_some(app_id))
    }

    /// Resolves an application id, creating it on first use.
    pub(crate) fn resolve_or_create_app(
        &self,
        package: &PackageName,
    ) -> Result<AppId, SqliteStoreError> {
        Ok(self.apps.resolve_or_create(package)?)
    }

    /// Locks the shared connection.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, SqliteStoreError> {
        self.connection
            .lock()
            .map_err(|_| SqliteStoreError::Io("sqlite mutex poisoned".to_string()))
    }
}

// ============================================================================
// SECTION: Resource Rows
// ============================================================================

/// Raw resource row as read from `SQLite`.
pub(crate) struct ResourceRow {
    /// Internal row id (scan ordering key).
    pub(crate) row_id: i64,
    /// Stored resource UUID.
    resource_uuid: String,
    /// Stored category code.
    category_code: i64,
    /// Owning data source UUID.
    data_source_uuid: String,
    /// FHIR resource type.
    fhir_type: String,
    /// FHIR resource id.
    fhir_resource_id: String,
    /// FHIR version.
    fhir_version: String,
    /// Raw payload.
    payload: String,
    /// Last write time.
    last_modified_ms: i64,
    /// Owning application row id.
    app_info_id: i64,
}

/// Maps a row selected with [`RESOURCE_COLUMNS`].
pub(crate) fn map_resource_row(row: &Row<'_>) -> rusqlite::Result<ResourceRow> {
    Ok(ResourceRow {
        row_id: row.get(0)?,
        resource_uuid: row.get(1)?,
        category_code: row.get(2)?,
        data_source_uuid: row.get(3)?,
        fhir_type: row.get(4)?,
        fhir_resource_id: row.get(5)?,
        fhir_version: row.get(6)?,
        payload: row.get(7)?,
        last_modified_ms: row.get(8)?,
        app_info_id: row.get(9)?,
    })
}

/// Decoded resource together with its owner.
pub(crate) struct OwnedResource {
    /// Internal row id.
    pub(crate) row_id: i64,
    /// Owning application.
    pub(crate) owner: AppId,
    /// Decoded resource.
    pub(crate) resource: MedicalResource,
}

impl ResourceRow {
    /// Decodes stored columns into a resource.
    pub(crate) fn decode(self) -> Result<OwnedResource, SqliteStoreError> {
        let uuid: ResourceUuid = self
            .resource_uuid
            .parse()
            .map_err(|_| SqliteStoreError::Corrupt("invalid stored resource uuid".to_string()))?;
        let data_source_id: DataSourceId = self.data_source_uuid.parse().map_err(|_| {
            SqliteStoreError::Corrupt("invalid stored data source uuid".to_string())
        })?;
        let category = decode_category(self.category_code)?;
        Ok(OwnedResource {
            row_id: self.row_id,
            owner: app_id_from_row(self.app_info_id)?,
            resource: MedicalResource {
                uuid,
                category,
                data_source_id,
                fhir_type: self.fhir_type,
                fhir_resource_id: self.fhir_resource_id,
                fhir_version: FhirVersion::new(self.fhir_version),
                payload: self.payload,
                last_modified_ms: self.last_modified_ms,
            },
        })
    }
}

// ============================================================================
// SECTION: Data Source Rows
// ============================================================================

/// Raw data source row as read from `SQLite`.
pub(crate) struct DataSourceRow {
    /// Internal row id.
    pub(crate) row_id: i64,
    /// Stored UUID.
    data_source_uuid: String,
    /// Owning package.
    package_name: String,
    /// Owning application row id.
    app_info_id: i64,
    /// Display name.
    display_name: String,
    /// FHIR base URI.
    fhir_base_uri: String,
    /// FHIR version.
    fhir_version: String,
    /// Latest resource write under the source.
    last_data_update_ms: Option<i64>,
}

/// Maps a row selected with [`DATA_SOURCE_COLUMNS`].
pub(crate) fn map_data_source_row(row: &Row<'_>) -> rusqlite::Result<DataSourceRow> {
    Ok(DataSourceRow {
        row_id: row.get(0)?,
        data_source_uuid: row.get(1)?,
        package_name: row.get(2)?,
        app_info_id: row.get(3)?,
        display_name: row.get(4)?,
        fhir_base_uri: row.get(5)?,
        fhir_version: row.get(6)?,
        last_data_update_ms: row.get(7)?,
    })
}

/// Decoded data source together with its owner.
pub(crate) struct OwnedDataSource {
    /// Internal row id.
    pub(crate) row_id: i64,
    /// Owning application.
    pub(crate) owner: AppId,
    /// Decoded data source.
    pub(crate) data_source: DataSource,
}

impl DataSourceRow {
    /// Decodes stored columns into a data source.
    pub(crate) fn decode(self) -> Result<OwnedDataSource, SqliteStoreError> {
        let id: DataSourceId = self.data_source_uuid.parse().map_err(|_| {
            SqliteStoreError::Corrupt("invalid stored data source uuid".to_string())
        })?;
        Ok(OwnedDataSource {
            row_id: self.row_id,
            owner: app_id_from_row(self.app_info_id)?,
            data_source: DataSource {
                id,
                package_name: PackageName::new(self.package_name),
                display_name: self.display_name,
                fhir_base_uri: self.fhir_base_uri,
                fhir_version: FhirVersion::new(self.fhir_version),
                last_data_update_ms: self.last_data_update_ms,
            },
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Decodes a stored category code.
pub(crate) fn decode_category(code: i64) -> Result<MedicalCategory, SqliteStoreError> {
    MedicalCategory::from_code(code)
        .ok_or_else(|| SqliteStoreError::Corrupt(format!("unknown category code: {code}")))
}

/// Returns the distinct values of `items` in first-seen order.
pub(crate) fn dedup_in_order<T: Ord + Clone>(items: &[T]) -> Vec<T> {
    let mut seen = BTreeSet::new();
    items.iter().filter(|item| seen.insert((*item).clone())).cloned().collect()
}

/// Builds `?N, ?N+1, ...` placeholders for an `IN` list.
pub(crate) fn placeholders(start: usize, count: usize) -> String {
    (start .. start + count).map(|index| format!("?{index}")).collect::<Vec<_>>().join(", ")
}
