// crates/phr-store-sqlite/tests/common/mod.rs
// ============================================================================
// Module: Common Test Utilities
// Description: Shared helpers for phr-store-sqlite integration tests.
// Purpose: Provide store setup, FHIR payload builders, and a fake history provider.
// Dependencies: env_logger, phr-store-core, phr-store-sqlite, serde_json, tempfile
// ============================================================================

//! ## Overview
//! Provides shared store builders, sample FHIR payloads, and a scripted
//! system access history provider.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use phr_store_core::AccessHistoryError;
use phr_store_core::AccessHistoryProvider;
use phr_store_core::CreateDataSourceRequest;
use phr_store_core::DataSource;
use phr_store_core::FhirVersion;
use phr_store_core::HistoricalAccess;
use phr_store_core::MedicalCategory;
use phr_store_core::MedicalResource;
use phr_store_core::PackageName;
use phr_store_core::UpsertResourceRequest;
use phr_store_core::UserScope;
use phr_store_sqlite::SqlitePhrStore;
use phr_store_sqlite::SqliteStoreConfig;
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// SECTION: Store Helpers
// ============================================================================

/// FHIR version used by sample data sources.
pub const R4: &str = "4.0.1";

/// Initializes test logging once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Builds a default configuration under the given directory.
pub fn config_for_path(dir: &Path) -> SqliteStoreConfig {
    SqliteStoreConfig::for_path(dir.join("phr.sqlite"))
}

/// Opens a fresh store without system access history.
pub fn open_store() -> (TempDir, SqlitePhrStore) {
    init_logging();
    let temp = TempDir::new().unwrap();
    let store = SqlitePhrStore::new(config_for_path(temp.path())).unwrap();
    (temp, store)
}

/// Opens a fresh store backed by the given history provider.
pub fn open_store_with_history(history: FakeHistory) -> (TempDir, SqlitePhrStore) {
    init_logging();
    let temp = TempDir::new().unwrap();
    let store =
        SqlitePhrStore::with_access_history(config_for_path(temp.path()), Arc::new(history))
            .unwrap();
    (temp, store)
}

/// Creates an R4 data source for `package`.
pub fn create_source(store: &SqlitePhrStore, package: &PackageName, name: &str) -> DataSource {
    let request =
        CreateDataSourceRequest::new(name, "https://fhir.example.com/r4", FhirVersion::from(R4));
    store.create_data_source(package, &request).unwrap()
}

/// Upserts one payload into a source and returns the stored resource.
pub fn upsert_one(
    store: &SqlitePhrStore,
    package: &PackageName,
    source: &DataSource,
    payload: &str,
) -> MedicalResource {
    let request = UpsertResourceRequest::new(source.id, FhirVersion::from(R4), payload);
    store.upsert_resources(package, &[request]).unwrap().remove(0)
}

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// Immunization payload (vaccines).
pub fn immunization(id: &str) -> String {
    json!({ "resourceType": "Immunization", "id": id, "status": "completed" }).to_string()
}

/// Allergy payload (allergies and intolerances).
pub fn allergy(id: &str) -> String {
    json!({ "resourceType": "AllergyIntolerance", "id": id }).to_string()
}

/// Condition payload (conditions).
pub fn condition(id: &str) -> String {
    json!({ "resourceType": "Condition", "id": id }).to_string()
}

/// Heart rate observation (vital signs).
pub fn heart_rate(id: &str) -> String {
    json!({
        "resourceType": "Observation",
        "id": id,
        "code": { "coding": [{ "system": "http://loinc.org", "code": "8867-4" }] },
        "category": [{
            "coding": [{
                "system": "http://terminology.hl7.org/CodeSystem/observation-category",
                "code": "vital-signs"
            }]
        }]
    })
    .to_string()
}

// ============================================================================
// SECTION: Access History
// ============================================================================

/// Scripted system access history.
#[derive(Debug, Clone, Default)]
pub struct FakeHistory {
    /// Categories reported as system-owned.
    pub system_owned: BTreeSet<MedicalCategory>,
    /// Accesses returned for every scope.
    pub accesses: Vec<HistoricalAccess>,
    /// When true, history reads fail.
    pub unavailable: bool,
}

impl FakeHistory {
    /// History owning the given categories with no recorded accesses.
    pub fn owning(categories: impl IntoIterator<Item = MedicalCategory>) -> Self {
        Self {
            system_owned: categories.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl AccessHistoryProvider for FakeHistory {
    fn historical_accesses(
        &self,
        _scope: UserScope,
    ) -> Result<Vec<HistoricalAccess>, AccessHistoryError> {
        if self.unavailable {
            return Err(AccessHistoryError::Unavailable("history offline".to_string()));
        }
        Ok(self.accesses.clone())
    }

    fn system_owned_categories(&self) -> BTreeSet<MedicalCategory> {
        self.system_owned.clone()
    }
}
