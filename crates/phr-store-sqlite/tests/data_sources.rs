// crates/phr-store-sqlite/tests/data_sources.rs
// ============================================================================
// Module: Data Source Store Tests
// Description: Integration tests for data source lifecycle and ownership.
// Purpose: Validate uniqueness, limits, ownership-restricted reads, and cascade deletes.
// ============================================================================

//! ## Overview
//! Exercises data source creation, lookup by id and package, permission-aware
//! lookup, and deletion with cascade to resources.

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
    reason = "Test-only assertions and helpers are permitted."
)]
#![allow(dead_code, reason = "Common module may have unused helpers.")]

mod common;

use common::R4;
use common::allergy;
use common::config_for_path;
use common::create_source;
use common::immunization;
use common::open_store;
use common::upsert_one;
use phr_store_core::CreateDataSourceRequest;
use phr_store_core::DataSource;
use phr_store_core::DataSourceId;
use phr_store_core::FhirVersion;
use phr_store_core::MedicalCategory;
use phr_store_core::OperationKind;
use phr_store_core::PackageName;
use phr_store_core::ReadPermissions;
use phr_store_core::ReadResourcesRequest;
use phr_store_core::UserScope;
use phr_store_sqlite::SqlitePhrStore;
use phr_store_sqlite::SqliteStoreConfig;
use phr_store_sqlite::SqliteStoreError;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn request(name: &str) -> CreateDataSourceRequest {
    CreateDataSourceRequest::new(name, "https://fhir.example.com/r4", FhirVersion::from(R4))
}

fn store_with_limit(limit: usize) -> (TempDir, SqlitePhrStore) {
    common::init_logging();
    let temp = TempDir::new().unwrap();
    let config = SqliteStoreConfig {
        max_data_sources_per_app: limit,
        ..config_for_path(temp.path())
    };
    let store = SqlitePhrStore::new(config).unwrap();
    (temp, store)
}

fn display_names(sources: &[DataSource]) -> Vec<&str> {
    sources.iter().map(|source| source.display_name.as_str()).collect()
}

/// Two owners: the caller holds a vaccine source and an empty source, the
/// other app holds one vaccine source and one allergy source.
struct PackageFixture {
    _temp: TempDir,
    store: SqlitePhrStore,
    caller: PackageName,
    other: PackageName,
}

impl PackageFixture {
    fn new() -> Self {
        let (temp, store) = open_store();
        let caller = PackageName::new("com.example.caller");
        let other = PackageName::new("com.example.other");
        let mine = create_source(&store, &caller, "Mine");
        create_source(&store, &caller, "MineEmpty");
        let theirs_vaccine = create_source(&store, &other, "TheirsVaccine");
        let theirs_allergy = create_source(&store, &other, "TheirsAllergy");
        upsert_one(&store, &caller, &mine, &immunization("imm-own"));
        upsert_one(&store, &other, &theirs_vaccine, &immunization("imm-other"));
        upsert_one(&store, &other, &theirs_allergy, &allergy("a-other"));
        Self {
            _temp: temp,
            store,
            caller,
            other,
        }
    }

    fn list(
        &self,
        packages: &[PackageName],
        permissions: &ReadPermissions,
    ) -> Result<Vec<DataSource>, SqliteStoreError> {
        self.store.get_data_sources_by_packages_with_permission_checks(
            packages,
            permissions,
            &self.caller,
        )
    }

    fn caller_reads(&self) -> usize {
        self.store
            .query_access_logs(UserScope::new(0))
            .unwrap()
            .iter()
            .filter(|entry| entry.package_name == self.caller)
            .filter(|entry| entry.operation == OperationKind::Read)
            .count()
    }
}

// ============================================================================
// SECTION: Create
// ============================================================================

#[test]
fn create_returns_random_id_and_reads_back() {
    let (_temp, store) = open_store();
    let app = PackageName::new("com.example.writer");
    let created = create_source(&store, &app, "Clinic");

    assert_eq!(created.id.as_uuid().get_version_num(), 4);
    assert_eq!(created.package_name, app);
    assert_eq!(created.last_data_update_ms, None);

    let fetched = store.get_data_sources_by_ids(&[created.id], None).unwrap();
    assert_eq!(fetched, vec![created]);
}

#[test]
fn create_rejects_duplicate_display_name_for_same_app() {
    let (_temp, store) = open_store();
    let app = PackageName::new("com.example.writer");
    create_source(&store, &app, "Clinic");

    let err = store.create_data_source(&app, &request("Clinic")).unwrap_err();
    assert_eq!(
        err,
        SqliteStoreError::InvalidArgument("display name should be unique per calling app".into())
    );

    let other = PackageName::new("com.example.other");
    store.create_data_source(&other, &request("Clinic")).unwrap();
}

#[test]
fn create_rejects_empty_display_name() {
    let (_temp, store) = open_store();
    let app = PackageName::new("com.example.writer");
    let err = store.create_data_source(&app, &request("  ")).unwrap_err();
    assert!(matches!(err, SqliteStoreError::InvalidArgument(_)));
}

#[test]
fn create_enforces_per_app_limit() {
    let (_temp, store) = store_with_limit(2);
    let app = PackageName::new("com.example.writer");
    create_source(&store, &app, "One");
    create_source(&store, &app, "Two");

    let err = store.create_data_source(&app, &request("Three")).unwrap_err();
    assert!(matches!(err, SqliteStoreError::InvalidArgument(_)));

    let other = PackageName::new("com.example.other");
    store.create_data_source(&other, &request("Three")).unwrap();
}

#[test]
fn create_records_data_source_upsert_entry() {
    let (_temp, store) = open_store();
    let app = PackageName::new("com.example.writer");
    create_source(&store, &app, "Clinic");

    let entries = store.query_access_logs(UserScope::new(0)).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].package_name, app);
    assert_eq!(entries[0].operation, OperationKind::Upsert);
    assert!(entries[0].data_source_accessed);
    assert!(entries[0].categories.is_empty());
}

// ============================================================================
// SECTION: Reads
// ============================================================================

#[test]
fn get_by_ids_applies_ownership_restriction() {
    let (_temp, store) = open_store();
    let writer = PackageName::new("com.example.writer");
    let other = PackageName::new("com.example.other");
    let mine = create_source(&store, &writer, "Mine");
    let theirs = create_source(&store, &other, "Theirs");
    let missing = DataSourceId::generate();

    let all = store.get_data_sources_by_ids(&[theirs.id, missing, mine.id], None).unwrap();
    assert_eq!(all, vec![theirs.clone(), mine.clone()]);

    let restricted =
        store.get_data_sources_by_ids(&[theirs.id, mine.id, mine.id], Some(&writer)).unwrap();
    assert_eq!(restricted, vec![mine]);

    let unknown = PackageName::new("com.example.unknown");
    assert!(store.get_data_sources_by_ids(&[theirs.id], Some(&unknown)).unwrap().is_empty());
}

#[test]
fn get_by_packages_filters_owners() {
    let (_temp, store) = open_store();
    let writer = PackageName::new("com.example.writer");
    let other = PackageName::new("com.example.other");
    let mine = create_source(&store, &writer, "Mine");
    let theirs = create_source(&store, &other, "Theirs");

    assert_eq!(store.get_data_sources_by_packages(&[]).unwrap(), vec![mine.clone(), theirs]);
    assert_eq!(store.get_data_sources_by_packages(&[writer]).unwrap(), vec![mine]);
    let unknown = PackageName::new("com.example.unknown");
    assert!(store.get_data_sources_by_packages(&[unknown]).unwrap().is_empty());
}

#[test]
fn last_data_update_tracks_latest_resource_write() {
    let (_temp, store) = open_store();
    let app = PackageName::new("com.example.writer");
    let source = create_source(&store, &app, "Clinic");
    let written = upsert_one(&store, &app, &source, &immunization("imm-1"));

    let fetched = store.get_data_sources_by_ids(&[source.id], None).unwrap();
    assert_eq!(fetched[0].last_data_update_ms, Some(written.last_modified_ms));
}

#[test]
fn permission_checked_get_requires_some_permission() {
    let (_temp, store) = open_store();
    let app = PackageName::new("com.example.writer");
    let source = create_source(&store, &app, "Clinic");

    let err = store
        .get_data_sources_by_ids_with_permission_checks(
            &[source.id],
            &ReadPermissions::default(),
            &app,
        )
        .unwrap_err();
    assert!(matches!(err, SqliteStoreError::IllegalState(_)));
}

#[test]
fn permission_checked_get_rejects_unknown_writer_without_grants() {
    let (_temp, store) = open_store();
    let owner = PackageName::new("com.example.writer");
    let source = create_source(&store, &owner, "Clinic");

    let stranger = PackageName::new("com.example.stranger");
    let err = store
        .get_data_sources_by_ids_with_permission_checks(
            &[source.id],
            &ReadPermissions::writer(),
            &stranger,
        )
        .unwrap_err();
    assert!(matches!(err, SqliteStoreError::InvalidArgument(_)));
}

#[test]
fn permission_checked_get_reaches_sources_through_grants() {
    let (_temp, store) = open_store();
    let owner = PackageName::new("com.example.writer");
    let holding = create_source(&store, &owner, "Holding");
    let empty = create_source(&store, &owner, "Empty");
    upsert_one(&store, &owner, &holding, &immunization("imm-1"));

    let reader = PackageName::new("com.example.reader");
    let permissions = ReadPermissions::granted([MedicalCategory::Vaccines]);
    let visible = store
        .get_data_sources_by_ids_with_permission_checks(
            &[holding.id, empty.id],
            &permissions,
            &reader,
        )
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, holding.id);

    let entries = store.query_access_logs(UserScope::new(0)).unwrap();
    let reads: Vec<_> = entries.iter().filter(|entry| entry.package_name == reader).collect();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].operation, OperationKind::Read);
    assert!(reads[0].data_source_accessed);
}

#[test]
fn permission_checked_get_for_own_sources_is_not_audited() {
    let (_temp, store) = open_store();
    let owner = PackageName::new("com.example.writer");
    let source = create_source(&store, &owner, "Clinic");
    upsert_one(&store, &owner, &source, &immunization("imm-1"));
    let before = store.query_access_logs(UserScope::new(0)).unwrap().len();

    let visible = store
        .get_data_sources_by_ids_with_permission_checks(
            &[source.id],
            &ReadPermissions::writer(),
            &owner,
        )
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(store.query_access_logs(UserScope::new(0)).unwrap().len(), before);
}

// ============================================================================
// SECTION: Permission-Checked Listing By Package
// ============================================================================

#[test]
fn package_listing_unions_own_and_granted_sources() {
    let fixture = PackageFixture::new();
    let permissions =
        ReadPermissions::granted([MedicalCategory::Vaccines]).with_write_permission(true);
    let visible = fixture.list(&[], &permissions).unwrap();
    assert_eq!(display_names(&visible), vec!["Mine", "MineEmpty", "TheirsVaccine"]);
    assert_eq!(fixture.caller_reads(), 1);

    let entries = fixture.store.query_access_logs(UserScope::new(0)).unwrap();
    let last = entries.last().unwrap();
    assert!(last.data_source_accessed);
    assert!(last.categories.is_empty());
}

#[test]
fn package_listing_excludes_own_sources_when_caller_not_listed() {
    let fixture = PackageFixture::new();
    let permissions =
        ReadPermissions::granted([MedicalCategory::Vaccines]).with_write_permission(true);
    let visible = fixture.list(&[fixture.other.clone()], &permissions).unwrap();
    assert_eq!(display_names(&visible), vec!["TheirsVaccine"]);
}

#[test]
fn package_listing_for_reader_follows_grants_within_filter() {
    let fixture = PackageFixture::new();
    let permissions = ReadPermissions::granted([MedicalCategory::AllergiesIntolerances]);
    let packages = [fixture.other.clone(), PackageName::new("com.example.unknown")];
    let visible = fixture.list(&packages, &permissions).unwrap();
    assert_eq!(display_names(&visible), vec!["TheirsAllergy"]);
    assert_eq!(fixture.caller_reads(), 1);

    let unknown_only = [PackageName::new("com.example.unknown")];
    let vaccines = ReadPermissions::granted([MedicalCategory::Vaccines]);
    assert!(fixture.list(&unknown_only, &vaccines).unwrap().is_empty());
    assert_eq!(fixture.caller_reads(), 1);
}

#[test]
fn package_listing_in_background_sees_own_granted_sources_unaudited() {
    let fixture = PackageFixture::new();
    let permissions =
        ReadPermissions::granted([MedicalCategory::Vaccines]).in_background_without_read(true);
    let visible = fixture.list(&[], &permissions).unwrap();
    assert_eq!(display_names(&visible), vec!["Mine"]);
    assert_eq!(fixture.caller_reads(), 0);
}

#[test]
fn package_listing_rejects_other_packages_for_self_only_callers() {
    let fixture = PackageFixture::new();
    let others = [fixture.other.clone()];
    let expected = SqliteStoreError::InvalidArgument(
        "app doesn't have permission to read based on the given packages".into(),
    );

    let background =
        ReadPermissions::granted([MedicalCategory::Vaccines]).in_background_without_read(true);
    assert_eq!(fixture.list(&others, &background).unwrap_err(), expected);
    assert_eq!(fixture.list(&others, &ReadPermissions::writer()).unwrap_err(), expected);

    let with_self = [fixture.caller.clone(), fixture.other.clone()];
    let visible = fixture.list(&with_self, &ReadPermissions::writer()).unwrap();
    assert_eq!(display_names(&visible), vec!["Mine", "MineEmpty"]);
    assert_eq!(fixture.caller_reads(), 0);
}

#[test]
fn package_listing_requires_data_or_grants() {
    let fixture = PackageFixture::new();
    let err = fixture.list(&[], &ReadPermissions::default()).unwrap_err();
    assert!(matches!(err, SqliteStoreError::IllegalState(_)));

    let stranger = PackageName::new("com.example.stranger");
    let err = fixture
        .store
        .get_data_sources_by_packages_with_permission_checks(
            &[],
            &ReadPermissions::writer(),
            &stranger,
        )
        .unwrap_err();
    assert_eq!(
        err,
        SqliteStoreError::InvalidArgument(
            "app has not written any data and does not have any read permission".into()
        )
    );
}

// ============================================================================
// SECTION: Delete
// ============================================================================

#[test]
fn delete_cascades_to_resources() {
    let (_temp, store) = open_store();
    let app = PackageName::new("com.example.writer");
    let source = create_source(&store, &app, "Clinic");
    let resource = upsert_one(&store, &app, &source, &immunization("imm-1"));

    store.delete_data_source(&source.id, Some(&app)).unwrap();

    assert!(store.get_data_sources_by_ids(&[source.id], None).unwrap().is_empty());
    assert!(store.read_resources_by_ids(&[resource.uuid]).unwrap().is_empty());
    let request = ReadResourcesRequest::new(MedicalCategory::Vaccines, 10);
    let index = store.scan(&request, None).unwrap();
    assert!(index.resources.is_empty());
    assert_eq!(index.remaining_count, 0);
    assert!(store.get_category_to_contributing_data_sources().unwrap().is_empty());

    let entries = store.query_access_logs(UserScope::new(0)).unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.operation, OperationKind::Delete);
    assert!(last.data_source_accessed);
    assert_eq!(last.categories.iter().copied().collect::<Vec<_>>(), vec![
        MedicalCategory::Vaccines
    ]);
}

#[test]
fn delete_by_other_app_fails_and_keeps_data() {
    let (_temp, store) = open_store();
    let owner = PackageName::new("com.example.writer");
    let other = PackageName::new("com.example.other");
    let source = create_source(&store, &owner, "Clinic");
    let resource = upsert_one(&store, &owner, &source, &immunization("imm-1"));
    create_source(&store, &other, "Elsewhere");

    let err = store.delete_data_source(&source.id, Some(&other)).unwrap_err();
    assert_eq!(
        err,
        SqliteStoreError::InvalidArgument(format!(
            "id {} does not exist or is owned by another app",
            source.id
        ))
    );
    assert_eq!(store.read_resources_by_ids(&[resource.uuid]).unwrap().len(), 1);
}

#[test]
fn delete_by_app_without_data_fails() {
    let (_temp, store) = open_store();
    let owner = PackageName::new("com.example.writer");
    let source = create_source(&store, &owner, "Clinic");

    let stranger = PackageName::new("com.example.stranger");
    let err = store.delete_data_source(&source.id, Some(&stranger)).unwrap_err();
    assert_eq!(
        err,
        SqliteStoreError::InvalidArgument(
            "deletion not permitted as app has inserted no data".into()
        )
    );
}

#[test]
fn delete_by_app_that_only_read_fails() {
    let (_temp, store) = open_store();
    let owner = PackageName::new("com.example.writer");
    let source = create_source(&store, &owner, "Clinic");
    upsert_one(&store, &owner, &source, &immunization("imm-1"));

    let reader = PackageName::new("com.example.reader");
    let permissions = ReadPermissions::granted([MedicalCategory::Vaccines]);
    let visible = store
        .get_data_sources_by_ids_with_permission_checks(&[source.id], &permissions, &reader)
        .unwrap();
    assert_eq!(visible.len(), 1);

    let err = store.delete_data_source(&source.id, Some(&reader)).unwrap_err();
    assert_eq!(
        err,
        SqliteStoreError::InvalidArgument(
            "deletion not permitted as app has inserted no data".into()
        )
    );
    let err = store
        .get_data_sources_by_ids_with_permission_checks(
            &[source.id],
            &ReadPermissions::writer(),
            &reader,
        )
        .unwrap_err();
    assert!(matches!(err, SqliteStoreError::InvalidArgument(_)));
    assert_eq!(store.get_data_sources_by_ids(&[source.id], None).unwrap().len(), 1);
}

#[test]
fn delete_missing_id_fails() {
    let (_temp, store) = open_store();
    let missing = DataSourceId::generate();
    let err = store.delete_data_source(&missing, None).unwrap_err();
    assert_eq!(err, SqliteStoreError::InvalidArgument(format!("id {missing} does not exist")));
}

#[test]
fn unrestricted_delete_is_not_audited() {
    let (_temp, store) = open_store();
    let app = PackageName::new("com.example.writer");
    let source = create_source(&store, &app, "Clinic");
    let before = store.query_access_logs(UserScope::new(0)).unwrap().len();

    store.delete_data_source(&source.id, None).unwrap();
    assert_eq!(store.query_access_logs(UserScope::new(0)).unwrap().len(), before);
}
