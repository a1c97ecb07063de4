// crates/phr-store-sqlite/tests/permissions.rs
// ============================================================================
// Module: Permission-Aware Read Tests
// Description: Integration tests for read visibility and read auditing.
// Purpose: Validate self versus non-self visibility across permission combinations.
// ============================================================================

//! ## Overview
//! Two applications each write one vaccine and one allergy resource. Each
//! test reads all four ids as one of them and checks which rows come back and
//! which categories are audited.

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

use std::collections::BTreeSet;

use common::allergy;
use common::create_source;
use common::immunization;
use common::open_store;
use common::upsert_one;
use phr_store_core::AccessLogEntry;
use phr_store_core::MedicalCategory;
use phr_store_core::MedicalResource;
use phr_store_core::OperationKind;
use phr_store_core::PackageName;
use phr_store_core::ReadPermissions;
use phr_store_core::ReadResourcesRequest;
use phr_store_core::ResourceUuid;
use phr_store_core::UserScope;
use phr_store_sqlite::SqlitePhrStore;
use phr_store_sqlite::SqliteStoreError;
use tempfile::TempDir;

// ============================================================================
// SECTION: Fixture
// ============================================================================

struct Fixture {
    _temp: TempDir,
    store: SqlitePhrStore,
    caller: PackageName,
    own_vaccine: MedicalResource,
    own_allergy: MedicalResource,
    other_vaccine: MedicalResource,
    other_allergy: MedicalResource,
}

impl Fixture {
    fn new() -> Self {
        let (temp, store) = open_store();
        let caller = PackageName::new("com.example.caller");
        let other = PackageName::new("com.example.other");
        let mine = create_source(&store, &caller, "Mine");
        let theirs = create_source(&store, &other, "Theirs");
        let own_vaccine = upsert_one(&store, &caller, &mine, &immunization("imm-own"));
        let own_allergy = upsert_one(&store, &caller, &mine, &allergy("a-own"));
        let other_vaccine = upsert_one(&store, &other, &theirs, &immunization("imm-other"));
        let other_allergy = upsert_one(&store, &other, &theirs, &allergy("a-other"));
        Self {
            _temp: temp,
            store,
            caller,
            own_vaccine,
            own_allergy,
            other_vaccine,
            other_allergy,
        }
    }

    fn all_ids(&self) -> Vec<ResourceUuid> {
        vec![
            self.own_vaccine.uuid,
            self.own_allergy.uuid,
            self.other_vaccine.uuid,
            self.other_allergy.uuid,
        ]
    }

    fn read(&self, permissions: &ReadPermissions) -> Vec<ResourceUuid> {
        let ids = self.all_ids();
        self.store
            .read_resources_by_ids_with_permission_checks(&ids, permissions, &self.caller)
            .unwrap()
            .into_iter()
            .map(|resource| resource.uuid)
            .collect()
    }

    fn caller_reads(&self) -> Vec<AccessLogEntry> {
        self.store
            .query_access_logs(UserScope::new(0))
            .unwrap()
            .into_iter()
            .filter(|entry| entry.package_name == self.caller)
            .filter(|entry| entry.operation == OperationKind::Read)
            .collect()
    }
}

// ============================================================================
// SECTION: Read By Ids
// ============================================================================

#[test]
fn no_permission_is_illegal_state() {
    let fixture = Fixture::new();
    let err = fixture
        .store
        .read_resources_by_ids_with_permission_checks(
            &fixture.all_ids(),
            &ReadPermissions::default(),
            &fixture.caller,
        )
        .unwrap_err();
    assert!(matches!(err, SqliteStoreError::IllegalState(_)));
}

#[test]
fn foreground_writer_without_grants_sees_own_rows_unaudited() {
    let fixture = Fixture::new();
    let read = fixture.read(&ReadPermissions::writer());
    assert_eq!(read, vec![fixture.own_vaccine.uuid, fixture.own_allergy.uuid]);
    assert!(fixture.caller_reads().is_empty());
}

#[test]
fn foreground_writer_with_grants_sees_own_or_granted() {
    let fixture = Fixture::new();
    let permissions =
        ReadPermissions::granted([MedicalCategory::Vaccines]).with_write_permission(true);
    let read = fixture.read(&permissions);
    assert_eq!(read, vec![
        fixture.own_vaccine.uuid,
        fixture.own_allergy.uuid,
        fixture.other_vaccine.uuid
    ]);

    let reads = fixture.caller_reads();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].categories, BTreeSet::from([MedicalCategory::Vaccines]));
    assert!(!reads[0].data_source_accessed);
}

#[test]
fn foreground_reader_sees_granted_rows_of_any_owner() {
    let fixture = Fixture::new();
    let permissions = ReadPermissions::granted([MedicalCategory::AllergiesIntolerances]);
    let read = fixture.read(&permissions);
    assert_eq!(read, vec![fixture.own_allergy.uuid, fixture.other_allergy.uuid]);

    let reads = fixture.caller_reads();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].categories, BTreeSet::from([MedicalCategory::AllergiesIntolerances]));
}

#[test]
fn background_writer_sees_own_rows_only() {
    let fixture = Fixture::new();
    let permissions = ReadPermissions::granted([MedicalCategory::Vaccines])
        .with_write_permission(true)
        .in_background_without_read(true);
    let read = fixture.read(&permissions);
    assert_eq!(read, vec![fixture.own_vaccine.uuid, fixture.own_allergy.uuid]);
    assert!(fixture.caller_reads().is_empty());
}

#[test]
fn background_reader_sees_own_granted_rows_only() {
    let fixture = Fixture::new();
    let permissions =
        ReadPermissions::granted([MedicalCategory::Vaccines]).in_background_without_read(true);
    let read = fixture.read(&permissions);
    assert_eq!(read, vec![fixture.own_vaccine.uuid]);
    assert!(fixture.caller_reads().is_empty());
}

#[test]
fn reader_with_no_matching_rows_writes_no_entry() {
    let fixture = Fixture::new();
    let permissions = ReadPermissions::granted([MedicalCategory::Conditions]);
    assert!(fixture.read(&permissions).is_empty());
    assert!(fixture.caller_reads().is_empty());
}

#[test]
fn reader_that_never_wrote_is_still_audited() {
    let fixture = Fixture::new();
    let stranger = PackageName::new("com.example.stranger");
    let permissions = ReadPermissions::granted([MedicalCategory::Vaccines]);
    let read = fixture
        .store
        .read_resources_by_ids_with_permission_checks(&fixture.all_ids(), &permissions, &stranger)
        .unwrap();
    assert_eq!(read.len(), 2);

    let entries = fixture.store.query_access_logs(UserScope::new(0)).unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last.package_name, stranger);
    assert_eq!(last.operation, OperationKind::Read);
}

// ============================================================================
// SECTION: Read By Request
// ============================================================================

#[test]
fn self_read_request_scans_own_rows_without_audit() {
    let fixture = Fixture::new();
    let request = ReadResourcesRequest::new(MedicalCategory::Vaccines, 10);
    let page = fixture
        .store
        .read_resources_by_request_with_permission_checks(&request, &fixture.caller, true)
        .unwrap();
    let ids: Vec<_> = page.resources.iter().map(|resource| resource.uuid).collect();
    assert_eq!(ids, vec![fixture.own_vaccine.uuid]);
    assert!(fixture.caller_reads().is_empty());
}

#[test]
fn unrestricted_read_request_scans_all_and_audits_category() {
    let fixture = Fixture::new();
    let request = ReadResourcesRequest::new(MedicalCategory::Vaccines, 10);
    let page = fixture
        .store
        .read_resources_by_request_with_permission_checks(&request, &fixture.caller, false)
        .unwrap();
    let ids: Vec<_> = page.resources.iter().map(|resource| resource.uuid).collect();
    assert_eq!(ids, vec![fixture.own_vaccine.uuid, fixture.other_vaccine.uuid]);

    let reads = fixture.caller_reads();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].categories, BTreeSet::from([MedicalCategory::Vaccines]));
}

#[test]
fn self_read_request_by_unknown_app_is_empty() {
    let fixture = Fixture::new();
    let stranger = PackageName::new("com.example.stranger");
    let request = ReadResourcesRequest::new(MedicalCategory::Vaccines, 10);
    let page = fixture
        .store
        .read_resources_by_request_with_permission_checks(&request, &stranger, true)
        .unwrap();
    assert!(page.resources.is_empty());
    assert_eq!(page.next_page_token, None);
    assert_eq!(page.remaining_count, 0);
}
