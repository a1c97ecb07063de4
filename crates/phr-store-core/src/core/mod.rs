// crates/phr-store-core/src/core/mod.rs
// ============================================================================
// Module: PHR Store Core Types
// Description: Canonical medical record, category, and audit structures.
// Purpose: Provide stable, serializable types shared by every storage backend.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! Core types describe data sources, medical resources, their coarse domain
//! categories, access log entries, and the permission facts consumed by
//! permission-aware reads. These types are the canonical source of truth for
//! any storage engine built on this crate.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod access_log;
pub mod category;
pub mod error;
pub mod identifiers;
pub mod identity;
pub mod page_token;
pub mod permissions;
pub mod records;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use access_log::AccessLogEntry;
pub use access_log::OperationKind;
pub use category::MedicalCategory;
pub use error::PhrError;
pub use identifiers::AppId;
pub use identifiers::DataSourceId;
pub use identifiers::FhirVersion;
pub use identifiers::PackageName;
pub use identifiers::ResourceUuid;
pub use identity::derive_resource_uuid;
pub use page_token::PageCursor;
pub use permissions::AccessClass;
pub use permissions::ReadPermissions;
pub use permissions::ReadScope;
pub use records::CreateDataSourceRequest;
pub use records::DataSource;
pub use records::DeleteResourcesRequest;
pub use records::FhirPayload;
pub use records::MedicalResource;
pub use records::ReadResourcesPage;
pub use records::ReadResourcesRequest;
pub use records::UpsertResourceRequest;
