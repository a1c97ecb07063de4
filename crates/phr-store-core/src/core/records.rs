// crates/phr-store-core/src/core/records.rs
// ============================================================================
// Module: PHR Records
// Description: Data source, resource, and request value types.
// Purpose: Provide immutable request/response structs for store operations.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Records are plain immutable values. Requests are assembled with small
//! builder methods that consume and return the value, so fixtures and callers
//! never mutate shared state.
//!
//! The FHIR payload stays opaque: [`FhirPayload::parse`] extracts only the
//! resource type, the resource id, and the derived [`MedicalCategory`].
//! Embedded `contained` resources and references are never inspected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::category::MedicalCategory;
use crate::core::error::PhrError;
use crate::core::identifiers::DataSourceId;
use crate::core::identifiers::FhirVersion;
use crate::core::identifiers::PackageName;
use crate::core::identifiers::ResourceUuid;

// ============================================================================
// SECTION: Data Sources
// ============================================================================

/// Named grouping of resources owned by exactly one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSource {
    /// Externally visible identifier.
    pub id: DataSourceId,
    /// Owning application.
    pub package_name: PackageName,
    /// Display name, unique per owning application.
    pub display_name: String,
    /// Base URI of the FHIR server the data came from.
    pub fhir_base_uri: String,
    /// FHIR version every resource under this source must carry.
    pub fhir_version: FhirVersion,
    /// Time of the last resource write under this source (unix millis).
    pub last_data_update_ms: Option<i64>,
}

/// Request to create a data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDataSourceRequest {
    /// Display name, unique per owning application.
    pub display_name: String,
    /// Base URI of the FHIR server.
    pub fhir_base_uri: String,
    /// FHIR version of resources written under the source.
    pub fhir_version: FhirVersion,
}

impl CreateDataSourceRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        display_name: impl Into<String>,
        fhir_base_uri: impl Into<String>,
        fhir_version: FhirVersion,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            fhir_base_uri: fhir_base_uri.into(),
            fhir_version,
        }
    }

    /// Returns a copy with a different display name.
    #[must_use]
    pub fn with_display_name(self, display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..self
        }
    }

    /// Returns a copy with a different FHIR version.
    #[must_use]
    pub fn with_fhir_version(self, fhir_version: FhirVersion) -> Self {
        Self {
            fhir_version,
            ..self
        }
    }
}

// ============================================================================
// SECTION: Resources
// ============================================================================

/// Stored medical resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicalResource {
    /// Derived identifier.
    pub uuid: ResourceUuid,
    /// Coarse domain category from the index row.
    pub category: MedicalCategory,
    /// Owning data source.
    pub data_source_id: DataSourceId,
    /// FHIR resource type (for example `Immunization`).
    pub fhir_type: String,
    /// Caller-supplied FHIR resource id.
    pub fhir_resource_id: String,
    /// FHIR version of the payload.
    pub fhir_version: FhirVersion,
    /// Raw JSON payload.
    pub payload: String,
    /// Last write time (unix millis).
    pub last_modified_ms: i64,
}

/// Request to insert or replace one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResourceRequest {
    /// Target data source, owned by the caller.
    pub data_source_id: DataSourceId,
    /// FHIR version of the payload; must match the data source.
    pub fhir_version: FhirVersion,
    /// Raw JSON payload.
    pub payload: String,
}

impl UpsertResourceRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(
        data_source_id: DataSourceId,
        fhir_version: FhirVersion,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            data_source_id,
            fhir_version,
            payload: payload.into(),
        }
    }

    /// Returns a copy with a different payload.
    #[must_use]
    pub fn with_payload(self, payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..self
        }
    }
}

/// Fields extracted from a FHIR payload at write time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FhirPayload {
    /// FHIR `resourceType`.
    pub fhir_type: String,
    /// FHIR `id`.
    pub fhir_resource_id: String,
    /// Derived domain category.
    pub category: MedicalCategory,
}

impl FhirPayload {
    /// Parses the minimal identity fields from a raw payload.
    ///
    /// # Errors
    ///
    /// Returns [`PhrError::InvalidArgument`] when the payload is not a JSON
    /// object or lacks a non-empty `resourceType` or `id` string.
    pub fn parse(raw: &str) -> Result<Self, PhrError> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|_| PhrError::invalid("resource payload is not valid json"))?;
        if !value.is_object() {
            return Err(PhrError::invalid("resource payload must be a json object"));
        }
        let fhir_type = required_string(&value, "resourceType")?;
        let fhir_resource_id = required_string(&value, "id")?;
        let category = MedicalCategory::classify(&fhir_type, &value);
        Ok(Self {
            fhir_type,
            fhir_resource_id,
            category,
        })
    }
}

/// Reads a required, non-empty string field from a payload object.
fn required_string(value: &Value, field: &str) -> Result<String, PhrError> {
    match value.get(field).and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => Err(PhrError::invalid(format!("resource payload missing {field}"))),
    }
}

// ============================================================================
// SECTION: Read Requests
// ============================================================================

/// Paginated read filtered by category and optionally by data sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResourcesRequest {
    /// Category to scan.
    pub category: MedicalCategory,
    /// Optional data source filter; empty means all sources.
    pub data_source_ids: BTreeSet<DataSourceId>,
    /// Maximum resources per page.
    pub page_size: u32,
    /// Continuation token from a previous page.
    pub page_token: Option<String>,
}

impl ReadResourcesRequest {
    /// Creates a first-page request.
    #[must_use]
    pub const fn new(category: MedicalCategory, page_size: u32) -> Self {
        Self {
            category,
            data_source_ids: BTreeSet::new(),
            page_size,
            page_token: None,
        }
    }

    /// Returns a copy restricted to the given data sources.
    #[must_use]
    pub fn with_data_sources(self, ids: impl IntoIterator<Item = DataSourceId>) -> Self {
        Self {
            data_source_ids: ids.into_iter().collect(),
            ..self
        }
    }

    /// Returns a copy continuing from the given token.
    #[must_use]
    pub fn with_page_token(self, token: Option<String>) -> Self {
        Self {
            page_token: token,
            ..self
        }
    }
}

/// One page of a category scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadResourcesPage {
    /// Resources in insertion order.
    pub resources: Vec<MedicalResource>,
    /// Token for the next page; `None` when this page is the last.
    pub next_page_token: Option<String>,
    /// Matching rows remaining after this page.
    pub remaining_count: u64,
}

/// Filter for deleting resources by data source and/or category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResourcesRequest {
    /// Data sources to delete from; empty means any.
    pub data_source_ids: BTreeSet<DataSourceId>,
    /// Categories to delete; empty means any.
    pub categories: BTreeSet<MedicalCategory>,
}

impl DeleteResourcesRequest {
    /// Returns a copy that also matches the given data source.
    #[must_use]
    pub fn with_data_source(mut self, id: DataSourceId) -> Self {
        self.data_source_ids.insert(id);
        self
    }

    /// Returns a copy that also matches the given category.
    #[must_use]
    pub fn with_category(mut self, category: MedicalCategory) -> Self {
        self.categories.insert(category);
        self
    }

    /// Returns true when no filter is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data_source_ids.is_empty() && self.categories.is_empty()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
