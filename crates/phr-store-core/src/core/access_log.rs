// crates/phr-store-core/src/core/access_log.rs
// ============================================================================
// Module: Access Log Entries
// Description: Immutable audit records of store operations.
// Purpose: Describe which categories an application touched and how.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! One logical operation produces one [`AccessLogEntry`] that lists every
//! category it touched. Entries are never mutated after they are appended.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::category::MedicalCategory;
use crate::core::identifiers::PackageName;

// ============================================================================
// SECTION: Operations
// ============================================================================

/// Kind of operation recorded in the access log.
///
/// # Invariants
/// - [`OperationKind::code`] values are persisted and must never be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Insert or replace.
    Upsert,
    /// Delete.
    Delete,
    /// Read.
    Read,
}

impl OperationKind {
    /// Returns the persisted integer code.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::Upsert => 0,
            Self::Delete => 1,
            Self::Read => 2,
        }
    }

    /// Resolves a persisted integer code.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Upsert),
            1 => Some(Self::Delete),
            2 => Some(Self::Read),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Entries
// ============================================================================

/// Audit record for one logical operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    /// Application that performed the operation.
    pub package_name: PackageName,
    /// Categories touched; empty for data source level operations.
    pub categories: BTreeSet<MedicalCategory>,
    /// Operation kind.
    pub operation: OperationKind,
    /// Whether the operation targeted data sources rather than resources.
    pub data_source_accessed: bool,
    /// Access time (unix millis).
    pub access_time_ms: i64,
}

impl AccessLogEntry {
    /// Creates a resource-level entry.
    #[must_use]
    pub fn resources(
        package_name: PackageName,
        categories: BTreeSet<MedicalCategory>,
        operation: OperationKind,
        access_time_ms: i64,
    ) -> Self {
        Self {
            package_name,
            categories,
            operation,
            data_source_accessed: false,
            access_time_ms,
        }
    }

    /// Creates a data-source-level entry.
    #[must_use]
    pub fn data_sources(
        package_name: PackageName,
        categories: BTreeSet<MedicalCategory>,
        operation: OperationKind,
        access_time_ms: i64,
    ) -> Self {
        Self {
            package_name,
            categories,
            operation,
            data_source_accessed: true,
            access_time_ms,
        }
    }
}
