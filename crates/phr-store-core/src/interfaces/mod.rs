// crates/phr-store-core/src/interfaces/mod.rs
// ============================================================================
// Module: PHR Store Interfaces
// Description: Collaborator traits consumed by storage engines.
// Purpose: Isolate application identity and system access history behind traits.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! Storage engines depend on two collaborators: an application identity
//! resolver that maps package names to stable numeric ids, and a system
//! access-history provider that reports reads of categories served outside
//! this store. Both are consumed synchronously.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::AppId;
use crate::core::MedicalCategory;
use crate::core::PackageName;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Number of uids reserved per device user.
pub const PER_USER_UID_RANGE: u32 = 100_000;

// ============================================================================
// SECTION: Application Identity
// ============================================================================

/// Application identity resolution errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppIdentityError {
    /// Backing storage failed.
    #[error("app identity store error: {0}")]
    Store(String),
    /// Package name is not acceptable.
    #[error("app identity invalid package: {0}")]
    Invalid(String),
}

/// Resolves package names to stable internal application ids.
pub trait AppIdentityResolver {
    /// Resolves a package, creating its id on first use.
    ///
    /// # Errors
    ///
    /// Returns [`AppIdentityError`] when resolution or creation fails.
    fn resolve_or_create(&self, package: &PackageName) -> Result<AppId, AppIdentityError>;

    /// Resolves a package without creating it.
    ///
    /// # Errors
    ///
    /// Returns [`AppIdentityError`] when the lookup fails.
    fn resolve(&self, package: &PackageName) -> Result<Option<AppId>, AppIdentityError>;
}

// ============================================================================
// SECTION: System Access History
// ============================================================================

/// Device user whose accesses are being queried.
///
/// # Invariants
/// - A uid belongs to the scope when `uid / PER_USER_UID_RANGE == user_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserScope {
    /// Device user id.
    pub user_id: u32,
}

impl UserScope {
    /// Creates a scope for a device user.
    #[must_use]
    pub const fn new(user_id: u32) -> Self {
        Self { user_id }
    }

    /// Returns true when the uid belongs to this user.
    #[must_use]
    pub const fn contains_uid(self, uid: u32) -> bool {
        uid / PER_USER_UID_RANGE == self.user_id
    }
}

/// One access recorded by the system outside this store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalAccess {
    /// Application that read the data.
    pub reader_package: PackageName,
    /// Application that wrote the data.
    pub writer_package: PackageName,
    /// Category accessed.
    pub category: MedicalCategory,
    /// Uid the access was attributed to.
    pub uid: u32,
    /// Access time (unix millis).
    pub access_time_ms: i64,
}

/// Access history provider errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessHistoryError {
    /// History could not be read.
    #[error("access history unavailable: {0}")]
    Unavailable(String),
}

/// System-level access history for categories that bypass this store.
pub trait AccessHistoryProvider {
    /// Returns accesses recorded by the system for the given user scope.
    ///
    /// Providers may return entries outside the scope; callers filter by uid.
    ///
    /// # Errors
    ///
    /// Returns [`AccessHistoryError`] when history cannot be read.
    fn historical_accesses(
        &self,
        scope: UserScope,
    ) -> Result<Vec<HistoricalAccess>, AccessHistoryError>;

    /// Returns the categories whose accesses are owned by the system.
    fn system_owned_categories(&self) -> BTreeSet<MedicalCategory>;
}

/// Provider with no system-owned categories and no history.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSystemAccessHistory;

impl AccessHistoryProvider for NoSystemAccessHistory {
    fn historical_accesses(
        &self,
        _scope: UserScope,
    ) -> Result<Vec<HistoricalAccess>, AccessHistoryError> {
        Ok(Vec::new())
    }

    fn system_owned_categories(&self) -> BTreeSet<MedicalCategory> {
        BTreeSet::new()
    }
}
