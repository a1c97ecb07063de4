// crates/phr-store-core/src/core/permissions.rs
// ============================================================================
// Module: Read Permissions
// Description: Resolution of already-granted permission facts into visibility.
// Purpose: Decide which stored rows a caller may see and which reads are audited.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Permission facts arrive fully resolved: the categories the caller may read,
//! whether it holds write permission, and whether it is running in the
//! background without the background-read grant. This module turns those
//! facts into a [`ReadScope`] that storage engines apply row by row, and into
//! the category set recorded in the access log.
//!
//! Write permission acts as a self-read bypass: a writer can always read back
//! rows it owns. Category grants open rows of other owners.
//!
//! ## Audit rule
//! A read is audited with the returned categories intersected with the
//! granted categories. Nothing is audited when the caller is background
//! restricted, holds no grants, or received no rows. Rows reached only through
//! the write bypass therefore never appear in the audit set.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::category::MedicalCategory;
use crate::core::error::PhrError;
use crate::core::identifiers::AppId;

// ============================================================================
// SECTION: Permission Facts
// ============================================================================

/// Resolved permission facts for one read call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadPermissions {
    /// Categories the caller holds read grants for.
    pub granted_categories: BTreeSet<MedicalCategory>,
    /// Whether the caller holds the write permission.
    pub has_write_permission: bool,
    /// Whether the caller runs in the background without background read.
    pub background_without_background_read: bool,
}

impl ReadPermissions {
    /// Permissions for a foreground writer without category grants.
    #[must_use]
    pub fn writer() -> Self {
        Self {
            has_write_permission: true,
            ..Self::default()
        }
    }

    /// Permissions for a foreground reader holding the given grants.
    #[must_use]
    pub fn granted(categories: impl IntoIterator<Item = MedicalCategory>) -> Self {
        Self {
            granted_categories: categories.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Returns a copy with write permission set.
    #[must_use]
    pub fn with_write_permission(self, has_write_permission: bool) -> Self {
        Self {
            has_write_permission,
            ..self
        }
    }

    /// Returns a copy with background restriction set.
    #[must_use]
    pub fn in_background_without_read(self, restricted: bool) -> Self {
        Self {
            background_without_background_read: restricted,
            ..self
        }
    }

    /// Returns true when the category is granted.
    #[must_use]
    pub fn is_granted(&self, category: MedicalCategory) -> bool {
        self.granted_categories.contains(&category)
    }

    /// Fails when the facts authorize no read at all.
    ///
    /// # Errors
    ///
    /// Returns [`PhrError::IllegalState`] without write permission and grants.
    pub fn ensure_authorized(&self) -> Result<(), PhrError> {
        if !self.has_write_permission && self.granted_categories.is_empty() {
            return Err(PhrError::IllegalState("no read or write permission".to_string()));
        }
        Ok(())
    }

    /// Resolves the row visibility rule.
    #[must_use]
    pub fn scope(&self) -> ReadScope {
        match (
            self.background_without_background_read,
            self.has_write_permission,
            self.granted_categories.is_empty(),
        ) {
            (true, true, _) | (false, true, true) => ReadScope::OwnOnly,
            (true, false, _) => ReadScope::OwnAndGranted,
            (false, true, false) => ReadScope::OwnOrGranted,
            (false, false, _) => ReadScope::GrantedOnly,
        }
    }

    /// Computes the audited category set for rows returned by a read.
    #[must_use]
    pub fn audited_categories(
        &self,
        returned: impl IntoIterator<Item = MedicalCategory>,
    ) -> BTreeSet<MedicalCategory> {
        if self.background_without_background_read || self.granted_categories.is_empty() {
            return BTreeSet::new();
        }
        returned.into_iter().filter(|category| self.is_granted(*category)).collect()
    }
}

// ============================================================================
// SECTION: Visibility
// ============================================================================

/// Row visibility rule derived from [`ReadPermissions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadScope {
    /// Only rows owned by the caller.
    OwnOnly,
    /// Rows owned by the caller whose category is granted.
    OwnAndGranted,
    /// Rows owned by the caller, plus any row whose category is granted.
    OwnOrGranted,
    /// Any row whose category is granted.
    GrantedOnly,
}

impl ReadScope {
    /// Returns whether a row is visible.
    #[must_use]
    pub const fn admits(self, is_own: bool, is_granted: bool) -> bool {
        match self {
            Self::OwnOnly => is_own,
            Self::OwnAndGranted => is_own && is_granted,
            Self::OwnOrGranted => is_own || is_granted,
            Self::GrantedOnly => is_granted,
        }
    }
}

/// Whether a visible row belongs to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessClass {
    /// Row owned by the caller.
    SelfAccess,
    /// Row owned by another application.
    NonSelf,
}

impl AccessClass {
    /// Classifies a row by owner.
    #[must_use]
    pub fn of(caller: Option<AppId>, owner: AppId) -> Self {
        if caller == Some(owner) { Self::SelfAccess } else { Self::NonSelf }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
