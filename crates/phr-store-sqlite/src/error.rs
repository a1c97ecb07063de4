// crates/phr-store-sqlite/src/error.rs
// ============================================================================
// Module: SQLite Store Errors
// Description: Error taxonomy for the SQLite PHR store.
// Purpose: Separate engine failures from caller-facing argument and state errors.
// Dependencies: phr-store-core, thiserror
// ============================================================================

//! ## Overview
//! [`SqliteStoreError`] carries both engine failures (I/O, database, corrupt
//! rows, schema version) and the caller-facing [`PhrError`] kinds.

// ============================================================================
// SECTION: Imports
// ============================================================================

use phr_store_core::AppIdentityError;
use phr_store_core::PhrError;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` store errors.
///
/// # Invariants
/// - Error messages avoid embedding resource payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqliteStoreError {
    /// Store I/O error.
    #[error("sqlite store io error: {0}")]
    Io(String),
    /// `SQLite` engine error.
    #[error("sqlite store db error: {0}")]
    Db(String),
    /// Stored row failed to decode.
    #[error("sqlite store corruption: {0}")]
    Corrupt(String),
    /// Store schema version mismatch.
    #[error("sqlite store version mismatch: {0}")]
    VersionMismatch(String),
    /// Invalid store configuration.
    #[error("sqlite store invalid config: {0}")]
    Invalid(String),
    /// Bad caller input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Permission inputs authorize nothing.
    #[error("illegal state: {0}")]
    IllegalState(String),
}

impl SqliteStoreError {
    /// Builds an [`SqliteStoreError::InvalidArgument`] from a message.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl From<PhrError> for SqliteStoreError {
    fn from(error: PhrError) -> Self {
        match error {
            PhrError::InvalidArgument(message) => Self::InvalidArgument(message),
            PhrError::IllegalState(message) => Self::IllegalState(message),
        }
    }
}

impl From<AppIdentityError> for SqliteStoreError {
    fn from(error: AppIdentityError) -> Self {
        match error {
            AppIdentityError::Store(message) => Self::Db(message),
            AppIdentityError::Invalid(message) => Self::InvalidArgument(message),
        }
    }
}

impl From<SqliteStoreError> for AppIdentityError {
    fn from(error: SqliteStoreError) -> Self {
        match error {
            SqliteStoreError::InvalidArgument(message) => Self::Invalid(message),
            other => Self::Store(other.to_string()),
        }
    }
}
