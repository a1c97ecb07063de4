// crates/phr-store-core/src/core/error.rs
// ============================================================================
// Module: PHR Store Errors
// Description: Caller-facing error taxonomy for store operations.
// Purpose: Distinguish bad requests from unauthorizable reads.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Store operations surface two caller-facing failure kinds. Absent ids in
//! batch reads and deletes are never errors; they are omitted silently.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Caller-facing store errors.
///
/// # Invariants
/// - Messages never embed resource payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PhrError {
    /// Unknown or malformed ids, empty required lists, bad page tokens, or a
    /// mismatched ownership restriction on a single-entity delete.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Permission inputs are insufficient to authorize any read.
    #[error("illegal state: {0}")]
    IllegalState(String),
}

impl PhrError {
    /// Builds an [`PhrError::InvalidArgument`] from a message.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
