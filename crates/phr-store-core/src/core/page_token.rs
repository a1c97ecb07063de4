// crates/phr-store-core/src/core/page_token.rs
// ============================================================================
// Module: Page Tokens
// Description: Opaque continuation tokens for category scans.
// Purpose: Resume bounded scans and reject tokens replayed against other filters.
// Dependencies: base64, serde, serde_json
// ============================================================================

//! ## Overview
//! A page token is URL-safe base64 over a small JSON cursor holding the
//! filter signature (category plus data source filter) and the last internal
//! row id consumed. Tokens are not encrypted; they are checked against the
//! request that presents them and refused when the filter differs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as Base64;
use serde::Deserialize;
use serde::Serialize;

use crate::core::category::MedicalCategory;
use crate::core::error::PhrError;
use crate::core::identifiers::DataSourceId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Error message for any rejected token.
const INVALID_PAGE_TOKEN: &str = "invalid page token";

// ============================================================================
// SECTION: Cursor
// ============================================================================

/// Decoded page token payload.
///
/// # Invariants
/// - `last_row_id` is non-negative.
/// - `data_source_ids` is sorted and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageCursor {
    /// Internal row id of the last resource returned.
    pub last_row_id: i64,
    /// Category the scan was issued for.
    pub category: MedicalCategory,
    /// Data source filter the scan was issued for.
    #[serde(default)]
    pub data_source_ids: BTreeSet<DataSourceId>,
}

impl PageCursor {
    /// Creates a cursor for the given filter.
    #[must_use]
    pub const fn new(
        last_row_id: i64,
        category: MedicalCategory,
        data_source_ids: BTreeSet<DataSourceId>,
    ) -> Self {
        Self {
            last_row_id,
            category,
            data_source_ids,
        }
    }

    /// Encodes the cursor into an opaque token.
    #[must_use]
    pub fn encode(&self) -> String {
        // Serializing plain fields into a Vec cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        Base64.encode(json)
    }

    /// Decodes an opaque token.
    ///
    /// # Errors
    ///
    /// Returns [`PhrError::InvalidArgument`] when the token is malformed or
    /// carries a negative row id.
    pub fn decode(token: &str) -> Result<Self, PhrError> {
        let bytes = Base64.decode(token).map_err(|_| PhrError::invalid(INVALID_PAGE_TOKEN))?;
        let cursor: Self =
            serde_json::from_slice(&bytes).map_err(|_| PhrError::invalid(INVALID_PAGE_TOKEN))?;
        if cursor.last_row_id < 0 {
            return Err(PhrError::invalid(INVALID_PAGE_TOKEN));
        }
        Ok(cursor)
    }

    /// Decodes a token and checks it was issued for the same filter.
    ///
    /// # Errors
    ///
    /// Returns [`PhrError::InvalidArgument`] when the token is malformed or
    /// belongs to a different filter.
    pub fn decode_for(
        token: &str,
        category: MedicalCategory,
        data_source_ids: &BTreeSet<DataSourceId>,
    ) -> Result<Self, PhrError> {
        let cursor = Self::decode(token)?;
        if cursor.category != category || &cursor.data_source_ids != data_source_ids {
            return Err(PhrError::invalid(INVALID_PAGE_TOKEN));
        }
        Ok(cursor)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::*;

    #[test]
    fn token_resumes_for_same_filter() {
        let ids: BTreeSet<_> = [DataSourceId::generate()].into_iter().collect();
        let token = PageCursor::new(42, MedicalCategory::Vaccines, ids.clone()).encode();
        let cursor = PageCursor::decode_for(&token, MedicalCategory::Vaccines, &ids).unwrap();
        assert_eq!(cursor.last_row_id, 42);
    }

    #[test]
    fn token_rejected_for_other_category() {
        let token = PageCursor::new(1, MedicalCategory::Vaccines, BTreeSet::new()).encode();
        let err = PageCursor::decode_for(&token, MedicalCategory::Conditions, &BTreeSet::new())
            .unwrap_err();
        assert_eq!(err, PhrError::invalid(INVALID_PAGE_TOKEN));
    }

    #[test]
    fn token_rejected_for_other_data_sources() {
        let token = PageCursor::new(1, MedicalCategory::Vaccines, BTreeSet::new()).encode();
        let ids: BTreeSet<_> = [DataSourceId::generate()].into_iter().collect();
        assert!(PageCursor::decode_for(&token, MedicalCategory::Vaccines, &ids).is_err());
    }

    #[test]
    fn negative_row_id_is_rejected() {
        let token = Base64.encode(br#"{"last_row_id":-1,"category":"vaccines"}"#);
        assert!(PageCursor::decode(&token).is_err());
    }
}
