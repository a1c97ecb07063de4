// crates/phr-store-core/src/core/identity.rs
// ============================================================================
// Module: Resource Identity
// Description: Deterministic, content-addressed medical resource identifiers.
// Purpose: Make repeated upserts of the same logical resource idempotent.
// Dependencies: sha2, uuid
// ============================================================================

//! ## Overview
//! A resource UUID is a pure function of its owning data source, its FHIR
//! resource type, and the caller-supplied resource id. Each field is written
//! length-prefixed into a SHA-256 digest so that no two distinct triples share
//! an encoding; the first 16 digest bytes become a version 8 (custom) UUID.

// ============================================================================
// SECTION: Imports
// ============================================================================

use sha2::Digest;
use sha2::Sha256;
use uuid::Uuid;

use crate::core::identifiers::DataSourceId;
use crate::core::identifiers::ResourceUuid;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Domain separation prefix for resource identity digests.
const RESOURCE_ID_DOMAIN: &[u8] = b"phr-store/medical-resource/v1";

// ============================================================================
// SECTION: Derivation
// ============================================================================

/// Derives the stable UUID for a resource triple.
///
/// # Invariants
/// - Identical inputs always yield the identical UUID.
/// - Changing any single input yields a different UUID with overwhelming probability.
#[must_use]
pub fn derive_resource_uuid(
    data_source_id: &DataSourceId,
    fhir_type: &str,
    fhir_resource_id: &str,
) -> ResourceUuid {
    let mut hasher = Sha256::new();
    hasher.update(RESOURCE_ID_DOMAIN);
    write_field(&mut hasher, data_source_id.as_uuid().as_bytes());
    write_field(&mut hasher, fhir_type.as_bytes());
    write_field(&mut hasher, fhir_resource_id.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0_u8; 16];
    bytes.copy_from_slice(&digest[.. 16]);
    ResourceUuid::from_uuid(Uuid::new_v8(bytes))
}

/// Writes one length-prefixed field into the digest.
fn write_field(hasher: &mut Sha256, field: &[u8]) {
    let length = u64::try_from(field.len()).unwrap_or(u64::MAX);
    hasher.update(length.to_be_bytes());
    hasher.update(field);
}
