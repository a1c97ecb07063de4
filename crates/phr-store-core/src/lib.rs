// crates/phr-store-core/src/lib.rs
// ============================================================================
// Module: PHR Store Core Library
// Description: Public API surface for the personal health record store core.
// Purpose: Expose core types, permission rules, and collaborator interfaces.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The PHR store core defines the backend-agnostic vocabulary of the on-device
//! medical record store: identifiers, domain categories, record structs,
//! deterministic resource identity, page tokens, and the permission rules
//! that decide which stored resources a caller may see. Storage engines
//! integrate through the interfaces in [`interfaces`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::AccessHistoryError;
pub use interfaces::AccessHistoryProvider;
pub use interfaces::AppIdentityError;
pub use interfaces::AppIdentityResolver;
pub use interfaces::HistoricalAccess;
pub use interfaces::NoSystemAccessHistory;
pub use interfaces::UserScope;
