// crates/phr-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite PHR Store
// Description: Durable personal health record store backed by SQLite.
// Purpose: Persist data sources, FHIR resources, and access logs on device.
// Dependencies: phr-store-core, rusqlite, log
// ============================================================================

//! ## Overview
//! This crate provides [`SqlitePhrStore`], a SQLite-backed store for FHIR
//! medical resources grouped under application-owned data sources. Reads are
//! permission-aware, every logical operation records an access log entry in
//! the same transaction, and category listings page with filter-bound tokens.
//! Stored payloads and caller inputs are untrusted and validated on decode.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod access_logs;
mod apps;
pub mod config;
mod data_sources;
pub mod error;
mod resources;
mod scanner;
mod schema;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use apps::SqliteAppRegistry;
pub use config::SqliteStoreConfig;
pub use config::SqliteStoreMode;
pub use config::SqliteSyncMode;
pub use error::SqliteStoreError;
pub use schema::SCHEMA_VERSION;
pub use store::SqlitePhrStore;
