// crates/phr-store-sqlite/src/scanner.rs
// ============================================================================
// Module: Paginated Category Scanner
// Description: Bounded, resumable scans of resources by domain category.
// Purpose: Page through index rows in insertion order with filter-bound tokens.
// Dependencies: phr-store-core, rusqlite
// ============================================================================

//! ## Overview
//! Scans walk the category index ordered by internal resource row id and
//! fetch one row past the page to detect whether more remain. The returned
//! token binds the category and data source filter; replaying it with a
//! different filter is rejected. Rows inserted mid-listing may or may not
//! appear in later pages.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use phr_store_core::AppId;
use phr_store_core::DataSourceId;
use phr_store_core::MedicalCategory;
use phr_store_core::PackageName;
use phr_store_core::PageCursor;
use phr_store_core::ReadResourcesPage;
use phr_store_core::ReadResourcesRequest;
use rusqlite::Transaction;
use rusqlite::params_from_iter;
use rusqlite::types::Value;

use crate::apps::app_id_param;
use crate::error::SqliteStoreError;
use crate::store::OwnedResource;
use crate::store::RESOURCE_COLUMNS;
use crate::store::RESOURCE_JOINS;
use crate::store::SqlitePhrStore;
use crate::store::map_resource_row;
use crate::store::placeholders;

// ============================================================================
// SECTION: Scanner
// ============================================================================

/// Validated scan parameters.
pub(crate) struct ScanFilter<'a> {
    /// Category to scan.
    pub(crate) category: MedicalCategory,
    /// Data source filter; empty means all.
    pub(crate) data_source_ids: &'a BTreeSet<DataSourceId>,
    /// Owner restriction.
    pub(crate) owner: Option<AppId>,
    /// Exclusive lower bound on row id.
    pub(crate) after_row_id: i64,
    /// Page size.
    pub(crate) page_size: u32,
}

impl SqlitePhrStore {
    /// Scans one page of a category without permission checks or auditing.
    ///
    /// With `owner_restriction`, only data owned by that package is visible;
    /// an unknown package sees an empty page.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteStoreError::InvalidArgument`] for an out-of-range page
    /// size or a malformed or mismatched page token.
    pub fn scan(
        &self,
        request: &ReadResourcesRequest,
        owner_restriction: Option<&PackageName>,
    ) -> Result<ReadResourcesPage, SqliteStoreError> {
        let after_row_id = self.validate_scan(request)?;
        let owner = match owner_restriction {
            Some(package) => match self.resolve_app(package)? {
                Some(app_id) => Some(app_id),
                None => return Ok(empty_page()),
            },
            None => None,
        };
        let mut guard = self.lock()?;
        let tx = guard.transaction().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        let filter = ScanFilter {
            category: request.category,
            data_source_ids: &request.data_source_ids,
            owner,
            after_row_id,
            page_size: request.page_size,
        };
        let page = scan_in_tx(&tx, &filter)?;
        tx.commit().map_err(|err| SqliteStoreError::Db(err.to_string()))?;
        Ok(page)
    }

    /// Checks page size and token, returning the row id to resume after.
    pub(crate) fn validate_scan(
        &self,
        request: &ReadResourcesRequest,
    ) -> Result<i64, SqliteStoreError> {
        let max_page_size = self.config().max_page_size;
        if request.page_size == 0 || request.page_size > max_page_size {
            return Err(SqliteStoreError::invalid_argument(format!(
                "page size must be between 1 and {max_page_size}"
            )));
        }
        match request.page_token.as_deref() {
            Some(token) => Ok(PageCursor::decode_for(
                token,
                request.category,
                &request.data_source_ids,
            )?
            .last_row_id),
            None => Ok(0),
        }
    }
}

/// Scans one page inside a caller-owned transaction.
pub(crate) fn scan_in_tx(
    tx: &Transaction<'_>,
    filter: &ScanFilter<'_>,
) -> Result<ReadResourcesPage, SqliteStoreError> {
    let (clause, mut values) = filter_clause(filter)?;
    let limit = i64::from(filter.page_size) + 1;
    values.push(Value::Integer(limit));
    let sql = format!(
        "SELECT {RESOURCE_COLUMNS} {RESOURCE_JOINS} WHERE {clause} ORDER BY r.row_id LIMIT ?{}",
        values.len()
    );
    let mut stmt = tx.prepare(&sql).map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), map_resource_row)
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    let mut resources = rows
        .map(|row| row.map_err(|err| SqliteStoreError::Db(err.to_string()))?.decode())
        .collect::<Result<Vec<OwnedResource>, _>>()?;

    let page_size = usize::try_from(filter.page_size).unwrap_or(usize::MAX);
    let has_more = resources.len() > page_size;
    resources.truncate(page_size);
    let Some(last_row_id) = resources.last().map(|owned| owned.row_id) else {
        return Ok(empty_page());
    };
    let remaining_count = if has_more { count_after(tx, filter, last_row_id)? } else { 0 };
    let next_page_token = has_more.then(|| {
        PageCursor::new(last_row_id, filter.category, filter.data_source_ids.clone()).encode()
    });
    Ok(ReadResourcesPage {
        resources: resources.into_iter().map(|owned| owned.resource).collect(),
        next_page_token,
        remaining_count,
    })
}

/// Counts matching rows after the given row id.
fn count_after(
    tx: &Transaction<'_>,
    filter: &ScanFilter<'_>,
    last_row_id: i64,
) -> Result<u64, SqliteStoreError> {
    let resumed = ScanFilter {
        after_row_id: last_row_id,
        ..*filter
    };
    let (clause, values) = filter_clause(&resumed)?;
    let sql = format!("SELECT COUNT(1) {RESOURCE_JOINS} WHERE {clause}");
    let count: i64 = tx
        .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))
        .map_err(|err| SqliteStoreError::Db(err.to_string()))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

/// Builds the shared `WHERE` clause and its bound values.
fn filter_clause(filter: &ScanFilter<'_>) -> Result<(String, Vec<Value>), SqliteStoreError> {
    let mut values =
        vec![Value::Integer(filter.category.code()), Value::Integer(filter.after_row_id)];
    let mut clause = "i.medical_category = ?1 AND r.row_id > ?2".to_string();
    if let Some(owner) = filter.owner {
        values.push(Value::Integer(app_id_param(owner)?));
        clause.push_str(&format!(" AND ds.app_info_id = ?{}", values.len()));
    }
    if !filter.data_source_ids.is_empty() {
        let start = values.len() + 1;
        values.extend(filter.data_source_ids.iter().map(|id| Value::Text(id.to_string())));
        clause.push_str(&format!(
            " AND ds.data_source_uuid IN ({})",
            placeholders(start, filter.data_source_ids.len())
        ));
    }
    Ok((clause, values))
}

/// Returns a final, empty page.
pub(crate) const fn empty_page() -> ReadResourcesPage {
    ReadResourcesPage {
        resources: Vec::new(),
        next_page_token: None,
        remaining_count: 0,
    }
}
