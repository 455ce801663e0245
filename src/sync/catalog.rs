//! Feed → catalog reconciliation.
//!
//! Pages are processed strictly in feed order. Within a page records are
//! deduplicated by business key (last one wins), diffed against the store
//! and written with one insert batch and one upsert batch. Page N is fully
//! written, or its failure logged, before page N+1 is requested.

use crate::catalog::scanner::{DEFAULT_SCAN_DEPTH, records_at, scan_for_arrays};
use crate::catalog::transform::raw_stock_quantity;
use crate::catalog::{CatalogKey, CatalogRecord, FieldMapping, TransformOptions, transform};
use crate::feed::{FeedRequestConfig, SupplierFeed};
use crate::metrics;
use crate::sync::RunOutcome;
use crate::sync::error::SyncError;
use crate::sync::pacing::StopHandle;
use crate::sync::progress::{EventLevel, ProgressHandle, RunPhase};
use crate::sync::store::CatalogStore;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CatalogSyncPlan {
    pub feed: FeedRequestConfig,
    pub mapping: FieldMapping,
    pub page_size: usize,
    pub markup: Decimal,
}

impl CatalogSyncPlan {
    /// Mapping problems are reported before anything is fetched or written.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.page_size == 0 {
            return Err(SyncError::invalid_input("plan", "page size must be positive"));
        }
        let missing = self.mapping.missing_required();
        if !missing.is_empty() {
            let names: Vec<&str> = missing.iter().map(|field| field.as_str()).collect();
            return Err(SyncError::invalid_input(
                "mapping",
                format!("required fields are not mapped: {}", names.join(", ")),
            ));
        }
        Ok(())
    }

    fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            supplier_id: self.feed.supplier_id,
            markup: self.markup,
        }
    }
}

/// Records of one page after transformation and in-page deduplication.
#[derive(Debug, Default)]
struct PreparedPage {
    records: Vec<CatalogRecord>,
    skipped: u64,
}

pub async fn run_catalog_sync(
    feed: &dyn SupplierFeed,
    store: &dyn CatalogStore,
    plan: &CatalogSyncPlan,
    progress: &ProgressHandle,
    stop: &StopHandle,
) -> Result<RunOutcome, SyncError> {
    plan.validate()?;
    let options = plan.transform_options();
    let mut list_path = plan.feed.list_path.clone();
    let mut offset = 0usize;
    let mut page = 0u64;

    loop {
        if stop.is_stopped() {
            progress.set_phase(RunPhase::Stopped).await;
            progress.record(EventLevel::Warn, "stopped by operator").await;
            return Ok(RunOutcome::Stopped(progress.counters().await));
        }

        progress
            .set_phase(RunPhase::FetchingPage { page, offset })
            .await;
        let document = feed
            .fetch_page(offset, plan.page_size)
            .await
            .map_err(|err| SyncError::feed("fetch_page", err))?;

        let raw_records = match locate_records(&document, &mut list_path) {
            Some(records) => records,
            None if page == 0 => {
                return Err(SyncError::invalid_input(
                    "locate_list",
                    "no list of records found in the feed response",
                ));
            }
            None => Vec::new(),
        };
        let raw_len = raw_records.len();

        progress.set_phase(RunPhase::Transforming { page }).await;
        let prepared = prepare_page(&raw_records, plan, &options);

        progress.set_phase(RunPhase::Diffing { page }).await;
        let (inserts, updates) = diff_page(store, plan.feed.supplier_id, prepared.records)
            .await?;

        progress.set_phase(RunPhase::Writing { page }).await;
        let written = write_page(store, &inserts, &updates).await;

        progress
            .update(|counters| {
                counters.pages += 1;
                counters.processed += raw_len as u64;
                counters.skipped += prepared.skipped;
                counters.inserted += written.inserted;
                counters.updated += written.updated;
                counters.failed += written.failed;
            })
            .await;
        metrics::page_synced(page, written.inserted, written.updated, written.failed);
        info!(
            target = "supplier_sync.catalog",
            page,
            offset,
            items = raw_len,
            inserted = written.inserted,
            updated = written.updated,
            skipped = prepared.skipped,
            "page reconciled"
        );
        for message in written.errors {
            progress.record(EventLevel::Error, message).await;
        }
        progress
            .record(
                EventLevel::Info,
                format!(
                    "page {} ({} items): {} inserted, {} updated, {} skipped",
                    page + 1,
                    raw_len,
                    written.inserted,
                    written.updated,
                    prepared.skipped
                ),
            )
            .await;

        if raw_len < plan.page_size {
            break;
        }
        offset += plan.page_size;
        page += 1;
    }

    progress.set_phase(RunPhase::Done).await;
    Ok(RunOutcome::Completed(progress.counters().await))
}

/// Uses the configured list path, or the largest collection the scanner
/// finds on the first page; later pages reuse whatever was chosen.
fn locate_records<'a>(document: &'a Value, list_path: &mut Option<String>) -> Option<Vec<&'a Value>> {
    if let Some(path) = list_path.as_deref() {
        return records_at(document, path);
    }
    let candidate = scan_for_arrays(document, DEFAULT_SCAN_DEPTH).into_iter().next()?;
    let records = records_at(document, &candidate.path)?;
    *list_path = Some(candidate.path);
    Some(records)
}

fn prepare_page(raw: &[&Value], plan: &CatalogSyncPlan, options: &TransformOptions) -> PreparedPage {
    let mut prepared = PreparedPage::default();
    let mut positions: HashMap<CatalogKey, usize> = HashMap::new();

    for item in raw {
        if plan.feed.in_stock_only && raw_stock_quantity(item, &plan.mapping) == 0 {
            prepared.skipped += 1;
            continue;
        }
        let mut record = transform(item, &plan.mapping, options);
        let Some(key) = record.key() else {
            prepared.skipped += 1;
            continue;
        };
        record.catalog_number = key.catalog_number.clone();
        match positions.get(&key) {
            Some(&index) => prepared.records[index] = record,
            None => {
                positions.insert(key, prepared.records.len());
                prepared.records.push(record);
            }
        }
    }
    prepared
}

async fn diff_page(
    store: &dyn CatalogStore,
    supplier_id: i64,
    records: Vec<CatalogRecord>,
) -> Result<(Vec<CatalogRecord>, Vec<CatalogRecord>), SyncError> {
    if records.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let keys: Vec<String> = records
        .iter()
        .map(|record| record.catalog_number.clone())
        .collect();
    let existing: HashMap<String, i64> = store
        .find_by_keys(supplier_id, &keys)
        .await
        .map_err(|err| SyncError::store("diff", err))?
        .into_iter()
        .map(|row| (row.catalog_number.trim().to_string(), row.id))
        .collect();

    let (mut inserts, mut updates) = (Vec::new(), Vec::new());
    for mut record in records {
        match existing.get(&record.catalog_number) {
            Some(id) => {
                record.id = Some(*id);
                updates.push(record);
            }
            None => inserts.push(record),
        }
    }
    Ok((inserts, updates))
}

#[derive(Debug, Default)]
struct WriteResult {
    inserted: u64,
    updated: u64,
    failed: u64,
    errors: Vec<String>,
}

/// Batch failures are counted and logged; the run carries on.
async fn write_page(
    store: &dyn CatalogStore,
    inserts: &[CatalogRecord],
    updates: &[CatalogRecord],
) -> WriteResult {
    let mut result = WriteResult::default();
    if !inserts.is_empty() {
        match store.insert_many(inserts).await {
            Ok(count) => result.inserted += count as u64,
            Err(err) => {
                warn!(target = "supplier_sync.catalog", error = %err, rows = inserts.len(), "insert batch failed");
                result.failed += inserts.len() as u64;
                result.errors.push(format!("insert of {} rows failed: {err}", inserts.len()));
            }
        }
    }
    if !updates.is_empty() {
        match store.upsert_many(updates).await {
            Ok(count) => result.updated += count as u64,
            Err(err) => {
                warn!(target = "supplier_sync.catalog", error = %err, rows = updates.len(), "update batch failed");
                result.failed += updates.len() as u64;
                result.errors.push(format!("update of {} rows failed: {err}", updates.len()));
            }
        }
    }
    result
}
