//! Photo backfill: walks the catalog by ascending id, asks the fetch proxy
//! for one image per eligible row and writes the stored URL back.
//!
//! The persisted cursor only moves to ids whose image was written. Items
//! that fail for good are remembered separately and retried first on the
//! next run, so resuming never repeats a success and never loses a failure.

use crate::catalog::PhotoCandidate;
use crate::config_store::{ConfigStoreError, SyncConfig};
use crate::metrics;
use crate::sync::RunOutcome;
use crate::sync::error::SyncError;
use crate::sync::pacing::{RateBudget, StopHandle, is_rate_limited, resume_at};
use crate::sync::progress::{EventLevel, ProgressHandle, RunPhase};
use crate::sync::store::{
    CatalogStore, FetchProxy, PhotoQuery, ProxyError, ProxyRequest, UploadTarget,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which catalog column identifies a product to the photo API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoIdSource {
    /// Supplier product number, sent negated.
    #[default]
    ProductNumber,
    CatalogNumber,
}

impl PhotoIdSource {
    /// `None` when the chosen column is empty or, for product numbers, not an
    /// integer.
    pub fn request_id(&self, candidate: &PhotoCandidate) -> Option<String> {
        match self {
            PhotoIdSource::ProductNumber => {
                let number = candidate.product_number.trim().parse::<i64>().ok()?;
                if number == 0 {
                    return None;
                }
                Some((-number.saturating_abs()).to_string())
            }
            PhotoIdSource::CatalogNumber => {
                let code = candidate.catalog_number.trim();
                (!code.is_empty()).then(|| code.to_string())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhotoSyncPlan {
    pub run_id: Uuid,
    pub query: PhotoQuery,
    pub id_source: PhotoIdSource,
    /// Overrides the persisted cursor for this run.
    pub start_after: Option<i64>,
    pub page_size: usize,
    pub url_template: String,
    pub headers: BTreeMap<String, String>,
    pub bucket: String,
}

impl PhotoSyncPlan {
    pub fn validate(&self) -> Result<(), SyncError> {
        if !self.url_template.contains("{id}") {
            return Err(SyncError::invalid_input(
                "plan",
                "photo url template must contain an {id} placeholder",
            ));
        }
        if self.page_size == 0 {
            return Err(SyncError::invalid_input("plan", "page size must be positive"));
        }
        if self.bucket.trim().is_empty() {
            return Err(SyncError::invalid_input("plan", "photo bucket is not configured"));
        }
        Ok(())
    }

    pub fn proxy_request(&self, candidate: &PhotoCandidate, request_id: &str) -> ProxyRequest {
        ProxyRequest {
            url: self
                .url_template
                .replace("{id}", &urlencoding::encode(request_id)),
            method: "GET".into(),
            headers: self.headers.clone(),
            body: None,
            upload: UploadTarget {
                bucket: self.bucket.clone(),
                path: format!("{}/{}.jpg", candidate.supplier_id, file_stem(request_id)),
            },
        }
    }
}

fn file_stem(request_id: &str) -> String {
    request_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

enum FetchOutcome {
    Stored(String),
    Failed(String),
    Stopped,
}

enum ItemOutcome {
    Written,
    Skipped,
    Failed,
    Stopped,
}

pub struct PhotoSync<'a> {
    pub store: &'a dyn CatalogStore,
    pub proxy: &'a dyn FetchProxy,
    pub config: &'a SyncConfig,
    pub budget: &'a RateBudget,
    pub progress: &'a ProgressHandle,
    pub stop: &'a StopHandle,
}

impl PhotoSync<'_> {
    pub async fn run(&self, plan: &PhotoSyncPlan) -> Result<RunOutcome, SyncError> {
        plan.validate()?;
        self.config
            .claim_cursor(plan.run_id)
            .await
            .map_err(|err| SyncError::config("claim_cursor", err))?;
        let persisted = self
            .config
            .load_cursor()
            .await
            .map_err(|err| SyncError::config("load_cursor", err))?;
        let cursor = plan.start_after.unwrap_or(persisted);
        let mut failed_ids: BTreeSet<i64> = self
            .config
            .load_failed_photos()
            .await
            .map_err(|err| SyncError::config("load_failed", err))?
            .into_iter()
            .collect();

        let retry: Vec<PhotoCandidate> = if failed_ids.is_empty() {
            Vec::new()
        } else {
            let ids: Vec<i64> = failed_ids.iter().copied().collect();
            let found = self
                .store
                .find_by_ids(&ids)
                .await
                .map_err(|err| SyncError::store("find_failed", err))?;
            // Rows deleted since the last run cannot be retried.
            let known: BTreeSet<i64> = found.iter().map(|c| c.id).collect();
            failed_ids.retain(|id| known.contains(id));
            found
                .into_iter()
                .filter(|c| plan.query.supplier_id.is_none_or(|supplier| c.supplier_id == supplier))
                .collect()
        };

        let remaining = self
            .store
            .count(&plan.query, cursor)
            .await
            .map_err(|err| SyncError::store("count", err))?;
        let behind_cursor = retry.iter().filter(|c| c.id <= cursor).count() as u64;
        let total = remaining + behind_cursor;
        self.progress.update(|c| c.total = Some(total)).await;
        self.progress.set_phase(RunPhase::Running).await;
        self.progress
            .record(
                EventLevel::Info,
                format!("starting after id {cursor}: {remaining} rows to check, {} to retry", retry.len()),
            )
            .await;
        info!(target = "supplier_sync.photos", run_id = %plan.run_id, cursor, total, "photo sync started");

        // Outcome of every retried id; the page walk below must not fetch them again.
        let mut retried: BTreeMap<i64, bool> = BTreeMap::new();
        for candidate in &retry {
            if self.stop.is_stopped() {
                self.save_failed(&failed_ids).await?;
                return Ok(self.stopped().await);
            }
            match self.process(plan, candidate).await? {
                ItemOutcome::Failed => {
                    retried.insert(candidate.id, false);
                }
                ItemOutcome::Written | ItemOutcome::Skipped => {
                    failed_ids.remove(&candidate.id);
                    retried.insert(candidate.id, true);
                }
                ItemOutcome::Stopped => {
                    self.save_failed(&failed_ids).await?;
                    return Ok(self.stopped().await);
                }
            }
        }
        if !retry.is_empty() {
            self.save_failed(&failed_ids).await?;
        }

        let mut scan_after = cursor;
        loop {
            if self.stop.is_stopped() {
                return Ok(self.stopped().await);
            }
            let page = self
                .store
                .page_after(&plan.query, scan_after, plan.page_size)
                .await
                .map_err(|err| SyncError::store("page_after", err))?;
            if page.is_empty() {
                break;
            }
            self.progress.update(|c| c.pages += 1).await;
            debug!(target = "supplier_sync.photos", after = scan_after, rows = page.len(), "photo page");

            for candidate in &page {
                if self.stop.is_stopped() {
                    return Ok(self.stopped().await);
                }
                scan_after = candidate.id;
                if let Some(&succeeded) = retried.get(&candidate.id) {
                    if succeeded {
                        self.advance(plan.run_id, persisted, candidate.id).await?;
                    }
                    continue;
                }
                match self.process(plan, candidate).await? {
                    ItemOutcome::Written => {
                        self.advance(plan.run_id, persisted, candidate.id).await?;
                    }
                    ItemOutcome::Failed => {
                        if failed_ids.insert(candidate.id) {
                            self.save_failed(&failed_ids).await?;
                        }
                    }
                    ItemOutcome::Skipped => {}
                    ItemOutcome::Stopped => return Ok(self.stopped().await),
                }
            }
            if page.len() < plan.page_size {
                break;
            }
        }

        self.progress.set_phase(RunPhase::Exhausted).await;
        self.progress
            .record(EventLevel::Info, "no more rows to process")
            .await;
        Ok(RunOutcome::Completed(self.progress.counters().await))
    }

    /// Moves the cursor to `id` unless the persisted cursor is already past
    /// it, which happens when `start_after` rewinds a run.
    async fn advance(&self, run_id: Uuid, floor: i64, id: i64) -> Result<(), SyncError> {
        if id <= floor {
            return Ok(());
        }
        self.config
            .advance_cursor(run_id, id)
            .await
            .map_err(|err| match err {
                ConfigStoreError::CursorNotOwned => SyncError::internal(
                    "advance_cursor",
                    "another run took over the photo cursor",
                ),
                other => SyncError::config("advance_cursor", other),
            })
    }

    async fn process(&self, plan: &PhotoSyncPlan, candidate: &PhotoCandidate) -> Result<ItemOutcome, SyncError> {
        if !plan
            .query
            .mode
            .is_eligible(candidate.image_url.as_deref(), plan.query.min_url_len)
        {
            self.progress.update(|c| c.skipped += 1).await;
            return Ok(ItemOutcome::Skipped);
        }
        let Some(request_id) = plan.id_source.request_id(candidate) else {
            self.progress.update(|c| c.skipped += 1).await;
            self.progress
                .record(EventLevel::Warn, format!("row {} has no usable photo id", candidate.id))
                .await;
            return Ok(ItemOutcome::Skipped);
        };

        let request = plan.proxy_request(candidate, &request_id);
        match self.fetch_with_retry(candidate.id, &request).await {
            FetchOutcome::Stored(url) => {
                self.store
                    .set_image(candidate.id, &url)
                    .await
                    .map_err(|err| SyncError::store("set_image", err))?;
                self.progress
                    .update(|c| {
                        c.processed += 1;
                        c.updated += 1;
                    })
                    .await;
                metrics::photo_outcome("stored");
                debug!(target = "supplier_sync.photos", item_id = candidate.id, %url, "image stored");
                Ok(ItemOutcome::Written)
            }
            FetchOutcome::Failed(message) => {
                self.progress
                    .update(|c| {
                        c.processed += 1;
                        c.failed += 1;
                    })
                    .await;
                metrics::photo_outcome("failed");
                warn!(target = "supplier_sync.photos", item_id = candidate.id, error = %message, "photo fetch failed");
                self.progress
                    .record(EventLevel::Error, format!("row {}: {message}", candidate.id))
                    .await;
                Ok(ItemOutcome::Failed)
            }
            FetchOutcome::Stopped => Ok(ItemOutcome::Stopped),
        }
    }

    /// Rate-limit and transport errors are retried with a growing backoff;
    /// anything else fails the item at once.
    async fn fetch_with_retry(&self, item_id: i64, request: &ProxyRequest) -> FetchOutcome {
        let policy = *self.budget.policy();
        let mut attempt = 0;
        loop {
            attempt += 1;
            if !self.budget.acquire(self.stop, self.progress).await {
                return FetchOutcome::Stopped;
            }
            let err = match self.proxy.fetch_image(request).await {
                Ok(url) => return FetchOutcome::Stored(url),
                Err(err) => err,
            };
            let message = err.to_string();
            let retryable = matches!(err, ProxyError::Transport(_)) || is_rate_limited(&message);
            if !retryable {
                return FetchOutcome::Failed(message);
            }

            let wait = policy.backoff_delay(attempt);
            warn!(
                target = "supplier_sync.photos",
                item_id,
                attempt,
                wait_secs = wait.as_secs(),
                error = %message,
                "photo request throttled"
            );
            self.progress
                .record(
                    EventLevel::Warn,
                    format!(
                        "row {item_id}: attempt {attempt}/{} failed ({message}); waiting {}s",
                        policy.max_attempts,
                        wait.as_secs()
                    ),
                )
                .await;
            self.progress
                .set_phase(RunPhase::PausedForLimit {
                    resume_at: resume_at(wait),
                    wait_secs: wait.as_secs(),
                })
                .await;
            let completed = self.stop.sleep(wait).await;
            self.progress.set_phase(RunPhase::Running).await;
            if !completed {
                return FetchOutcome::Stopped;
            }
            if attempt >= policy.max_attempts {
                return FetchOutcome::Failed(format!("gave up after {attempt} attempts: {message}"));
            }
        }
    }

    async fn save_failed(&self, ids: &BTreeSet<i64>) -> Result<(), SyncError> {
        let ids: Vec<i64> = ids.iter().copied().collect();
        self.config
            .save_failed_photos(&ids)
            .await
            .map_err(|err| SyncError::config("save_failed", err))
    }

    async fn stopped(&self) -> RunOutcome {
        self.progress.set_phase(RunPhase::Stopped).await;
        self.progress
            .record(EventLevel::Warn, "stopped by operator")
            .await;
        info!(target = "supplier_sync.photos", "photo sync stopped");
        RunOutcome::Stopped(self.progress.counters().await)
    }
}
