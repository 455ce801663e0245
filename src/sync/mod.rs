pub mod catalog;
pub mod error;
pub mod pacing;
pub mod photos;
pub mod progress;
pub mod store;

use crate::catalog::scanner::{DEFAULT_SCAN_DEPTH, flatten_keys, records_at, scan_for_arrays};
use crate::config_store::SyncConfig;
use crate::feed::{FeedConnector, FeedError};
use crate::models::{PhotoSyncRequest, ScanReport, ScanRequest};
use crate::settings::SyncSettings;
use catalog::{CatalogSyncPlan, run_catalog_sync};
use error::SyncError;
use pacing::{RateBudget, StopHandle};
use photos::{PhotoSync, PhotoSyncPlan};
use progress::{ProgressHandle, SyncCounters};
use serde::Serialize;
use std::sync::Arc;
use store::{CatalogStore, FetchProxy, PhotoQuery};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "summary", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(SyncCounters),
    Stopped(SyncCounters),
}

impl RunOutcome {
    pub fn summary(&self) -> &SyncCounters {
        match self {
            RunOutcome::Completed(summary) | RunOutcome::Stopped(summary) => summary,
        }
    }
}

/// Entry point for both engines, wired to concrete collaborators.
#[derive(Clone)]
pub struct SyncService {
    store: Arc<dyn CatalogStore>,
    proxy: Arc<dyn FetchProxy>,
    feeds: Arc<dyn FeedConnector>,
    config: SyncConfig,
    settings: Arc<SyncSettings>,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        proxy: Arc<dyn FetchProxy>,
        feeds: Arc<dyn FeedConnector>,
        config: SyncConfig,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            proxy,
            feeds,
            config,
            settings: Arc::new(settings),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Finds the record list in one feed document and proposes a mapping
    /// for its first record on top of the persisted one.
    pub async fn scan(&self, request: ScanRequest) -> Result<ScanReport, SyncError> {
        let feed_config = match request.feed {
            Some(feed) => Some(feed),
            None => self
                .config
                .load_feed()
                .await
                .map_err(|err| SyncError::config("load_feed", err))?,
        };
        let document = match request.document {
            Some(document) => document,
            None => {
                let feed_config = feed_config
                    .as_ref()
                    .ok_or_else(|| SyncError::feed("scan", FeedError::NotConfigured))?;
                let feed = self
                    .feeds
                    .connect(feed_config)
                    .map_err(|err| SyncError::feed("scan", err))?;
                feed.fetch_page(0, self.settings.feed_page_size)
                    .await
                    .map_err(|err| SyncError::feed("scan", err))?
            }
        };

        let candidates = scan_for_arrays(&document, DEFAULT_SCAN_DEPTH);
        let list_path = request
            .list_path
            .or_else(|| feed_config.and_then(|feed| feed.list_path))
            .or_else(|| candidates.first().map(|candidate| candidate.path.clone()))
            .ok_or_else(|| {
                SyncError::invalid_input("scan", "no list of records found in the document")
            })?;
        let records = records_at(&document, &list_path).ok_or_else(|| {
            SyncError::invalid_input("scan", format!("`{list_path}` does not hold a list"))
        })?;
        let sample_keys = records
            .first()
            .map(|record| flatten_keys(record, DEFAULT_SCAN_DEPTH))
            .unwrap_or_default();

        let persisted = self
            .config
            .load_mapping()
            .await
            .map_err(|err| SyncError::config("load_mapping", err))?;
        let mapping = if sample_keys.is_empty() {
            persisted
        } else {
            persisted.auto_map(&sample_keys)
        };
        if request.persist && !sample_keys.is_empty() {
            self.config
                .save_mapping(&mapping)
                .await
                .map_err(|err| SyncError::config("save_mapping", err))?;
        }
        info!(
            target = "supplier_sync.scan",
            candidates = candidates.len(),
            %list_path,
            records = records.len(),
            keys = sample_keys.len(),
            "feed scanned"
        );

        Ok(ScanReport {
            missing_required: mapping.missing_required(),
            candidates,
            list_path,
            record_count: records.len(),
            sample_keys,
            mapping,
        })
    }

    pub async fn run_catalog(
        &self,
        progress: &ProgressHandle,
        stop: &StopHandle,
    ) -> Result<RunOutcome, SyncError> {
        let feed_config = self
            .config
            .load_feed()
            .await
            .map_err(|err| SyncError::config("load_feed", err))?
            .ok_or_else(|| SyncError::feed("plan", FeedError::NotConfigured))?;
        let mapping = self
            .config
            .load_mapping()
            .await
            .map_err(|err| SyncError::config("load_mapping", err))?;
        if mapping.is_empty() {
            return Err(SyncError::invalid_input(
                "mapping",
                "no field mapping saved; scan the feed first",
            ));
        }
        let plan = CatalogSyncPlan {
            feed: feed_config,
            mapping,
            page_size: self.settings.feed_page_size,
            markup: self.settings.price_markup,
        };
        plan.validate()?;
        let feed = self
            .feeds
            .connect(&plan.feed)
            .map_err(|err| SyncError::feed("connect", err))?;
        run_catalog_sync(feed.as_ref(), self.store.as_ref(), &plan, progress, stop).await
    }

    pub async fn run_photos(
        &self,
        run_id: Uuid,
        request: &PhotoSyncRequest,
        progress: &ProgressHandle,
        stop: &StopHandle,
    ) -> Result<RunOutcome, SyncError> {
        let plan = self.photo_plan(run_id, request)?;
        let budget = RateBudget::new(self.settings.pacing());
        PhotoSync {
            store: self.store.as_ref(),
            proxy: self.proxy.as_ref(),
            config: &self.config,
            budget: &budget,
            progress,
            stop,
        }
        .run(&plan)
        .await
    }

    fn photo_plan(&self, run_id: Uuid, request: &PhotoSyncRequest) -> Result<PhotoSyncPlan, SyncError> {
        let url_template = self.settings.photo_url_template.clone().ok_or_else(|| {
            SyncError::invalid_input("plan", "PHOTO_URL_TEMPLATE is not configured")
        })?;
        let plan = PhotoSyncPlan {
            run_id,
            query: PhotoQuery {
                supplier_id: request.supplier_id,
                mode: request.mode,
                min_url_len: self.settings.min_image_url_len,
            },
            id_source: request.id_source.unwrap_or(self.settings.photo_id_source),
            start_after: request.start_after,
            page_size: self.settings.photo_page_size,
            url_template,
            headers: self.settings.photo_headers.clone(),
            bucket: self.settings.photo_bucket.clone(),
        };
        plan.validate()?;
        Ok(plan)
    }
}
