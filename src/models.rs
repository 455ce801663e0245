use crate::catalog::scanner::ListCandidate;
use crate::catalog::{FieldMapping, TargetField};
use crate::feed::FeedRequestConfig;
use crate::sync::photos::PhotoIdSource;
use crate::sync::store::PhotoMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Body of `POST /feed/scan`. Without an inline `document` one page is
/// fetched with `feed`, or with the persisted feed config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub document: Option<Value>,
    #[serde(default)]
    pub feed: Option<FeedRequestConfig>,
    #[serde(default)]
    pub list_path: Option<String>,
    #[serde(default = "default_true")]
    pub persist: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub candidates: Vec<ListCandidate>,
    pub list_path: String,
    pub record_count: usize,
    pub sample_keys: Vec<String>,
    pub mapping: FieldMapping,
    pub missing_required: Vec<TargetField>,
}

/// `PUT /config/mapping`: field → dotted path; an empty path clears it.
pub type MappingUpdate = BTreeMap<TargetField, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CursorBody {
    pub cursor: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PhotoSyncRequest {
    #[serde(default)]
    pub supplier_id: Option<i64>,
    #[serde(default)]
    pub mode: PhotoMode,
    #[serde(default)]
    pub id_source: Option<PhotoIdSource>,
    #[serde(default)]
    pub start_after: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: String,
}
