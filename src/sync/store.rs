//! Collaborator contracts: the catalog table and the image fetch proxy.

use crate::catalog::{CatalogRecord, ExistingRecord, PhotoCandidate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("store rejected write: {0}")]
    Rejected(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Which catalog rows the photo sync considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoMode {
    /// Rows without any image.
    #[default]
    Missing,
    /// Every row, replacing existing images.
    Force,
    /// Rows without an image or with one that does not look like a URL.
    FixBroken,
}

impl PhotoMode {
    pub fn is_eligible(&self, image_url: Option<&str>, min_url_len: usize) -> bool {
        let url = image_url.map(str::trim).unwrap_or_default();
        match self {
            PhotoMode::Force => true,
            PhotoMode::Missing => url.is_empty(),
            PhotoMode::FixBroken => url.len() < min_url_len || !url.starts_with("http"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoQuery {
    pub supplier_id: Option<i64>,
    pub mode: PhotoMode,
    pub min_url_len: usize,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Rows of `supplier_id` whose catalog number is in `catalog_numbers`.
    async fn find_by_keys(
        &self,
        supplier_id: i64,
        catalog_numbers: &[String],
    ) -> Result<Vec<ExistingRecord>, StoreError>;

    async fn insert_many(&self, records: &[CatalogRecord]) -> Result<usize, StoreError>;

    /// Upsert on (`catalog_number`, `supplier_id`).
    async fn upsert_many(&self, records: &[CatalogRecord]) -> Result<usize, StoreError>;

    /// Up to `limit` rows with `id > after_id`, ascending by id. Stores may
    /// over-return for [`PhotoMode::FixBroken`]; callers re-check eligibility.
    async fn page_after(
        &self,
        query: &PhotoQuery,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<PhotoCandidate>, StoreError>;

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<PhotoCandidate>, StoreError>;

    async fn count(&self, query: &PhotoQuery, after_id: i64) -> Result<u64, StoreError>;

    async fn set_image(&self, id: i64, image_url: &str) -> Result<(), StoreError>;
}

/// Request the proxy performs on our behalf, plus where to put the bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub upload: UploadTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadTarget {
    pub bucket: String,
    pub path: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProxyError {
    /// The proxy could not be reached or answered garbage.
    #[error("proxy unreachable: {0}")]
    Transport(String),
    /// The proxy ran but reported a failure (upstream status, non-image
    /// payload, rate limit, ...).
    #[error("{0}")]
    Upstream(String),
}

#[async_trait]
pub trait FetchProxy: Send + Sync {
    /// Returns the public URL of the stored image.
    async fn fetch_image(&self, request: &ProxyRequest) -> Result<String, ProxyError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eligibility_by_mode() {
        let good = Some("https://cdn.example/products/1.jpg");
        assert!(PhotoMode::Missing.is_eligible(None, 20));
        assert!(PhotoMode::Missing.is_eligible(Some("  "), 20));
        assert!(!PhotoMode::Missing.is_eligible(good, 20));
        assert!(PhotoMode::Force.is_eligible(good, 20));
        assert!(!PhotoMode::FixBroken.is_eligible(good, 20));
        assert!(PhotoMode::FixBroken.is_eligible(Some("/img/1.jpg"), 5));
        assert!(PhotoMode::FixBroken.is_eligible(Some("http://x"), 20));
        assert!(PhotoMode::FixBroken.is_eligible(None, 20));
    }
}
