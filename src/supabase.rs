use crate::catalog::{CatalogRecord, ExistingRecord, PhotoCandidate};
use crate::sync::store::{
    CatalogStore, FetchProxy, PhotoMode, PhotoQuery, ProxyError, ProxyRequest, StoreError,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;
use urlencoding::encode;

/// PostgREST `in.(...)` lists are chunked to keep request URLs short.
const KEY_CHUNK: usize = 200;

const CANDIDATE_COLUMNS: &str = "id,catalog_number,product_number,supplier_id,image_url";

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    table: String,
    proxy_function: String,
    http: Client,
}

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Deserialize(String),
}

impl From<SupabaseError> for StoreError {
    fn from(value: SupabaseError) -> Self {
        match value {
            SupabaseError::Request(message) => StoreError::Request(message),
            SupabaseError::Status { .. } => StoreError::Rejected(value.to_string()),
            SupabaseError::Deserialize(message) => StoreError::Deserialize(message),
        }
    }
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_key: &str, http: Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            table: "products".into(),
            proxy_function: "fetch-proxy".into(),
            http,
        }
    }

    pub fn from_env(http: Client) -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        let mut client = Self::new(&base_url, &service_key, http);
        if let Ok(table) = std::env::var("CATALOG_TABLE") {
            client.table = table;
        }
        if let Ok(function) = std::env::var("FETCH_PROXY_FUNCTION") {
            client.proxy_function = function;
        }
        Some(client)
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, SupabaseError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|err| SupabaseError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SupabaseError::Status {
                status,
                body: body.chars().take(300).collect(),
            });
        }
        Ok(response)
    }

    async fn select<T: for<'de> Deserialize<'de>>(&self, query: &str) -> Result<Vec<T>, SupabaseError> {
        let url = format!("{}?{}", self.table_url(), query);
        let response = self.send(self.http.get(url)).await?;
        response
            .json()
            .await
            .map_err(|err| SupabaseError::Deserialize(err.to_string()))
    }

    async fn write_batch(&self, records: &[CatalogRecord], upsert: bool) -> Result<usize, SupabaseError> {
        if records.is_empty() {
            return Ok(0);
        }
        let (url, prefer) = if upsert {
            (
                format!("{}?on_conflict=catalog_number,supplier_id", self.table_url()),
                "resolution=merge-duplicates,return=minimal",
            )
        } else {
            (self.table_url(), "return=minimal")
        };
        self.send(self.http.post(url).header("Prefer", prefer).json(records))
            .await?;
        Ok(records.len())
    }

    fn photo_filters(query: &PhotoQuery) -> String {
        let mut filters = String::new();
        if let Some(supplier_id) = query.supplier_id {
            filters.push_str(&format!("&supplier_id=eq.{supplier_id}"));
        }
        if query.mode == PhotoMode::Missing {
            filters.push_str(&format!("&or={}", encode("(image_url.is.null,image_url.eq.)")));
        }
        filters
    }
}

fn quoted_list(values: &[String]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|value| format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    encode(&format!("({})", quoted.join(","))).into_owned()
}

/// Total from a PostgREST `Content-Range` header (`0-0/1234`, `*/0`).
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl CatalogStore for SupabaseClient {
    async fn find_by_keys(
        &self,
        supplier_id: i64,
        catalog_numbers: &[String],
    ) -> Result<Vec<ExistingRecord>, StoreError> {
        let mut found = Vec::with_capacity(catalog_numbers.len());
        for chunk in catalog_numbers.chunks(KEY_CHUNK) {
            let query = format!(
                "select=id,catalog_number,supplier_id&supplier_id=eq.{}&catalog_number=in.{}",
                supplier_id,
                quoted_list(chunk)
            );
            found.extend(self.select::<ExistingRecord>(&query).await?);
        }
        Ok(found)
    }

    async fn insert_many(&self, records: &[CatalogRecord]) -> Result<usize, StoreError> {
        Ok(self.write_batch(records, false).await?)
    }

    async fn upsert_many(&self, records: &[CatalogRecord]) -> Result<usize, StoreError> {
        Ok(self.write_batch(records, true).await?)
    }

    async fn page_after(
        &self,
        query: &PhotoQuery,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<PhotoCandidate>, StoreError> {
        let query = format!(
            "select={CANDIDATE_COLUMNS}&id=gt.{after_id}&order=id.asc&limit={limit}{}",
            Self::photo_filters(query)
        );
        Ok(self.select(&query).await?)
    }

    async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<PhotoCandidate>, StoreError> {
        let mut found = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(KEY_CHUNK) {
            let list: Vec<String> = chunk.iter().map(i64::to_string).collect();
            let query = format!(
                "select={CANDIDATE_COLUMNS}&id=in.({})&order=id.asc",
                list.join(",")
            );
            found.extend(self.select::<PhotoCandidate>(&query).await?);
        }
        Ok(found)
    }

    async fn count(&self, query: &PhotoQuery, after_id: i64) -> Result<u64, StoreError> {
        let url = format!(
            "{}?select=id&id=gt.{after_id}&limit=1{}",
            self.table_url(),
            Self::photo_filters(query)
        );
        let response = self
            .send(self.http.get(url).header("Prefer", "count=exact"))
            .await?;
        response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| StoreError::Deserialize("missing Content-Range total".into()))
    }

    async fn set_image(&self, id: i64, image_url: &str) -> Result<(), StoreError> {
        let url = format!("{}?id=eq.{}", self.table_url(), id);
        self.send(
            self.http
                .patch(url)
                .header("Prefer", "return=minimal")
                .json(&json!({"image_url": image_url, "in_stock": true})),
        )
        .await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyResponse {
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl FetchProxy for SupabaseClient {
    async fn fetch_image(&self, request: &ProxyRequest) -> Result<String, ProxyError> {
        let url = format!("{}/functions/v1/{}", self.base_url, self.proxy_function);
        let response = self
            .authorized(self.http.post(url).json(request))
            .send()
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;
        let parsed = serde_json::from_str::<ProxyResponse>(&body).ok();
        debug!(target = "supplier_sync.proxy", status = status.as_u16(), "proxy answered");

        match parsed {
            Some(ProxyResponse {
                image_url: Some(image_url),
                ..
            }) if status.is_success() && !image_url.trim().is_empty() => Ok(image_url),
            Some(ProxyResponse {
                error: Some(error), ..
            }) => Err(ProxyError::Upstream(if status == StatusCode::TOO_MANY_REQUESTS {
                format!("HTTP 429: {error}")
            } else {
                error
            })),
            _ if status == StatusCode::TOO_MANY_REQUESTS => {
                Err(ProxyError::Upstream("HTTP 429 Too Many Requests".into()))
            }
            _ if status.is_server_error() => Err(ProxyError::Transport(format!("HTTP {status}"))),
            _ => Err(ProxyError::Upstream(format!(
                "unexpected proxy response (HTTP {}): {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_totals() {
        assert_eq!(parse_content_range_total("0-0/1234"), Some(1234));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
    }

    #[test]
    fn in_list_is_quoted_and_encoded() {
        let encoded = quoted_list(&["A 1".to_string(), "B\"2".to_string()]);
        assert_eq!(
            urlencoding::decode(&encoded).unwrap(),
            "(\"A 1\",\"B\\\"2\")"
        );
    }

    #[test]
    fn missing_mode_filters_empty_images() {
        let query = PhotoQuery {
            supplier_id: Some(3),
            mode: PhotoMode::Missing,
            min_url_len: 20,
        };
        let filters = SupabaseClient::photo_filters(&query);
        assert!(filters.starts_with("&supplier_id=eq.3&or="));
        let forced = PhotoQuery {
            mode: PhotoMode::Force,
            ..query
        };
        assert_eq!(SupabaseClient::photo_filters(&forced), "&supplier_id=eq.3");
    }
}
