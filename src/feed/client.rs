use crate::feed::config::FeedRequestConfig;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed is not configured")]
    NotConfigured,
    #[error("invalid feed config: {0}")]
    InvalidConfig(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("supplier rejected credentials (HTTP {0})")]
    Unauthorized(u16),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// One page of the supplier feed, as an undecoded JSON document.
#[async_trait]
pub trait SupplierFeed: Send + Sync {
    async fn fetch_page(&self, offset: usize, count: usize) -> Result<Value, FeedError>;
}

/// Builds a feed client for a stored request config.
pub trait FeedConnector: Send + Sync {
    fn connect(&self, config: &FeedRequestConfig) -> Result<Box<dyn SupplierFeed>, FeedError>;
}

pub struct HttpFeed {
    http: Client,
    config: FeedRequestConfig,
    method: Method,
}

impl HttpFeed {
    pub fn new(http: Client, config: FeedRequestConfig) -> Result<Self, FeedError> {
        config.validate().map_err(FeedError::InvalidConfig)?;
        let method = Method::from_bytes(config.method.trim().to_uppercase().as_bytes())
            .map_err(|err| FeedError::InvalidConfig(err.to_string()))?;
        Ok(Self {
            http,
            config,
            method,
        })
    }
}

#[async_trait]
impl SupplierFeed for HttpFeed {
    async fn fetch_page(&self, offset: usize, count: usize) -> Result<Value, FeedError> {
        let mut request = self.http.request(self.method.clone(), self.config.url.trim());
        for (name, value) in &self.config.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request = if self.config.is_get() {
            request.query(&[
                (self.config.offset_field.as_str(), offset.to_string()),
                (self.config.count_field.as_str(), count.to_string()),
            ])
        } else {
            request.json(&self.config.page_body(offset, count))
        };

        debug!(target = "supplier_sync.feed", offset, count, "requesting feed page");
        let response = request
            .send()
            .await
            .map_err(|err| FeedError::Request(err.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FeedError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|err| FeedError::Deserialize(err.to_string()))
    }
}

pub struct HttpFeedConnector {
    http: Client,
}

impl HttpFeedConnector {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

impl FeedConnector for HttpFeedConnector {
    fn connect(&self, config: &FeedRequestConfig) -> Result<Box<dyn SupplierFeed>, FeedError> {
        Ok(Box::new(HttpFeed::new(self.http.clone(), config.clone())?))
    }
}
