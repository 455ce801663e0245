pub mod client;
pub mod config;

pub use client::{FeedConnector, FeedError, HttpFeedConnector, SupplierFeed};
pub use config::FeedRequestConfig;
