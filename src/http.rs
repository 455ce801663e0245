use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("supplier-sync/", env!("CARGO_PKG_VERSION"));

/// Shared client for the supplier feed, Supabase and the fetch proxy. Feed
/// pages of a thousand items and proxied image uploads are slow, hence the
/// generous default timeout.
pub fn build_client() -> Client {
    let timeout = env_secs("HTTP_TIMEOUT_SECS", 120);
    let connect = env_secs("HTTP_CONNECT_TIMEOUT_SECS", 10);
    Client::builder()
        .user_agent(USER_AGENT)
        .gzip(true)
        .timeout(timeout)
        .connect_timeout(connect)
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn env_secs(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}
