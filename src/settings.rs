use crate::sync::pacing::PacingPolicy;
use crate::sync::photos::PhotoIdSource;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::info;

const DEFAULT_CONFIG_PATH: &str = "config/sync.yaml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid settings in {path}: {message}")]
    Parse { path: String, message: String },
}

/// Engine tunables. Read from an optional YAML file, then overridden by
/// environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub feed_page_size: usize,
    pub photo_page_size: usize,
    pub photo_pause_every: u64,
    pub photo_pause_secs: u64,
    pub photo_min_delay_ms: u64,
    pub photo_max_retries: u32,
    pub photo_backoff_step_secs: u64,
    pub price_markup: Decimal,
    pub event_log_capacity: usize,
    pub min_image_url_len: usize,
    /// Upstream photo endpoint; `{id}` is replaced by the request id.
    pub photo_url_template: Option<String>,
    pub photo_headers: BTreeMap<String, String>,
    pub photo_bucket: String,
    pub photo_id_source: PhotoIdSource,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            feed_page_size: 1000,
            photo_page_size: 1000,
            photo_pause_every: 290,
            photo_pause_secs: 180,
            photo_min_delay_ms: 3000,
            photo_max_retries: 5,
            photo_backoff_step_secs: 120,
            price_markup: Decimal::new(12, 1),
            event_log_capacity: 200,
            min_image_url_len: 20,
            photo_url_template: None,
            photo_headers: BTreeMap::new(),
            photo_bucket: "product-images".into(),
            photo_id_source: PhotoIdSource::default(),
        }
    }
}

impl SyncSettings {
    pub fn load() -> Result<Self, SettingsError> {
        let path =
            std::env::var("SYNC_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut settings = Self::from_file(Path::new(&path))?;
        settings.apply_env();
        Ok(settings)
    }

    /// Defaults when the file does not exist.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|err| SettingsError::Read {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        let settings = Self::from_yaml(&raw).map_err(|message| SettingsError::Parse {
            path: path.display().to_string(),
            message,
        })?;
        info!(target = "supplier_sync.config", path = %path.display(), "loaded sync settings");
        Ok(settings)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|err| err.to_string())
    }

    pub fn apply_env(&mut self) {
        override_positive(&mut self.feed_page_size, "FEED_PAGE_SIZE");
        override_positive(&mut self.photo_page_size, "PHOTO_PAGE_SIZE");
        override_positive(&mut self.photo_pause_every, "PHOTO_PAUSE_EVERY");
        override_value(&mut self.photo_pause_secs, "PHOTO_PAUSE_SECS");
        override_value(&mut self.photo_min_delay_ms, "PHOTO_MIN_DELAY_MS");
        override_positive(&mut self.photo_max_retries, "PHOTO_MAX_RETRIES");
        override_value(&mut self.photo_backoff_step_secs, "PHOTO_BACKOFF_STEP_SECS");
        override_positive(&mut self.event_log_capacity, "EVENT_LOG_CAPACITY");
        override_value(&mut self.min_image_url_len, "MIN_IMAGE_URL_LEN");
        if let Some(markup) = env_parse::<Decimal>("PRICE_MARKUP").filter(|m| *m > Decimal::ZERO) {
            self.price_markup = markup;
        }
        if let Ok(template) = std::env::var("PHOTO_URL_TEMPLATE")
            && !template.trim().is_empty()
        {
            self.photo_url_template = Some(template.trim().to_string());
        }
        if let Ok(bucket) = std::env::var("PHOTO_BUCKET")
            && !bucket.trim().is_empty()
        {
            self.photo_bucket = bucket.trim().to_string();
        }
        if let Some(source) = std::env::var("PHOTO_ID_SOURCE")
            .ok()
            .and_then(|raw| serde_json::from_value(serde_json::Value::String(raw)).ok())
        {
            self.photo_id_source = source;
        }
    }

    pub fn pacing(&self) -> PacingPolicy {
        PacingPolicy {
            pause_every: self.photo_pause_every,
            pause: Duration::from_secs(self.photo_pause_secs),
            min_delay: Duration::from_millis(self.photo_min_delay_ms),
            max_attempts: self.photo_max_retries.max(1),
            backoff_step: Duration::from_secs(self.photo_backoff_step_secs),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn override_value<T: FromStr>(slot: &mut T, key: &str) {
    if let Some(value) = env_parse(key) {
        *slot = value;
    }
}

fn override_positive<T: FromStr + PartialOrd + Default>(slot: &mut T, key: &str) {
    if let Some(value) = env_parse::<T>(key).filter(|v| *v > T::default()) {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_overrides_defaults() {
        let settings = SyncSettings::from_yaml(
            "feed_page_size: 500\nprice_markup: \"1.35\"\nphoto_id_source: catalog_number\nphoto_headers:\n  X-Api-Key: secret\n",
        )
        .unwrap();
        assert_eq!(settings.feed_page_size, 500);
        assert_eq!(settings.photo_page_size, 1000);
        assert_eq!(settings.price_markup, Decimal::new(135, 2));
        assert_eq!(settings.photo_id_source, PhotoIdSource::CatalogNumber);
        assert_eq!(settings.photo_headers["X-Api-Key"], "secret");
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(SyncSettings::from_yaml("").unwrap(), SyncSettings::default());
        assert!(SyncSettings::from_yaml("feed_page_size: lots").is_err());
    }

    #[test]
    fn pacing_from_defaults() {
        let pacing = SyncSettings::default().pacing();
        assert_eq!(pacing, PacingPolicy::default());
    }
}
