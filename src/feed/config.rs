use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Operator-provided description of the supplier request. Persisted so a
/// sync can be re-run without re-entering it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRequestConfig {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON body template; pagination fields are written into it per page.
    #[serde(default)]
    pub body: Option<Value>,
    pub supplier_id: i64,
    /// Dotted path to the record list; discovered by scanning when absent.
    #[serde(default)]
    pub list_path: Option<String>,
    #[serde(default)]
    pub in_stock_only: bool,
    #[serde(default = "default_offset_field")]
    pub offset_field: String,
    #[serde(default = "default_count_field")]
    pub count_field: String,
}

fn default_method() -> String {
    "POST".into()
}

fn default_offset_field() -> String {
    "From".into()
}

fn default_count_field() -> String {
    "Count".into()
}

impl FeedRequestConfig {
    pub fn validate(&self) -> Result<(), String> {
        let url = self.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err("feed url must be http(s)".into());
        }
        if reqwest::Method::from_bytes(self.method.trim().to_uppercase().as_bytes()).is_err() {
            return Err(format!("unsupported method `{}`", self.method));
        }
        if let Some(body) = &self.body
            && !(body.is_object() || body.is_null())
        {
            return Err("body template must be a JSON object".into());
        }
        if self.offset_field.trim().is_empty() || self.count_field.trim().is_empty() {
            return Err("pagination field names must not be empty".into());
        }
        Ok(())
    }

    pub fn is_get(&self) -> bool {
        self.method.trim().eq_ignore_ascii_case("GET")
    }

    /// Request body for one page: the template with offset and count set.
    pub fn page_body(&self, offset: usize, count: usize) -> Value {
        let mut body = match &self.body {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => Value::Object(Default::default()),
        };
        if let Value::Object(map) = &mut body {
            map.insert(self.offset_field.clone(), Value::from(offset));
            map.insert(self.count_field.clone(), Value::from(count));
        }
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> FeedRequestConfig {
        serde_json::from_value(json!({
            "url": "https://supplier.example/api/stock",
            "supplier_id": 4,
            "body": {"Token": "abc", "From": 999}
        }))
        .unwrap()
    }

    #[test]
    fn defaults_apply() {
        let config = config();
        assert_eq!(config.method, "POST");
        assert_eq!(config.offset_field, "From");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn page_body_overwrites_pagination() {
        let body = config().page_body(2000, 1000);
        assert_eq!(body, json!({"Token": "abc", "From": 2000, "Count": 1000}));
    }

    #[test]
    fn rejects_bad_url_and_body() {
        let mut bad = config();
        bad.url = "ftp://x".into();
        assert!(bad.validate().is_err());
        let mut bad = config();
        bad.body = Some(json!([1]));
        assert!(bad.validate().is_err());
    }
}
