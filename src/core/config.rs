//! Configuration structures for the gateway
//!
//! Loading files and substituting secrets happens outside this crate; these
//! types only describe the decoded shape. Plugin-specific sections stay as
//! `serde_json::Value` and are decoded by the registry that owns the plugin.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::constants::DEFAULT_USER_AGENT;
use crate::prelude::{HashMap, Duration};

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub layers: Vec<LayerConfig>,
    /// Cache plugin configuration, e.g. `{"name": "memory", "maxSize": 1000}`
    pub cache: Value,
    pub client: ClientConfig,
    pub error: ErrorMessages,
    /// Authentication plugin configuration
    pub authentication: Value,
}

/// One routable layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LayerConfig {
    pub id: String,
    /// Template matched against incoming layer names; defaults to `id`
    pub pattern: Option<String>,
    /// Regular expression per placeholder name, `*` for all of them
    pub param_validator: HashMap<String, String>,
    pub provider: Value,
    pub skip_cache: bool,
    /// Seconds allowed for rendering a single tile
    pub timeout: Option<u64>,
}

impl LayerConfig {
    pub fn new(id: impl Into<String>, provider: Value) -> Self {
        Self {
            id: id.into(),
            provider,
            ..Self::default()
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_deref().unwrap_or(&self.id)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

/// Settings applied to every outbound HTTP request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub user_agent: String,
    /// Seconds before an upstream request is abandoned
    pub timeout: u64,
    /// Largest accepted response body in bytes
    pub max_length: u64,
    pub content_types: Vec<String>,
    pub status_codes: Vec<u16>,
    pub headers: HashMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: 10,
            max_length: 10 * 1024 * 1024,
            content_types: [
                "image/png",
                "image/jpg",
                "image/jpeg",
                "image/gif",
                "image/webp",
                "application/vnd.mapbox-vector-tile",
                "application/x-protobuf",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            status_codes: vec![200],
            headers: HashMap::default(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Checks a `Content-Type` header value against the allow-list, ignoring parameters
    pub fn accepts_content_type(&self, content_type: &str) -> bool {
        let essence = content_type.split(';').next().unwrap_or("").trim();
        self.content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(essence))
    }

    pub fn accepts_status(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }
}

/// Message templates used when reporting configuration mistakes.
///
/// `{param}`, `{value}` and `{allowed}` are replaced when formatting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorMessages {
    pub enum_error: String,
    pub param_required: String,
    pub invalid_param: String,
}

impl Default for ErrorMessages {
    fn default() -> Self {
        Self {
            enum_error: "Invalid value '{value}' for {param}. Must be one of: {allowed}".to_string(),
            param_required: "Parameter {param} is required".to_string(),
            invalid_param: "Invalid value '{value}' for {param}".to_string(),
        }
    }
}

impl ErrorMessages {
    pub fn enum_error(&self, param: &str, value: &str, allowed: &[String]) -> String {
        self.enum_error
            .replace("{param}", param)
            .replace("{value}", value)
            .replace("{allowed}", &allowed.join(", "))
    }

    pub fn param_required(&self, param: &str) -> String {
        self.param_required.replace("{param}", param)
    }

    pub fn invalid_param(&self, param: &str, value: &str) -> String {
        self.invalid_param
            .replace("{param}", param)
            .replace("{value}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_layer_config_decoding() {
        let layer: LayerConfig = serde_json::from_value(json!({
            "id": "osm",
            "paramValidator": {"*": "[a-z]+"},
            "provider": {"name": "proxy", "url": "https://tile.openstreetmap.org/{z}/{x}/{y}.png"},
            "skipCache": true,
            "timeout": 5
        }))
        .unwrap();

        assert_eq!(layer.pattern(), "osm");
        assert!(layer.skip_cache);
        assert_eq!(layer.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(layer.param_validator["*"], "[a-z]+");
    }

    #[test]
    fn test_client_config_defaults() {
        let client: ClientConfig = serde_json::from_value(json!({"timeout": 3})).unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(3));
        assert_eq!(client.user_agent, DEFAULT_USER_AGENT);
        assert!(client.accepts_content_type("image/png; charset=binary"));
        assert!(!client.accepts_content_type("text/html"));
        assert!(client.accepts_status(200));
        assert!(!client.accepts_status(404));
    }

    #[test]
    fn test_error_message_templates() {
        let messages = ErrorMessages::default();
        let text = messages.enum_error("mode", "bogus", &["add".to_string(), "multiply".to_string()]);
        assert_eq!(text, "Invalid value 'bogus' for mode. Must be one of: add, multiply");
        assert_eq!(messages.param_required("url"), "Parameter url is required");
    }
}
