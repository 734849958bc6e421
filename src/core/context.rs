//! Per-request and per-layer state passed through the provider tree

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use super::geo::Bounds;
use crate::prelude::{Arc, HashMap, HashSet, Instant};

/// Authentication/session state a layer keeps for its provider tree.
///
/// A zero (`None`) expiration means "never authenticated". Once
/// `auth_bypass` is set the provider is never pre-authenticated again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderContext {
    pub auth_bypass: bool,
    pub auth_expiration: Option<SystemTime>,
    pub auth_token: String,
    /// Free-form values a provider wants to keep between calls
    pub values: HashMap<String, String>,
    /// Independent state for each child of a fan-out provider, keyed by child index
    pub children: HashMap<usize, ProviderContext>,
}

impl ProviderContext {
    /// Context for providers with no authentication concept
    pub fn bypass() -> Self {
        Self {
            auth_bypass: true,
            ..Self::default()
        }
    }

    /// Context holding `token` until `expiration`
    pub fn authenticated(token: impl Into<String>, expiration: SystemTime) -> Self {
        Self {
            auth_token: token.into(),
            auth_expiration: Some(expiration),
            ..Self::default()
        }
    }

    /// True when pre-authentication has to run before generating tiles
    pub fn needs_auth(&self, now: SystemTime) -> bool {
        if self.auth_bypass {
            return false;
        }
        match self.auth_expiration {
            Some(expiration) => now >= expiration,
            None => true,
        }
    }
}

/// Facts about the inbound request that providers may reference through
/// `{ctx.NAME}` placeholders.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub uri: String,
    pub path: String,
    pub query: String,
    pub proto: String,
    pub ip: String,
    pub method: String,
    pub host: String,
    pub headers: HashMap<String, String>,
    pub received: Instant,
}

impl Default for RequestInfo {
    fn default() -> Self {
        Self {
            uri: String::new(),
            path: String::new(),
            query: String::new(),
            proto: "HTTP/1.1".to_string(),
            ip: String::new(),
            method: "GET".to_string(),
            host: String::new(),
            headers: HashMap::default(),
            received: Instant::now(),
        }
    }
}

impl RequestInfo {
    /// Looks up a `{ctx.NAME}` value; unknown names are treated as header names
    pub fn value(&self, name: &str) -> Option<String> {
        let value = match name.to_ascii_lowercase().as_str() {
            "uri" | "url" => self.uri.clone(),
            "path" => self.path.clone(),
            "query" => self.query.clone(),
            "proto" => self.proto.clone(),
            "ip" => self.ip.clone(),
            "method" => self.method.clone(),
            "host" => self.host.clone(),
            "elapsed" => format!("{:.3}", self.received.elapsed().as_secs_f64()),
            _ => return self.header(name),
        };
        Some(value)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }
}

/// Everything the pipeline needs to know about the request being served.
///
/// Shared by reference across every provider a request touches, including the
/// concurrent children of fan-out providers. Placeholder bindings belong to
/// the layer being rendered: routing to another layer derives a new context
/// with [`RequestContext::for_layer`]. The skip-save flag is shared by every
/// context derived from the same request.
#[derive(Debug, Default)]
pub struct RequestContext {
    pub info: RequestInfo,
    /// Layer ids this request may access; `None` means unrestricted
    pub allowed_layers: Option<HashSet<String>>,
    /// Area this request may access; null island means unrestricted
    pub allowed_area: Bounds,
    layer_bindings: HashMap<String, String>,
    skip_cache_save: Arc<AtomicBool>,
}

impl RequestContext {
    pub fn new(info: RequestInfo) -> Self {
        Self {
            info,
            ..Self::default()
        }
    }

    /// Restricts the request to the given layer ids
    pub fn with_allowed_layers<I, S>(mut self, layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_layers = Some(layers.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts the request to the given area
    pub fn with_allowed_area(mut self, area: Bounds) -> Self {
        self.allowed_area = area;
        self
    }

    pub fn with_layer_bindings(mut self, bindings: HashMap<String, String>) -> Self {
        self.layer_bindings = bindings;
        self
    }

    /// The same request, routed to a layer that matched with `bindings`
    pub fn for_layer(&self, bindings: HashMap<String, String>) -> Self {
        Self {
            info: self.info.clone(),
            allowed_layers: self.allowed_layers.clone(),
            allowed_area: self.allowed_area,
            layer_bindings: bindings,
            skip_cache_save: self.skip_cache_save.clone(),
        }
    }

    /// Placeholder bindings of the layer being rendered
    pub fn layer_bindings(&self) -> &HashMap<String, String> {
        &self.layer_bindings
    }

    pub fn layer_binding(&self, name: &str) -> Option<String> {
        self.layer_bindings.get(name).cloned()
    }

    /// Marks the rendered tile as not to be written to the cache
    pub fn set_skip_cache_save(&self) {
        self.skip_cache_save.store(true, Ordering::SeqCst);
    }

    pub fn skip_cache_save(&self) -> bool {
        self.skip_cache_save.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_auth_states() {
        let now = SystemTime::now();

        assert!(ProviderContext::default().needs_auth(now));
        assert!(!ProviderContext::bypass().needs_auth(now));

        let fresh = ProviderContext::authenticated("token", now + Duration::from_secs(60));
        assert!(!fresh.needs_auth(now));

        let expired = ProviderContext::authenticated("token", now - Duration::from_secs(1));
        assert!(expired.needs_auth(now));
    }

    #[test]
    fn test_request_info_values() {
        let mut info = RequestInfo {
            method: "GET".into(),
            path: "/tiles/osm/1/2/3".into(),
            ..RequestInfo::default()
        };
        info.headers.insert("X-Api-Key".into(), "secret".into());

        assert_eq!(info.value("METHOD").as_deref(), Some("GET"));
        assert_eq!(info.value("path").as_deref(), Some("/tiles/osm/1/2/3"));
        assert_eq!(info.value("x-api-key").as_deref(), Some("secret"));
        assert_eq!(info.value("missing"), None);
    }

    #[test]
    fn test_skip_cache_flag() {
        let ctx = RequestContext::default();
        assert!(!ctx.skip_cache_save());
        ctx.set_skip_cache_save();
        assert!(ctx.skip_cache_save());
    }

    #[test]
    fn test_derived_context_keeps_own_bindings() {
        let mut outer_bindings = HashMap::default();
        outer_bindings.insert("c".to_string(), "outer".to_string());
        let outer = RequestContext::default()
            .with_allowed_layers(["o_outer", "w_inner"])
            .with_layer_bindings(outer_bindings);

        let mut inner_bindings = HashMap::default();
        inner_bindings.insert("c".to_string(), "inner".to_string());
        let inner = outer.for_layer(inner_bindings);

        assert_eq!(inner.layer_binding("c").as_deref(), Some("inner"));
        assert_eq!(outer.layer_binding("c").as_deref(), Some("outer"));
        assert!(inner.allowed_layers.as_ref().unwrap().contains("w_inner"));

        inner.set_skip_cache_save();
        assert!(outer.skip_cache_save());
    }
}
