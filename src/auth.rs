//! Inbound request authentication
//!
//! The HTTP boundary calls [`Authentication::check_authentication`] before
//! routing and [`Authentication::authorize`] to narrow what the request may
//! reach. Layers enforce those limits in their permission check.

use serde::Deserialize;
use serde_json::Value;

use crate::core::{
    config::ErrorMessages,
    context::{RequestContext, RequestInfo},
    geo::Bounds,
};
use crate::prelude::{Arc, HashMap};
use crate::providers::registry::{decode_config, plugin_name};
use crate::traits::Authentication;
use crate::{Error, Result};

/// Lets every request through unrestricted
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthentication;

impl Authentication for NoAuthentication {
    fn check_authentication(&self, _info: &RequestInfo) -> bool {
        true
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaticKeyConfig {
    #[serde(default)]
    key: String,
    layers: Option<Vec<String>>,
    area: Option<Bounds>,
}

/// Accepts requests carrying `Authorization: Bearer <key>`
#[derive(Debug, Clone)]
pub struct StaticKeyAuthentication {
    key: String,
    layers: Option<Vec<String>>,
    area: Bounds,
}

impl StaticKeyAuthentication {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            layers: None,
            area: Bounds::default(),
        }
    }

    /// Restricts authenticated requests to these layer ids
    pub fn with_layers<I, S>(mut self, layers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layers = Some(layers.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts authenticated requests to this area
    pub fn with_area(mut self, area: Bounds) -> Self {
        self.area = area;
        self
    }
}

/// Compares without stopping at the first differing byte
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl Authentication for StaticKeyAuthentication {
    fn check_authentication(&self, info: &RequestInfo) -> bool {
        let Some(header) = info.header("authorization") else {
            return false;
        };
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .unwrap_or_default();
        constant_time_eq(token.trim().as_bytes(), self.key.as_bytes())
    }

    fn authorize(&self, _info: &RequestInfo, ctx: &mut RequestContext) {
        if let Some(layers) = &self.layers {
            ctx.allowed_layers = Some(layers.iter().cloned().collect());
        }
        if !self.area.is_null_island() {
            ctx.allowed_area = self.area;
        }
    }
}

/// Builds an authenticator from its configuration
pub type AuthFactory = Arc<dyn Fn(Value, &ErrorMessages) -> Result<Arc<dyn Authentication>> + Send + Sync>;

/// Name-keyed authentication plugins
pub struct AuthRegistry {
    factories: HashMap<String, AuthFactory>,
}

impl AuthRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::default(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Value, &ErrorMessages) -> Result<Arc<dyn Authentication>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds the authenticator in `config`; a null config allows everything
    pub fn construct(&self, config: &Value, errors: &ErrorMessages) -> Result<Arc<dyn Authentication>> {
        if config.is_null() {
            return Ok(Arc::new(NoAuthentication));
        }
        let name = plugin_name(config, errors, &self.names())?;
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::InvalidEnum(errors.enum_error("authentication.name", name, &self.names()))
        })?;
        factory(config.clone(), errors)
    }
}

impl Default for AuthRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();

        registry.register("none", |_, _| Ok(Arc::new(NoAuthentication) as Arc<dyn Authentication>));

        registry.register("static key", |config, errors| {
            let config: StaticKeyConfig = decode_config(config)?;
            if config.key.is_empty() {
                return Err(Error::Config(errors.param_required("key")));
            }
            let mut auth = StaticKeyAuthentication::new(config.key);
            if let Some(layers) = config.layers {
                auth = auth.with_layers(layers);
            }
            if let Some(area) = config.area {
                auth = auth.with_area(area);
            }
            Ok(Arc::new(auth) as Arc<dyn Authentication>)
        });

        registry
    }
}
