use serde::de::DeserializeOwned;
use serde_json::Value;

use super::custom::CustomScript;
use super::instrumented::InstrumentedProvider;
use super::transform::PixelFunction;
use super::{blend, cgi, composite, crop, custom, effect, fallback, proxy, reference, static_image, transform};
use crate::core::config::{ClientConfig, ErrorMessages};
use crate::layers::group::LayerGroupHandle;
use crate::prelude::{Arc, HashMap};
use crate::traits::Provider;
use crate::{Error, Result};

/// Builds one provider from its decoded-on-demand configuration
pub type ProviderFactory =
    Arc<dyn Fn(Value, &BuildContext<'_>) -> Result<Arc<dyn Provider>> + Send + Sync>;

/// Everything a factory may need while building a provider tree
pub struct BuildContext<'a> {
    pub registry: &'a ProviderRegistry,
    pub client: &'a ClientConfig,
    pub errors: &'a ErrorMessages,
    pub layer_group: &'a LayerGroupHandle,
}

impl BuildContext<'_> {
    /// Builds a nested provider
    pub fn construct(&self, raw: &Value) -> Result<Arc<dyn Provider>> {
        self.registry
            .construct(raw, self.client, self.errors, self.layer_group)
    }

    /// Builds every nested provider, reporting all failures together
    pub fn construct_all(&self, raws: &[Value]) -> Result<Vec<Arc<dyn Provider>>> {
        let mut providers = Vec::with_capacity(raws.len());
        let mut errors = Vec::new();

        for raw in raws {
            match self.construct(raw) {
                Ok(provider) => providers.push(provider),
                Err(e) => errors.push(e),
            }
        }

        match Error::join(errors) {
            Some(error) => Err(error),
            None => Ok(providers),
        }
    }

    pub fn required(&self, param: &str) -> Error {
        Error::Config(self.errors.param_required(param))
    }

    pub fn invalid(&self, param: &str, value: impl ToString) -> Error {
        Error::Config(self.errors.invalid_param(param, &value.to_string()))
    }
}

/// Decodes a plugin's typed configuration out of its raw value
pub fn decode_config<T: DeserializeOwned>(raw: Value) -> Result<T> {
    Ok(serde_json::from_value(raw)?)
}

/// Reads the mandatory `name` discriminator of a plugin configuration
pub fn plugin_name<'a>(raw: &'a Value, errors: &ErrorMessages, registered: &[String]) -> Result<&'a str> {
    raw.get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidEnum(errors.enum_error("name", "", registered)))
}

/// Name-keyed provider plugins plus the named functions and scripts that
/// `transform` and `custom` providers refer to.
///
/// The registry is a plain value owned by the composition root; nothing is
/// registered globally.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
    pixel_functions: HashMap<String, PixelFunction>,
    scripts: HashMap<String, Arc<dyn CustomScript>>,
}

impl ProviderRegistry {
    /// A registry with no plugins
    pub fn empty() -> Self {
        Self {
            factories: HashMap::default(),
            pixel_functions: HashMap::default(),
            scripts: HashMap::default(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Value, &BuildContext<'_>) -> Result<Arc<dyn Provider>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Makes a per-pixel function available to `transform` providers
    pub fn register_pixel_function(&mut self, name: impl Into<String>, function: PixelFunction) {
        self.pixel_functions.insert(name.into(), function);
    }

    /// Makes a script available to `custom` providers
    pub fn register_script(&mut self, name: impl Into<String>, script: Arc<dyn CustomScript>) {
        self.scripts.insert(name.into(), script);
    }

    pub fn names(&self) -> Vec<String> {
        sorted_keys(&self.factories)
    }

    pub fn pixel_function(&self, name: &str) -> Option<PixelFunction> {
        self.pixel_functions.get(name).cloned()
    }

    pub fn pixel_function_names(&self) -> Vec<String> {
        sorted_keys(&self.pixel_functions)
    }

    pub fn script(&self, name: &str) -> Option<Arc<dyn CustomScript>> {
        self.scripts.get(name).cloned()
    }

    pub fn script_names(&self) -> Vec<String> {
        sorted_keys(&self.scripts)
    }

    /// Builds the provider tree described by `raw`.
    ///
    /// `raw["name"]` selects the plugin; composite plugins call back into the
    /// registry for their children. The result is wrapped in an
    /// [`InstrumentedProvider`].
    pub fn construct(
        &self,
        raw: &Value,
        client: &ClientConfig,
        errors: &ErrorMessages,
        layer_group: &LayerGroupHandle,
    ) -> Result<Arc<dyn Provider>> {
        let name = plugin_name(raw, errors, &self.names())?;
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::InvalidEnum(errors.enum_error("provider.name", name, &self.names())))?;

        let cx = BuildContext {
            registry: self,
            client,
            errors,
            layer_group,
        };
        let provider = factory(raw.clone(), &cx)?;
        log::debug!("constructed {} provider", name);
        Ok(Arc::new(InstrumentedProvider::new(name, provider)))
    }
}

fn sorted_keys<V>(map: &HashMap<String, V>) -> Vec<String> {
    let mut names: Vec<String> = map.keys().cloned().collect();
    names.sort();
    names
}

impl Default for ProviderRegistry {
    /// Registers every built-in provider; no pixel functions or scripts
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("proxy", proxy::build);
        registry.register("url", proxy::build);
        registry.register("static", static_image::build);
        registry.register("ref", reference::build);
        registry.register("fallback", fallback::build);
        registry.register("blend", blend::build);
        registry.register("effect", effect::build);
        registry.register("transform", transform::build);
        registry.register("crop", crop::build);
        registry.register("composite", composite::build);
        registry.register("custom", custom::build);
        registry.register("cgi", cgi::build);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn construct(raw: Value) -> Result<Arc<dyn Provider>> {
        ProviderRegistry::default().construct(
            &raw,
            &ClientConfig::default(),
            &ErrorMessages::default(),
            &LayerGroupHandle::default(),
        )
    }

    #[test]
    fn test_missing_name_lists_plugins() {
        let message = construct(json!({"color": "F00"})).err().unwrap().to_string();
        assert!(message.contains("blend"));
        assert!(message.contains("proxy"));
    }

    #[test]
    fn test_unknown_name() {
        let err = construct(json!({"name": "wms"})).err().unwrap();
        assert!(matches!(err, Error::InvalidEnum(_)));
        assert!(err.to_string().contains("'wms'"));
    }

    #[test]
    fn test_wrapped_in_instrumentation() {
        let provider = construct(json!({"name": "static", "color": "F00"})).unwrap();
        assert_eq!(provider.name(), "static");
    }

    #[test]
    fn test_child_errors_are_joined() {
        let err = construct(json!({
            "name": "blend",
            "mode": "add",
            "providers": [{"name": "nope"}, {"name": "static", "color": "F00"}, {"name": "static"}]
        }))
        .err()
        .unwrap();
        match err {
            Error::Joined(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected joined error, got {other:?}"),
        }
    }
}
