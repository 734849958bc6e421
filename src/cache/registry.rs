use serde::Deserialize;
use serde_json::Value;

use super::{
    disk::{DiskCache, DiskCacheConfig},
    memory::{MemoryCache, MemoryCacheConfig},
    multi::MultiTierCache,
    none::NoopCache,
};
use crate::core::config::ErrorMessages;
use crate::prelude::{Arc, HashMap};
use crate::providers::registry::{decode_config, plugin_name};
use crate::traits::Cache;
use crate::{Error, Result};

/// Builds a cache from its configuration, recursing through the registry for nested tiers
pub type CacheFactory =
    Arc<dyn Fn(Value, &CacheRegistry, &ErrorMessages) -> Result<Arc<dyn Cache>> + Send + Sync>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultiCacheConfig {
    tiers: Vec<Value>,
}

/// Name-keyed cache plugins
pub struct CacheRegistry {
    factories: HashMap<String, CacheFactory>,
}

impl CacheRegistry {
    /// A registry with no plugins at all
    pub fn empty() -> Self {
        Self {
            factories: HashMap::default(),
        }
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Value, &CacheRegistry, &ErrorMessages) -> Result<Arc<dyn Cache>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Registered plugin names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds the cache described by `config`; a null config yields a [`NoopCache`]
    pub fn construct(&self, config: &Value, errors: &ErrorMessages) -> Result<Arc<dyn Cache>> {
        if config.is_null() {
            return Ok(Arc::new(NoopCache));
        }

        let name = plugin_name(config, errors, &self.names())?;
        let factory = self.factories.get(name).ok_or_else(|| {
            Error::InvalidEnum(errors.enum_error("cache.name", name, &self.names()))
        })?;
        factory(config.clone(), self, errors)
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();

        registry.register("none", |_, _, _| Ok(Arc::new(NoopCache) as Arc<dyn Cache>));

        registry.register("memory", |config, _, _| {
            let config: MemoryCacheConfig = decode_config(config)?;
            Ok(Arc::new(MemoryCache::from_config(&config)) as Arc<dyn Cache>)
        });

        registry.register("disk", |config, _, _| {
            let config: DiskCacheConfig = decode_config(config)?;
            Ok(Arc::new(DiskCache::new(config.path)) as Arc<dyn Cache>)
        });

        registry.register("multi", |config, registry, errors| {
            let config: MultiCacheConfig = decode_config(config)?;
            let mut tiers = Vec::with_capacity(config.tiers.len());
            let mut failures = Vec::new();

            for tier in &config.tiers {
                match registry.construct(tier, errors) {
                    Ok(cache) => tiers.push(cache),
                    Err(e) => failures.push(e),
                }
            }

            if let Some(error) = Error::join(failures) {
                return Err(error);
            }
            Ok(Arc::new(MultiTierCache::new(tiers)) as Arc<dyn Cache>)
        });

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_cache_lists_names() {
        let registry = CacheRegistry::default();
        let err = registry
            .construct(&json!({"name": "redis"}), &ErrorMessages::default())
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(message.contains("redis"));
        assert!(message.contains("memory"));
        assert!(message.contains("multi"));
    }

    #[test]
    fn test_multi_reports_every_bad_tier() {
        let registry = CacheRegistry::default();
        let err = registry
            .construct(
                &json!({"name": "multi", "tiers": [{"name": "bogus"}, {"name": "memory"}, {"name": "other"}]}),
                &ErrorMessages::default(),
            )
            .err()
            .unwrap();
        match err {
            Error::Joined(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected joined error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_build_multi() {
        let registry = CacheRegistry::default();
        let cache = registry
            .construct(
                &json!({"name": "multi", "tiers": [{"name": "memory", "maxSize": 10}, {"name": "none"}]}),
                &ErrorMessages::default(),
            )
            .unwrap();
        let request = crate::TileRequest::new("a", 0, 0, 0);
        cache.save(&request, &crate::Image::png(vec![1])).await.unwrap();
        assert!(cache.lookup(&request).await.unwrap().is_some());
    }
}
