use once_cell::sync::OnceCell;
use std::sync::Weak;

use super::layer::Layer;
use crate::cache::CacheRegistry;
use crate::core::{config::Config, context::RequestContext, geo::TileRequest, image::Image};
use crate::prelude::{Arc, HashMap, HashSet};
use crate::providers::ProviderRegistry;
use crate::{Error, Result};

/// Late-bound reference to the group a provider tree belongs to.
///
/// Providers are built before their group exists, so `ref` providers hold a
/// handle that is bound once construction finishes. The handle is weak and
/// does not keep the group alive.
#[derive(Clone, Default)]
pub struct LayerGroupHandle(Arc<OnceCell<Weak<LayerGroup>>>);

impl LayerGroupHandle {
    /// Binds the handle; later calls are ignored
    pub fn bind(&self, group: &Arc<LayerGroup>) {
        let _ = self.0.set(Arc::downgrade(group));
    }

    pub fn get(&self) -> Option<Arc<LayerGroup>> {
        self.0.get().and_then(Weak::upgrade)
    }
}

impl std::fmt::Debug for LayerGroupHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("LayerGroupHandle")
            .field(&self.get().is_some())
            .finish()
    }
}

/// Ordered layers; the first layer whose pattern matches serves the request
#[derive(Debug)]
pub struct LayerGroup {
    layers: Vec<Layer>,
}

impl LayerGroup {
    pub fn new(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    /// Builds every layer described by `config`.
    ///
    /// All layers share the configured cache. Provider errors from every
    /// layer are reported together.
    pub fn from_config(
        config: &Config,
        providers: &ProviderRegistry,
        caches: &CacheRegistry,
    ) -> Result<Arc<Self>> {
        let handle = LayerGroupHandle::default();
        let cache = caches.construct(&config.cache, &config.error)?;

        let mut layers = Vec::with_capacity(config.layers.len());
        let mut errors = Vec::new();
        let mut seen = HashSet::default();

        for layer_config in &config.layers {
            if !seen.insert(layer_config.id.as_str()) {
                errors.push(Error::Config(format!("duplicate layer id '{}'", layer_config.id)));
                continue;
            }

            let layer = providers
                .construct(&layer_config.provider, &config.client, &config.error, &handle)
                .and_then(|provider| Layer::from_config(layer_config, provider, cache.clone()));
            match layer {
                Ok(layer) => layers.push(layer),
                Err(e) => errors.push(Error::Config(format!("layer '{}': {}", layer_config.id, e))),
            }
        }

        if let Some(error) = Error::join(errors) {
            return Err(error);
        }

        let group = Arc::new(Self::new(layers));
        handle.bind(&group);
        log::info!("loaded {} layers", group.len());
        Ok(group)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|layer| layer.id() == id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The first layer matching `layer_name`, in configuration order, with
    /// the placeholder bindings the match produced
    pub fn find_layer(&self, layer_name: &str) -> Option<(&Layer, HashMap<String, String>)> {
        self.layers
            .iter()
            .find_map(|layer| layer.matches(layer_name).map(|bindings| (layer, bindings)))
    }

    /// The layer serving `request` and the context to render it with.
    ///
    /// The derived context carries the matched bindings for `{layer.*}`
    /// substitution, so rendering one layer never disturbs the bindings of
    /// another rendered within the same request.
    fn route(&self, ctx: &RequestContext, request: &TileRequest) -> Result<(&Layer, RequestContext)> {
        let (layer, bindings) = self
            .find_layer(&request.layer_name)
            .ok_or_else(|| Error::LayerNotFound(request.layer_name.clone()))?;
        Ok((layer, ctx.for_layer(bindings)))
    }

    /// Routes `request` to its layer and renders it through the layer's cache
    pub async fn render_tile(&self, ctx: &RequestContext, request: &TileRequest) -> Result<Image> {
        let (layer, ctx) = self.route(ctx, request)?;
        layer.render_tile(&ctx, request).await
    }

    /// Routes `request` to its layer and renders it without the cache
    pub async fn render_tile_no_cache(&self, ctx: &RequestContext, request: &TileRequest) -> Result<Image> {
        let (layer, ctx) = self.route(ctx, request)?;
        layer.render_tile_no_cache(&ctx, request).await
    }

    /// Runs the permission checks of the layer serving `request`
    pub fn check_permission(&self, ctx: &RequestContext, request: &TileRequest) -> Result<()> {
        let (layer, _) = self
            .find_layer(&request.layer_name)
            .ok_or_else(|| Error::LayerNotFound(request.layer_name.clone()))?;
        layer.check_permission(ctx, request)
    }
}
