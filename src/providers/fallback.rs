use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::fanout::{child_context, pre_auth_children};
use super::registry::{decode_config, BuildContext};
use crate::core::{
    context::{ProviderContext, RequestContext},
    geo::{parse_zoom_range, Bounds, TileRequest},
    image::Image,
};
use crate::prelude::{Arc, HashSet};
use crate::traits::Provider;
use crate::{Error, Result};

/// When a fallback render may still be written to the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    /// Cache whatever is returned
    Always,
    /// Skip saving when the primary failed
    UnlessError,
    /// Skip saving whenever the secondary was used
    UnlessFallback,
}

impl CacheMode {
    const NAMES: [&'static str; 3] = ["always", "unless-error", "unless-fallback"];

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "always" => Some(Self::Always),
            "unless-error" => Some(Self::UnlessError),
            "unless-fallback" => Some(Self::UnlessFallback),
            _ => None,
        }
    }

    fn skips(self, primary_failed: bool) -> bool {
        match self {
            Self::Always => false,
            Self::UnlessError => primary_failed,
            Self::UnlessFallback => true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FallbackConfig {
    #[serde(default)]
    primary: Value,
    #[serde(default)]
    secondary: Value,
    zoom: Option<String>,
    bounds: Option<Bounds>,
    #[serde(default = "default_cache_mode")]
    cache_mode: String,
}

fn default_cache_mode() -> String {
    "unless-error".to_string()
}

/// Uses the secondary provider when the primary is out of its zoom range,
/// outside its bounds or failing.
pub struct FallbackProvider {
    primary: Arc<dyn Provider>,
    secondary: Arc<dyn Provider>,
    zoom: Option<HashSet<u32>>,
    bounds: Option<Bounds>,
    cache_mode: CacheMode,
    children: [Arc<dyn Provider>; 2],
}

impl FallbackProvider {
    pub fn new(primary: Arc<dyn Provider>, secondary: Arc<dyn Provider>, cache_mode: CacheMode) -> Self {
        Self {
            children: [primary.clone(), secondary.clone()],
            primary,
            secondary,
            zoom: None,
            bounds: None,
            cache_mode,
        }
    }

    /// Restricts the primary to the given zoom levels
    pub fn with_zoom(mut self, levels: impl IntoIterator<Item = u32>) -> Self {
        self.zoom = Some(levels.into_iter().collect());
        self
    }

    /// Restricts the primary to tiles intersecting `bounds`
    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    fn primary_applies(&self, request: &TileRequest) -> Result<bool> {
        if let Some(zoom) = &self.zoom {
            if !zoom.contains(&request.z) {
                return Ok(false);
            }
        }
        if let Some(bounds) = &self.bounds {
            if !request.bounds()?.intersects(bounds) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

pub(crate) fn build(raw: Value, cx: &BuildContext<'_>) -> Result<Arc<dyn Provider>> {
    let config: FallbackConfig = decode_config(raw)?;

    let cache_mode = CacheMode::parse(&config.cache_mode).ok_or_else(|| {
        let allowed: Vec<String> = CacheMode::NAMES.iter().map(|s| s.to_string()).collect();
        Error::InvalidEnum(cx.errors.enum_error("cacheMode", &config.cache_mode, &allowed))
    })?;

    if config.primary.is_null() {
        return Err(cx.required("primary"));
    }
    if config.secondary.is_null() {
        return Err(cx.required("secondary"));
    }
    let mut children = cx.construct_all(&[config.primary, config.secondary])?;
    let secondary = children.pop().ok_or_else(|| cx.required("secondary"))?;
    let primary = children.pop().ok_or_else(|| cx.required("primary"))?;

    let mut provider = FallbackProvider::new(primary, secondary, cache_mode);
    if let Some(zoom) = config.zoom {
        provider = provider.with_zoom(parse_zoom_range(&zoom)?);
    }
    if let Some(bounds) = config.bounds {
        provider = provider.with_bounds(bounds);
    }
    Ok(Arc::new(provider))
}

#[async_trait]
impl Provider for FallbackProvider {
    async fn pre_auth(
        &self,
        ctx: &RequestContext,
        provider_context: ProviderContext,
    ) -> Result<ProviderContext> {
        pre_auth_children(ctx, &self.children, provider_context).await
    }

    async fn generate_tile(
        &self,
        ctx: &RequestContext,
        provider_context: &ProviderContext,
        request: &TileRequest,
    ) -> Result<Image> {
        let mut primary_failed = false;

        if self.primary_applies(request)? {
            match self
                .primary
                .generate_tile(ctx, child_context(provider_context, 0), request)
                .await
            {
                Ok(image) => return Ok(image),
                Err(e) => {
                    log::debug!("primary failed for {}, falling back: {}", request, e);
                    primary_failed = true;
                }
            }
        }

        if self.cache_mode.skips(primary_failed) {
            ctx.set_skip_cache_save();
        }

        self.secondary
            .generate_tile(ctx, child_context(provider_context, 1), request)
            .await
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
