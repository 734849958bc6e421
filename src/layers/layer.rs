use std::time::SystemTime;
use tokio::sync::Mutex;

use crate::core::{
    config::LayerConfig,
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
    pattern::{ParamValidator, Pattern},
};
use crate::prelude::{Arc, Duration, HashMap};
use crate::traits::{Cache, Provider};
use crate::{Error, Result};

/// A routable tile source: one provider tree, its cache and its auth state.
///
/// The provider tree and pattern never change after construction. The
/// [`ProviderContext`] is the only mutable state and is updated under the
/// layer's mutex, so at most one pre-auth runs per layer at a time.
pub struct Layer {
    id: String,
    pattern: Pattern,
    param_validator: ParamValidator,
    provider: Arc<dyn Provider>,
    cache: Arc<dyn Cache>,
    skip_cache: bool,
    timeout: Option<Duration>,
    provider_context: Mutex<ProviderContext>,
}

impl Layer {
    pub fn new(id: impl Into<String>, provider: Arc<dyn Provider>, cache: Arc<dyn Cache>) -> Result<Self> {
        let id = id.into();
        Ok(Self {
            pattern: Pattern::parse(&id)?,
            id,
            param_validator: ParamValidator::default(),
            provider,
            cache,
            skip_cache: false,
            timeout: None,
            provider_context: Mutex::new(ProviderContext::default()),
        })
    }

    pub fn from_config(config: &LayerConfig, provider: Arc<dyn Provider>, cache: Arc<dyn Cache>) -> Result<Self> {
        let mut layer = Self::new(config.id.as_str(), provider, cache)?
            .with_pattern(Pattern::parse(config.pattern())?)
            .with_param_validator(ParamValidator::new(&config.param_validator)?)
            .with_skip_cache(config.skip_cache);
        layer.timeout = config.timeout();
        Ok(layer)
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_param_validator(mut self, validator: ParamValidator) -> Self {
        self.param_validator = validator;
        self
    }

    pub fn with_skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Matches `layer_name` against the pattern and validates the bindings
    pub fn matches(&self, layer_name: &str) -> Option<HashMap<String, String>> {
        let bindings = self.pattern.matches(layer_name)?;
        self.param_validator.validate(&bindings).then_some(bindings)
    }

    /// Current auth state, pre-authenticating first when it has expired.
    ///
    /// `force` re-authenticates regardless of expiration, unless the provider
    /// has opted out of authentication altogether.
    pub async fn authenticate(&self, ctx: &RequestContext, force: bool) -> Result<ProviderContext> {
        let mut provider_context = self.provider_context.lock().await;

        if provider_context.auth_bypass {
            return Ok(provider_context.clone());
        }

        if force || provider_context.needs_auth(SystemTime::now()) {
            log::debug!("pre-authenticating layer {} (forced: {})", self.id, force);
            let refreshed = self.provider.pre_auth(ctx, provider_context.clone()).await?;
            *provider_context = refreshed;
        }

        Ok(provider_context.clone())
    }

    /// Fails with [`Error::Unauthorized`] if the request may not see this tile.
    ///
    /// Which check failed is deliberately not reported.
    pub fn check_permission(&self, ctx: &RequestContext, request: &TileRequest) -> Result<()> {
        if let Some(allowed) = &ctx.allowed_layers {
            if !allowed.contains(&self.id) {
                log::debug!("layer {} not in allowed set", self.id);
                return Err(Error::Unauthorized);
            }
        }

        if !ctx.allowed_area.is_null_island() && !ctx.allowed_area.contains(&request.bounds()?) {
            log::debug!("{} outside allowed area", request);
            return Err(Error::Unauthorized);
        }

        Ok(())
    }

    /// Renders through the cache: lookup, render on miss, save.
    ///
    /// Cache failures are logged and never fail the request. The result is
    /// not saved when the request asked to skip saving or the image opted out.
    pub async fn render_tile(&self, ctx: &RequestContext, request: &TileRequest) -> Result<Image> {
        request.validate()?;
        self.check_permission(ctx, request)?;

        if self.skip_cache {
            return self.render_uncached(ctx, request).await;
        }

        match self.cache.lookup(request).await {
            Ok(Some(image)) => {
                log::debug!("cache hit for {}", request);
                return Ok(image);
            }
            Ok(None) => log::debug!("cache miss for {}", request),
            Err(e) => log::warn!("cache lookup failed for {}: {}", request, e),
        }

        let image = self.render_uncached(ctx, request).await?;

        if ctx.skip_cache_save() || image.force_skip_cache {
            log::debug!("not caching {}", request);
        } else if let Err(e) = self.cache.save(request, &image).await {
            log::warn!("cache save failed for {}: {}", request, e);
        }

        Ok(image)
    }

    /// Renders straight from the provider tree, bypassing the cache
    pub async fn render_tile_no_cache(&self, ctx: &RequestContext, request: &TileRequest) -> Result<Image> {
        request.validate()?;
        self.check_permission(ctx, request)?;
        self.render_uncached(ctx, request).await
    }

    async fn render_uncached(&self, ctx: &RequestContext, request: &TileRequest) -> Result<Image> {
        let result = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.generate(ctx, request))
                .await
                .unwrap_or(Err(Error::Timeout)),
            None => self.generate(ctx, request).await,
        };
        if let Err(e) = &result {
            log::error!("layer {} failed to render {}: {}", self.id, request, e);
        }
        result
    }

    /// Generates with the current auth state, re-authenticating and retrying
    /// exactly once if the provider rejects the credentials
    async fn generate(&self, ctx: &RequestContext, request: &TileRequest) -> Result<Image> {
        let provider_context = self.authenticate(ctx, false).await?;

        match self.provider.generate_tile(ctx, &provider_context, request).await {
            Err(e) if e.is_auth() => {
                log::debug!("layer {} auth rejected ({}), retrying once", self.id, e);
                let provider_context = self.authenticate(ctx, true).await?;
                self.provider.generate_tile(ctx, &provider_context, request).await
            }
            result => result,
        }
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .field("provider", &self.provider.name())
            .field("skip_cache", &self.skip_cache)
            .field("timeout", &self.timeout)
            .finish()
    }
}
