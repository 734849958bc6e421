use async_trait::async_trait;

use crate::core::{
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
};
use crate::prelude::{Arc, Instant};
use crate::traits::Provider;
use crate::Result;

/// Logs timing and failures of the provider it wraps; otherwise transparent
pub struct InstrumentedProvider {
    name: String,
    inner: Arc<dyn Provider>,
}

impl InstrumentedProvider {
    pub fn new(name: impl Into<String>, inner: Arc<dyn Provider>) -> Self {
        Self {
            name: name.into(),
            inner,
        }
    }

    pub fn inner(&self) -> &Arc<dyn Provider> {
        &self.inner
    }
}

#[async_trait]
impl Provider for InstrumentedProvider {
    async fn pre_auth(
        &self,
        ctx: &RequestContext,
        provider_context: ProviderContext,
    ) -> Result<ProviderContext> {
        let started = Instant::now();
        log::trace!("{} pre-auth start", self.name);

        let result = self.inner.pre_auth(ctx, provider_context).await;
        match &result {
            Ok(_) => log::trace!("{} pre-auth done in {:?}", self.name, started.elapsed()),
            Err(e) => log::warn!("{} pre-auth failed after {:?}: {}", self.name, started.elapsed(), e),
        }
        result
    }

    async fn generate_tile(
        &self,
        ctx: &RequestContext,
        provider_context: &ProviderContext,
        request: &TileRequest,
    ) -> Result<Image> {
        let started = Instant::now();
        log::trace!("{} generate {} start", self.name, request);

        let result = self.inner.generate_tile(ctx, provider_context, request).await;
        match &result {
            Ok(image) => log::trace!(
                "{} generate {} done in {:?} ({} bytes)",
                self.name,
                request,
                started.elapsed(),
                image.len()
            ),
            Err(e) => log::warn!(
                "{} generate {} failed after {:?}: {}",
                self.name,
                request,
                started.elapsed(),
                e
            ),
        }
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}
