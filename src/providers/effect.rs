use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::registry::{decode_config, BuildContext};
use crate::core::{
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
};
use crate::imaging::{self, Filter};
use crate::prelude::Arc;
use crate::traits::Provider;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EffectConfig {
    #[serde(default)]
    provider: Value,
    #[serde(default)]
    mode: String,
    intensity: Option<f64>,
}

/// Applies a whole-image filter to its child's tiles
pub struct EffectProvider {
    child: Arc<dyn Provider>,
    filter: Filter,
    intensity: f64,
}

impl EffectProvider {
    /// Fails if `intensity` is given to a filter that takes none, missing for
    /// one that needs it, or outside the filter's accepted range
    pub fn new(child: Arc<dyn Provider>, filter: Filter, intensity: Option<f64>) -> Result<Self> {
        let intensity = match (filter.intensity_range(), intensity) {
            (Some(range), Some(value)) if range.contains(&value) => value,
            (Some(range), Some(value)) => {
                return Err(Error::Config(format!(
                    "{:?} intensity {} is outside {}..={}",
                    filter,
                    value,
                    range.start(),
                    range.end()
                )))
            }
            (None, None) => 0.0,
            (Some(_), None) => {
                return Err(Error::Config(format!("{:?} requires an intensity", filter)))
            }
            (None, Some(_)) => {
                return Err(Error::Config(format!("{:?} does not take an intensity", filter)))
            }
        };
        Ok(Self {
            child,
            filter,
            intensity,
        })
    }
}

pub(crate) fn build(raw: Value, cx: &BuildContext<'_>) -> Result<Arc<dyn Provider>> {
    let config: EffectConfig = decode_config(raw)?;

    let filter = Filter::parse(&config.mode).ok_or_else(|| {
        Error::InvalidEnum(cx.errors.enum_error("mode", &config.mode, &Filter::names()))
    })?;
    if config.provider.is_null() {
        return Err(cx.required("provider"));
    }
    let child = cx.construct(&config.provider)?;

    Ok(Arc::new(EffectProvider::new(child, filter, config.intensity)?))
}

#[async_trait]
impl Provider for EffectProvider {
    async fn pre_auth(
        &self,
        ctx: &RequestContext,
        provider_context: ProviderContext,
    ) -> Result<ProviderContext> {
        self.child.pre_auth(ctx, provider_context).await
    }

    async fn generate_tile(
        &self,
        ctx: &RequestContext,
        provider_context: &ProviderContext,
        request: &TileRequest,
    ) -> Result<Image> {
        let image = self.child.generate_tile(ctx, provider_context, request).await?;
        let filtered = self.filter.apply(&imaging::decode(&image)?, self.intensity);
        Ok(imaging::encode_png(&filtered)?.with_force_skip_cache(image.force_skip_cache))
    }

    fn name(&self) -> &str {
        "effect"
    }
}
