use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::fanout::{collect_images, generate_children, pre_auth_children};
use super::registry::{decode_config, BuildContext};
use crate::core::{
    constants::{MAX_BLEND_CHILDREN, MIN_BLEND_CHILDREN},
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
    pattern::Pattern,
};
use crate::imaging::{self, blend_modes, BlendMode};
use crate::prelude::{Arc, HashMap};
use crate::traits::Provider;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlendConfig {
    #[serde(default)]
    providers: Vec<Value>,
    /// Layer pattern expanded once per entry of `values` into `ref` children
    layer: Option<String>,
    #[serde(default)]
    values: Vec<HashMap<String, String>>,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default = "default_opacity")]
    opacity: f64,
}

fn default_mode() -> String {
    "normal".to_string()
}

fn default_opacity() -> f64 {
    1.0
}

/// Renders every child concurrently and folds the images with a blend mode
pub struct BlendProvider {
    children: Vec<Arc<dyn Provider>>,
    mode: BlendMode,
}

impl BlendProvider {
    pub fn new(children: Vec<Arc<dyn Provider>>, mode: BlendMode) -> Result<Self> {
        let count = children.len();
        if !(MIN_BLEND_CHILDREN..=MAX_BLEND_CHILDREN).contains(&count) {
            return Err(Error::Config(format!(
                "blend needs between {} and {} providers, got {}",
                MIN_BLEND_CHILDREN, MAX_BLEND_CHILDREN, count
            )));
        }
        Ok(Self { children, mode })
    }

    pub fn mode(&self) -> BlendMode {
        self.mode
    }
}

/// One `ref` provider config per substitution map
fn layer_refs(pattern: &str, values: &[HashMap<String, String>]) -> Result<Vec<Value>> {
    let pattern = Pattern::parse(pattern)?;
    Ok(values
        .iter()
        .map(|value| json!({"name": "ref", "layer": pattern.substitute(value)}))
        .collect())
}

pub(crate) fn build(raw: Value, cx: &BuildContext<'_>) -> Result<Arc<dyn Provider>> {
    let config: BlendConfig = decode_config(raw)?;

    let mode = BlendMode::parse(&config.mode, config.opacity).ok_or_else(|| {
        Error::InvalidEnum(cx.errors.enum_error("mode", &config.mode, &BlendMode::names()))
    })?;

    let child_configs = match (&config.layer, config.providers.is_empty()) {
        (Some(layer), true) => layer_refs(layer, &config.values)?,
        (None, false) => config.providers,
        (Some(_), false) => {
            return Err(Error::Config(
                "blend takes either providers or layer with values, not both".into(),
            ))
        }
        (None, true) => return Err(cx.required("providers")),
    };

    let children = cx.construct_all(&child_configs)?;
    Ok(Arc::new(BlendProvider::new(children, mode)?))
}

#[async_trait]
impl Provider for BlendProvider {
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
        let results = generate_children(ctx, &self.children, provider_context, request).await;
        let images = collect_images(results)?;
        let force_skip_cache = images.iter().any(|image| image.force_skip_cache);

        let buffers = images
            .iter()
            .map(imaging::decode)
            .collect::<Result<Vec<_>>>()?;
        let blended = blend_modes::fold(self.mode, imaging::match_sizes(buffers))
            .ok_or(Error::NoImage("blend"))?;

        Ok(imaging::encode_png(&blended)?.with_force_skip_cache(force_skip_cache))
    }

    fn name(&self) -> &str {
        "blend"
    }
}
