use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::registry::{decode_config, BuildContext};
use crate::core::{
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
};
use crate::layers::group::LayerGroupHandle;
use crate::prelude::Arc;
use crate::traits::Provider;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefConfig {
    #[serde(default)]
    layer: String,
}

/// Serves another layer of the same group under this layer's name.
///
/// The referenced layer is rendered with its own cache, auth state and
/// permission checks.
pub struct RefProvider {
    layer: String,
    group: LayerGroupHandle,
}

impl RefProvider {
    pub fn new(layer: impl Into<String>, group: LayerGroupHandle) -> Self {
        Self {
            layer: layer.into(),
            group,
        }
    }
}

pub(crate) fn build(raw: Value, cx: &BuildContext<'_>) -> Result<Arc<dyn Provider>> {
    let config: RefConfig = decode_config(raw)?;
    if config.layer.is_empty() {
        return Err(cx.required("layer"));
    }
    Ok(Arc::new(RefProvider::new(config.layer, cx.layer_group.clone())))
}

#[async_trait]
impl Provider for RefProvider {
    async fn pre_auth(
        &self,
        _ctx: &RequestContext,
        _provider_context: ProviderContext,
    ) -> Result<ProviderContext> {
        Ok(ProviderContext::bypass())
    }

    async fn generate_tile(
        &self,
        ctx: &RequestContext,
        _provider_context: &ProviderContext,
        request: &TileRequest,
    ) -> Result<Image> {
        let group = self
            .group
            .get()
            .ok_or_else(|| Error::Provider(format!("layer group for ref '{}' is gone", self.layer)))?;
        group.render_tile(ctx, &request.with_layer(self.layer.as_str())).await
    }

    fn name(&self) -> &str {
        "ref"
    }
}
