use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::registry::{decode_config, BuildContext};
use super::template::{self, Srid, TemplateOptions};
use super::http;
use crate::core::{
    config::ClientConfig,
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
};
use crate::prelude::Arc;
use crate::traits::Provider;
use crate::Result;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyConfig {
    #[serde(default)]
    url: String,
    #[serde(default = "default_srid")]
    srid: u32,
    #[serde(default, alias = "invertY")]
    inverty: bool,
}

fn default_srid() -> u32 {
    4326
}

/// Fetches tiles from an upstream URL template
pub struct ProxyProvider {
    url: String,
    options: TemplateOptions,
    client: ClientConfig,
}

impl ProxyProvider {
    pub fn new(url: impl Into<String>, client: ClientConfig) -> Self {
        Self {
            url: url.into(),
            options: TemplateOptions::default(),
            client,
        }
    }

    pub fn with_options(mut self, options: TemplateOptions) -> Self {
        self.options = options;
        self
    }

    /// The upstream URL for `request`
    pub fn url_for(&self, ctx: &RequestContext, request: &TileRequest) -> Result<String> {
        template::expand(&self.url, request, ctx, self.options)
    }
}

pub(crate) fn build(raw: Value, cx: &BuildContext<'_>) -> Result<Arc<dyn Provider>> {
    let config: ProxyConfig = decode_config(raw)?;
    if config.url.is_empty() {
        return Err(cx.required("url"));
    }
    let srid = Srid::from_code(config.srid).ok_or_else(|| cx.invalid("srid", config.srid))?;

    let provider = ProxyProvider::new(config.url, cx.client.clone()).with_options(TemplateOptions {
        srid,
        invert_y: config.inverty,
    });
    Ok(Arc::new(provider))
}

#[async_trait]
impl Provider for ProxyProvider {
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
        let url = self.url_for(ctx, request)?;
        log::debug!("proxying {} to {}", request, url);
        http::fetch(&self.client, &url).await
    }

    fn name(&self) -> &str {
        "proxy"
    }
}
