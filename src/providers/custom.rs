use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::registry::{decode_config, BuildContext};
use crate::core::{
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
};
use crate::prelude::Arc;
use crate::traits::Provider;
use crate::{Error, Result};

/// Host-supplied tile logic plugged in by name.
///
/// Scripts report failures as [`anyhow::Error`]; wrapping a crate
/// [`Error`](crate::Error) (for example `ProviderAuth`) keeps its kind.
#[async_trait]
pub trait CustomScript: Send + Sync {
    /// Defaults to no authentication
    async fn pre_auth(
        &self,
        _ctx: &RequestContext,
        _provider_context: ProviderContext,
        _params: &Value,
    ) -> anyhow::Result<ProviderContext> {
        Ok(ProviderContext::bypass())
    }

    /// `Ok(None)` means the script produced nothing, which is an error
    async fn generate_tile(
        &self,
        ctx: &RequestContext,
        provider_context: &ProviderContext,
        request: &TileRequest,
        params: &Value,
    ) -> anyhow::Result<Option<Image>>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomConfig {
    #[serde(default)]
    script: String,
    #[serde(default)]
    params: Value,
}

/// Delegates to a registered [`CustomScript`]
pub struct CustomProvider {
    script_name: String,
    script: Arc<dyn CustomScript>,
    params: Value,
}

impl CustomProvider {
    pub fn new(script_name: impl Into<String>, script: Arc<dyn CustomScript>, params: Value) -> Self {
        Self {
            script_name: script_name.into(),
            script,
            params,
        }
    }
}

/// Recovers a crate error carried through the script boundary
fn from_script(error: anyhow::Error) -> Error {
    match error.downcast::<Error>() {
        Ok(error) => error,
        Err(other) => Error::Script(other),
    }
}

pub(crate) fn build(raw: Value, cx: &BuildContext<'_>) -> Result<Arc<dyn Provider>> {
    let config: CustomConfig = decode_config(raw)?;
    if config.script.is_empty() {
        return Err(cx.required("script"));
    }
    let script = cx.registry.script(&config.script).ok_or_else(|| {
        Error::InvalidEnum(cx.errors.enum_error("script", &config.script, &cx.registry.script_names()))
    })?;
    Ok(Arc::new(CustomProvider::new(config.script, script, config.params)))
}

#[async_trait]
impl Provider for CustomProvider {
    async fn pre_auth(
        &self,
        ctx: &RequestContext,
        provider_context: ProviderContext,
    ) -> Result<ProviderContext> {
        self.script
            .pre_auth(ctx, provider_context, &self.params)
            .await
            .map_err(from_script)
    }

    async fn generate_tile(
        &self,
        ctx: &RequestContext,
        provider_context: &ProviderContext,
        request: &TileRequest,
    ) -> Result<Image> {
        self.script
            .generate_tile(ctx, provider_context, request, &self.params)
            .await
            .map_err(from_script)?
            .ok_or(Error::NoImage("custom provider"))
    }

    fn name(&self) -> &str {
        &self.script_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CustomScript for Echo {
        async fn generate_tile(
            &self,
            _ctx: &RequestContext,
            provider_context: &ProviderContext,
            request: &TileRequest,
            params: &Value,
        ) -> anyhow::Result<Option<Image>> {
            if provider_context.auth_token == "stale" {
                return Err(Error::ProviderAuth("token rejected".into()).into());
            }
            if request.z > 10 {
                return Ok(None);
            }
            if request.z > 5 {
                anyhow::bail!("too deep");
            }
            let prefix = params["prefix"].as_str().unwrap_or_default();
            Ok(Some(Image::new(format!("{prefix}{request}").into_bytes(), "text/plain")))
        }
    }

    async fn render(token: &str, z: u32) -> Result<Image> {
        let provider = CustomProvider::new("echo", Arc::new(Echo), serde_json::json!({"prefix": "tile:"}));
        let pc = ProviderContext {
            auth_token: token.to_string(),
            ..ProviderContext::default()
        };
        provider
            .generate_tile(&RequestContext::default(), &pc, &TileRequest::new("l", z, 0, 0))
            .await
    }

    #[tokio::test]
    async fn test_script_results() {
        assert_eq!(render("", 1).await.unwrap().bytes(), b"tile:l/1/0/0");
        assert!(matches!(render("", 11).await, Err(Error::NoImage(_))));
        assert!(matches!(render("", 6).await, Err(Error::Script(_))));
        assert!(render("stale", 1).await.err().unwrap().is_auth());
    }
}
