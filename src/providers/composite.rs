use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::fanout::{collect_images, generate_children, pre_auth_children};
use super::registry::{decode_config, BuildContext};
use crate::core::{
    constants::MVT_CONTENT_TYPE,
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
};
use crate::prelude::Arc;
use crate::traits::Provider;
use crate::Result;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompositeConfig {
    #[serde(default)]
    providers: Vec<Value>,
}

/// Concatenates the vector tiles of its children in order.
///
/// MVT payloads are sequences of layers, so concatenating them merges the
/// layers of every child into one tile.
pub struct CompositeProvider {
    children: Vec<Arc<dyn Provider>>,
}

impl CompositeProvider {
    pub fn new(children: Vec<Arc<dyn Provider>>) -> Self {
        Self { children }
    }
}

pub(crate) fn build(raw: Value, cx: &BuildContext<'_>) -> Result<Arc<dyn Provider>> {
    let config: CompositeConfig = decode_config(raw)?;
    if config.providers.is_empty() {
        return Err(cx.required("providers"));
    }
    Ok(Arc::new(CompositeProvider::new(cx.construct_all(&config.providers)?)))
}

#[async_trait]
impl Provider for CompositeProvider {
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

        let mut content = Vec::with_capacity(images.iter().map(Image::len).sum());
        for image in &images {
            content.extend_from_slice(image.bytes());
        }
        let force_skip_cache = images.iter().any(|image| image.force_skip_cache);

        Ok(Image::new(content, MVT_CONTENT_TYPE).with_force_skip_cache(force_skip_cache))
    }

    fn name(&self) -> &str {
        "composite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::static_image::StaticProvider;
    use crate::Error;
    use std::time::Duration;

    /// Answers after a delay so completion order differs from child order
    struct Slow(u64, &'static [u8]);

    #[async_trait]
    impl Provider for Slow {
        async fn pre_auth(&self, _ctx: &RequestContext, _pc: ProviderContext) -> Result<ProviderContext> {
            Ok(ProviderContext::bypass())
        }

        async fn generate_tile(
            &self,
            _ctx: &RequestContext,
            _pc: &ProviderContext,
            _request: &TileRequest,
        ) -> Result<Image> {
            tokio::time::sleep(Duration::from_millis(self.0)).await;
            Ok(Image::new(self.1.to_vec(), MVT_CONTENT_TYPE))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct Broken;

    #[async_trait]
    impl Provider for Broken {
        async fn pre_auth(&self, _ctx: &RequestContext, _pc: ProviderContext) -> Result<ProviderContext> {
            Ok(ProviderContext::bypass())
        }

        async fn generate_tile(
            &self,
            _ctx: &RequestContext,
            _pc: &ProviderContext,
            _request: &TileRequest,
        ) -> Result<Image> {
            Err(Error::RemoteServer(500))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    async fn render(children: Vec<Arc<dyn Provider>>) -> Result<Image> {
        CompositeProvider::new(children)
            .generate_tile(
                &RequestContext::default(),
                &ProviderContext::default(),
                &TileRequest::new("mvt", 1, 0, 0),
            )
            .await
    }

    #[tokio::test]
    async fn test_concatenates_in_child_order() {
        let image = render(vec![Arc::new(Slow(30, b"aa")), Arc::new(Slow(0, b"bb")), Arc::new(Slow(10, b"cc"))])
            .await
            .unwrap();
        assert_eq!(image.bytes(), b"aabbcc");
        assert_eq!(image.content_type, MVT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_force_skip_cache_propagates() {
        let skipping = StaticProvider::new(Image::new(b"x".to_vec(), MVT_CONTENT_TYPE).with_force_skip_cache(true));
        let image = render(vec![Arc::new(Slow(0, b"a")), Arc::new(skipping)]).await.unwrap();
        assert!(image.force_skip_cache);
    }

    #[tokio::test]
    async fn test_child_errors_are_joined() {
        let err = render(vec![Arc::new(Broken), Arc::new(Slow(0, b"a")), Arc::new(Broken)])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Joined(ref errors) if errors.len() == 2));
    }
}
