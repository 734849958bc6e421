use async_trait::async_trait;
use image::RgbaImage;
use serde::Deserialize;
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};

use super::registry::{decode_config, BuildContext};
use crate::core::{
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
};
use crate::imaging;
use crate::prelude::Arc;
use crate::traits::Provider;
use crate::{Error, Result};

/// Maps one RGBA pixel to another
pub type PixelFunction = Arc<dyn Fn(u8, u8, u8, u8) -> (u8, u8, u8, u8) + Send + Sync>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransformConfig {
    #[serde(default)]
    provider: Value,
    #[serde(default)]
    function: String,
    #[serde(default = "default_threads")]
    threads: usize,
}

fn default_threads() -> usize {
    1
}

/// Runs a registered per-pixel function over its child's tiles
pub struct TransformProvider {
    child: Arc<dyn Provider>,
    function: PixelFunction,
    threads: usize,
}

impl TransformProvider {
    pub fn new(child: Arc<dyn Provider>, function: PixelFunction, threads: usize) -> Self {
        Self {
            child,
            function,
            threads: threads.max(1),
        }
    }
}

pub(crate) fn build(raw: Value, cx: &BuildContext<'_>) -> Result<Arc<dyn Provider>> {
    let config: TransformConfig = decode_config(raw)?;

    let function = cx.registry.pixel_function(&config.function).ok_or_else(|| {
        Error::InvalidEnum(cx.errors.enum_error(
            "function",
            &config.function,
            &cx.registry.pixel_function_names(),
        ))
    })?;
    if config.threads == 0 {
        return Err(cx.invalid("threads", config.threads));
    }
    if config.provider.is_null() {
        return Err(cx.required("provider"));
    }
    let child = cx.construct(&config.provider)?;

    Ok(Arc::new(TransformProvider::new(child, function, config.threads)))
}

fn map_chunk(chunk: &[u8], function: &PixelFunction) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len());
    for pixel in chunk.chunks_exact(4) {
        let (r, g, b, a) = function(pixel[0], pixel[1], pixel[2], pixel[3]);
        out.extend_from_slice(&[r, g, b, a]);
    }
    out
}

/// Applies `function` to every pixel using `threads` workers over contiguous
/// pixel ranges.
///
/// Results come back tagged with their chunk index and are written to that
/// chunk's position. A panicking worker is logged and its pixels are left
/// unchanged.
pub fn apply_parallel(buffer: RgbaImage, function: &PixelFunction, threads: usize) -> Result<RgbaImage> {
    let (width, height) = buffer.dimensions();
    let raw = buffer.into_raw();
    let pixels = raw.len() / 4;
    if pixels == 0 {
        return RgbaImage::from_raw(width, height, raw).ok_or(Error::NoImage("transform"));
    }

    let threads = threads.clamp(1, pixels);
    let chunk_bytes = pixels.div_ceil(threads) * 4;
    let (sender, receiver) = crossbeam_channel::unbounded();

    std::thread::scope(|scope| {
        for (index, chunk) in raw.chunks(chunk_bytes).enumerate() {
            let sender = sender.clone();
            scope.spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| map_chunk(chunk, function)));
                let _ = sender.send((index, result));
            });
        }
    });
    drop(sender);

    let mut out = raw;
    for (index, result) in receiver.iter() {
        match result {
            Ok(mapped) => {
                let start = index * chunk_bytes;
                out[start..start + mapped.len()].copy_from_slice(&mapped);
            }
            Err(_) => log::warn!("transform worker {} panicked; chunk left unchanged", index),
        }
    }

    RgbaImage::from_raw(width, height, out).ok_or(Error::NoImage("transform"))
}

#[async_trait]
impl Provider for TransformProvider {
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
        let buffer = imaging::decode(&image)?;

        let function = self.function.clone();
        let threads = self.threads;
        let transformed = tokio::task::spawn_blocking(move || apply_parallel(buffer, &function, threads))
            .await
            .map_err(|e| Error::Provider(format!("transform task failed: {}", e)))??;

        Ok(imaging::encode_png(&transformed)?.with_force_skip_cache(image.force_skip_cache))
    }

    fn name(&self) -> &str {
        "transform"
    }
}
