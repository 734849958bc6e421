use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::registry::{decode_config, BuildContext};
use crate::core::{
    constants::{MVT_CONTENT_TYPE, TILE_SIZE},
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
};
use crate::imaging;
use crate::prelude::Arc;
use crate::traits::Provider;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StaticConfig {
    color: Option<String>,
    file: Option<PathBuf>,
    #[serde(default)]
    skip_cache: bool,
}

/// Returns the same image for every request
pub struct StaticProvider {
    image: Image,
}

impl StaticProvider {
    pub fn new(image: Image) -> Self {
        Self { image }
    }

    /// A solid tile of `color` (`RGB`, `RGBA`, `RRGGBB` or `RRGGBBAA`)
    pub fn from_color(color: &str) -> Result<Self> {
        let pixel = imaging::parse_hex_color(color)?;
        let image = imaging::encode_png(&imaging::solid(pixel, TILE_SIZE))?;
        Ok(Self::new(image))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        Ok(Self::new(Image::new(content, content_type_for(path))))
    }

    pub fn image(&self) -> &Image {
        &self.image
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mvt" | "pbf" => MVT_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}

pub(crate) fn build(raw: Value, cx: &BuildContext<'_>) -> Result<Arc<dyn Provider>> {
    let config: StaticConfig = decode_config(raw)?;

    let provider = match (&config.color, &config.file) {
        (Some(color), None) => StaticProvider::from_color(color)?,
        (None, Some(file)) => StaticProvider::from_file(file)?,
        (Some(_), Some(_)) => {
            return Err(Error::Config(
                "static provider takes either color or file, not both".into(),
            ))
        }
        (None, None) => return Err(cx.required("color")),
    };

    let image = provider.image.clone().with_force_skip_cache(config.skip_cache);
    Ok(Arc::new(StaticProvider::new(image)))
}

#[async_trait]
impl Provider for StaticProvider {
    async fn pre_auth(
        &self,
        _ctx: &RequestContext,
        _provider_context: ProviderContext,
    ) -> Result<ProviderContext> {
        Ok(ProviderContext::bypass())
    }

    async fn generate_tile(
        &self,
        _ctx: &RequestContext,
        _provider_context: &ProviderContext,
        _request: &TileRequest,
    ) -> Result<Image> {
        Ok(self.image.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color_tile() {
        let provider = StaticProvider::from_color("00F").unwrap();
        let decoded = imaging::decode(provider.image()).unwrap();
        assert_eq!(decoded.dimensions(), (TILE_SIZE, TILE_SIZE));
        assert_eq!(decoded.get_pixel(10, 10).0, [0, 0, 255, 255]);
    }

    #[test]
    fn test_file_tile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.pbf");
        std::fs::write(&path, b"\x1a\x00").unwrap();

        let provider = StaticProvider::from_file(&path).unwrap();
        assert_eq!(provider.image().content_type, MVT_CONTENT_TYPE);
        assert_eq!(provider.image().bytes(), b"\x1a\x00");
    }
}
