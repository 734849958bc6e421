use async_trait::async_trait;
use geo::{Contains, Intersects};
use geo_types::{coord, Coord, LineString, Point, Polygon, Rect};
use image::RgbaImage;
use serde::Deserialize;
use serde_json::Value;
use std::borrow::Cow;

use super::fanout::{child_context, pre_auth_children};
use super::registry::{decode_config, BuildContext};
use crate::core::{
    context::{ProviderContext, RequestContext},
    geo::{Bounds, LatLng, TileRequest},
    image::Image,
};
use crate::imaging;
use crate::prelude::Arc;
use crate::traits::Provider;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CropConfig {
    #[serde(default)]
    primary: Value,
    #[serde(default)]
    secondary: Value,
    bounds: Option<Bounds>,
    /// Polygon ring as `[lng, lat]` pairs in degrees
    area: Option<Vec<[f64; 2]>>,
}

/// Shows the primary provider inside a region and the secondary outside it.
///
/// The region is configured as bounds or a polygon; without one, the
/// request's allowed area is used. Tiles straddling the region edge are
/// composited pixel by pixel in Web Mercator space.
pub struct CropProvider {
    children: [Arc<dyn Provider>; 2],
    region: Option<Polygon<f64>>,
}

const PRIMARY: usize = 0;
const SECONDARY: usize = 1;

fn mercator(lat: f64, lng: f64) -> Coord<f64> {
    let point = LatLng::new(lat, lng).to_mercator();
    coord! { x: point.x, y: point.y }
}

fn bounds_polygon(bounds: &Bounds) -> Polygon<f64> {
    Rect::new(
        mercator(bounds.south, bounds.west),
        mercator(bounds.north, bounds.east),
    )
    .to_polygon()
}

impl CropProvider {
    pub fn new(primary: Arc<dyn Provider>, secondary: Arc<dyn Provider>) -> Self {
        Self {
            children: [primary, secondary],
            region: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Bounds) -> Self {
        self.region = Some(bounds_polygon(&bounds));
        self
    }

    /// Uses the polygon described by `[lng, lat]` vertices
    pub fn with_area(mut self, ring: &[[f64; 2]]) -> Self {
        let exterior: LineString<f64> = ring.iter().map(|[lng, lat]| mercator(*lat, *lng)).collect();
        self.region = Some(Polygon::new(exterior, Vec::new()));
        self
    }

    fn region<'a>(&'a self, ctx: &RequestContext) -> Option<Cow<'a, Polygon<f64>>> {
        match &self.region {
            Some(region) => Some(Cow::Borrowed(region)),
            None if !ctx.allowed_area.is_null_island() => {
                Some(Cow::Owned(bounds_polygon(&ctx.allowed_area)))
            }
            None => None,
        }
    }

    async fn generate(
        &self,
        which: usize,
        ctx: &RequestContext,
        provider_context: &ProviderContext,
        request: &TileRequest,
    ) -> Result<Image> {
        self.children[which]
            .generate_tile(ctx, child_context(provider_context, which), request)
            .await
    }
}

/// Picks each pixel from `inside` or `outside` by testing its centre against
/// `region`; `extent` is the tile in Web Mercator meters.
fn composite(inside: &RgbaImage, outside: &RgbaImage, region: &Polygon<f64>, extent: &Rect<f64>) -> RgbaImage {
    let (width, height) = inside.dimensions();
    let (min, max) = (extent.min(), extent.max());
    let mut out = outside.clone();

    for (px, py, pixel) in out.enumerate_pixels_mut() {
        let x = min.x + (f64::from(px) + 0.5) / f64::from(width) * (max.x - min.x);
        let y = max.y - (f64::from(py) + 0.5) / f64::from(height) * (max.y - min.y);
        if region.contains(&Point::new(x, y)) {
            *pixel = *inside.get_pixel(px, py);
        }
    }
    out
}

pub(crate) fn build(raw: Value, cx: &BuildContext<'_>) -> Result<Arc<dyn Provider>> {
    let config: CropConfig = decode_config(raw)?;
    if config.primary.is_null() {
        return Err(cx.required("primary"));
    }
    if config.secondary.is_null() {
        return Err(cx.required("secondary"));
    }

    let mut children = cx.construct_all(&[config.primary, config.secondary])?;
    let secondary = children.pop().ok_or_else(|| cx.required("secondary"))?;
    let primary = children.pop().ok_or_else(|| cx.required("primary"))?;
    let mut provider = CropProvider::new(primary, secondary);

    match (config.bounds, config.area) {
        (Some(bounds), None) => provider = provider.with_bounds(bounds),
        (None, Some(area)) if area.len() >= 3 => provider = provider.with_area(&area),
        (None, Some(_)) => return Err(cx.invalid("area", "fewer than 3 vertices")),
        (Some(_), Some(_)) => {
            return Err(Error::Config("crop takes either bounds or area, not both".into()))
        }
        (None, None) => {}
    }
    Ok(Arc::new(provider))
}

#[async_trait]
impl Provider for CropProvider {
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
        let Some(region) = self.region(ctx) else {
            return self.generate(PRIMARY, ctx, provider_context, request).await;
        };

        let bounds = request.bounds()?;
        let extent = Rect::new(
            mercator(bounds.south, bounds.west),
            mercator(bounds.north, bounds.east),
        );
        let tile = extent.to_polygon();

        if !region.intersects(&tile) {
            return self.generate(SECONDARY, ctx, provider_context, request).await;
        }
        if region.contains(&tile) {
            return self.generate(PRIMARY, ctx, provider_context, request).await;
        }

        let (inside, outside) = futures::join!(
            self.generate(PRIMARY, ctx, provider_context, request),
            self.generate(SECONDARY, ctx, provider_context, request),
        );
        let images = match (inside, outside) {
            (Ok(inside), Ok(outside)) => [inside, outside],
            (inside, outside) => {
                let errors = [inside.err(), outside.err()].into_iter().flatten();
                return Err(Error::join(errors).unwrap_or(Error::NoImage("crop")));
            }
        };

        let force_skip_cache = images.iter().any(|image| image.force_skip_cache);
        let mut buffers = imaging::match_sizes(vec![
            imaging::decode(&images[0])?,
            imaging::decode(&images[1])?,
        ]);
        let outside = buffers.pop().ok_or(Error::NoImage("crop"))?;
        let inside = buffers.pop().ok_or(Error::NoImage("crop"))?;

        let cropped = composite(&inside, &outside, &region, &extent);
        Ok(imaging::encode_png(&cropped)?.with_force_skip_cache(force_skip_cache))
    }

    fn name(&self) -> &str {
        "crop"
    }
}
