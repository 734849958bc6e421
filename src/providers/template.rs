//! `{placeholder}` substitution for provider URL templates.
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{z}` `{x}` `{y}` | tile indices, any case |
//! | `{xmin}` `{xmax}` `{ymin}` `{ymax}` | tile bounds in degrees or Web Mercator meters |
//! | `{env.NAME}` | process environment |
//! | `{ctx.NAME}` | request facts: uri, path, query, proto, ip, method, host, elapsed or a header |
//! | `{layer.NAME}` | placeholder bound when the layer pattern matched |
//!
//! Unknown placeholders are left in place. Missing env, ctx and layer values
//! become empty strings.

use crate::core::{context::RequestContext, geo::TileRequest};
use crate::Result;

/// Spatial reference of the `{xmin..ymax}` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Srid {
    /// WGS84 degrees
    #[default]
    Wgs84,
    /// Web Mercator meters
    WebMercator,
}

impl Srid {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            4326 => Some(Self::Wgs84),
            3857 => Some(Self::WebMercator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateOptions {
    pub srid: Srid,
    /// Count rows from the bottom (TMS) instead of the top
    pub invert_y: bool,
}

/// Expands every placeholder in `template` for `request`
pub fn expand(
    template: &str,
    request: &TileRequest,
    ctx: &RequestContext,
    options: TemplateOptions,
) -> Result<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    let mut extent = None;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };

        let key = &after[..end];
        match resolve(key, request, ctx, options, &mut extent)? {
            Some(value) => out.push_str(&value),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

/// `[xmin, ymin, xmax, ymax]`
type Extent = [f64; 4];

fn resolve(
    key: &str,
    request: &TileRequest,
    ctx: &RequestContext,
    options: TemplateOptions,
    extent: &mut Option<Extent>,
) -> Result<Option<String>> {
    if let Some(name) = key.strip_prefix("env.") {
        return Ok(Some(std::env::var(name).unwrap_or_default()));
    }
    if let Some(name) = key.strip_prefix("ctx.") {
        return Ok(Some(ctx.info.value(name).unwrap_or_default()));
    }
    if let Some(name) = key.strip_prefix("layer.") {
        return Ok(Some(ctx.layer_binding(name).unwrap_or_default()));
    }

    let value = match key.to_ascii_lowercase().as_str() {
        "z" => request.z.to_string(),
        "x" => request.x.to_string(),
        "y" => {
            if options.invert_y {
                ((1u64 << request.z.min(63)) - 1).saturating_sub(u64::from(request.y)).to_string()
            } else {
                request.y.to_string()
            }
        }
        corner @ ("xmin" | "ymin" | "xmax" | "ymax") => {
            let extent = match *extent {
                Some(cached) => cached,
                None => {
                    let computed = tile_extent(request, options.srid)?;
                    *extent = Some(computed);
                    computed
                }
            };
            let index = match corner {
                "xmin" => 0,
                "ymin" => 1,
                "xmax" => 2,
                _ => 3,
            };
            extent[index].to_string()
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn tile_extent(request: &TileRequest, srid: Srid) -> Result<Extent> {
    let bounds = request.bounds()?;
    Ok(match srid {
        Srid::Wgs84 => [bounds.west, bounds.south, bounds.east, bounds.north],
        Srid::WebMercator => {
            let (min, max) = bounds.to_mercator();
            [min.x, min.y, max.x, max.y]
        }
    })
}
