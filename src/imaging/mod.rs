//! Raster helpers shared by the image-combining providers
//!
//! Tiles travel through the pipeline as encoded bytes; providers that need
//! pixels decode with [`decode`], work on [`RgbaImage`] buffers and re-encode
//! with [`encode_png`].

pub mod blend_modes;
pub mod filters;

use image::{imageops::FilterType, ImageOutputFormat, Rgba, RgbaImage};
use std::io::Cursor;

use crate::core::image::Image;
use crate::{Error, Result};

pub use blend_modes::BlendMode;
pub use filters::Filter;

/// Decodes tile bytes into an RGBA buffer
pub fn decode(image: &Image) -> Result<RgbaImage> {
    if image.is_empty() {
        return Err(Error::Provider("cannot decode an empty tile".into()));
    }
    Ok(image::load_from_memory(image.bytes())?.to_rgba8())
}

/// Encodes an RGBA buffer as a PNG tile
pub fn encode_png(buffer: &RgbaImage) -> Result<Image> {
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(buffer.clone()).write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(Image::png(out.into_inner()))
}

/// Resizes with nearest-neighbour sampling; returns the buffer untouched if it
/// already has the requested dimensions
pub fn resize_to(buffer: RgbaImage, width: u32, height: u32) -> RgbaImage {
    if buffer.dimensions() == (width, height) {
        return buffer;
    }
    image::imageops::resize(&buffer, width, height, FilterType::Nearest)
}

/// Resizes every buffer to the dimensions of the largest one
pub fn match_sizes(buffers: Vec<RgbaImage>) -> Vec<RgbaImage> {
    let (width, height) = buffers
        .iter()
        .map(|b| b.dimensions())
        .max_by_key(|(w, h)| u64::from(*w) * u64::from(*h))
        .unwrap_or((0, 0));

    buffers
        .into_iter()
        .map(|b| resize_to(b, width, height))
        .collect()
}

/// A square buffer filled with one color
pub fn solid(color: Rgba<u8>, size: u32) -> RgbaImage {
    RgbaImage::from_pixel(size, size, color)
}

/// Parses `RGB`, `RGBA`, `RRGGBB` or `RRGGBBAA`, with or without a leading `#`
pub fn parse_hex_color(value: &str) -> Result<Rgba<u8>> {
    let hex = value.trim().trim_start_matches('#');
    let invalid = || Error::Config(format!("invalid color '{}'", value));

    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let expanded: String = match hex.len() {
        3 | 4 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 | 8 => hex.to_string(),
        _ => return Err(invalid()),
    };

    let channel = |i: usize| u8::from_str_radix(&expanded[i..i + 2], 16).map_err(|_| invalid());
    let alpha = if expanded.len() == 8 { channel(6)? } else { 255 };
    Ok(Rgba([channel(0)?, channel(2)?, channel(4)?, alpha]))
}
