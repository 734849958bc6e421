use image::{imageops, Rgba, RgbaImage};
use std::ops::RangeInclusive;

/// Largest window radius the neighbourhood filters accept
pub const MAX_RADIUS: u32 = 32;

const EMBOSS: [f32; 9] = [-2.0, -1.0, 0.0, -1.0, 1.0, 1.0, 0.0, 1.0, 2.0];
const SHARPEN: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];
const EDGES: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 8.0, -1.0, -1.0, -1.0, -1.0];
const SOBEL_X: [f32; 9] = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
const SOBEL_Y: [f32; 9] = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];

/// Whole-image filters applied by the effect provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Blur,
    Gaussian,
    Brightness,
    Contrast,
    Gamma,
    Hue,
    Saturation,
    Dilate,
    Erode,
    Median,
    Threshold,
    Emboss,
    Grayscale,
    Invert,
    Sepia,
    Sharpen,
    Sobel,
    EdgeDetection,
}

const FILTERS: &[(&str, Filter)] = &[
    ("blur", Filter::Blur),
    ("gaussian", Filter::Gaussian),
    ("brightness", Filter::Brightness),
    ("contrast", Filter::Contrast),
    ("gamma", Filter::Gamma),
    ("hue", Filter::Hue),
    ("saturation", Filter::Saturation),
    ("dilate", Filter::Dilate),
    ("erode", Filter::Erode),
    ("median", Filter::Median),
    ("threshold", Filter::Threshold),
    ("emboss", Filter::Emboss),
    ("grayscale", Filter::Grayscale),
    ("invert", Filter::Invert),
    ("sepia", Filter::Sepia),
    ("sharpen", Filter::Sharpen),
    ("sobel", Filter::Sobel),
    ("edge-detection", Filter::EdgeDetection),
];

impl Filter {
    pub fn names() -> Vec<String> {
        FILTERS.iter().map(|(name, _)| name.to_string()).collect()
    }

    pub fn parse(name: &str) -> Option<Self> {
        FILTERS
            .iter()
            .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
            .map(|(_, filter)| *filter)
    }

    /// True for filters parameterised by an intensity
    pub fn takes_intensity(self) -> bool {
        self.intensity_range().is_some()
    }

    /// Accepted intensities, `None` for filters that take none
    pub fn intensity_range(self) -> Option<RangeInclusive<f64>> {
        let radius = 0.0..=f64::from(MAX_RADIUS);
        match self {
            Self::Blur | Self::Gaussian | Self::Dilate | Self::Erode | Self::Median => Some(radius),
            Self::Brightness | Self::Contrast | Self::Saturation => Some(-1.0..=1.0),
            Self::Gamma => Some(0.0..=10.0),
            Self::Hue => Some(-360.0..=360.0),
            Self::Threshold => Some(0.0..=255.0),
            _ => None,
        }
    }

    /// Applies the filter. `intensity` is ignored by filters that take none.
    ///
    /// Blur, dilate, erode and median read it as a radius in pixels, gaussian
    /// as sigma, hue as degrees, gamma as the gamma value, threshold as a
    /// luminance level in `0..=255` and the remaining ones as a relative
    /// change in `-1..=1`.
    pub fn apply(self, buffer: &RgbaImage, intensity: f64) -> RgbaImage {
        match self {
            Self::Blur => neighbourhood(buffer, radius(intensity), mean),
            Self::Gaussian => imageops::blur(buffer, intensity.clamp(0.0, f64::from(MAX_RADIUS)) as f32),
            Self::Brightness => map_channels(buffer, |c| c * (1.0 + intensity)),
            Self::Contrast => map_channels(buffer, |c| (c - 0.5) * (1.0 + intensity) + 0.5),
            Self::Gamma => {
                let exponent = if intensity > 0.0 { 1.0 / intensity } else { 1.0 };
                map_channels(buffer, |c| c.powf(exponent))
            }
            Self::Hue => imageops::huerotate(buffer, intensity.round() as i32),
            Self::Saturation => map_pixels(buffer, |[r, g, b]| {
                let lum = luminance(r, g, b);
                let scale = 1.0 + intensity;
                [
                    lum + (r - lum) * scale,
                    lum + (g - lum) * scale,
                    lum + (b - lum) * scale,
                ]
            }),
            Self::Dilate => neighbourhood(buffer, radius(intensity), |v| {
                v.iter().copied().max().unwrap_or(0)
            }),
            Self::Erode => neighbourhood(buffer, radius(intensity), |v| {
                v.iter().copied().min().unwrap_or(0)
            }),
            Self::Median => neighbourhood(buffer, radius(intensity), median),
            Self::Threshold => {
                let level = intensity.clamp(0.0, 255.0) / 255.0;
                map_pixels(buffer, |[r, g, b]| {
                    let v = if luminance(r, g, b) >= level { 1.0 } else { 0.0 };
                    [v, v, v]
                })
            }
            Self::Emboss => filter3x3(buffer, &EMBOSS),
            Self::Grayscale => map_pixels(buffer, |[r, g, b]| {
                let lum = luminance(r, g, b);
                [lum, lum, lum]
            }),
            Self::Invert => map_channels(buffer, |c| 1.0 - c),
            Self::Sepia => map_pixels(buffer, |[r, g, b]| {
                [
                    0.393 * r + 0.769 * g + 0.189 * b,
                    0.349 * r + 0.686 * g + 0.168 * b,
                    0.272 * r + 0.534 * g + 0.131 * b,
                ]
            }),
            Self::Sharpen => filter3x3(buffer, &SHARPEN),
            Self::Sobel => sobel(buffer),
            Self::EdgeDetection => filter3x3(buffer, &EDGES),
        }
    }
}

fn radius(intensity: f64) -> u32 {
    intensity.round().clamp(0.0, f64::from(MAX_RADIUS)) as u32
}

fn luminance(r: f64, g: f64, b: f64) -> f64 {
    0.299 * r + 0.587 * g + 0.114 * b
}

fn to_byte(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Maps the colour channels of every pixel, leaving alpha alone
fn map_pixels<F>(buffer: &RgbaImage, f: F) -> RgbaImage
where
    F: Fn([f64; 3]) -> [f64; 3],
{
    let mut out = buffer.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let [r, g, b] = f([r, g, b].map(|c| f64::from(c) / 255.0));
        *pixel = Rgba([to_byte(r), to_byte(g), to_byte(b), a]);
    }
    out
}

fn map_channels<F>(buffer: &RgbaImage, f: F) -> RgbaImage
where
    F: Fn(f64) -> f64,
{
    map_pixels(buffer, |rgb| rgb.map(&f))
}

fn mean(values: &mut [u8]) -> u8 {
    let sum: u32 = values.iter().map(|&v| u32::from(v)).sum();
    (sum as f64 / values.len().max(1) as f64).round() as u8
}

fn median(values: &mut [u8]) -> u8 {
    values.sort_unstable();
    values.get(values.len() / 2).copied().unwrap_or(0)
}

/// Reduces the square window of `radius` around each pixel, per colour channel
fn neighbourhood<F>(buffer: &RgbaImage, radius: u32, reduce: F) -> RgbaImage
where
    F: Fn(&mut [u8]) -> u8,
{
    if radius == 0 {
        return buffer.clone();
    }

    let (width, height) = buffer.dimensions();
    let radius = radius as i64;
    let mut out = buffer.clone();
    let mut window = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);

    for (x, y, pixel) in out.enumerate_pixels_mut() {
        for channel in 0..3 {
            window.clear();
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let sx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                    let sy = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                    window.push(buffer.get_pixel(sx, sy).0[channel]);
                }
            }
            pixel.0[channel] = reduce(&mut window);
        }
    }
    out
}

/// Runs a 3x3 kernel over the colour channels.
///
/// Edges are replicated so border pixels see a full window, and alpha is
/// taken from the source.
fn filter3x3(buffer: &RgbaImage, kernel: &[f32; 9]) -> RgbaImage {
    let (width, height) = buffer.dimensions();
    if width == 0 || height == 0 {
        return buffer.clone();
    }

    let padded = RgbaImage::from_fn(width + 2, height + 2, |x, y| {
        *buffer.get_pixel(x.saturating_sub(1).min(width - 1), y.saturating_sub(1).min(height - 1))
    });
    let filtered = imageops::filter3x3(&padded, kernel);

    RgbaImage::from_fn(width, height, |x, y| {
        let [r, g, b, _] = filtered.get_pixel(x + 1, y + 1).0;
        Rgba([r, g, b, buffer.get_pixel(x, y).0[3]])
    })
}

/// Gradient magnitude of the luminance
fn sobel(buffer: &RgbaImage) -> RgbaImage {
    let gray = Filter::Grayscale.apply(buffer, 0.0);

    // filter3x3 clamps at zero, so each gradient is taken in both directions
    let gradient = |kernel: [f32; 9]| {
        let forward = filter3x3(&gray, &kernel);
        let backward = filter3x3(&gray, &kernel.map(|w| -w));
        move |x: u32, y: u32| {
            let value = forward.get_pixel(x, y).0[0].max(backward.get_pixel(x, y).0[0]);
            f64::from(value) / 255.0
        }
    };
    let dx = gradient(SOBEL_X);
    let dy = gradient(SOBEL_Y);

    let mut out = gray;
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let magnitude = to_byte(dx(x, y).hypot(dy(x, y)));
        pixel.0[0] = magnitude;
        pixel.0[1] = magnitude;
        pixel.0[2] = magnitude;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker() -> RgbaImage {
        RgbaImage::from_fn(4, 4, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        })
    }

    #[test]
    fn test_intensity_classification() {
        assert!(Filter::Blur.takes_intensity());
        assert!(Filter::Threshold.takes_intensity());
        assert!(!Filter::Invert.takes_intensity());
        assert!(!Filter::EdgeDetection.takes_intensity());
        assert_eq!(Filter::parse("Edge-Detection"), Some(Filter::EdgeDetection));
        assert_eq!(Filter::names().len(), 18);
    }

    #[test]
    fn test_invert_keeps_alpha() {
        let buffer = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 100, 77]));
        let out = Filter::Invert.apply(&buffer, 0.0);
        assert_eq!(*out.get_pixel(1, 1), Rgba([0, 255, 155, 77]));
    }

    #[test]
    fn test_grayscale_is_gray() {
        let out = Filter::Grayscale.apply(&RgbaImage::from_pixel(1, 1, Rgba([200, 10, 50, 255])), 0.0);
        let [r, g, b, _] = out.get_pixel(0, 0).0;
        assert!(r == g && g == b);
    }

    #[test]
    fn test_dilate_and_erode() {
        let dilated = Filter::Dilate.apply(&checker(), 1.0);
        assert!(dilated.pixels().all(|p| p.0[0] == 255));
        let eroded = Filter::Erode.apply(&checker(), 1.0);
        assert!(eroded.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_threshold() {
        let buffer = RgbaImage::from_fn(2, 1, |x, _| {
            let v = if x == 0 { 100 } else { 200 };
            Rgba([v, v, v, 255])
        });
        let out = Filter::Threshold.apply(&buffer, 128.0);
        assert_eq!(out.get_pixel(0, 0).0[0], 0);
        assert_eq!(out.get_pixel(1, 0).0[0], 255);
    }

    #[test]
    fn test_intensity_ranges() {
        assert_eq!(Filter::Blur.intensity_range(), Some(0.0..=32.0));
        assert!(!Filter::Median.intensity_range().unwrap().contains(&1e12));
        assert!(Filter::Hue.intensity_range().unwrap().contains(&-90.0));
        assert_eq!(Filter::Sobel.intensity_range(), None);
    }

    #[test]
    fn test_huge_radius_is_clamped() {
        let out = Filter::Blur.apply(&checker(), 1e12);
        assert_eq!(out.dimensions(), (4, 4));
    }

    #[test]
    fn test_sharpen_keeps_flat_image() {
        let flat = RgbaImage::from_pixel(3, 3, Rgba([90, 90, 90, 200]));
        assert_eq!(Filter::Sharpen.apply(&flat, 0.0), flat);
    }

    #[test]
    fn test_sobel_finds_vertical_edge() {
        let buffer = RgbaImage::from_fn(4, 3, |x, _| {
            if x < 2 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let out = Filter::Sobel.apply(&buffer, 0.0);
        assert_eq!(out.get_pixel(0, 1).0[0], 0);
        assert_eq!(out.get_pixel(1, 1).0[0], 255);
        assert_eq!(out.get_pixel(1, 1).0[3], 255);
    }

    #[test]
    fn test_flat_image_has_no_edges() {
        let flat = RgbaImage::from_pixel(3, 3, Rgba([90, 90, 90, 255]));
        let out = Filter::EdgeDetection.apply(&flat, 0.0);
        assert!(out.pixels().all(|p| p.0[0] == 0 && p.0[3] == 255));
    }
}
