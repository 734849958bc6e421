use image::{Rgba, RgbaImage};

/// How two layers of pixels are combined
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlendMode {
    Normal,
    Add,
    Subtract,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorBurn,
    ColorDodge,
    LinearBurn,
    LinearLight,
    Difference,
    Exclusion,
    Divide,
    SoftLight,
    /// Linear mix, weighted towards the top layer by the given factor in `0..=1`
    Opacity(f64),
}

const NAMES: &[&str] = &[
    "normal",
    "add",
    "subtract",
    "multiply",
    "screen",
    "overlay",
    "darken",
    "lighten",
    "color-burn",
    "color-dodge",
    "linear-burn",
    "linear-light",
    "difference",
    "exclusion",
    "divide",
    "soft-light",
    "opacity",
];

impl BlendMode {
    /// Every accepted mode name
    pub fn names() -> Vec<String> {
        NAMES.iter().map(|s| s.to_string()).collect()
    }

    /// Looks up a mode by name; `opacity` is only used by the `opacity` mode
    pub fn parse(name: &str, opacity: f64) -> Option<Self> {
        let mode = match name.to_ascii_lowercase().as_str() {
            "normal" => Self::Normal,
            "add" => Self::Add,
            "subtract" => Self::Subtract,
            "multiply" => Self::Multiply,
            "screen" => Self::Screen,
            "overlay" => Self::Overlay,
            "darken" => Self::Darken,
            "lighten" => Self::Lighten,
            "color-burn" => Self::ColorBurn,
            "color-dodge" => Self::ColorDodge,
            "linear-burn" => Self::LinearBurn,
            "linear-light" => Self::LinearLight,
            "difference" => Self::Difference,
            "exclusion" => Self::Exclusion,
            "divide" => Self::Divide,
            "soft-light" => Self::SoftLight,
            "opacity" => Self::Opacity(opacity.clamp(0.0, 1.0)),
            _ => return None,
        };
        Some(mode)
    }

    fn channel(self, bottom: f64, top: f64) -> f64 {
        match self {
            Self::Normal | Self::Opacity(_) => top,
            Self::Add => bottom + top,
            Self::Subtract => bottom - top,
            Self::Multiply => bottom * top,
            Self::Screen => 1.0 - (1.0 - bottom) * (1.0 - top),
            Self::Overlay => {
                if bottom < 0.5 {
                    2.0 * bottom * top
                } else {
                    1.0 - 2.0 * (1.0 - bottom) * (1.0 - top)
                }
            }
            Self::Darken => bottom.min(top),
            Self::Lighten => bottom.max(top),
            Self::ColorBurn => {
                if top == 0.0 {
                    0.0
                } else {
                    1.0 - (1.0 - bottom) / top
                }
            }
            Self::ColorDodge => {
                if top == 1.0 {
                    1.0
                } else {
                    bottom / (1.0 - top)
                }
            }
            Self::LinearBurn => bottom + top - 1.0,
            Self::LinearLight => {
                if top < 0.5 {
                    bottom + 2.0 * top - 1.0
                } else {
                    bottom + 2.0 * (top - 0.5)
                }
            }
            Self::Difference => (bottom - top).abs(),
            Self::Exclusion => bottom + top - 2.0 * bottom * top,
            Self::Divide => {
                if top == 0.0 {
                    1.0
                } else {
                    bottom / top
                }
            }
            Self::SoftLight => (1.0 - 2.0 * top) * bottom * bottom + 2.0 * bottom * top,
        }
        .clamp(0.0, 1.0)
    }

    /// Combines one pixel of `top` over `bottom`
    pub fn pixel(self, bottom: Rgba<u8>, top: Rgba<u8>) -> Rgba<u8> {
        let b = to_unit(bottom);
        let t = to_unit(top);

        if let Self::Opacity(factor) = self {
            let mix = |i: usize| t[i] * factor + b[i] * (1.0 - factor);
            return from_unit([mix(0), mix(1), mix(2), mix(3)]);
        }

        // The mode result carries the top layer's alpha and is composited over the bottom
        let alpha = t[3];
        let over = |i: usize| self.channel(b[i], t[i]) * alpha + b[i] * (1.0 - alpha);
        from_unit([over(0), over(1), over(2), (b[3] + alpha).min(1.0)])
    }

    /// Combines two equally sized buffers
    pub fn apply(self, bottom: &RgbaImage, top: &RgbaImage) -> RgbaImage {
        let mut out = bottom.clone();
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            if x < top.width() && y < top.height() {
                *pixel = self.pixel(*pixel, *top.get_pixel(x, y));
            }
        }
        out
    }
}

fn to_unit(pixel: Rgba<u8>) -> [f64; 4] {
    pixel.0.map(|c| f64::from(c) / 255.0)
}

fn from_unit(values: [f64; 4]) -> Rgba<u8> {
    Rgba(values.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
}

/// Folds buffers left to right, each one blended over the accumulated result
pub fn fold(mode: BlendMode, buffers: Vec<RgbaImage>) -> Option<RgbaImage> {
    let mut iter = buffers.into_iter();
    let first = iter.next()?;
    Some(iter.fold(first, |acc, next| mode.apply(&acc, &next)))
}
