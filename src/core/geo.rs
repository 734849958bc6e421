use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

use super::constants::{MAX_LATITUDE, MAX_TILES_PER_QUERY, MAX_ZOOM};
use crate::{Error, Result};

/// Web Mercator projection constant
const EARTH_RADIUS: f64 = 6378137.0;

/// Shrink applied to bounds before enumerating tiles so a shared edge is not
/// counted on both sides.
const EDGE_EPSILON: f64 = 1e-9;

/// A single tile addressed by layer name and slippy-map coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRequest {
    pub layer_name: String,
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileRequest {
    pub fn new(layer_name: impl Into<String>, z: u32, x: u32, y: u32) -> Self {
        Self {
            layer_name: layer_name.into(),
            z,
            x,
            y,
        }
    }

    /// Same coordinates, different layer.
    pub fn with_layer(&self, layer_name: impl Into<String>) -> Self {
        Self::new(layer_name, self.z, self.x, self.y)
    }

    /// Checks that Z/X/Y address an existing tile
    pub fn validate(&self) -> Result<()> {
        if self.z > MAX_ZOOM {
            return Err(Error::Range {
                what: "z",
                value: self.z as u64,
                max: MAX_ZOOM as u64,
            });
        }

        let max_coord = (1u64 << self.z) - 1;
        if self.x as u64 > max_coord {
            return Err(Error::Range {
                what: "x",
                value: self.x as u64,
                max: max_coord,
            });
        }
        if self.y as u64 > max_coord {
            return Err(Error::Range {
                what: "y",
                value: self.y as u64,
                max: max_coord,
            });
        }

        Ok(())
    }

    /// Gets the geographic bounds of the tile in degrees
    pub fn bounds(&self) -> Result<Bounds> {
        self.validate()?;

        let n = 2_f64.powi(self.z as i32);
        let west = self.x as f64 / n * 360.0 - 180.0;
        let east = (self.x + 1) as f64 / n * 360.0 - 180.0;
        let north = tile_y_to_lat(self.y as f64, n);
        let south = tile_y_to_lat((self.y + 1) as f64, n);

        Ok(Bounds {
            south,
            north,
            west,
            east,
        })
    }
}

impl fmt::Display for TileRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.layer_name, self.z, self.x, self.y)
    }
}

fn tile_y_to_lat(y: f64, n: f64) -> f64 {
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

/// Represents a geographic bounding box in degrees.
///
/// The all-zero value is the "null island" sentinel meaning "no restriction".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl Bounds {
    pub fn new(south: f64, north: f64, west: f64, east: f64) -> Self {
        Self {
            south,
            north,
            west,
            east,
        }
    }

    /// The whole Web Mercator world
    pub fn world() -> Self {
        Self::new(-MAX_LATITUDE, MAX_LATITUDE, -180.0, 180.0)
    }

    /// True for the all-zero "no restriction" sentinel
    pub fn is_null_island(&self) -> bool {
        self.south == 0.0 && self.north == 0.0 && self.west == 0.0 && self.east == 0.0
    }

    /// Open-interval rectangle intersection
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.north > other.south
            && self.south < other.north
            && self.east > other.west
            && self.west < other.east
    }

    /// Checks if `other` lies entirely inside these bounds
    pub fn contains(&self, other: &Bounds) -> bool {
        other.south >= self.south
            && other.north <= self.north
            && other.west >= self.west
            && other.east <= self.east
    }

    /// Checks if the bounds contain a point
    pub fn contains_point(&self, lat: f64, lng: f64) -> bool {
        lat >= self.south && lat <= self.north && lng >= self.west && lng <= self.east
    }

    /// Returns the bounds shrunk by `amount` degrees on every side
    pub fn shrunk(&self, amount: f64) -> Bounds {
        Bounds::new(
            self.south + amount,
            self.north - amount,
            self.west + amount,
            self.east - amount,
        )
    }

    /// Projects the bounds to Web Mercator meters as (min, max) points
    pub fn to_mercator(&self) -> (Point, Point) {
        (
            LatLng::new(self.south, self.west).to_mercator(),
            LatLng::new(self.north, self.east).to_mercator(),
        )
    }

    /// Enumerates the tiles at `zoom` covering these bounds.
    ///
    /// Fails with `TooManyTiles` when the result would exceed
    /// [`MAX_TILES_PER_QUERY`] unless `force` is set.
    pub fn find_tiles(&self, layer_name: &str, zoom: u32, force: bool) -> Result<Vec<TileRequest>> {
        if zoom > MAX_ZOOM {
            return Err(Error::Range {
                what: "z",
                value: zoom as u64,
                max: MAX_ZOOM as u64,
            });
        }

        let n = 2_f64.powi(zoom as i32);
        let max_index = n as u64 - 1;

        let west = LatLng::wrap_lng(self.west);
        let east = LatLng::wrap_lng(self.east);
        let north = LatLng::clamp_lat(self.north);
        let south = LatLng::clamp_lat(self.south);

        let x_min = lng_to_tile_x(west.min(east), n).min(max_index);
        let mut x_max = lng_to_tile_x(west.max(east), n).min(max_index) + 1;
        let y_min = lat_to_tile_y(north.max(south), n).min(max_index);
        let mut y_max = lat_to_tile_y(north.min(south), n).min(max_index) + 1;

        if x_max <= x_min {
            x_max = x_min + 1;
        }
        if y_max <= y_min {
            y_max = y_min + 1;
        }

        let count = ((x_max - x_min) * (y_max - y_min)) as usize;
        if count > MAX_TILES_PER_QUERY && !force {
            return Err(Error::TooManyTiles(count));
        }

        let mut tiles = Vec::with_capacity(count);
        for x in x_min..x_max {
            for y in y_min..y_max {
                tiles.push(TileRequest::new(layer_name, zoom, x as u32, y as u32));
            }
        }
        Ok(tiles)
    }

    /// Same as [`find_tiles`](Self::find_tiles) after shrinking away shared edges
    pub fn find_tiles_inside(&self, layer_name: &str, zoom: u32, force: bool) -> Result<Vec<TileRequest>> {
        self.shrunk(EDGE_EPSILON).find_tiles(layer_name, zoom, force)
    }
}

fn lng_to_tile_x(lng: f64, n: f64) -> u64 {
    ((lng + 180.0) / 360.0 * n).floor().max(0.0) as u64
}

fn lat_to_tile_y(lat: f64, n: f64) -> u64 {
    let lat_rad = lat.to_radians();
    ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor().max(0.0) as u64
}

/// Represents a geographical coordinate with latitude and longitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    /// Creates a new LatLng coordinate
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Wraps longitude into [-180, 180] by repeated ±360 steps
    pub fn wrap_lng(mut lng: f64) -> f64 {
        while lng > 180.0 {
            lng -= 360.0;
        }
        while lng < -180.0 {
            lng += 360.0;
        }
        lng
    }

    /// Clamps latitude to the Mercator limit
    pub fn clamp_lat(lat: f64) -> f64 {
        lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
    }

    /// Converts to Web Mercator projection (EPSG:3857)
    pub fn to_mercator(&self) -> Point {
        let x = self.lng.to_radians() * EARTH_RADIUS;
        let lat = Self::clamp_lat(self.lat);
        let y = ((PI / 4.0 + lat.to_radians() / 2.0).tan().ln()) * EARTH_RADIUS;
        Point::new(x, y)
    }

    /// Creates LatLng from Web Mercator coordinates
    pub fn from_mercator(point: Point) -> Self {
        let lng = (point.x / EARTH_RADIUS).to_degrees();
        let lat = (2.0 * (point.y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
        Self::new(lat, lng)
    }
}

/// Represents a point in screen or projected coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Parses a zoom-range string such as `"1-5,7,10-12"` into a sorted list of
/// distinct zoom levels. Every level must be within `0..=MAX_ZOOM`.
pub fn parse_zoom_range(spec: &str) -> Result<Vec<u32>> {
    let mut levels = Vec::new();

    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((a, b)) => (parse_zoom(a)?, parse_zoom(b)?),
            None => {
                let z = parse_zoom(part)?;
                (z, z)
            }
        };

        if start > end {
            return Err(Error::Config(format!(
                "zoom range '{}' ends before it starts",
                part
            )));
        }
        levels.extend(start..=end);
    }

    levels.sort_unstable();
    levels.dedup();
    Ok(levels)
}

fn parse_zoom(text: &str) -> Result<u32> {
    let z: u32 = text
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid zoom level '{}'", text.trim())))?;
    if z > MAX_ZOOM {
        return Err(Error::Range {
            what: "z",
            value: z as u64,
            max: MAX_ZOOM as u64,
        });
    }
    Ok(z)
}
