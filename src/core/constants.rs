//! Core constants derived from slippy-map conventions and gateway defaults.
//! Keeping them in a single place makes it easier to tweak engine-wide magic numbers.

/// Default square tile size in pixels.
pub const TILE_SIZE: u32 = 256;

/// Highest zoom level a tile request may address.
pub const MAX_ZOOM: u32 = 21;

/// Latitude limit of the Web Mercator projection, in degrees.
pub const MAX_LATITUDE: f64 = 85.0511;

/// Upper bound on the number of tiles `Bounds::find_tiles` returns unless forced.
pub const MAX_TILES_PER_QUERY: usize = 10_000;

/// Minimum and maximum number of children a blend may combine.
pub const MIN_BLEND_CHILDREN: usize = 2;
pub const MAX_BLEND_CHILDREN: usize = 100;

/// Content type used for every image the gateway re-encodes itself.
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Content type of Mapbox vector tiles.
pub const MVT_CONTENT_TYPE: &str = "application/vnd.mapbox-vector-tile";

/// Default `User-Agent` header sent to upstream tile servers.
pub const DEFAULT_USER_AGENT: &str = "tilegate/0.1";
