//! Prelude module for common tilegate types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use tilegate::prelude::*;`

pub use crate::core::{
    config::{ClientConfig, Config, ErrorMessages, LayerConfig},
    context::{ProviderContext, RequestContext, RequestInfo},
    geo::{parse_zoom_range, Bounds, LatLng, Point, TileRequest},
    image::Image,
    pattern::{ParamValidator, Pattern, Segment},
};

pub use crate::traits::{Authentication, Cache, Provider};

pub use crate::cache::{CacheRegistry, DiskCache, MemoryCache, MultiTierCache, NoopCache};

pub use crate::providers::{
    custom::CustomScript, registry::ProviderRegistry, transform::PixelFunction,
};

pub use crate::layers::{group::LayerGroup, layer::Layer};

pub use crate::auth::{AuthRegistry, NoAuthentication, StaticKeyAuthentication};

pub use crate::{Error as TileError, ErrorKind, Result};

pub use std::{
    sync::Arc,
    time::{Duration, Instant},
};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet, FxHasher};
