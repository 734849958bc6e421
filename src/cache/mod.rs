//! Tile caches
//!
//! Every cache implements [`Cache`](crate::traits::Cache). Layers consult
//! their cache before rendering and save fresh renders afterwards; cache
//! failures are logged and never fail a request.

pub mod disk;
pub mod memory;
pub mod multi;
pub mod none;
pub mod registry;

pub use disk::DiskCache;
pub use memory::MemoryCache;
pub use multi::MultiTierCache;
pub use none::NoopCache;
pub use registry::CacheRegistry;
