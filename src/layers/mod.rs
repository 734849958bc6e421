//! Layers bind a provider tree to a cache and a name pattern; a
//! [`LayerGroup`] routes incoming layer names to them.

pub mod group;
pub mod layer;

pub use group::{LayerGroup, LayerGroupHandle};
pub use layer::Layer;
