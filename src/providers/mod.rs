//! Tile providers
//!
//! Leaf providers fetch or produce bytes (proxy, static, cgi, custom, ref);
//! composite providers own child providers built recursively by the
//! [`ProviderRegistry`] and combine their output.

pub mod blend;
pub mod cgi;
pub mod composite;
pub mod crop;
pub mod custom;
pub mod effect;
pub mod fallback;
pub(crate) mod fanout;
pub mod http;
pub mod instrumented;
pub mod proxy;
pub mod reference;
pub mod registry;
pub mod static_image;
pub mod template;
pub mod transform;

pub use instrumented::InstrumentedProvider;
pub use registry::{BuildContext, ProviderFactory, ProviderRegistry};
