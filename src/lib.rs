//! # tilegate
//!
//! A composable map-tile gateway.
//!
//! Incoming `(layer, z, x, y)` requests are routed to a configured [`Layer`]
//! by pattern matching, rendered by a tree of [`Provider`]s (proxies, static
//! images, blends, crops, fallbacks, ...) and optionally cached. Each layer
//! owns the authentication state of its provider tree and refreshes it on
//! expiry or when a provider reports an authentication failure.

pub mod auth;
pub mod cache;
pub mod core;
pub mod imaging;
pub mod layers;
pub mod prelude;
pub mod providers;
pub mod traits;
pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    config::{ClientConfig, Config, ErrorMessages, LayerConfig},
    context::{ProviderContext, RequestContext, RequestInfo},
    geo::{parse_zoom_range, Bounds, TileRequest},
    image::Image,
    pattern::{ParamValidator, Pattern},
};

pub use cache::{CacheRegistry, MemoryCache, MultiTierCache};
pub use layers::{Layer, LayerGroup};
pub use providers::ProviderRegistry;
pub use traits::{Authentication, Cache, Provider};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`], for callers translating failures
/// into responses without looking at messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Range,
    TooManyTiles,
    ProviderAuth,
    Unauthorized,
    NotFound,
    UpstreamResponse,
    Config,
    Timeout,
    Internal,
}

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{what} {value} is out of range (max {max})")]
    Range {
        what: &'static str,
        value: u64,
        max: u64,
    },

    #[error("too many tiles: {0} (limit {})", constants::MAX_TILES_PER_QUERY)]
    TooManyTiles(usize),

    #[error("provider authentication failed: {0}")]
    ProviderAuth(String),

    #[error("not authorized")]
    Unauthorized,

    #[error("no layer matches '{0}'")]
    LayerNotFound(String),

    #[error("invalid content length: {0}")]
    InvalidContentLength(u64),

    #[error("invalid content type: {0}")]
    InvalidContentType(String),

    #[error("remote server returned status {0}")]
    RemoteServer(u16),

    #[error("{}", format_joined(.0))]
    Joined(Vec<Error>),

    #[error("{0}")]
    InvalidEnum(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Script(#[from] anyhow::Error),

    #[error("tile rendering timed out")]
    Timeout,

    #[error("no image returned to {0}")]
    NoImage(&'static str),

    #[error("provider error: {0}")]
    Provider(String),
}

fn format_joined(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl Error {
    /// Combines errors into one, flattening nested joins.
    ///
    /// Returns `None` for an empty list and the error itself for a list of one.
    pub fn join(errors: impl IntoIterator<Item = Error>) -> Option<Error> {
        let mut flat = Vec::new();
        for error in errors {
            match error {
                Error::Joined(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }

        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Error::Joined(flat)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Range { .. } => ErrorKind::Range,
            Error::TooManyTiles(_) => ErrorKind::TooManyTiles,
            Error::ProviderAuth(_) => ErrorKind::ProviderAuth,
            Error::Unauthorized => ErrorKind::Unauthorized,
            Error::LayerNotFound(_) => ErrorKind::NotFound,
            Error::InvalidContentLength(_)
            | Error::InvalidContentType(_)
            | Error::RemoteServer(_) => ErrorKind::UpstreamResponse,
            Error::InvalidEnum(_) | Error::Config(_) => ErrorKind::Config,
            Error::Timeout => ErrorKind::Timeout,
            Error::Joined(errors) => {
                if errors.iter().any(Error::is_auth) {
                    ErrorKind::ProviderAuth
                } else {
                    ErrorKind::Internal
                }
            }
            _ => ErrorKind::Internal,
        }
    }

    /// True if this error, or any error joined into it, is a provider
    /// authentication failure
    pub fn is_auth(&self) -> bool {
        match self {
            Error::ProviderAuth(_) => true,
            Error::Joined(errors) => errors.iter().any(Error::is_auth),
            _ => false,
        }
    }
}

/// Error type alias for convenience
pub type TileError = Error;

/// Initializes `env_logger` from `RUST_LOG`; safe to call more than once.
#[cfg(feature = "debug")]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_flattens() {
        assert!(Error::join(Vec::new()).is_none());

        let single = Error::join(vec![Error::Timeout]).unwrap();
        assert!(matches!(single, Error::Timeout));

        let nested = Error::join(vec![
            Error::Joined(vec![Error::Timeout, Error::Unauthorized]),
            Error::RemoteServer(500),
        ])
        .unwrap();
        match nested {
            Error::Joined(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected joined error, got {other:?}"),
        }
    }

    #[test]
    fn test_auth_detection_through_joins() {
        let joined = Error::Joined(vec![
            Error::RemoteServer(500),
            Error::ProviderAuth("expired".into()),
        ]);
        assert!(joined.is_auth());
        assert_eq!(joined.kind(), ErrorKind::ProviderAuth);
        assert!(!Error::RemoteServer(401).is_auth());
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Error::InvalidContentType("text/html".into()).kind(), ErrorKind::UpstreamResponse);
        assert_eq!(Error::Unauthorized.kind(), ErrorKind::Unauthorized);
        assert_eq!(Error::TooManyTiles(20_000).kind(), ErrorKind::TooManyTiles);
    }
}
