//! The contracts the pipeline is assembled from
//!
//! Providers produce tiles, caches store them and authentication checks
//! decide whether an inbound request may reach a layer at all.

use async_trait::async_trait;

use crate::{
    core::{
        context::{ProviderContext, RequestContext, RequestInfo},
        geo::TileRequest,
        image::Image,
    },
    Result,
};

/// A pluggable unit capable of producing tile bytes.
///
/// Providers are immutable once constructed and may be called concurrently.
/// Any state that must survive between calls (tokens, expirations) lives in
/// the [`ProviderContext`] the owning layer passes in.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Authenticates against the upstream source, returning the new context.
    ///
    /// Providers without an authentication concept return a context with
    /// `auth_bypass` set, after which they are never asked again.
    async fn pre_auth(
        &self,
        ctx: &RequestContext,
        provider_context: ProviderContext,
    ) -> Result<ProviderContext>;

    /// Produces the tile for `request`.
    ///
    /// Fails with [`Error::ProviderAuth`](crate::Error::ProviderAuth) when the
    /// credentials in `provider_context` were rejected.
    async fn generate_tile(
        &self,
        ctx: &RequestContext,
        provider_context: &ProviderContext,
        request: &TileRequest,
    ) -> Result<Image>;

    /// Plugin name, for logging
    fn name(&self) -> &str;
}

/// Tile storage keyed by the request's `layer/z/x/y` form
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns `Ok(None)` on a miss
    async fn lookup(&self, request: &TileRequest) -> Result<Option<Image>>;

    /// Stores `image`; the last save for a key wins
    async fn save(&self, request: &TileRequest, image: &Image) -> Result<()>;
}

/// Verifies inbound requests before they are routed to a layer
pub trait Authentication: Send + Sync {
    /// True if the request may proceed
    fn check_authentication(&self, info: &RequestInfo) -> bool;

    /// Narrows what an authenticated request may access
    fn authorize(&self, _info: &RequestInfo, _ctx: &mut RequestContext) {}
}
