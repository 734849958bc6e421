//! Shared plumbing for providers with several children.
//!
//! Each child keeps its own [`ProviderContext`] in the parent's `children`
//! map, keyed by child index, so children with independent credentials can
//! expire and refresh on their own schedule.

use futures::future::join_all;
use once_cell::sync::Lazy;

use crate::core::{
    context::{ProviderContext, RequestContext},
    geo::TileRequest,
    image::Image,
};
use crate::prelude::Arc;
use crate::traits::Provider;
use crate::{Error, Result};

static UNAUTHENTICATED: Lazy<ProviderContext> = Lazy::new(ProviderContext::default);

/// The stored context of child `index`
pub(crate) fn child_context(parent: &ProviderContext, index: usize) -> &ProviderContext {
    parent.children.get(&index).unwrap_or(&UNAUTHENTICATED)
}

/// Pre-authenticates every child that is not bypassed, concurrently.
///
/// The parent expires with its earliest-expiring child and becomes bypassed
/// once every child is.
pub(crate) async fn pre_auth_children(
    ctx: &RequestContext,
    children: &[Arc<dyn Provider>],
    parent: ProviderContext,
) -> Result<ProviderContext> {
    let refreshed = join_all(children.iter().enumerate().map(|(index, child)| {
        let current = child_context(&parent, index).clone();
        async move {
            if current.auth_bypass {
                Ok(current)
            } else {
                child.pre_auth(ctx, current).await
            }
        }
    }))
    .await;

    let mut next = ProviderContext {
        values: parent.values,
        ..ProviderContext::default()
    };
    let mut errors = Vec::new();

    for (index, result) in refreshed.into_iter().enumerate() {
        match result {
            Ok(child) => {
                next.children.insert(index, child);
            }
            Err(e) => errors.push(e),
        }
    }

    if let Some(error) = Error::join(errors) {
        return Err(error);
    }

    next.auth_bypass = next.children.values().all(|child| child.auth_bypass);
    next.auth_expiration = next
        .children
        .values()
        .filter(|child| !child.auth_bypass)
        .filter_map(|child| child.auth_expiration)
        .min();
    Ok(next)
}

/// Generates the tile from every child concurrently, results in child order
pub(crate) async fn generate_children(
    ctx: &RequestContext,
    children: &[Arc<dyn Provider>],
    parent: &ProviderContext,
    request: &TileRequest,
) -> Vec<Result<Image>> {
    join_all(
        children
            .iter()
            .enumerate()
            .map(|(index, child)| child.generate_tile(ctx, child_context(parent, index), request)),
    )
    .await
}

/// All images in order, or every failure joined
pub(crate) fn collect_images(results: Vec<Result<Image>>) -> Result<Vec<Image>> {
    let mut images = Vec::with_capacity(results.len());
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(image) => images.push(image),
            Err(e) => errors.push(e),
        }
    }

    match Error::join(errors) {
        Some(error) => Err(error),
        None => Ok(images),
    }
}
