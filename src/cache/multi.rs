use async_trait::async_trait;

use crate::core::{geo::TileRequest, image::Image};
use crate::prelude::Arc;
use crate::traits::Cache;
use crate::{Error, Result};

/// Queries and writes an ordered list of caches as one.
///
/// Lookups stop at the first tier with a hit; saves go to every tier. Tier
/// errors never stop the walk, they are joined and returned with the result.
pub struct MultiTierCache {
    tiers: Vec<Arc<dyn Cache>>,
}

impl MultiTierCache {
    pub fn new(tiers: Vec<Arc<dyn Cache>>) -> Self {
        Self { tiers }
    }

    pub fn tiers(&self) -> &[Arc<dyn Cache>] {
        &self.tiers
    }
}

#[async_trait]
impl Cache for MultiTierCache {
    async fn lookup(&self, request: &TileRequest) -> Result<Option<Image>> {
        let mut errors = Vec::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            match tier.lookup(request).await {
                Ok(Some(image)) => {
                    log::debug!("cache tier {} hit for {}", index, request);
                    // Errors from earlier tiers are non-fatal next to a hit
                    for error in errors {
                        log::warn!("cache tier lookup failed for {}: {}", request, error);
                    }
                    return Ok(Some(image));
                }
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        match Error::join(errors) {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }

    async fn save(&self, request: &TileRequest, image: &Image) -> Result<()> {
        let mut errors = Vec::new();

        for tier in &self.tiers {
            if let Err(e) = tier.save(request, image).await {
                errors.push(e);
            }
        }

        match Error::join(errors) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
