use async_trait::async_trait;

use crate::core::{geo::TileRequest, image::Image};
use crate::traits::Cache;
use crate::Result;

/// Cache that never hits and discards every save
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl Cache for NoopCache {
    async fn lookup(&self, _request: &TileRequest) -> Result<Option<Image>> {
        Ok(None)
    }

    async fn save(&self, _request: &TileRequest, _image: &Image) -> Result<()> {
        Ok(())
    }
}
