use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::{geo::TileRequest, image::Image};
use crate::traits::Cache;
use crate::{Error, Result};

/// Suffix of the sidecar file holding an entry's content type
const CONTENT_TYPE_SUFFIX: &str = ".type";

/// Configuration for [`DiskCache`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskCacheConfig {
    pub path: PathBuf,
}

/// Stores each tile as a file under `root/layer/z/x/y`
#[derive(Debug, Clone)]
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tile_path(&self, request: &TileRequest) -> Result<PathBuf> {
        // Layer names come from the request; keep them from escaping the root
        if request.layer_name.is_empty()
            || request.layer_name.contains(['/', '\\'])
            || request.layer_name == ".."
        {
            return Err(Error::Provider(format!(
                "layer name '{}' cannot be stored on disk",
                request.layer_name
            )));
        }

        Ok(self
            .root
            .join(&request.layer_name)
            .join(request.z.to_string())
            .join(request.x.to_string())
            .join(request.y.to_string()))
    }
}

fn sidecar(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(CONTENT_TYPE_SUFFIX);
    PathBuf::from(name)
}

#[async_trait]
impl Cache for DiskCache {
    async fn lookup(&self, request: &TileRequest) -> Result<Option<Image>> {
        let path = self.tile_path(request)?;

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let content_type = match tokio::fs::read_to_string(sidecar(&path)).await {
            Ok(content_type) => content_type.trim().to_string(),
            Err(e) if e.kind() == ErrorKind::NotFound => "application/octet-stream".to_string(),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(Image::new(content, content_type)))
    }

    async fn save(&self, request: &TileRequest, image: &Image) -> Result<()> {
        let path = self.tile_path(request)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, image.bytes()).await?;
        tokio::fs::write(sidecar(&path), image.content_type.as_bytes()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let request = TileRequest::new("osm", 4, 3, 2);

        assert!(cache.lookup(&request).await.unwrap().is_none());

        let image = Image::new(vec![9, 8, 7], "image/jpeg");
        cache.save(&request, &image).await.unwrap();

        assert!(dir.path().join("osm/4/3/2").exists());
        let hit = cache.lookup(&request).await.unwrap().unwrap();
        assert_eq!(hit, image);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(dir.path());
        let request = TileRequest::new("../etc", 0, 0, 0);
        assert!(cache.lookup(&request).await.is_err());
    }
}
