use async_trait::async_trait;
use lru::LruCache;
use serde::Deserialize;
use std::num::NonZeroUsize;

use crate::core::{geo::TileRequest, image::Image};
use crate::prelude::{Arc, Duration, Instant};
use crate::traits::Cache;
use crate::Result;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(capacity) => capacity,
    None => panic!("zero capacity"),
};

/// Configuration for [`MemoryCache`]
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryCacheConfig {
    /// Maximum number of tiles kept
    pub max_size: usize,
    /// Seconds an entry stays valid; 0 keeps entries until evicted
    pub ttl: u64,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_CAPACITY.get(),
            ttl: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    image: Image,
    stored: Instant,
}

/// In-memory tile cache using LRU eviction
#[derive(Debug)]
pub struct MemoryCache {
    cache: Arc<std::sync::Mutex<LruCache<String, Entry>>>,
    ttl: Option<Duration>,
}

impl MemoryCache {
    /// Create a new tile cache with the given capacity
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            cache: Arc::new(std::sync::Mutex::new(LruCache::new(capacity))),
            ttl: None,
        }
    }

    pub fn from_config(config: &MemoryCacheConfig) -> Self {
        let mut cache = Self::new(config.max_size);
        if config.ttl > 0 {
            cache.ttl = Some(Duration::from_secs(config.ttl));
        }
        cache
    }

    /// Entries older than `ttl` are treated as misses
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn get(&self, key: &str) -> Option<Image> {
        let mut cache = self.cache.lock().ok()?;
        let entry = cache.get(key)?;

        if let Some(ttl) = self.ttl {
            if entry.stored.elapsed() > ttl {
                cache.pop(key);
                return None;
            }
        }
        Some(entry.image.clone())
    }

    fn put(&self, key: String, image: Image) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(
                key,
                Entry {
                    image,
                    stored: Instant::now(),
                },
            );
        }
    }

    /// Clear all tiles from the cache
    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Get the current number of cached tiles
    pub fn len(&self) -> usize {
        self.cache.lock().ok().map(|cache| cache.len()).unwrap_or(0)
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache capacity
    pub fn capacity(&self) -> usize {
        self.cache
            .lock()
            .ok()
            .map(|cache| cache.cap().get())
            .unwrap_or(0)
    }
}

impl Clone for MemoryCache {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            ttl: self.ttl,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY.get())
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn lookup(&self, request: &TileRequest) -> Result<Option<Image>> {
        Ok(self.get(&request.to_string()))
    }

    async fn save(&self, request: &TileRequest, image: &Image) -> Result<()> {
        self.put(request.to_string(), image.clone());
        Ok(())
    }
}
