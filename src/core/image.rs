use std::sync::Arc;

use super::constants::PNG_CONTENT_TYPE;

/// Tile bytes produced by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub content: Arc<Vec<u8>>,
    pub content_type: String,
    /// Set by any provider that does not want this result cached
    pub force_skip_cache: bool,
}

impl Image {
    pub fn new(content: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            content: Arc::new(content),
            content_type: content_type.into(),
            force_skip_cache: false,
        }
    }

    /// PNG bytes produced by the gateway itself
    pub fn png(content: Vec<u8>) -> Self {
        Self::new(content, PNG_CONTENT_TYPE)
    }

    pub fn with_force_skip_cache(mut self, skip: bool) -> Self {
        self.force_skip_cache = skip;
        self
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.content
    }
}
