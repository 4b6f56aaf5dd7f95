//! In-memory payload store.

use std::collections::HashMap;

use kiln_intake::{ResolveError, ResourceResolver};
use kiln_protocol::StorageUri;

/// Resolver backed by a `uri -> bytes` map; unknown URIs are not found.
#[derive(Default, Clone)]
pub struct InMemoryResolver {
    objects: HashMap<String, Vec<u8>>,
}

impl InMemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(mut self, uri: &str, bytes: &[u8]) -> Self {
        self.objects.insert(uri.to_string(), bytes.to_vec());
        self
    }
}

impl ResourceResolver for InMemoryResolver {
    async fn resolve(&self, uri: &StorageUri) -> Result<Vec<u8>, ResolveError> {
        self.objects
            .get(&uri.to_string())
            .cloned()
            .ok_or_else(|| ResolveError::NotFound(uri.clone()))
    }
}
