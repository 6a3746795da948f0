//! Model Schema Resolver
//!
//! Maps a model identifier to its [`ModelDescriptor`]. Lookup order is the
//! configured model table, then the built-in catalog, then synthesis. The
//! resolver never fails: an unknown identifier degrades to a conservative
//! synthesized descriptor so new gateway models stay usable.

use super::{catalog, ModelDescriptor};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves and caches model descriptors for the process lifetime
#[derive(Debug)]
pub struct ModelResolver {
    /// Curated and configured descriptors, fixed at construction
    table: HashMap<String, ModelDescriptor>,

    /// Resolved descriptors keyed by identifier
    cache: DashMap<String, Arc<ModelDescriptor>>,
}

impl Default for ModelResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelResolver {
    /// Resolver backed by the built-in catalog
    pub fn new() -> Self {
        Self::with_models(Vec::new())
    }

    /// Resolver backed by the built-in catalog, with `models` taking
    /// precedence over catalog entries of the same identifier
    pub fn with_models(models: impl IntoIterator<Item = ModelDescriptor>) -> Self {
        let mut table: HashMap<String, ModelDescriptor> = catalog::builtin_models()
            .into_iter()
            .map(|descriptor| (descriptor.id.clone(), descriptor))
            .collect();

        for descriptor in models {
            if table.contains_key(&descriptor.id) {
                info!("Configured model '{}' overrides the built-in entry", descriptor.id);
            }
            table.insert(descriptor.id.clone(), descriptor);
        }

        Self {
            table,
            cache: DashMap::new(),
        }
    }

    /// Resolve `model_id` to a descriptor
    ///
    /// Surrounding whitespace is ignored, matching the endpoint the
    /// translator addresses.
    pub fn resolve(&self, model_id: &str) -> Arc<ModelDescriptor> {
        let model_id = model_id.trim();
        if let Some(cached) = self.cache.get(model_id) {
            return Arc::clone(cached.value());
        }

        // Two callers racing on the same key build identical descriptors, so
        // whichever insert wins is fine.
        let entry = self
            .cache
            .entry(model_id.to_string())
            .or_insert_with(|| Arc::new(self.lookup(model_id)));
        Arc::clone(entry.value())
    }

    /// Whether `model_id` has a curated or configured descriptor
    pub fn is_known(&self, model_id: &str) -> bool {
        self.table.contains_key(model_id.trim())
    }

    /// Replace the cached descriptor for its identifier
    ///
    /// Holders of the previous `Arc` keep seeing the old, unmodified value.
    pub fn replace(&self, descriptor: ModelDescriptor) -> Arc<ModelDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.cache
            .insert(descriptor.id.clone(), Arc::clone(&descriptor));
        descriptor
    }

    /// Number of resolved identifiers currently cached
    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn lookup(&self, model_id: &str) -> ModelDescriptor {
        match self.table.get(model_id) {
            Some(descriptor) => descriptor.clone(),
            None => {
                debug!(
                    "No descriptor for model '{}', synthesizing conservative defaults",
                    model_id
                );
                ModelDescriptor::synthesized(model_id)
            }
        }
    }
}
