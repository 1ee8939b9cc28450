use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::ProviderAdapter;
use crate::error::{GatewayError, Result};

/// Adapters by provider id
#[derive(Default)]
pub struct ProviderRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn ProviderAdapter>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.ids())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own id, replacing any previous one
    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) {
        let id = adapter.id().to_string();
        info!(provider = %id, "📡 Provider adapter registered");
        self.adapters.write().insert(id, adapter);
    }

    pub fn get(&self, provider: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters
            .read()
            .get(provider)
            .cloned()
            .ok_or_else(|| GatewayError::ProviderNotRegistered(provider.to_string()))
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.adapters.read().contains_key(provider)
    }

    /// Registered ids, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.adapters.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
