//! In-memory implementation of the ChainStore interface
//!
//! Chains are kept as serialized JSON documents, so every load hands out an
//! independent copy and a chain that cannot round-trip through JSON is
//! rejected when stored rather than when read.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use caskade_core::{Chain, ChainStore, GraphError, GraphResult};

/// In-memory implementation of ChainStore
#[derive(Clone)]
pub struct InMemoryChainStore {
    /// Map of chain key -> serialized chain
    chains: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryChainStore {
    /// Create a new empty in-memory chain store
    pub fn new() -> Self {
        info!("Creating new InMemoryChainStore");
        Self {
            chains: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored chains
    pub async fn len(&self) -> usize {
        self.chains.read().await.len()
    }

    /// Whether no chain is stored
    pub async fn is_empty(&self) -> bool {
        self.chains.read().await.is_empty()
    }

    /// Remove every stored chain
    pub async fn clear(&self) {
        self.chains.write().await.clear();
    }
}

impl Default for InMemoryChainStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainStore for InMemoryChainStore {
    async fn load_chain(&self, key: &str) -> GraphResult<Option<Chain>> {
        let chains = self.chains.read().await;
        match chains.get(key) {
            Some(bytes) => {
                let chain = serde_json::from_slice(bytes).map_err(|e| {
                    GraphError::StateStore(format!("Failed to decode chain '{}': {}", key, e))
                })?;
                Ok(Some(chain))
            }
            None => Ok(None),
        }
    }

    async fn store_chain(&self, key: &str, chain: &Chain) -> GraphResult<()> {
        let bytes = serde_json::to_vec(chain)?;
        let size = bytes.len();
        self.chains.write().await.insert(key.to_string(), bytes);
        debug!("Stored chain key={}, records={}, bytes={}", key, chain.records, size);
        Ok(())
    }

    async fn delete_chain(&self, key: &str) -> GraphResult<bool> {
        let removed = self.chains.write().await.remove(key).is_some();
        if removed {
            debug!("Deleted chain key={}", key);
        }
        Ok(removed)
    }

    async fn list_chains(&self) -> GraphResult<Vec<String>> {
        let chains = self.chains.read().await;
        let mut keys: Vec<String> = chains.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
