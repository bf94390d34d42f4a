//! Repository interface for persisted chains
//!
//! A chain is the logical layout written for one graph: one group per node
//! path, each parameter group holding a value series indexed by record
//! number plus the parameter's metadata. How chains reach disk is up to the
//! [`ChainStore`] implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::node::NodeKind;
use super::param::{Metadata, ParamState};
use super::valid::ValidRange;
use crate::error::{GraphError, GraphResult};
use crate::types::{NumericValue, Shape};

/// A persisted value: shape plus row-major elements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    /// Shape of the value
    pub shape: Shape,
    /// Row-major elements
    pub data: Vec<f64>,
}

impl StoredValue {
    /// Capture a backend value
    pub fn capture<V: NumericValue>(value: &V) -> Self {
        Self {
            shape: value.shape(),
            data: value.to_elements(),
        }
    }

    /// Rebuild a backend value
    pub fn restore<V: NumericValue>(&self) -> Option<V> {
        V::from_elements(self.data.clone(), &self.shape)
    }
}

/// One node's group inside a chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainGroup {
    /// Kind of the node at this path
    pub kind: NodeKind,
    /// State of the parameter when the group was last written
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ParamState>,
    /// Shape established by the first stored value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Shape>,
    /// Value per record; `None` where the node had no value
    #[serde(default)]
    pub series: Vec<Option<StoredValue>>,
    /// Metadata attached to the parameter
    #[serde(default)]
    pub metadata: Metadata,
    /// Unit the parameter is expressed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    /// Valid range of the parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<ValidRange>,
}

/// Persisted state history of one graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    /// Whether further records may be appended
    pub appendable: bool,
    /// Number of records
    pub records: usize,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Time of the last write
    pub updated_at: DateTime<Utc>,
    /// Groups keyed by node path
    pub groups: BTreeMap<String, ChainGroup>,
}

impl Chain {
    /// Create an empty chain
    pub fn new(appendable: bool) -> Self {
        let now = Utc::now();
        Self {
            appendable,
            records: 0,
            created_at: now,
            updated_at: now,
            groups: BTreeMap::new(),
        }
    }

    /// Node paths and kinds making up the chain's structure
    pub fn structure(&self) -> Vec<(&str, NodeKind)> {
        self.groups
            .iter()
            .map(|(path, group)| (path.as_str(), group.kind))
            .collect()
    }
}

/// Repository for persisted chains
#[async_trait]
pub trait ChainStore: Send + Sync {
    /// Load the chain stored under `key`
    async fn load_chain(&self, key: &str) -> GraphResult<Option<Chain>>;

    /// Store `chain` under `key`, replacing any previous chain
    async fn store_chain(&self, key: &str, chain: &Chain) -> GraphResult<()>;

    /// Delete the chain stored under `key`; returns whether it existed
    async fn delete_chain(&self, key: &str) -> GraphResult<bool>;

    /// Keys of all stored chains
    async fn list_chains(&self) -> GraphResult<Vec<String>>;

    /// Load the chain under `key`, failing when it does not exist
    async fn require_chain(&self, key: &str) -> GraphResult<Chain> {
        self.load_chain(key)
            .await?
            .ok_or_else(|| GraphError::NotFound(format!("chain '{}'", key)))
    }
}
