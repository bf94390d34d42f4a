//! State persistence service
//!
//! Writes the values of every node reachable from a root module into a
//! [`Chain`] and reads them back. Group keys are node paths starting with the
//! root's name and joined with `/`, for example `main/m1/p1`.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::domain::module::Module;
use crate::domain::node::{Node, NodeKind};
use crate::domain::param::{Param, ParamState};
use crate::domain::repository::{Chain, ChainGroup, ChainStore, StoredValue};
use crate::domain::traversal;
use crate::error::{GraphError, GraphResult};
use crate::types::NumericValue;

const GROUP_SEPARATOR: &str = "/";

/// Service saving and restoring graph state through a [`ChainStore`]
pub struct StateService {
    store: Arc<dyn ChainStore>,
}

impl StateService {
    /// Create a new state service
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self { store }
    }

    /// Underlying chain store
    pub fn store(&self) -> &Arc<dyn ChainStore> {
        &self.store
    }

    /// Write the current state of `root` as a new chain under `key`
    ///
    /// An existing chain under `key` is replaced. With `appendable` the
    /// chain accepts further records through [`StateService::append_state`];
    /// otherwise it is a single snapshot.
    pub async fn save_state<V: NumericValue>(
        &self,
        root: &Module<V>,
        key: &str,
        appendable: bool,
    ) -> GraphResult<Chain> {
        guard_inactive(root)?;
        let mut chain = Chain::new(appendable);
        for (path, node) in capture(root) {
            let mut group = ChainGroup {
                kind: node.kind(),
                state: None,
                shape: None,
                series: Vec::with_capacity(1),
                metadata: Default::default(),
                units: None,
                valid: None,
            };
            let value = match &node {
                Node::Param(param) => {
                    group.state = Some(param.state());
                    group.metadata = param.metadata();
                    group.units = param.units();
                    group.valid = param.valid();
                    let value = current_value(param)?;
                    group.shape = value.as_ref().map(|v| v.shape()).or_else(|| param.shape());
                    value.map(|v| StoredValue::capture(&v))
                }
                Node::Module(_) => None,
            };
            group.series.push(value);
            chain.groups.insert(path, group);
        }
        chain.records = 1;

        self.store.store_chain(key, &chain).await?;
        info!(chain = %key, groups = chain.groups.len(), appendable, "Created chain");
        Ok(chain)
    }

    /// Append the current state of `root` as the next record of chain `key`
    ///
    /// Returns the new number of records.
    pub async fn append_state<V: NumericValue>(&self, root: &Module<V>, key: &str) -> GraphResult<usize> {
        guard_inactive(root)?;
        let mut chain = self.store.require_chain(key).await?;
        if !chain.appendable {
            return Err(GraphError::Schema(format!(
                "chain '{}' was saved as a snapshot and cannot be appended to",
                key
            )));
        }
        let nodes = capture(root);
        check_structure(key, &chain, &nodes)?;

        let mut record = BTreeMap::new();
        for (path, node) in &nodes {
            let Node::Param(param) = node else {
                continue;
            };
            let Some(value) = current_value(param)? else {
                continue;
            };
            let shape = value.shape();
            if let Some(group) = chain.groups.get(path) {
                if let Some(established) = &group.shape {
                    if *established != shape {
                        return Err(GraphError::Schema(format!(
                            "value of shape {} for '{}' does not match chain shape {}",
                            shape, path, established
                        )));
                    }
                }
            }
            record.insert(path.clone(), (param.clone(), value));
        }

        for (path, group) in chain.groups.iter_mut() {
            match record.remove(path) {
                Some((param, value)) => {
                    if group.shape.is_none() {
                        group.shape = Some(value.shape());
                    }
                    group.state = Some(param.state());
                    group.metadata = param.metadata();
                    group.units = param.units();
                    group.valid = param.valid();
                    group.series.push(Some(StoredValue::capture(&value)));
                }
                None => group.series.push(None),
            }
        }
        chain.records += 1;
        chain.updated_at = Utc::now();

        self.store.store_chain(key, &chain).await?;
        debug!(chain = %key, records = chain.records, "Appended record");
        Ok(chain.records)
    }

    /// Overwrite the values of `root` with record `index` of chain `key`
    ///
    /// `None` loads the latest record. Parameters with a stored value become
    /// static; pointers keep computing their values. Nothing is modified if
    /// the record does not fit the graph. Returns the loaded index.
    pub async fn load_state<V: NumericValue>(
        &self,
        root: &Module<V>,
        key: &str,
        index: Option<usize>,
    ) -> GraphResult<usize> {
        guard_inactive(root)?;
        let chain = self.store.require_chain(key).await?;
        let len = chain.records;
        let index = match index {
            Some(index) => index,
            None if len > 0 => len - 1,
            None => 0,
        };
        if index >= len {
            return Err(GraphError::IndexOutOfRange {
                chain: key.to_string(),
                index,
                len,
            });
        }
        let nodes = capture(root);
        check_structure(key, &chain, &nodes)?;

        let mut updates = Vec::new();
        for (path, node) in &nodes {
            let (Node::Param(param), Some(group)) = (node, chain.groups.get(path)) else {
                continue;
            };
            let stored = group.series.get(index).cloned().flatten();
            let value = match stored {
                Some(stored) if param.state() != ParamState::Pointer => {
                    let value: V = stored.restore().ok_or_else(|| {
                        GraphError::Schema(format!(
                            "stored value of shape {} for '{}' cannot be represented by this backend",
                            stored.shape, path
                        ))
                    })?;
                    if let Some(declared) = param.shape() {
                        if declared != stored.shape {
                            return Err(GraphError::Schema(format!(
                                "stored value of shape {} for '{}' does not match its shape {}",
                                stored.shape, path, declared
                            )));
                        }
                    }
                    Some(value)
                }
                _ => None,
            };
            updates.push((param.clone(), value, group));
        }

        for (param, value, group) in updates {
            param.restore_bounds(group.valid.clone(), group.units.clone());
            param.restore(value, group.metadata.clone())?;
        }
        debug!(chain = %key, index, "Loaded record");
        Ok(index)
    }

    /// Number of records in chain `key`
    pub async fn record_count(&self, key: &str) -> GraphResult<usize> {
        Ok(self.store.require_chain(key).await?.records)
    }

    /// Keys of all stored chains
    pub async fn list_chains(&self) -> GraphResult<Vec<String>> {
        self.store.list_chains().await
    }

    /// Delete chain `key`; returns whether it existed
    pub async fn delete_chain(&self, key: &str) -> GraphResult<bool> {
        self.store.delete_chain(key).await
    }
}

fn guard_inactive<V: NumericValue>(root: &Module<V>) -> GraphResult<()> {
    if root.is_active() {
        return Err(GraphError::ActiveState(format!(
            "cannot persist state of '{}' while its graph is active",
            root.name()
        )));
    }
    Ok(())
}

/// Every reachable node keyed by its group path, root first
fn capture<V: NumericValue>(root: &Module<V>) -> Vec<(String, Node<V>)> {
    let mut nodes = vec![(root.name().to_string(), Node::Module(root.clone()))];
    nodes.extend(
        traversal::walk(root, GROUP_SEPARATOR)
            .into_iter()
            .map(|visit| {
                (
                    format!("{}{}{}", root.name(), GROUP_SEPARATOR, visit.path),
                    visit.node,
                )
            }),
    );
    nodes
}

/// Value to persist for `param`
///
/// A pointer is evaluated when its links allow it; one depending on dynamic
/// parameters falls back to its last computed value.
fn current_value<V: NumericValue>(param: &Param<V>) -> GraphResult<Option<V>> {
    match param.state() {
        ParamState::Static => Ok(param.value()),
        ParamState::Dynamic => Ok(param.last_value()),
        ParamState::Pointer => match param.resolve_detached() {
            Ok(value) => Ok(Some(value)),
            Err(GraphError::Unresolved(_)) => Ok(param.last_value()),
            Err(err) => Err(err),
        },
    }
}

fn check_structure<V: NumericValue>(
    key: &str,
    chain: &Chain,
    nodes: &[(String, Node<V>)],
) -> GraphResult<()> {
    let expected: BTreeMap<&str, NodeKind> = nodes
        .iter()
        .map(|(path, node)| (path.as_str(), node.kind()))
        .collect();
    let stored: BTreeMap<&str, NodeKind> = chain.structure().into_iter().collect();
    if expected == stored {
        return Ok(());
    }
    let missing: Vec<&str> = expected
        .keys()
        .filter(|path| !stored.contains_key(*path))
        .copied()
        .collect();
    let extra: Vec<&str> = stored
        .keys()
        .filter(|path| !expected.contains_key(*path))
        .copied()
        .collect();
    Err(GraphError::Schema(format!(
        "graph structure differs from chain '{}' (not in chain: [{}]; not in graph: [{}])",
        key,
        missing.join(", "),
        extra.join(", ")
    )))
}
