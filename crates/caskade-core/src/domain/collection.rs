//! Positional collections of nodes
//!
//! [`NodeList`] and [`NodeTuple`] group parameters and modules under one
//! backing [`Module`], so a collection can be attached to a graph like any
//! other module. Each member is registered under its own name; positions
//! are tracked separately. Every change to a list re-registers all members
//! in their new order, which keeps the flattening order equal to the
//! positional order.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::module::Module;
use super::node::Node;
use super::param::Param;
use crate::error::{GraphError, GraphResult};
use crate::types::{NumericValue, Tensor};

struct Members<V: NumericValue> {
    module: Module<V>,
    nodes: Arc<RwLock<Vec<Node<V>>>>,
}

impl<V: NumericValue> Members<V> {
    fn new(name: &str) -> Self {
        Self {
            module: Module::new(name),
            nodes: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn get(&self, index: usize) -> Option<Node<V>> {
        self.nodes.read().get(index).cloned()
    }

    fn get_named(&self, name: &str) -> Option<Node<V>> {
        self.module.child(name)
    }

    fn len(&self) -> usize {
        self.nodes.read().len()
    }

    fn nodes(&self) -> Vec<Node<V>> {
        self.nodes.read().clone()
    }

    /// Replace all members with `next`, re-registering them in order
    fn relink(&self, next: Vec<Node<V>>) -> GraphResult<()> {
        if self.module.is_active() {
            return Err(GraphError::ActiveState(format!(
                "cannot modify collection '{}' while its graph is active",
                self.module.name()
            )));
        }
        let mut names = HashSet::new();
        for node in &next {
            if !names.insert(node.name()) {
                return Err(GraphError::NameCollision(format!(
                    "collection '{}' already holds a node named '{}'",
                    self.module.name(),
                    node.name()
                )));
            }
            if let Node::Module(module) = node {
                if module.contains_module(self.module.id()) {
                    return Err(GraphError::CyclicGraph(format!(
                        "collection '{}' cannot hold '{}', which contains it",
                        self.module.name(),
                        module.name()
                    )));
                }
            }
        }

        let mut nodes = self.nodes.write();
        for node in nodes.iter() {
            self.module.remove(node.name())?;
        }
        for node in &next {
            match node {
                Node::Param(param) => {
                    self.module.add_param(param.name(), param.clone())?;
                }
                Node::Module(module) => {
                    self.module.add_module(module.name(), module.clone())?;
                }
            }
        }
        debug!(collection = %self.module.name(), len = next.len(), "Relinked collection");
        *nodes = next;
        Ok(())
    }

    fn to_dynamic(&self) -> GraphResult<()> {
        for node in self.nodes() {
            match node {
                Node::Param(param) if param.is_static() => param.to_dynamic()?,
                Node::Param(_) => {}
                Node::Module(module) => module.to_dynamic(false)?,
            }
        }
        Ok(())
    }

    /// Fails without changing anything if a dynamic member has no value
    fn to_static(&self) -> GraphResult<()> {
        let mut targets: Vec<Param<V>> = Vec::new();
        for node in self.nodes() {
            match node {
                Node::Param(param) => targets.push(param),
                Node::Module(module) => targets.extend(module.bulk_params(false)),
            }
        }
        targets.retain(|param| param.is_dynamic());
        if let Some(missing) = targets.iter().find(|p| p.last_value().is_none()) {
            return Err(GraphError::InvalidState(format!(
                "parameter '{}' in collection '{}' has no value to fix as static",
                missing.name(),
                self.module.name()
            )));
        }
        for param in targets {
            param.to_static()?;
        }
        Ok(())
    }

    fn is_dynamic(&self) -> bool {
        self.nodes().iter().any(|node| match node {
            Node::Param(param) => param.is_dynamic(),
            Node::Module(module) => !module.dynamic_params().is_empty(),
        })
    }

    fn out_of_range(&self, index: usize, len: usize) -> GraphError {
        GraphError::NotFound(format!(
            "position {} in collection '{}' of length {}",
            index,
            self.module.name(),
            len
        ))
    }
}

/// Growable, ordered collection of nodes
pub struct NodeList<V: NumericValue = Tensor> {
    members: Members<V>,
}

impl<V: NumericValue> NodeList<V> {
    /// Create an empty list backed by a module named `name`
    pub fn new(name: &str) -> Self {
        Self {
            members: Members::new(name),
        }
    }

    /// Create a list holding `nodes` in order
    pub fn from_nodes<N>(name: &str, nodes: impl IntoIterator<Item = N>) -> GraphResult<Self>
    where
        N: Into<Node<V>>,
    {
        let list = Self::new(name);
        list.extend(nodes)?;
        Ok(list)
    }

    /// Module backing the list; attach it to place the list in a graph
    pub fn module(&self) -> &Module<V> {
        &self.members.module
    }

    /// Member at `index`
    pub fn get(&self, index: usize) -> Option<Node<V>> {
        self.members.get(index)
    }

    /// Member registered under `name`
    pub fn get_named(&self, name: &str) -> Option<Node<V>> {
        self.members.get_named(name)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Members in order
    pub fn nodes(&self) -> Vec<Node<V>> {
        self.members.nodes()
    }

    /// Append `node`
    pub fn push(&self, node: impl Into<Node<V>>) -> GraphResult<()> {
        let mut next = self.nodes();
        next.push(node.into());
        self.members.relink(next)
    }

    /// Insert `node` at `index`, shifting later members back
    pub fn insert(&self, index: usize, node: impl Into<Node<V>>) -> GraphResult<()> {
        let mut next = self.nodes();
        if index > next.len() {
            return Err(self.members.out_of_range(index, next.len()));
        }
        next.insert(index, node.into());
        self.members.relink(next)
    }

    /// Append every node of `nodes`
    pub fn extend<N>(&self, nodes: impl IntoIterator<Item = N>) -> GraphResult<()>
    where
        N: Into<Node<V>>,
    {
        let mut next = self.nodes();
        next.extend(nodes.into_iter().map(Into::into));
        self.members.relink(next)
    }

    /// Put `node` at `index`, returning the member it replaces
    pub fn replace(&self, index: usize, node: impl Into<Node<V>>) -> GraphResult<Node<V>> {
        let mut next = self.nodes();
        let len = next.len();
        let slot = next
            .get_mut(index)
            .ok_or_else(|| self.members.out_of_range(index, len))?;
        let previous = std::mem::replace(slot, node.into());
        self.members.relink(next)?;
        Ok(previous)
    }

    /// Remove and return the member at `index`
    pub fn remove(&self, index: usize) -> GraphResult<Node<V>> {
        let mut next = self.nodes();
        if index >= next.len() {
            return Err(self.members.out_of_range(index, next.len()));
        }
        let removed = next.remove(index);
        self.members.relink(next)?;
        Ok(removed)
    }

    /// Remove and return the last member
    pub fn pop(&self) -> GraphResult<Option<Node<V>>> {
        match self.len() {
            0 => Ok(None),
            len => self.remove(len - 1).map(Some),
        }
    }

    /// Remove every member
    pub fn clear(&self) -> GraphResult<()> {
        self.members.relink(Vec::new())
    }

    /// Make every member dynamic; modules are converted recursively
    pub fn to_dynamic(&self) -> GraphResult<()> {
        self.members.to_dynamic()
    }

    /// Make every member static, fixing last known values
    pub fn to_static(&self) -> GraphResult<()> {
        self.members.to_static()
    }

    /// Whether any member is or holds a dynamic parameter
    pub fn is_dynamic(&self) -> bool {
        self.members.is_dynamic()
    }
}

impl<V: NumericValue> fmt::Debug for NodeList<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.nodes().iter().map(|n| n.name().to_string())).finish()
    }
}

/// Fixed, ordered collection of nodes
pub struct NodeTuple<V: NumericValue = Tensor> {
    members: Members<V>,
}

impl<V: NumericValue> NodeTuple<V> {
    /// Create a tuple holding `nodes` in order
    pub fn from_nodes<N>(name: &str, nodes: impl IntoIterator<Item = N>) -> GraphResult<Self>
    where
        N: Into<Node<V>>,
    {
        let members = Members::new(name);
        members.relink(nodes.into_iter().map(Into::into).collect())?;
        Ok(Self { members })
    }

    /// Tuple holding the members of `self` followed by those of `other`
    pub fn concat(&self, other: &NodeTuple<V>, name: &str) -> GraphResult<Self> {
        Self::from_nodes(name, self.nodes().into_iter().chain(other.nodes()))
    }

    /// Module backing the tuple; attach it to place the tuple in a graph
    pub fn module(&self) -> &Module<V> {
        &self.members.module
    }

    /// Member at `index`
    pub fn get(&self, index: usize) -> Option<Node<V>> {
        self.members.get(index)
    }

    /// Member registered under `name`
    pub fn get_named(&self, name: &str) -> Option<Node<V>> {
        self.members.get_named(name)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the tuple is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Members in order
    pub fn nodes(&self) -> Vec<Node<V>> {
        self.members.nodes()
    }

    /// Make every member dynamic; modules are converted recursively
    pub fn to_dynamic(&self) -> GraphResult<()> {
        self.members.to_dynamic()
    }

    /// Make every member static, fixing last known values
    pub fn to_static(&self) -> GraphResult<()> {
        self.members.to_static()
    }

    /// Whether any member is or holds a dynamic parameter
    pub fn is_dynamic(&self) -> bool {
        self.members.is_dynamic()
    }
}

impl<V: NumericValue> fmt::Debug for NodeTuple<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeTuple")
            .field(&self.nodes().iter().map(|n| n.name().to_string()).collect::<Vec<_>>())
            .finish()
    }
}
