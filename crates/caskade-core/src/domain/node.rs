use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::module::Module;
use super::param::Param;
use crate::types::{NumericValue, Tensor};

/// Value object: Node ID
///
/// Identity of a node independent of the names it is registered under.
/// Aliased handles of the same node share one ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Generate a fresh node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Composite node
    Module,
    /// Leaf node
    Param,
}

/// Handle to any graph member
pub enum Node<V: NumericValue = Tensor> {
    /// A leaf parameter
    Param(Param<V>),
    /// A composite module
    Module(Module<V>),
}

impl<V: NumericValue> Node<V> {
    /// Identity of the node
    pub fn id(&self) -> NodeId {
        match self {
            Node::Param(p) => p.id(),
            Node::Module(m) => m.id(),
        }
    }

    /// Name the node was created with
    pub fn name(&self) -> &str {
        match self {
            Node::Param(p) => p.name(),
            Node::Module(m) => m.name(),
        }
    }

    /// Kind of the node
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Param(_) => NodeKind::Param,
            Node::Module(_) => NodeKind::Module,
        }
    }

    /// Whether the node belongs to an active graph
    pub fn is_active(&self) -> bool {
        match self {
            Node::Param(p) => p.is_active(),
            Node::Module(m) => m.is_active(),
        }
    }

    /// Module that owns this node, if any
    pub fn owner(&self) -> Option<NodeId> {
        match self {
            Node::Param(p) => p.owner(),
            Node::Module(m) => m.owner(),
        }
    }

    /// The parameter handle, if this is a parameter
    pub fn as_param(&self) -> Option<&Param<V>> {
        match self {
            Node::Param(p) => Some(p),
            Node::Module(_) => None,
        }
    }

    /// The module handle, if this is a module
    pub fn as_module(&self) -> Option<&Module<V>> {
        match self {
            Node::Module(m) => Some(m),
            Node::Param(_) => None,
        }
    }

    pub(crate) fn set_active(&self, active: bool) {
        match self {
            Node::Param(p) => p.set_active(active),
            Node::Module(m) => m.set_active(active),
        }
    }
}

impl<V: NumericValue> Clone for Node<V> {
    fn clone(&self) -> Self {
        match self {
            Node::Param(p) => Node::Param(p.clone()),
            Node::Module(m) => Node::Module(m.clone()),
        }
    }
}

impl<V: NumericValue> fmt::Debug for Node<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Param(p) => p.fmt(f),
            Node::Module(m) => m.fmt(f),
        }
    }
}

impl<V: NumericValue> From<Param<V>> for Node<V> {
    fn from(param: Param<V>) -> Self {
        Node::Param(param)
    }
}

impl<V: NumericValue> From<Module<V>> for Node<V> {
    fn from(module: Module<V>) -> Self {
        Node::Module(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_unique() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_node_handle_accessors() {
        let param: Param<Tensor> = Param::dynamic("x");
        let node = Node::from(param.clone());
        assert_eq!(node.kind(), NodeKind::Param);
        assert_eq!(node.name(), "x");
        assert_eq!(node.id(), param.id());
        assert!(node.as_module().is_none());
        assert!(node.as_param().is_some());
        assert!(!node.is_active());

        let module: Module<Tensor> = Module::new("m");
        let node = Node::from(module);
        assert_eq!(node.kind(), NodeKind::Module);
        assert!(node.owner().is_none());
    }

    #[test]
    fn test_node_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&NodeKind::Module).unwrap(), "\"module\"");
    }
}
