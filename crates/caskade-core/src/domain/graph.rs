//! Read-only export of a parameter graph
//!
//! Building a [`GraphView`] never changes engine state. The view can be
//! serialized or rendered as Graphviz DOT text for external tooling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write;

use super::module::Module;
use super::node::{Node, NodeId, NodeKind};
use super::param::ParamState;
use super::traversal;
use crate::types::NumericValue;

/// Kind of edge in the exported graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Module to a child it owns
    Ownership,
    /// Module to a child owned by another module
    Reference,
    /// Pointer to a linked upstream parameter
    Link,
}

/// A node in the exported graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Node identity
    pub id: NodeId,
    /// Qualified path; empty for the root
    pub path: String,
    /// Name the node was created with
    pub name: String,
    /// Node kind
    pub kind: NodeKind,
    /// Value-source state for parameters
    pub state: Option<ParamState>,
}

/// A directed edge in the exported graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Source node
    pub from: NodeId,
    /// Target node
    pub to: NodeId,
    /// Edge kind
    pub kind: EdgeKind,
    /// Child or link name carried by the edge
    pub label: String,
}

/// Snapshot of a graph's nodes and edges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphView {
    /// Nodes in traversal order, root first
    pub nodes: Vec<GraphNode>,
    /// Edges grouped by source node
    pub edges: Vec<GraphEdge>,
}

impl GraphView {
    /// Export the graph reachable from `root`
    pub fn from_root<V: NumericValue>(root: &Module<V>) -> Self {
        let separator = root.config().path_separator.clone();
        let mut reached = vec![(String::new(), Node::Module(root.clone()))];
        reached.extend(
            traversal::walk(root, &separator)
                .into_iter()
                .map(|visit| (visit.path, visit.node)),
        );

        let mut view = GraphView::default();
        for (path, node) in &reached {
            view.nodes.push(GraphNode {
                id: node.id(),
                path: path.clone(),
                name: node.name().to_string(),
                kind: node.kind(),
                state: node.as_param().map(|p| p.state()),
            });
        }

        for (_, node) in &reached {
            match node {
                Node::Module(module) => {
                    let children = module
                        .params()
                        .into_iter()
                        .map(|(name, p)| (name, p.id(), p.owner()))
                        .chain(
                            module
                                .modules()
                                .into_iter()
                                .map(|(name, m)| (name, m.id(), m.owner())),
                        );
                    for (label, child, owner) in children {
                        let kind = if owner == Some(module.id()) {
                            EdgeKind::Ownership
                        } else {
                            EdgeKind::Reference
                        };
                        view.edges.push(GraphEdge {
                            from: module.id(),
                            to: child,
                            kind,
                            label,
                        });
                    }
                }
                Node::Param(param) if param.state() == ParamState::Pointer => {
                    for (label, upstream) in param.links() {
                        view.edges.push(GraphEdge {
                            from: param.id(),
                            to: upstream.id(),
                            kind: EdgeKind::Link,
                            label,
                        });
                    }
                }
                Node::Param(_) => {}
            }
        }
        view
    }

    /// Node with the given qualified path
    pub fn node(&self, path: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.path == path)
    }

    /// Edges of a given kind
    pub fn edges_of(&self, kind: EdgeKind) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }

    /// Render the view as Graphviz DOT text
    pub fn to_dot(&self) -> String {
        let index: HashMap<NodeId, usize> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, i))
            .collect();

        let mut dot = String::from("digraph caskade {\n");
        for (i, node) in self.nodes.iter().enumerate() {
            let shape = match node.kind {
                NodeKind::Module => "box",
                NodeKind::Param => "ellipse",
            };
            let label = match node.state {
                Some(state) => format!("{}|{}", node.name, state),
                None => node.name.clone(),
            };
            let _ = writeln!(
                dot,
                "    n{} [label=\"{}\", shape={}];",
                i,
                escape_label(&label),
                shape
            );
        }
        for edge in &self.edges {
            let (Some(from), Some(to)) = (index.get(&edge.from), index.get(&edge.to)) else {
                continue;
            };
            let style = match edge.kind {
                EdgeKind::Ownership => "solid",
                EdgeKind::Reference => "dotted",
                EdgeKind::Link => "dashed",
            };
            let _ = writeln!(
                dot,
                "    n{} -> n{} [label=\"{}\", style={}];",
                from,
                to,
                escape_label(&edge.label),
                style
            );
        }
        dot.push_str("}\n");
        dot
    }
}

/// Escape a string for use inside a quoted DOT label
fn escape_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
