//! Depth-first graph traversal
//!
//! The walk visits a module's parameters before its sub-modules, each in
//! declaration order. A pointer's linked parameters are visited right after
//! the pointer, under `<pointer path><sep><link name>`. Every node appears
//! once; the first path reaching it wins.

use std::collections::HashSet;

use super::module::Module;
use super::node::{Node, NodeId};
use super::param::{Param, ParamState};
use crate::types::NumericValue;

/// One node reached by the walk
#[derive(Debug, Clone)]
pub struct Visit<V: NumericValue> {
    /// Qualified path relative to the root
    pub path: String,
    /// The node reached
    pub node: Node<V>,
}

/// Walk every node reachable from `root`, excluding the root itself
pub fn walk<V: NumericValue>(root: &Module<V>, separator: &str) -> Vec<Visit<V>> {
    let mut seen = HashSet::new();
    seen.insert(root.id());
    let mut out = Vec::new();
    visit_module(root, None, separator, &mut seen, &mut out);
    out
}

/// Parameters reachable from `root` with their qualified paths
pub fn walk_params<V: NumericValue>(root: &Module<V>, separator: &str) -> Vec<(String, Param<V>)> {
    walk(root, separator)
        .into_iter()
        .filter_map(|visit| match visit.node {
            Node::Param(param) => Some((visit.path, param)),
            Node::Module(_) => None,
        })
        .collect()
}

fn join(prefix: Option<&str>, name: &str, separator: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}{}{}", prefix, separator, name),
        None => name.to_string(),
    }
}

fn visit_module<V: NumericValue>(
    module: &Module<V>,
    prefix: Option<&str>,
    separator: &str,
    seen: &mut HashSet<NodeId>,
    out: &mut Vec<Visit<V>>,
) {
    for (name, param) in module.params() {
        let path = join(prefix, &name, separator);
        visit_param(&param, path, separator, seen, out);
    }
    for (name, child) in module.modules() {
        if !seen.insert(child.id()) {
            continue;
        }
        let path = join(prefix, &name, separator);
        out.push(Visit {
            path: path.clone(),
            node: Node::Module(child.clone()),
        });
        visit_module(&child, Some(&path), separator, seen, out);
    }
}

fn visit_param<V: NumericValue>(
    param: &Param<V>,
    path: String,
    separator: &str,
    seen: &mut HashSet<NodeId>,
    out: &mut Vec<Visit<V>>,
) {
    if !seen.insert(param.id()) {
        return;
    }
    let links = match param.state() {
        ParamState::Pointer => param.links(),
        _ => Vec::new(),
    };
    out.push(Visit {
        path: path.clone(),
        node: Node::Param(param.clone()),
    });
    for (link_name, upstream) in links {
        let link_path = join(Some(&path), &link_name, separator);
        visit_param(&upstream, link_path, separator, seen, out);
    }
}
