//! Link bookkeeping between pointer parameters and their upstream parameters
//!
//! Links form a directed graph from a pointer to the parameters its resolver
//! reads. That graph must stay acyclic; every new link is checked here
//! before it is installed.

use std::collections::HashSet;

use super::node::NodeId;
use super::param::Param;
use crate::error::{GraphError, GraphResult};
use crate::types::NumericValue;

/// Queries over the link graph
pub struct LinkResolver;

impl LinkResolver {
    /// Verify that linking `pointer` to `upstream` keeps the link graph acyclic
    pub fn check_link<V: NumericValue>(pointer: &Param<V>, upstream: &Param<V>) -> GraphResult<()> {
        if pointer.same_node(upstream) {
            return Err(GraphError::CyclicGraph(format!(
                "parameter '{}' cannot link to itself",
                pointer.name()
            )));
        }
        if Self::depends_on(upstream, pointer) {
            return Err(GraphError::CyclicGraph(format!(
                "linking '{}' to '{}' would close a cycle: '{}' already depends on '{}'",
                pointer.name(),
                upstream.name(),
                upstream.name(),
                pointer.name()
            )));
        }
        Ok(())
    }

    /// Direct upstream parameters of `param`, in link order
    pub fn upstream<V: NumericValue>(param: &Param<V>) -> Vec<Param<V>> {
        param.links().into_iter().map(|(_, p)| p).collect()
    }

    /// All parameters `param` transitively depends on, depth first, without repeats
    pub fn dependencies<V: NumericValue>(param: &Param<V>) -> Vec<Param<V>> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        visited.insert(param.id());
        Self::collect(param, &mut visited, &mut order);
        order
    }

    /// Whether `param` transitively depends on `target`
    pub fn depends_on<V: NumericValue>(param: &Param<V>, target: &Param<V>) -> bool {
        let mut visited = HashSet::new();
        Self::reaches(param, target.id(), &mut visited)
    }

    fn collect<V: NumericValue>(
        param: &Param<V>,
        visited: &mut HashSet<NodeId>,
        order: &mut Vec<Param<V>>,
    ) {
        for upstream in Self::upstream(param) {
            if visited.insert(upstream.id()) {
                order.push(upstream.clone());
                Self::collect(&upstream, visited, order);
            }
        }
    }

    fn reaches<V: NumericValue>(
        param: &Param<V>,
        target: NodeId,
        visited: &mut HashSet<NodeId>,
    ) -> bool {
        if param.id() == target {
            return true;
        }
        if !visited.insert(param.id()) {
            return false;
        }
        Self::upstream(param)
            .iter()
            .any(|upstream| Self::reaches(upstream, target, visited))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tensor;

    #[test]
    fn test_direct_self_link_is_rejected() {
        let p: Param<Tensor> = Param::dynamic("p");
        let err = p.link("me", &p).unwrap_err();
        assert!(matches!(err, GraphError::CyclicGraph(_)));
        assert!(p.links().is_empty());
    }

    #[test]
    fn test_transitive_cycle_is_rejected() {
        let a: Param<Tensor> = Param::dynamic("a");
        let b: Param<Tensor> = Param::dynamic("b");
        let c: Param<Tensor> = Param::dynamic("c");
        a.link("b", &b).unwrap();
        b.link("c", &c).unwrap();

        let err = c.link("a", &a).unwrap_err();
        assert!(matches!(err, GraphError::CyclicGraph(msg) if msg.contains("'c'")));
        assert!(c.links().is_empty());
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let base: Param<Tensor> = Param::with_value("base", 1.0);
        let left: Param<Tensor> = Param::dynamic("left");
        let right: Param<Tensor> = Param::dynamic("right");
        let top: Param<Tensor> = Param::dynamic("top");
        left.link("base", &base).unwrap();
        right.link("base", &base).unwrap();
        top.link("left", &left).unwrap();
        top.link("right", &right).unwrap();

        let deps = LinkResolver::dependencies(&top);
        let names: Vec<_> = deps.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, vec!["left", "base", "right"]);
        assert!(LinkResolver::depends_on(&top, &base));
        assert!(!LinkResolver::depends_on(&base, &top));
    }

    #[test]
    fn test_upstream_preserves_link_order() {
        let p: Param<Tensor> = Param::dynamic("p");
        let x: Param<Tensor> = Param::dynamic("x");
        let y: Param<Tensor> = Param::dynamic("y");
        p.link("second", &y).unwrap();
        p.link("first", &x).unwrap();
        let upstream = LinkResolver::upstream(&p);
        assert!(upstream[0].same_node(&y));
        assert!(upstream[1].same_node(&x));
    }
}
