//! Composite modules
//!
//! A [`Module`] owns two insertion-ordered collections of children: its
//! parameters and its sub-modules. That order is the canonical traversal
//! order used when flattening a graph. Children are registered explicitly
//! with [`Module::add_param`] and [`Module::add_module`]; a node that is
//! already owned elsewhere is registered as an aliasing reference.

use parking_lot::RwLock;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::graph::GraphView;
use super::node::{Node, NodeId};
use super::param::Param;
use crate::application::flatten::{FlatEntry, Flattener, Payload};
use crate::config::EngineConfig;
use crate::error::{GraphError, GraphResult};
use crate::types::{NumericValue, Tensor};

pub(crate) struct ModuleInner<V: NumericValue> {
    params: Vec<(String, Param<V>)>,
    modules: Vec<(String, Module<V>)>,
    owner: Option<NodeId>,
    active: bool,
    valid_context: bool,
    config: Arc<EngineConfig>,
}

/// Handle to a composite node
pub struct Module<V: NumericValue = Tensor> {
    id: NodeId,
    name: Arc<str>,
    inner: Arc<RwLock<ModuleInner<V>>>,
}

impl<V: NumericValue> Module<V> {
    /// Create an empty module with the default configuration
    pub fn new(name: &str) -> Self {
        Self::with_config(name, Arc::new(EngineConfig::default()))
    }

    /// Create an empty module carrying `config`
    ///
    /// Operations started from this module as a root use its configuration.
    pub fn with_config(name: &str, config: Arc<EngineConfig>) -> Self {
        Self {
            id: NodeId::new(),
            name: Arc::from(name),
            inner: Arc::new(RwLock::new(ModuleInner {
                params: Vec::new(),
                modules: Vec::new(),
                owner: None,
                active: false,
                valid_context: false,
                config,
            })),
        }
    }

    /// Identity of the module
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Name the module was created with
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration attached to the module
    pub fn config(&self) -> Arc<EngineConfig> {
        self.inner.read().config.clone()
    }

    /// Module owning this module, if any
    pub fn owner(&self) -> Option<NodeId> {
        self.inner.read().owner
    }

    /// Whether the module belongs to an active graph
    pub fn is_active(&self) -> bool {
        self.inner.read().active
    }

    /// Whether payloads for calls rooted here are read in valid representation
    pub fn in_valid_context(&self) -> bool {
        self.inner.read().valid_context
    }

    /// Whether two handles refer to the same module
    #[inline]
    pub fn same_node(&self, other: &Module<V>) -> bool {
        self.id == other.id
    }

    /// Register `param` under `name` and return its handle
    ///
    /// The module becomes the parameter's owner unless another module
    /// already owns it, in which case this is an aliasing reference.
    pub fn add_param(&self, name: &str, param: Param<V>) -> GraphResult<Param<V>> {
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        self.check_name(&inner, name)?;
        if inner.params.iter().any(|(_, p)| p.same_node(&param)) {
            return Err(GraphError::NameCollision(format!(
                "parameter '{}' is already registered in module '{}'",
                param.name(),
                self.name
            )));
        }
        let owned = param.claim_owner(self.id);
        debug!(module = %self.name, param = %name, owned, "Registered parameter");
        inner.params.push((name.to_string(), param.clone()));
        Ok(param)
    }

    /// Register `module` under `name` and return its handle
    ///
    /// Rejected when `module` is this module or contains it.
    pub fn add_module(&self, name: &str, module: Module<V>) -> GraphResult<Module<V>> {
        if module.same_node(self) || module.contains_module(self.id) {
            return Err(GraphError::CyclicGraph(format!(
                "module '{}' cannot contain '{}', which contains it",
                self.name,
                module.name()
            )));
        }
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        self.check_name(&inner, name)?;
        if inner.modules.iter().any(|(_, m)| m.same_node(&module)) {
            return Err(GraphError::NameCollision(format!(
                "module '{}' is already registered in module '{}'",
                module.name(),
                self.name
            )));
        }
        let owned = module.claim_owner(self.id);
        debug!(module = %self.name, child = %name, owned, "Registered module");
        inner.modules.push((name.to_string(), module.clone()));
        Ok(module)
    }

    /// Parameter registered under `name`
    pub fn param(&self, name: &str) -> GraphResult<Param<V>> {
        self.inner
            .read()
            .params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, p)| p.clone())
            .ok_or_else(|| {
                GraphError::NotFound(format!("parameter '{}' in module '{}'", name, self.name))
            })
    }

    /// Sub-module registered under `name`
    pub fn module(&self, name: &str) -> GraphResult<Module<V>> {
        self.inner
            .read()
            .modules
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, m)| m.clone())
            .ok_or_else(|| {
                GraphError::NotFound(format!("module '{}' in module '{}'", name, self.name))
            })
    }

    /// Child registered under `name`, whatever its kind
    pub fn child(&self, name: &str) -> Option<Node<V>> {
        let inner = self.inner.read();
        if let Some((_, p)) = inner.params.iter().find(|(key, _)| key == name) {
            return Some(Node::Param(p.clone()));
        }
        inner
            .modules
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, m)| Node::Module(m.clone()))
    }

    /// Registered parameters in declaration order
    pub fn params(&self) -> Vec<(String, Param<V>)> {
        self.inner.read().params.clone()
    }

    /// Registered sub-modules in declaration order
    pub fn modules(&self) -> Vec<(String, Module<V>)> {
        self.inner.read().modules.clone()
    }

    /// Look up a parameter by its path relative to this module
    ///
    /// Path segments are joined with the configured separator, for example
    /// `m1.m3.p5`.
    pub fn find_param(&self, path: &str) -> GraphResult<Param<V>> {
        let config = self.config();
        let segments: Vec<&str> = path.split(config.path_separator.as_str()).collect();
        let (last, modules) = match segments.split_last() {
            Some(split) => split,
            None => return Err(GraphError::NotFound(format!("empty path in '{}'", self.name))),
        };
        let mut current = self.clone();
        for segment in modules {
            current = current.module(segment).map_err(|_| {
                GraphError::NotFound(format!("'{}' in module '{}'", path, self.name))
            })?;
        }
        current
            .param(last)
            .map_err(|_| GraphError::NotFound(format!("'{}' in module '{}'", path, self.name)))
    }

    /// Detach the child registered under `name`
    ///
    /// The node itself survives; if this module owned it, it becomes
    /// ownerless until registered again.
    pub fn remove(&self, name: &str) -> GraphResult<Node<V>> {
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        if let Some(position) = inner.params.iter().position(|(key, _)| key == name) {
            let (_, param) = inner.params.remove(position);
            param.release_owner(self.id);
            debug!(module = %self.name, param = %name, "Detached parameter");
            return Ok(Node::Param(param));
        }
        if let Some(position) = inner.modules.iter().position(|(key, _)| key == name) {
            let (_, module) = inner.modules.remove(position);
            module.release_owner(self.id);
            debug!(module = %self.name, child = %name, "Detached module");
            return Ok(Node::Module(module));
        }
        Err(GraphError::NotFound(format!(
            "child '{}' in module '{}'",
            name, self.name
        )))
    }

    /// Put `param` in the slot registered under `name`, keeping its position
    ///
    /// Returns the parameter that previously held the slot.
    pub fn replace_param(&self, name: &str, param: Param<V>) -> GraphResult<Param<V>> {
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        let position = inner
            .params
            .iter()
            .position(|(key, _)| key == name)
            .ok_or_else(|| {
                GraphError::NotFound(format!("parameter '{}' in module '{}'", name, self.name))
            })?;
        if inner
            .params
            .iter()
            .any(|(key, p)| key != name && p.same_node(&param))
        {
            return Err(GraphError::NameCollision(format!(
                "parameter '{}' is already registered in module '{}'",
                param.name(),
                self.name
            )));
        }
        let previous = std::mem::replace(&mut inner.params[position].1, param.clone());
        if !previous.same_node(&param) {
            previous.release_owner(self.id);
            param.claim_owner(self.id);
        }
        Ok(previous)
    }

    /// Assign a plain value to the parameter registered under `name`
    ///
    /// `Some(value)` makes it static with that value; `None` makes it dynamic.
    pub fn set(&self, name: &str, value: Option<V>) -> GraphResult<()> {
        let param = self.param(name)?;
        match value {
            Some(value) => param.set_value(value),
            None => param.to_dynamic(),
        }
    }

    /// Make every static parameter dynamic
    ///
    /// With `local_only` only this module's own parameters are affected;
    /// otherwise the whole owned subtree. Pointers are left untouched.
    pub fn to_dynamic(&self, local_only: bool) -> GraphResult<()> {
        self.guard(&self.inner.read())?;
        for param in self.bulk_params(local_only) {
            if param.is_static() {
                param.to_dynamic()?;
            }
        }
        Ok(())
    }

    /// Make every dynamic parameter static, fixing its last known value
    ///
    /// Fails without changing anything if any affected parameter has no
    /// remembered value.
    pub fn to_static(&self, local_only: bool) -> GraphResult<()> {
        self.guard(&self.inner.read())?;
        let targets: Vec<Param<V>> = self
            .bulk_params(local_only)
            .into_iter()
            .filter(|p| p.is_dynamic())
            .collect();
        if let Some(missing) = targets.iter().find(|p| p.last_value().is_none()) {
            return Err(GraphError::InvalidState(format!(
                "parameter '{}' in module '{}' has no value to fix as static",
                missing.name(),
                self.name
            )));
        }
        for param in targets {
            param.to_static()?;
        }
        Ok(())
    }

    /// Dynamic parameters reachable from this module, in flattening order
    pub fn dynamic_params(&self) -> Vec<FlatEntry<V>> {
        self.flattener().entries().to_vec()
    }

    /// Flattener over the dynamic parameters reachable from this module
    pub fn flattener(&self) -> Flattener<V> {
        Flattener::new(self)
    }

    /// Convert `payload` to the valid representation of its parameters
    pub fn to_valid(&self, payload: Payload<V>) -> GraphResult<Payload<V>> {
        self.flattener().to_valid(payload)
    }

    /// Convert `payload` from the valid representation of its parameters
    pub fn from_valid(&self, payload: Payload<V>) -> GraphResult<Payload<V>> {
        self.flattener().from_valid(payload)
    }

    /// Read-only export of the graph rooted at this module
    pub fn graph(&self) -> GraphView {
        GraphView::from_root(self)
    }

    /// Whether `target` is this module or is nested anywhere below it
    pub fn contains_module(&self, target: NodeId) -> bool {
        let mut visited = HashSet::new();
        self.contains_inner(target, &mut visited)
    }

    fn contains_inner(&self, target: NodeId, visited: &mut HashSet<NodeId>) -> bool {
        if self.id == target {
            return true;
        }
        if !visited.insert(self.id) {
            return false;
        }
        self.modules()
            .iter()
            .any(|(_, m)| m.contains_inner(target, visited))
    }

    pub(crate) fn bulk_params(&self, local_only: bool) -> Vec<Param<V>> {
        if local_only {
            return self.params().into_iter().map(|(_, p)| p).collect();
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.collect_subtree(&mut seen, &mut out);
        out
    }

    fn collect_subtree(&self, seen: &mut HashSet<NodeId>, out: &mut Vec<Param<V>>) {
        for (_, param) in self.params() {
            if seen.insert(param.id()) {
                out.push(param);
            }
        }
        for (_, module) in self.modules() {
            if seen.insert(module.id()) {
                module.collect_subtree(seen, out);
            }
        }
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.inner.write().active = active;
    }

    /// Set the valid-context flag, returning its previous value
    pub(crate) fn replace_valid_context(&self, enabled: bool) -> bool {
        std::mem::replace(&mut self.inner.write().valid_context, enabled)
    }

    pub(crate) fn claim_owner(&self, owner: NodeId) -> bool {
        let mut inner = self.inner.write();
        if inner.owner.is_none() {
            inner.owner = Some(owner);
            true
        } else {
            false
        }
    }

    pub(crate) fn release_owner(&self, owner: NodeId) {
        let mut inner = self.inner.write();
        if inner.owner == Some(owner) {
            inner.owner = None;
        }
    }

    fn check_name(&self, inner: &ModuleInner<V>, name: &str) -> GraphResult<()> {
        let taken = inner.params.iter().any(|(key, _)| key == name)
            || inner.modules.iter().any(|(key, _)| key == name);
        if taken {
            return Err(GraphError::NameCollision(format!(
                "module '{}' already has a child named '{}'",
                self.name, name
            )));
        }
        Ok(())
    }

    fn guard(&self, inner: &ModuleInner<V>) -> GraphResult<()> {
        if inner.active {
            return Err(GraphError::ActiveState(format!(
                "cannot modify module '{}' while its graph is active",
                self.name
            )));
        }
        Ok(())
    }
}

impl<V: NumericValue> Clone for Module<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<V: NumericValue> PartialEq for Module<V> {
    fn eq(&self, other: &Self) -> bool {
        self.same_node(other)
    }
}

impl<V: NumericValue> Eq for Module<V> {}

impl<V: NumericValue> fmt::Debug for Module<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("params", &inner.params.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())
            .field("modules", &inner.modules.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())
            .field("active", &inner.active)
            .field("valid_context", &inner.valid_context)
            .finish()
    }
}
