//! Call-scoped activation of a parameter graph
//!
//! An [`ActivationContext`] lives for exactly one top-level call. Entering it
//! splits the caller's payload over the graph's dynamic parameters and marks
//! every reachable node active; dropping it clears all transient values and
//! pointer caches and marks the nodes inactive again, on every exit path.
//!
//! Entering a module that already belongs to a call running on the same
//! thread joins that call instead: the joined context shares its values,
//! cache and overrides, takes no payload and leaves teardown to the call
//! that created it.
//!
//! Within a context, a parameter resolves to, in order:
//!
//! 1. a scoped override installed with [`Scope::with_override`]
//! 2. the transient value supplied for this call (dynamic parameters)
//! 3. the memoized result of its resolver (pointers)
//! 4. its stored value (static parameters)

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::{Arc, OnceLock};
use tracing::{debug, trace, warn};

use super::flatten::{Flattener, Payload};
use crate::config::EngineConfig;
use crate::domain::links::LinkResolver;
use crate::domain::module::Module;
use crate::domain::node::{Node, NodeId};
use crate::domain::param::{LinkValues, Param, ParamSnapshot, ParamState};
use crate::domain::traversal;
use crate::error::{GraphError, GraphResult};
use crate::types::NumericValue;

static ACTIVATION_LOCK: OnceLock<ReentrantMutex<()>> = OnceLock::new();

thread_local! {
    /// Calls running on this thread, innermost last
    static RUNNING: RefCell<Vec<Rc<dyn Any>>> = RefCell::new(Vec::new());
}

/// Top-level activations are serialized process-wide
fn activation_lock() -> &'static ReentrantMutex<()> {
    ACTIVATION_LOCK.get_or_init(|| ReentrantMutex::new(()))
}

struct Frame<V> {
    transient: HashMap<NodeId, V>,
    cache: HashMap<NodeId, V>,
    overrides: Vec<(NodeId, V)>,
    evaluating: HashSet<NodeId>,
}

impl<V> Default for Frame<V> {
    fn default() -> Self {
        Self {
            transient: HashMap::new(),
            cache: HashMap::new(),
            overrides: Vec::new(),
            evaluating: HashSet::new(),
        }
    }
}

/// State of one running call, shared by every context joining it
struct Shared<V: NumericValue> {
    root: Module<V>,
    config: Arc<EngineConfig>,
    nodes: Vec<Node<V>>,
    params: HashMap<NodeId, (String, Param<V>)>,
    frame: RefCell<Frame<V>>,
    succeeded: Cell<bool>,
}

/// Resolution state of one call
pub struct ActivationContext<V: NumericValue> {
    shared: Rc<Shared<V>>,
    entry: Module<V>,
    owner: bool,
    _lock: ReentrantMutexGuard<'static, ()>,
}

impl<V: NumericValue> ActivationContext<V> {
    /// Activate the graph rooted at `root` with the caller's payload
    ///
    /// When `root` belongs to a call already running on this thread, the
    /// returned context joins that call; the payload must then be
    /// [`Payload::None`]. Otherwise fails with `ActiveState` if any
    /// reachable node belongs to another active graph, and with `Payload`
    /// or `Shape` if the payload does not fit the dynamic parameters.
    /// Nothing is modified on failure.
    pub fn enter(root: &Module<V>, payload: Payload<V>) -> GraphResult<Self> {
        let lock = activation_lock().lock();

        if let Some(shared) = running_call::<V>(root.id()) {
            if !matches!(payload, Payload::None) {
                return Err(GraphError::Payload(format!(
                    "'{}' is part of the running call rooted at '{}'; a nested call reuses its values and accepts no {}",
                    root.name(),
                    shared.root.name(),
                    payload.describe()
                )));
            }
            trace!(module = %root.name(), root = %shared.root.name(), "Joined running call");
            return Ok(Self {
                shared,
                entry: root.clone(),
                owner: false,
                _lock: lock,
            });
        }

        let config = root.config();
        let mut nodes = vec![Node::Module(root.clone())];
        let mut params = HashMap::new();
        for visit in traversal::walk(root, &config.path_separator) {
            if let Node::Param(param) = &visit.node {
                params.insert(param.id(), (visit.path.clone(), param.clone()));
            }
            nodes.push(visit.node);
        }

        if let Some(active) = nodes.iter().find(|node| node.is_active()) {
            return Err(GraphError::ActiveState(format!(
                "'{}' reachable from '{}' already belongs to an active graph",
                active.name(),
                root.name()
            )));
        }

        let kind = payload.describe();
        let in_valid = root.in_valid_context();
        let mut transient = HashMap::new();
        for (param, value) in Flattener::new(root).split(payload)? {
            let value = if in_valid { param.from_valid(&value)? } else { value };
            transient.insert(param.id(), value);
        }

        for node in &nodes {
            node.set_active(true);
        }
        debug!(
            root = %root.name(),
            nodes = nodes.len(),
            dynamic = transient.len(),
            payload = kind,
            valid = in_valid,
            "Activated graph"
        );

        let shared = Rc::new(Shared {
            root: root.clone(),
            config,
            nodes,
            params,
            frame: RefCell::new(Frame {
                transient,
                ..Frame::default()
            }),
            succeeded: Cell::new(false),
        });
        RUNNING.with(|running| running.borrow_mut().push(shared.clone() as Rc<dyn Any>));
        Ok(Self {
            shared,
            entry: root.clone(),
            owner: true,
            _lock: lock,
        })
    }

    /// Root module of the running call
    pub fn root(&self) -> &Module<V> {
        &self.shared.root
    }

    /// Whether this context started the call rather than joining it
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Scope positioned at the module this context was entered with
    pub fn scope(&self) -> Scope<'_, V> {
        Scope {
            ctx: &self.shared,
            module: self.entry.clone(),
        }
    }

    /// Whether `id` names a node of the active graph
    pub fn contains(&self, id: NodeId) -> bool {
        self.shared.contains(id)
    }

    /// Mark the call as successful
    ///
    /// Values supplied and computed during a successful call are remembered
    /// by their parameters when the owning context is dropped. A joined
    /// context leaves that decision to the owner.
    pub fn complete(&self) {
        if self.owner {
            self.shared.succeeded.set(true);
        }
    }

    /// Mark the call as successful and tear the context down
    pub fn finish(self) {
        self.complete();
    }

    /// Resolve the current value of `param`
    pub fn resolve(&self, param: &Param<V>) -> GraphResult<V> {
        self.shared.resolve(param)
    }
}

/// Innermost call on this thread whose graph contains `id`
fn running_call<V: NumericValue>(id: NodeId) -> Option<Rc<Shared<V>>> {
    RUNNING.with(|running| {
        running
            .borrow()
            .iter()
            .rev()
            .filter_map(|call| call.clone().downcast::<Shared<V>>().ok())
            .find(|shared| shared.contains(id))
    })
}

impl<V: NumericValue> Shared<V> {
    fn contains(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|node| node.id() == id)
    }

    fn resolve(&self, param: &Param<V>) -> GraphResult<V> {
        let id = param.id();
        let path = match self.params.get(&id) {
            Some((path, _)) => path.as_str(),
            None => {
                return Err(GraphError::NotFound(format!(
                    "parameter '{}' is not part of the active graph rooted at '{}'",
                    param.name(),
                    self.root.name()
                )))
            }
        };

        {
            let frame = self.frame.borrow();
            if let Some((_, value)) = frame.overrides.iter().rev().find(|(key, _)| *key == id) {
                self.traced(path, "override");
                return Ok(value.clone());
            }
            if let Some(value) = frame.transient.get(&id) {
                self.traced(path, "dynamic");
                return Ok(value.clone());
            }
        }

        let snapshot = param.snapshot();
        match snapshot.state {
            ParamState::Static => {
                self.traced(path, "static");
                snapshot.value.ok_or_else(|| {
                    GraphError::InvalidState(format!("static parameter '{}' has no value", path))
                })
            }
            ParamState::Dynamic => Err(GraphError::Unresolved(format!(
                "dynamic parameter '{}' has no value in this call",
                path
            ))),
            ParamState::Pointer => self.evaluate(param, path, snapshot),
        }
    }

    fn evaluate(&self, param: &Param<V>, path: &str, snapshot: ParamSnapshot<V>) -> GraphResult<V> {
        let id = param.id();
        // a pointer reading an overridden parameter must not see or fill the cache
        let bypass = self.shadowed(param);
        if !bypass {
            let cached = self.frame.borrow().cache.get(&id).cloned();
            if let Some(value) = cached {
                self.traced(path, "cache");
                return Ok(value);
            }
        }

        if !self.frame.borrow_mut().evaluating.insert(id) {
            return Err(GraphError::CyclicGraph(format!(
                "pointer '{}' depends on itself",
                path
            )));
        }
        let result = self.run_resolver(path, snapshot);
        self.frame.borrow_mut().evaluating.remove(&id);
        let value = result?;

        self.traced(path, "pointer");
        if !bypass {
            self.frame.borrow_mut().cache.insert(id, value.clone());
        }
        Ok(value)
    }

    /// Whether `param` depends on a parameter with an override installed
    fn shadowed(&self, param: &Param<V>) -> bool {
        let overridden: HashSet<NodeId> = self
            .frame
            .borrow()
            .overrides
            .iter()
            .map(|(id, _)| *id)
            .collect();
        !overridden.is_empty()
            && LinkResolver::dependencies(param)
                .iter()
                .any(|upstream| overridden.contains(&upstream.id()))
    }

    fn run_resolver(&self, path: &str, snapshot: ParamSnapshot<V>) -> GraphResult<V> {
        let resolver = snapshot.resolver.ok_or_else(|| {
            GraphError::InvalidState(format!("pointer '{}' has no resolver", path))
        })?;
        let mut values = Vec::with_capacity(snapshot.links.len());
        for (name, upstream) in &snapshot.links {
            values.push((name.clone(), self.resolve(upstream)?));
        }
        resolver(&LinkValues::new(path, values))
    }

    fn push_override(&self, id: NodeId, value: V) {
        self.frame.borrow_mut().overrides.push((id, value));
    }

    fn pop_override(&self) {
        self.frame.borrow_mut().overrides.pop();
    }

    fn traced(&self, path: &str, source: &'static str) {
        if self.config.trace_resolution {
            trace!(path = %path, source, "Resolved parameter");
        }
    }
}

impl<V: NumericValue> Drop for ActivationContext<V> {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        let this = Rc::as_ptr(&self.shared) as *const ();
        let _ = RUNNING.try_with(|running| {
            running
                .borrow_mut()
                .retain(|call| Rc::as_ptr(call) as *const () != this)
        });

        let shared = &self.shared;
        let frame = std::mem::take(&mut *shared.frame.borrow_mut());
        for node in &shared.nodes {
            node.set_active(false);
        }

        if shared.succeeded.get() {
            for (id, value) in frame.transient.into_iter().chain(frame.cache) {
                if let Some((_, param)) = shared.params.get(&id) {
                    param.remember(value);
                }
            }
            debug!(root = %shared.root.name(), "Deactivated graph");
        } else {
            warn!(root = %shared.root.name(), "Tearing down graph after a failed call");
        }
    }
}

/// Payloads for calls rooted at a module are read in valid representation
///
/// While the guard lives, every top-level call rooted at the module maps
/// its payload back from the valid representation of each dynamic
/// parameter before the call sees it. The previous setting returns when
/// the guard is dropped.
pub struct ValidContext<V: NumericValue> {
    module: Module<V>,
    previous: bool,
}

impl<V: NumericValue> ValidContext<V> {
    /// Read payloads of calls rooted at `module` in valid representation
    pub fn enter(module: &Module<V>) -> Self {
        let previous = module.replace_valid_context(true);
        Self {
            module: module.clone(),
            previous,
        }
    }
}

impl<V: NumericValue> Drop for ValidContext<V> {
    fn drop(&mut self) {
        self.module.replace_valid_context(self.previous);
    }
}

/// View of the active graph from one module
///
/// Forward bodies receive a scope for the module they were declared on and
/// use it to read further parameters, install overrides and make nested
/// calls.
pub struct Scope<'a, V: NumericValue> {
    ctx: &'a Shared<V>,
    module: Module<V>,
}

impl<'a, V: NumericValue> Scope<'a, V> {
    /// Module this scope is positioned at
    pub fn module(&self) -> &Module<V> {
        &self.module
    }

    /// Resolve the parameter at `path` relative to this scope's module
    pub fn get(&self, path: &str) -> GraphResult<V> {
        let param = self.module.find_param(path)?;
        self.ctx.resolve(&param)
    }

    /// Resolve `param`, which must belong to the active graph
    pub fn value(&self, param: &Param<V>) -> GraphResult<V> {
        self.ctx.resolve(param)
    }

    /// Scope positioned at `module`, which must belong to the active graph
    pub fn enter(&self, module: &Module<V>) -> GraphResult<Scope<'a, V>> {
        if !self.ctx.contains(module.id()) {
            return Err(GraphError::NotFound(format!(
                "module '{}' is not part of the active graph rooted at '{}'",
                module.name(),
                self.ctx.root.name()
            )));
        }
        Ok(Scope {
            ctx: self.ctx,
            module: module.clone(),
        })
    }

    /// Run `f` with the parameter at `path` overridden by `value`
    ///
    /// The override is removed when `f` returns or unwinds. The parameter's
    /// stored and cached values are not touched; pointers depending on it
    /// are recomputed inside `f`.
    pub fn with_override<T, F>(&self, path: &str, value: impl Into<V>, f: F) -> GraphResult<T>
    where
        F: FnOnce(&Scope<'a, V>) -> T,
    {
        let param = self.module.find_param(path)?;
        if !self.ctx.params.contains_key(&param.id()) {
            return Err(GraphError::NotFound(format!(
                "parameter '{}' is not part of the active graph",
                path
            )));
        }
        let value = value.into();
        if let Some(declared) = param.shape() {
            let shape = value.shape();
            if !shape.ends_with(&declared) {
                return Err(GraphError::Shape(format!(
                    "override of shape {} for '{}' does not match its shape {}",
                    shape, path, declared
                )));
            }
        }

        self.ctx.push_override(param.id(), value);
        let _guard = OverrideGuard { ctx: self.ctx };
        Ok(f(self))
    }
}

struct OverrideGuard<'a, V: NumericValue> {
    ctx: &'a Shared<V>,
}

impl<V: NumericValue> Drop for OverrideGuard<'_, V> {
    fn drop(&mut self) {
        self.ctx.pop_override();
    }
}
