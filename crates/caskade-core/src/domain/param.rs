//! Leaf parameters
//!
//! A [`Param`] is a cheap, cloneable handle; every clone aliases the same
//! parameter, so a value set through one handle is visible through all of
//! them. A parameter is in exactly one of three states:
//!
//! - **dynamic**: its value is supplied by the caller of a forward call
//! - **static**: it holds a fixed value
//! - **pointer**: its value is computed by a resolver from linked parameters

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

use super::links::LinkResolver;
use super::node::NodeId;
use super::valid::ValidRange;
use crate::error::{GraphError, GraphResult};
use crate::types::{NumericValue, Shape, Tensor};

/// Arbitrary user metadata attached to a parameter; never interpreted by the engine
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Resolver computing a pointer parameter's value from its linked parameters
pub type Resolver<V> = Arc<dyn Fn(&LinkValues<V>) -> GraphResult<V> + Send + Sync>;

/// Name under which [`Param::alias_of`] links its target
pub const ALIAS_LINK: &str = "target";

/// Value-source state of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamState {
    /// Value supplied at call time
    Dynamic,
    /// Fixed value
    Static,
    /// Value derived from linked parameters
    Pointer,
}

impl fmt::Display for ParamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamState::Dynamic => write!(f, "dynamic"),
            ParamState::Static => write!(f, "static"),
            ParamState::Pointer => write!(f, "pointer"),
        }
    }
}

/// Resolved values of a pointer's links, handed to its resolver
#[derive(Debug, Clone)]
pub struct LinkValues<V> {
    pointer: String,
    values: Vec<(String, V)>,
}

impl<V> LinkValues<V> {
    pub(crate) fn new(pointer: impl Into<String>, values: Vec<(String, V)>) -> Self {
        Self {
            pointer: pointer.into(),
            values,
        }
    }

    /// Value of the link registered under `name`
    pub fn get(&self, name: &str) -> GraphResult<&V> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
            .ok_or_else(|| {
                GraphError::NotFound(format!("link '{}' of pointer '{}'", name, self.pointer))
            })
    }

    /// Iterate over `(link name, value)` pairs in link order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of links
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the pointer has no links
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub(crate) struct ParamInner<V: NumericValue> {
    state: ParamState,
    /// Fixed value when static; last remembered value otherwise
    value: Option<V>,
    shape: Option<Shape>,
    valid: Option<ValidRange>,
    units: Option<String>,
    metadata: Metadata,
    resolver: Option<Resolver<V>>,
    links: Vec<(String, Param<V>)>,
    owner: Option<NodeId>,
    active: bool,
}

/// Consistent view of a parameter taken under a single lock acquisition
pub(crate) struct ParamSnapshot<V: NumericValue> {
    pub state: ParamState,
    pub value: Option<V>,
    pub resolver: Option<Resolver<V>>,
    pub links: Vec<(String, Param<V>)>,
}

/// Handle to a leaf parameter
pub struct Param<V: NumericValue = Tensor> {
    id: NodeId,
    name: Arc<str>,
    inner: Arc<RwLock<ParamInner<V>>>,
}

impl<V: NumericValue> Param<V> {
    fn from_inner(name: &str, inner: ParamInner<V>) -> Self {
        Self {
            id: NodeId::new(),
            name: Arc::from(name),
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    fn empty_inner(state: ParamState) -> ParamInner<V> {
        ParamInner {
            state,
            value: None,
            shape: None,
            valid: None,
            units: None,
            metadata: Metadata::new(),
            resolver: None,
            links: Vec::new(),
            owner: None,
            active: false,
        }
    }

    /// Create a dynamic parameter without a declared shape
    pub fn dynamic(name: &str) -> Self {
        Self::from_inner(name, Self::empty_inner(ParamState::Dynamic))
    }

    /// Create a dynamic parameter with a declared shape
    pub fn dynamic_with_shape(name: &str, shape: impl Into<Shape>) -> Self {
        let mut inner = Self::empty_inner(ParamState::Dynamic);
        inner.shape = Some(shape.into());
        Self::from_inner(name, inner)
    }

    /// Create a static parameter; its declared shape is the value's shape
    pub fn with_value(name: &str, value: impl Into<V>) -> Self {
        let value = value.into();
        let mut inner = Self::empty_inner(ParamState::Static);
        inner.shape = Some(value.shape());
        inner.value = Some(value);
        Self::from_inner(name, inner)
    }

    /// Create a pointer parameter computed by `resolver` from `links`
    pub fn pointer<F>(name: &str, links: &[(&str, &Param<V>)], resolver: F) -> GraphResult<Self>
    where
        F: Fn(&LinkValues<V>) -> GraphResult<V> + Send + Sync + 'static,
    {
        let param = Self::dynamic(name);
        for (link_name, upstream) in links {
            param.link(link_name, upstream)?;
        }
        param.set_resolver(resolver)?;
        Ok(param)
    }

    /// Create a pointer parameter that mirrors `target`
    pub fn alias_of(name: &str, target: &Param<V>) -> Self {
        let mut inner = Self::empty_inner(ParamState::Pointer);
        inner.links.push((ALIAS_LINK.to_string(), target.clone()));
        inner.resolver = Some(alias_resolver());
        Self::from_inner(name, inner)
    }

    /// Declare the parameter's shape
    pub fn with_shape(self, shape: impl Into<Shape>) -> GraphResult<Self> {
        self.set_shape(Some(shape.into()))?;
        Ok(self)
    }

    /// Restrict the parameter to `range`
    pub fn with_valid(self, range: ValidRange) -> GraphResult<Self> {
        self.set_valid(Some(range))?;
        Ok(self)
    }

    /// Record the unit the parameter is expressed in
    pub fn with_units(self, units: &str) -> Self {
        self.set_units(Some(units.to_string()));
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(self, key: &str, value: serde_json::Value) -> Self {
        self.set_metadata(key, value);
        self
    }

    /// Identity of the parameter
    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Name the parameter was created with
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value-source state
    pub fn state(&self) -> ParamState {
        self.inner.read().state
    }

    /// Whether the parameter is dynamic
    pub fn is_dynamic(&self) -> bool {
        self.state() == ParamState::Dynamic
    }

    /// Whether the parameter is static
    pub fn is_static(&self) -> bool {
        self.state() == ParamState::Static
    }

    /// Whether the parameter is a pointer
    pub fn is_pointer(&self) -> bool {
        self.state() == ParamState::Pointer
    }

    /// Declared shape, if any
    pub fn shape(&self) -> Option<Shape> {
        self.inner.read().shape.clone()
    }

    /// The stored value of a static parameter
    pub fn value(&self) -> Option<V> {
        let inner = self.inner.read();
        match inner.state {
            ParamState::Static => inner.value.clone(),
            _ => None,
        }
    }

    /// Last value known for the parameter, whatever its state
    ///
    /// For dynamic parameters this is the last value supplied in a call;
    /// for pointers, the last value their resolver produced in a call.
    pub fn last_value(&self) -> Option<V> {
        self.inner.read().value.clone()
    }

    /// Valid range, if any
    pub fn valid(&self) -> Option<ValidRange> {
        self.inner.read().valid.clone()
    }

    /// Unit the parameter is expressed in, if recorded
    pub fn units(&self) -> Option<String> {
        self.inner.read().units.clone()
    }

    /// Record or clear the parameter's unit
    pub fn set_units(&self, units: Option<String>) {
        self.inner.write().units = units;
    }

    /// Metadata attached to the parameter
    pub fn metadata(&self) -> Metadata {
        self.inner.read().metadata.clone()
    }

    /// Set a metadata entry
    pub fn set_metadata(&self, key: &str, value: serde_json::Value) {
        self.inner.write().metadata.insert(key.to_string(), value);
    }

    /// Linked upstream parameters in link order
    pub fn links(&self) -> Vec<(String, Param<V>)> {
        self.inner.read().links.clone()
    }

    /// Module owning this parameter, if any
    pub fn owner(&self) -> Option<NodeId> {
        self.inner.read().owner
    }

    /// Whether the parameter belongs to an active graph
    pub fn is_active(&self) -> bool {
        self.inner.read().active
    }

    /// Whether two handles refer to the same parameter
    #[inline]
    pub fn same_node(&self, other: &Param<V>) -> bool {
        self.id == other.id
    }

    /// Assign a fixed value; the parameter becomes static
    ///
    /// Drops any resolver and links. The value must match the declared
    /// shape; an undeclared shape is taken from the value.
    pub fn set_value(&self, value: impl Into<V>) -> GraphResult<()> {
        let value = value.into();
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        let shape = value.shape();
        match &inner.shape {
            Some(declared) if *declared != shape => {
                return Err(GraphError::Shape(format!(
                    "value of shape {} does not match shape {} of parameter '{}'",
                    shape, declared, self.name
                )));
            }
            Some(_) => {}
            None => inner.shape = Some(shape),
        }
        self.check_range(inner.valid.as_ref(), &value);
        inner.state = ParamState::Static;
        inner.value = Some(value);
        inner.resolver = None;
        inner.links.clear();
        Ok(())
    }

    /// Change the valid range
    ///
    /// A stored value outside the new range is kept and logged as a warning.
    pub fn set_valid(&self, range: Option<ValidRange>) -> GraphResult<()> {
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        if let (ParamState::Static, Some(value)) = (inner.state, &inner.value) {
            self.check_range(range.as_ref(), value);
        }
        inner.valid = range;
        Ok(())
    }

    /// Map `value` from the valid range onto the real line
    ///
    /// Without a valid range the value is returned unchanged. Pointers have
    /// no valid representation.
    pub fn to_valid(&self, value: &V) -> GraphResult<V> {
        self.transform(value, "to", ValidRange::to_valid)
    }

    /// Map `value` from the real line back into the valid range
    pub fn from_valid(&self, value: &V) -> GraphResult<V> {
        self.transform(value, "from", ValidRange::from_valid)
    }

    fn transform(
        &self,
        value: &V,
        direction: &str,
        f: fn(&ValidRange, &[f64]) -> Vec<f64>,
    ) -> GraphResult<V> {
        let inner = self.inner.read();
        if inner.state == ParamState::Pointer {
            return Err(GraphError::InvalidState(format!(
                "pointer '{}' has no valid representation to convert {}",
                self.name, direction
            )));
        }
        let Some(range) = &inner.valid else {
            return Ok(value.clone());
        };
        let shape = value.shape();
        V::from_elements(f(range, &value.to_elements()), &shape).ok_or_else(|| {
            GraphError::Shape(format!(
                "value of shape {} for '{}' cannot be rebuilt after valid conversion",
                shape, self.name
            ))
        })
    }

    fn check_range(&self, range: Option<&ValidRange>, value: &V) {
        if let Some(range) = range {
            if !range.contains(&value.to_elements()) {
                warn!(
                    param = %self.name,
                    lower = ?range.lower(),
                    upper = ?range.upper(),
                    "Value outside of valid range"
                );
            }
        }
    }

    /// Clear the stored value and make the parameter dynamic
    ///
    /// Drops any resolver and links; the declared shape is kept.
    pub fn to_dynamic(&self) -> GraphResult<()> {
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        inner.state = ParamState::Dynamic;
        inner.value = None;
        inner.resolver = None;
        inner.links.clear();
        Ok(())
    }

    /// Fix the last known value and make the parameter static
    ///
    /// A pointer whose links are all resolvable outside a call is evaluated
    /// now; when some link is dynamic, the last value it produced inside a
    /// call is used. Resolver failures are returned as they are.
    pub fn to_static(&self) -> GraphResult<()> {
        let snapshot = {
            let inner = self.inner.read();
            self.guard(&inner)?;
            self.snapshot_locked(&inner)
        };
        let value = match snapshot.state {
            ParamState::Static => return Ok(()),
            ParamState::Dynamic => snapshot.value,
            ParamState::Pointer => match self.resolve_detached() {
                Ok(value) => Some(value),
                Err(GraphError::Unresolved(_)) => snapshot.value,
                Err(err) => return Err(err),
            },
        };
        let value = value.ok_or_else(|| {
            GraphError::InvalidState(format!(
                "parameter '{}' has no value to fix as static",
                self.name
            ))
        })?;

        let mut inner = self.inner.write();
        self.guard(&inner)?;
        if inner.shape.is_none() {
            inner.shape = Some(value.shape());
        }
        inner.state = ParamState::Static;
        inner.value = Some(value);
        inner.resolver = None;
        inner.links.clear();
        Ok(())
    }

    /// Install a resolver; the parameter becomes a pointer over its links
    pub fn set_resolver<F>(&self, resolver: F) -> GraphResult<()>
    where
        F: Fn(&LinkValues<V>) -> GraphResult<V> + Send + Sync + 'static,
    {
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        inner.state = ParamState::Pointer;
        inner.value = None;
        inner.resolver = Some(Arc::new(resolver));
        Ok(())
    }

    /// Make the parameter a pointer mirroring `target`
    pub fn point_to(&self, target: &Param<V>) -> GraphResult<()> {
        LinkResolver::check_link(self, target)?;
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        inner.links.clear();
        inner.links.push((ALIAS_LINK.to_string(), target.clone()));
        inner.state = ParamState::Pointer;
        inner.value = None;
        inner.resolver = Some(alias_resolver());
        Ok(())
    }

    /// Link an upstream parameter under `name`
    ///
    /// Rejected when the name is taken or when the upstream parameter
    /// already depends on this one.
    pub fn link(&self, name: &str, upstream: &Param<V>) -> GraphResult<()> {
        {
            let inner = self.inner.read();
            self.guard(&inner)?;
            if inner.links.iter().any(|(key, _)| key == name) {
                return Err(GraphError::NameCollision(format!(
                    "parameter '{}' already has a link named '{}'",
                    self.name, name
                )));
            }
        }
        LinkResolver::check_link(self, upstream)?;
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        inner.links.push((name.to_string(), upstream.clone()));
        Ok(())
    }

    /// Remove the link registered under `name`
    pub fn unlink(&self, name: &str) -> GraphResult<Param<V>> {
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        let position = inner
            .links
            .iter()
            .position(|(key, _)| key == name)
            .ok_or_else(|| {
                GraphError::NotFound(format!("link '{}' of parameter '{}'", name, self.name))
            })?;
        Ok(inner.links.remove(position).1)
    }

    /// Change the declared shape
    pub fn set_shape(&self, shape: Option<Shape>) -> GraphResult<()> {
        let mut inner = self.inner.write();
        self.guard(&inner)?;
        if let (Some(shape), ParamState::Static, Some(value)) = (&shape, inner.state, &inner.value)
        {
            if value.shape() != *shape {
                return Err(GraphError::Shape(format!(
                    "shape {} does not match stored value of shape {} in parameter '{}'",
                    shape,
                    value.shape(),
                    self.name
                )));
            }
        }
        inner.shape = shape;
        Ok(())
    }

    /// Evaluate the parameter outside of any activation
    ///
    /// Static parameters yield their value and pointers evaluate their
    /// resolver over detached link values; dynamic parameters have no value
    /// outside a call.
    pub fn resolve_detached(&self) -> GraphResult<V> {
        self.resolve_detached_inner(&mut HashSet::new())
    }

    fn resolve_detached_inner(&self, visiting: &mut HashSet<NodeId>) -> GraphResult<V> {
        let snapshot = self.snapshot();
        match snapshot.state {
            ParamState::Static => snapshot.value.ok_or_else(|| {
                GraphError::InvalidState(format!("static parameter '{}' has no value", self.name))
            }),
            ParamState::Dynamic => Err(GraphError::Unresolved(format!(
                "dynamic parameter '{}' has no value outside an active call",
                self.name
            ))),
            ParamState::Pointer => {
                if !visiting.insert(self.id) {
                    return Err(GraphError::CyclicGraph(format!(
                        "pointer '{}' depends on itself",
                        self.name
                    )));
                }
                let mut values = Vec::with_capacity(snapshot.links.len());
                for (name, upstream) in &snapshot.links {
                    values.push((name.clone(), upstream.resolve_detached_inner(visiting)?));
                }
                visiting.remove(&self.id);
                let resolver = snapshot.resolver.ok_or_else(|| {
                    GraphError::InvalidState(format!("pointer '{}' has no resolver", self.name))
                })?;
                resolver(&LinkValues::new(self.name(), values))
            }
        }
    }

    pub(crate) fn snapshot(&self) -> ParamSnapshot<V> {
        let inner = self.inner.read();
        self.snapshot_locked(&inner)
    }

    fn snapshot_locked(&self, inner: &ParamInner<V>) -> ParamSnapshot<V> {
        ParamSnapshot {
            state: inner.state,
            value: inner.value.clone(),
            resolver: inner.resolver.clone(),
            links: inner.links.clone(),
        }
    }

    /// Remember a value produced during an activation without changing state
    ///
    /// The declared shape is never inferred here: a remembered value may
    /// carry batch dimensions.
    pub(crate) fn remember(&self, value: V) {
        let mut inner = self.inner.write();
        if inner.state != ParamState::Static {
            inner.value = Some(value);
        }
    }

    /// Overwrite valid range and units from a persisted record
    pub(crate) fn restore_bounds(&self, valid: Option<ValidRange>, units: Option<String>) {
        let mut inner = self.inner.write();
        inner.valid = valid;
        inner.units = units;
    }

    /// Overwrite value and metadata from a persisted record
    pub(crate) fn restore(&self, value: Option<V>, metadata: Metadata) -> GraphResult<()> {
        if let Some(value) = value {
            self.set_value(value)?;
        }
        let mut inner = self.inner.write();
        for (key, entry) in metadata {
            inner.metadata.insert(key, entry);
        }
        Ok(())
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.inner.write().active = active;
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

    fn guard(&self, inner: &ParamInner<V>) -> GraphResult<()> {
        if inner.active {
            return Err(GraphError::ActiveState(format!(
                "cannot modify parameter '{}' while its graph is active",
                self.name
            )));
        }
        Ok(())
    }
}

fn alias_resolver<V: NumericValue>() -> Resolver<V> {
    Arc::new(|links: &LinkValues<V>| links.get(ALIAS_LINK).cloned())
}

impl<V: NumericValue> Clone for Param<V> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<V: NumericValue> PartialEq for Param<V> {
    fn eq(&self, other: &Self) -> bool {
        self.same_node(other)
    }
}

impl<V: NumericValue> Eq for Param<V> {}

impl<V: NumericValue> fmt::Debug for Param<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("shape", &inner.shape)
            .field("value", &inner.value)
            .field("valid", &inner.valid)
            .field("links", &inner.links.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())
            .finish()
    }
}
