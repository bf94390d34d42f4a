//! Forward calls
//!
//! [`Forward`] wraps a user function together with the names of the
//! parameters it consumes. Calling it from outside runs the full activation
//! protocol; calling it from inside another forward body on the same thread
//! joins the running call instead of accepting a new payload.

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::activation::{ActivationContext, Scope};
use super::flatten::Payload;
use crate::domain::module::Module;
use crate::error::{GraphError, GraphResult};
use crate::types::NumericValue;

/// Resolved values of a forward's declared parameters
#[derive(Debug, Clone)]
pub struct Injected<V> {
    values: Vec<(String, V)>,
}

impl<V> Injected<V> {
    /// Value injected for the declared parameter `name`
    pub fn get(&self, name: &str) -> GraphResult<&V> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
            .ok_or_else(|| GraphError::NotFound(format!("injected parameter '{}'", name)))
    }

    /// Iterate over `(name, value)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of injected values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether nothing was injected
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

type Body<V, A, R, E> = dyn Fn(&Scope<'_, V>, &Injected<V>, A) -> Result<R, E> + Send + Sync;

/// A user function bound to a module and its declared parameters
///
/// `A` is the function's ordinary argument type, `R` its result and `E` its
/// error type, which must be able to carry a [`GraphError`].
pub struct Forward<V: NumericValue, A, R, E> {
    module: Module<V>,
    name: String,
    declared: Vec<String>,
    body: Arc<Body<V, A, R, E>>,
}

impl<V, A, R, E> Forward<V, A, R, E>
where
    V: NumericValue,
    E: From<GraphError>,
{
    /// Bind `body` to `module`
    ///
    /// `declared` lists parameter paths, relative to `module`, whose values
    /// are injected into every invocation.
    pub fn new<F>(module: &Module<V>, name: &str, declared: &[&str], body: F) -> Self
    where
        F: Fn(&Scope<'_, V>, &Injected<V>, A) -> Result<R, E> + Send + Sync + 'static,
    {
        Self {
            module: module.clone(),
            name: name.to_string(),
            declared: declared.iter().map(|s| s.to_string()).collect(),
            body: Arc::new(body),
        }
    }

    /// Name of the forward
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module the forward is bound to
    pub fn module(&self) -> &Module<V> {
        &self.module
    }

    /// Declared parameter paths
    pub fn declared(&self) -> &[String] {
        &self.declared
    }

    /// Run a call with `payload` supplying the dynamic parameters
    ///
    /// The graph is torn down before this returns, whatever the outcome.
    /// When the module already takes part in a call running on this thread,
    /// the call joins it; `payload` must then be [`Payload::None`].
    pub fn call(&self, args: A, payload: Payload<V>) -> Result<R, E> {
        let ctx = ActivationContext::enter(&self.module, payload)?;
        debug!(forward = %self.name, module = %self.module.name(), "Calling forward");
        let result = self.invoke(&ctx.scope(), args);
        if result.is_ok() {
            ctx.complete();
        }
        result
    }

    /// Run a nested call inside an active scope
    pub fn call_in(&self, scope: &Scope<'_, V>, args: A) -> Result<R, E> {
        let nested = scope.enter(&self.module)?;
        self.invoke(&nested, args)
    }

    fn invoke(&self, scope: &Scope<'_, V>, args: A) -> Result<R, E> {
        let injected = self.inject(scope)?;
        (self.body)(scope, &injected, args)
    }

    fn inject(&self, scope: &Scope<'_, V>) -> GraphResult<Injected<V>> {
        let mut values = Vec::with_capacity(self.declared.len());
        for path in &self.declared {
            values.push((path.clone(), scope.get(path)?));
        }
        Ok(Injected { values })
    }
}

impl<V: NumericValue, A, R, E> Clone for Forward<V, A, R, E> {
    fn clone(&self) -> Self {
        Self {
            module: self.module.clone(),
            name: self.name.clone(),
            declared: self.declared.clone(),
            body: self.body.clone(),
        }
    }
}

impl<V: NumericValue, A, R, E> fmt::Debug for Forward<V, A, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forward")
            .field("name", &self.name)
            .field("module", &self.module.name())
            .field("declared", &self.declared)
            .finish()
    }
}
