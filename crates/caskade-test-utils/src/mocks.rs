//! Resolvers with observable side effects
//!
//! A [`CountingResolver`] hands out resolver closures that bump a shared
//! counter on every evaluation, so tests can check how often a pointer was
//! actually computed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use caskade_core::{GraphError, GraphResult, LinkValues, Tensor};

/// Shared evaluation counter
#[derive(Debug, Clone, Default)]
pub struct CountingResolver {
    calls: Arc<AtomicUsize>,
}

impl CountingResolver {
    /// Create a counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of evaluations so far
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Reset the counter to zero
    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    /// Resolver returning the value linked under `link` times `factor`
    pub fn scaled(
        &self,
        link: &str,
        factor: f64,
    ) -> impl Fn(&LinkValues<Tensor>) -> GraphResult<Tensor> + Send + Sync + 'static {
        let calls = self.calls.clone();
        let link = link.to_string();
        move |links: &LinkValues<Tensor>| -> GraphResult<Tensor> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(links.get(&link)?.map(|v| v * factor))
        }
    }

    /// Resolver summing every linked value elementwise
    pub fn summing(&self) -> impl Fn(&LinkValues<Tensor>) -> GraphResult<Tensor> + Send + Sync + 'static {
        let calls = self.calls.clone();
        move |links: &LinkValues<Tensor>| -> GraphResult<Tensor> {
            calls.fetch_add(1, Ordering::SeqCst);
            let mut total: Option<Tensor> = None;
            for (name, value) in links.iter() {
                total = Some(match total {
                    None => value.clone(),
                    Some(acc) => acc.zip_with(value, |a, b| a + b).ok_or_else(|| {
                        GraphError::Resolver(format!("link '{}' has an incompatible shape", name))
                    })?,
                });
            }
            total.ok_or_else(|| GraphError::Resolver("nothing to sum".to_string()))
        }
    }

    /// Resolver that always fails after counting the attempt
    pub fn failing(&self, message: &str) -> impl Fn(&LinkValues<Tensor>) -> GraphResult<Tensor> + Send + Sync + 'static {
        let calls = self.calls.clone();
        let message = message.to_string();
        move |_: &LinkValues<Tensor>| -> GraphResult<Tensor> {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(GraphError::Resolver(message.clone()))
        }
    }
}
