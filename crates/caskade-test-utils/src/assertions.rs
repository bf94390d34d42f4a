//! Assertion utilities for validating parameter graphs.
//!
//! Each helper returns `Ok(())` when the graph matches the expectation and a
//! [`ValidationError`] describing the mismatch otherwise, so tests can use
//! `?` or `unwrap()` as they prefer.

use caskade_core::domain::traversal;
use caskade_core::{GraphError, Module, NumericValue, ParamState, Tensor};
use thiserror::Error;

/// Error type for graph validation failures
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A parameter is in the wrong state
    #[error("Invalid state for '{path}': expected {expected}, got {actual}")]
    StateMismatch {
        /// Parameter path
        path: String,
        /// Expected state
        expected: ParamState,
        /// Actual state
        actual: ParamState,
    },

    /// A parameter holds the wrong value
    #[error("Invalid value for '{path}': expected {expected}, got {actual}")]
    ValueMismatch {
        /// Parameter path
        path: String,
        /// Expected value
        expected: String,
        /// Actual value
        actual: String,
    },

    /// A node is still marked active
    #[error("Node '{0}' is still active")]
    StillActive(String),

    /// The dynamic ordering differs from the expected one
    #[error("Dynamic ordering mismatch: expected {expected:?}, got {actual:?}")]
    OrderMismatch {
        /// Expected paths
        expected: Vec<String>,
        /// Actual paths
        actual: Vec<String>,
    },

    /// Looking up the graph failed
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

/// Asserts that the parameter at `path` is in `expected` state
pub fn assert_param_state(
    module: &Module,
    path: &str,
    expected: ParamState,
) -> Result<(), ValidationError> {
    let actual = module.find_param(path)?.state();
    if actual != expected {
        return Err(ValidationError::StateMismatch {
            path: path.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Asserts that the parameter at `path` holds the static value `expected`
pub fn assert_param_value(
    module: &Module,
    path: &str,
    expected: impl Into<Tensor>,
) -> Result<(), ValidationError> {
    let expected = expected.into();
    let actual = module.find_param(path)?.value();
    if actual.as_ref() != Some(&expected) {
        return Err(ValidationError::ValueMismatch {
            path: path.to_string(),
            expected: format!("{:?}", expected.to_elements()),
            actual: match actual {
                Some(value) => format!("{:?}", value.to_elements()),
                None => "no value".to_string(),
            },
        });
    }
    Ok(())
}

/// Asserts that no node reachable from `module` is active
pub fn assert_graph_inactive(module: &Module) -> Result<(), ValidationError> {
    if module.is_active() {
        return Err(ValidationError::StillActive(module.name().to_string()));
    }
    let separator = module.config().path_separator.clone();
    for visit in traversal::walk(module, &separator) {
        if visit.node.is_active() {
            return Err(ValidationError::StillActive(visit.path));
        }
    }
    Ok(())
}

/// Asserts that the dynamic ordering of `module` equals `expected`
pub fn assert_dynamic_order(module: &Module, expected: &[&str]) -> Result<(), ValidationError> {
    let actual: Vec<String> = module.dynamic_params().into_iter().map(|e| e.path).collect();
    if actual != expected {
        return Err(ValidationError::OrderMismatch {
            expected: expected.iter().map(|s| s.to_string()).collect(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::ModuleBuilder;

    #[test]
    fn test_state_and_value_assertions() {
        let m = ModuleBuilder::new("m").dynamic("x").fixed("k", 2.0).build().unwrap();
        assert_param_state(&m, "x", ParamState::Dynamic).unwrap();
        assert_param_value(&m, "k", 2.0).unwrap();

        let err = assert_param_value(&m, "k", 3.0).unwrap_err();
        assert!(err.to_string().contains("'k'"));
        assert!(matches!(
            assert_param_state(&m, "x", ParamState::Static).unwrap_err(),
            ValidationError::StateMismatch { .. }
        ));
        assert!(matches!(
            assert_param_value(&m, "nope", 1.0).unwrap_err(),
            ValidationError::Graph(GraphError::NotFound(_))
        ));
    }

    #[test]
    fn test_order_and_activity() {
        let m = ModuleBuilder::new("m")
            .dynamic("a")
            .child("sub", ModuleBuilder::new("sub").dynamic("b"))
            .build()
            .unwrap();
        assert_dynamic_order(&m, &["a", "sub.b"]).unwrap();
        assert!(assert_dynamic_order(&m, &["sub.b", "a"]).is_err());
        assert_graph_inactive(&m).unwrap();
    }
}
