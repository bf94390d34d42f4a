//! Testing utilities for the Caskade engine.
//!
//! This crate provides graph builders and ready-made fixtures, assertion
//! helpers returning descriptive errors, counting resolvers for observing
//! pointer evaluation, and test logging setup.

pub mod assertions;
pub mod builders;
pub mod logging;
pub mod mocks;

pub use assertions::{
    assert_dynamic_order, assert_graph_inactive, assert_param_state, assert_param_value,
    ValidationError,
};
pub use builders::{nested_graph, ModuleBuilder, ScenarioGraph};
pub use logging::init_test_logging;
pub use mocks::CountingResolver;
