// Caskade Tests
//
// This is a meta-package that organizes the cross-crate test structure.
// It doesn't contain test code itself; the tests live under integration/
// and are registered as [[test]] targets in Cargo.toml.

/// Re-export the crates under test for easier access
pub use caskade_core as core;
pub use caskade_state_inmemory as state_inmemory;
pub use caskade_test_utils as test_utils;
