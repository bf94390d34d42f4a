/// Node identity and the node handle enum
pub mod node;

/// Leaf parameters
pub mod param;

/// Link bookkeeping and cycle detection
pub mod links;

/// Composite modules
pub mod module;

/// Depth-first graph traversal
pub mod traversal;

/// Read-only graph export
pub mod graph;

/// Repository interfaces for persisted chains
pub mod repository;

/// Valid ranges and their unconstrained representation
pub mod valid;

/// Positional node collections
pub mod collection;
