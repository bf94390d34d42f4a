//!
//! Caskade Core - parameter-graph resolution engine
//!
//! This crate builds directed acyclic graphs of named numeric parameters
//! out of nested modules, routes dynamic, static and pointer values into
//! user functions at call time, flattens dynamic parameters to and from
//! array, list and mapping payloads, and persists graph state as chains.
//! Parameters may carry valid ranges, with payloads convertible to and from
//! an unconstrained representation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - nodes, parameters, modules, links and repositories
pub mod domain;

/// Application services - flattening, activation, forward calls and persistence
pub mod application;

/// Shapes, numeric values and the default backend
pub mod types;

/// Error types
pub mod error;

/// Engine configuration
pub mod config;

// Re-export key types
pub use config::EngineConfig;
pub use error::{GraphError, GraphResult};
pub use types::{NumericValue, Shape, Tensor};

// Re-export main API types for easy use
pub use domain::collection::{NodeList, NodeTuple};
pub use domain::graph::{EdgeKind, GraphEdge, GraphNode, GraphView};
pub use domain::links::LinkResolver;
pub use domain::module::Module;
pub use domain::node::{Node, NodeId, NodeKind};
pub use domain::param::{LinkValues, Metadata, Param, ParamState, Resolver};
pub use domain::repository::{Chain, ChainGroup, ChainStore, StoredValue};
pub use domain::valid::ValidRange;

// Application interfaces
pub use application::activation::{ActivationContext, Scope, ValidContext};
pub use application::flatten::{FlatEntry, Flattener, Payload};
pub use application::forward::{Forward, Injected};
pub use application::state_service::StateService;
