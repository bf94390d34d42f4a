/// Conversion between a graph's dynamic parameters and flat payloads
pub mod flatten;

/// Call-scoped activation and value resolution
pub mod activation;

/// Wrapping user functions with the activation protocol
pub mod forward;

/// Saving, appending and loading graph state
pub mod state_service;
