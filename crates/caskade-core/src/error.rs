use thiserror::Error;

/// Core error type for the Caskade engine
///
/// Every variant carries the qualified path (or name) of the node that
/// caused the failure, followed by a short explanation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// A permanent mutation was attempted while the graph is active
    #[error("Active state error: {0}")]
    ActiveState(String),

    /// A state transition was requested without a recoverable value
    #[error("Invalid state error: {0}")]
    InvalidState(String),

    /// A link or attachment would introduce a cycle
    #[error("Cyclic graph error: {0}")]
    CyclicGraph(String),

    /// A value does not match a parameter's declared shape
    #[error("Shape error: {0}")]
    Shape(String),

    /// A persisted chain does not match the graph or record being written
    #[error("Schema error: {0}")]
    Schema(String),

    /// A persisted record index is out of range
    #[error("Index error: record {index} out of range for chain {chain} ({len} records)")]
    IndexOutOfRange {
        /// Chain key
        chain: String,
        /// Requested record index
        index: usize,
        /// Number of records in the chain
        len: usize,
    },

    /// A child name is already taken inside a module or link set
    #[error("Name collision: {0}")]
    NameCollision(String),

    /// A named node could not be found
    #[error("Node not found: {0}")]
    NotFound(String),

    /// A parameter payload does not fit the dynamic parameters of a graph
    #[error("Payload error: {0}")]
    Payload(String),

    /// A dynamic parameter has no value in the current activation
    #[error("Unresolved parameter: {0}")]
    Unresolved(String),

    /// A user-supplied resolver failed
    #[error("Resolver error: {0}")]
    Resolver(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStore(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result alias used throughout the engine
pub type GraphResult<T> = Result<T, GraphError>;

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (GraphError::ActiveState("main.x".to_string()), "Active state error: main.x"),
            (GraphError::InvalidState("x".to_string()), "Invalid state error: x"),
            (GraphError::CyclicGraph("a -> b".to_string()), "Cyclic graph error: a -> b"),
            (GraphError::Shape("y".to_string()), "Shape error: y"),
            (GraphError::Schema("chain".to_string()), "Schema error: chain"),
            (GraphError::NameCollision("k".to_string()), "Name collision: k"),
            (GraphError::NotFound("q".to_string()), "Node not found: q"),
            (GraphError::Payload("len".to_string()), "Payload error: len"),
            (GraphError::Unresolved("z".to_string()), "Unresolved parameter: z"),
            (GraphError::Resolver("boom".to_string()), "Resolver error: boom"),
            (GraphError::StateStore("db".to_string()), "State store error: db"),
            (GraphError::Serialization("ser".to_string()), "Serialization error: ser"),
            (GraphError::Configuration("cfg".to_string()), "Configuration error: cfg"),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_index_error_display() {
        let error = GraphError::IndexOutOfRange {
            chain: "run".to_string(),
            index: 4,
            len: 2,
        };
        assert_eq!(
            error.to_string(),
            "Index error: record 4 out of range for chain run (2 records)"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: GraphError = json_error.into();

        match error {
            GraphError::Serialization(msg) => {
                assert!(msg.contains("expected value"));
            }
            _ => panic!("Expected Serialization variant"),
        }
    }
}
