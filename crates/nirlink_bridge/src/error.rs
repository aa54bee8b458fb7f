// SPDX-License-Identifier: MIT OR Apache-2.0
//! Conversion errors.

use nirlink_graph::{CycleError, GraphError, NodeTag};
use nirlink_nn::{ModuleError, TypeKey};
use thiserror::Error;

/// Errors raised while tracing or interpreting
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A call met during tracing cannot be represented in the graph
    #[error("Unsupported operation `{operation}` at `{path}`")]
    UnsupportedOperation {
        /// Operation or layer name
        operation: String,
        /// Module path of the call site
        path: String,
    },

    /// Several registry entries match a module equally well
    #[error("Ambiguous mapping for {module}: {candidates:?} match with equal precedence")]
    AmbiguousMapping {
        /// Concrete module type
        module: TypeKey,
        /// Keys of the tied entries
        candidates: Vec<TypeKey>,
    },

    /// No constructor is registered for a node kind
    #[error("No constructor registered for node `{node}` of kind {tag}")]
    UnsupportedNode {
        /// Node name
        node: String,
        /// Node kind
        tag: NodeTag,
    },

    /// State passed to a composed module does not fit its graph
    #[error("State mismatch at `{path}`: {reason}")]
    StructuralMismatch {
        /// State path
        path: String,
        /// What disagreed
        reason: String,
    },

    /// Edges form a cycle that is not a recurrent pattern
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// Graph boundary cannot be expressed as a single-input, single-output module
    #[error("Unsupported graph boundary: {0}")]
    UnsupportedBoundary(String),

    /// A conversion function rejected its input
    #[error("Cannot convert {subject}: {reason}")]
    Conversion {
        /// Module type or node name being converted
        subject: String,
        /// Why it failed
        reason: String,
    },

    /// Graph operation failed
    #[error(transparent)]
    Graph(GraphError),

    /// Module execution failed
    #[error(transparent)]
    Module(ModuleError),

    /// Configuration could not be read or written
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for conversions
pub type Result<T> = std::result::Result<T, BridgeError>;

impl From<GraphError> for BridgeError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Cycle(cycle) => BridgeError::Cycle(cycle),
            other => BridgeError::Graph(other),
        }
    }
}

impl From<ModuleError> for BridgeError {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::External(inner) => match inner.downcast::<BridgeError>() {
                Ok(bridge) => *bridge,
                Err(other) => BridgeError::Module(ModuleError::External(other)),
            },
            ModuleError::StructuralMismatch { path, reason } => BridgeError::StructuralMismatch { path, reason },
            other => BridgeError::Module(other),
        }
    }
}

impl From<BridgeError> for ModuleError {
    fn from(err: BridgeError) -> Self {
        ModuleError::External(Box::new(err))
    }
}
