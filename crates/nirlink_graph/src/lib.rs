// SPDX-License-Identifier: MIT OR Apache-2.0
//! Neuromorphic Intermediate Representation (NIR) graph model for `nirlink`.
//!
//! This crate provides the interchange format shared by the tracer and the
//! interpreter:
//! - A fixed catalog of typed primitive nodes (affine maps, neurons, pooling)
//! - Directed signal-flow edges between named nodes
//! - Named tensor-shape signatures on every node and on the graph boundary
//! - Hierarchical composition through subgraph nodes
//!
//! ## Architecture
//!
//! A [`Graph`] owns its nodes by unique name and an ordered edge list. Graphs
//! can be validated, ordered for execution (including recurrent graphs whose
//! cycles pass through a stateful node), shape-inferred and persisted as RON
//! or JSON.

pub mod types;
pub mod node;
pub mod edge;
pub mod graph;
pub mod persist;

pub use types::{Array, Metadata, Shape, TypeSignature};
pub use node::{Node, NodeKind, NodeTag};
pub use edge::Edge;
pub use graph::{CycleError, ExecutionOrder, Graph, GraphError};
pub use persist::{GraphFormat, GRAPH_FORMAT_VERSION};
