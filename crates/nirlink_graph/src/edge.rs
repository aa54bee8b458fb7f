// SPDX-License-Identifier: MIT OR Apache-2.0
//! Edge definitions for the graph.

use serde::{Deserialize, Serialize};

/// A directed signal-flow dependency between two named nodes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Producing node
    pub source: String,
    /// Consuming node
    pub destination: String,
}

impl Edge {
    /// Create a new edge
    pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// Check if this edge involves a specific node
    pub fn involves_node(&self, name: &str) -> bool {
        self.source == name || self.destination == name
    }
}
