// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph persistence in RON and JSON.
//!
//! Files wrap the graph in a small envelope carrying a format version so that
//! newer files are rejected instead of misread.

use crate::graph::{Graph, GraphError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current graph file format version
pub const GRAPH_FORMAT_VERSION: u32 = 1;

/// On-disk envelope around a graph
#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    version: u32,
    graph: Graph,
}

/// Encoding used for graph files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GraphFormat {
    /// Rusty Object Notation
    #[default]
    Ron,
    /// JSON
    Json,
}

impl GraphFormat {
    /// Pick a format from a file extension (`.json` is JSON, anything else RON)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => GraphFormat::Json,
            _ => GraphFormat::Ron,
        }
    }
}

impl Graph {
    /// Encode as pretty-printed RON
    pub fn to_ron(&self) -> Result<String, GraphError> {
        let config = ron::ser::PrettyConfig::default()
            .struct_names(true)
            .enumerate_arrays(false);
        ron::ser::to_string_pretty(&self.envelope(), config)
            .map_err(|e| GraphError::Serialization(e.to_string()))
    }

    /// Decode from RON
    pub fn from_ron(content: &str) -> Result<Self, GraphError> {
        let file: GraphFile =
            ron::from_str(content).map_err(|e| GraphError::Serialization(e.to_string()))?;
        Self::open_envelope(file)
    }

    /// Encode as pretty-printed JSON
    pub fn to_json(&self) -> Result<String, GraphError> {
        serde_json::to_string_pretty(&self.envelope())
            .map_err(|e| GraphError::Serialization(e.to_string()))
    }

    /// Decode from JSON
    pub fn from_json(content: &str) -> Result<Self, GraphError> {
        let file: GraphFile =
            serde_json::from_str(content).map_err(|e| GraphError::Serialization(e.to_string()))?;
        Self::open_envelope(file)
    }

    /// Encode in the given format
    pub fn encode(&self, format: GraphFormat) -> Result<String, GraphError> {
        match format {
            GraphFormat::Ron => self.to_ron(),
            GraphFormat::Json => self.to_json(),
        }
    }

    /// Load a graph file, choosing the format from the extension
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let content = std::fs::read_to_string(path)?;
        let graph = match GraphFormat::from_path(path) {
            GraphFormat::Ron => Self::from_ron(&content)?,
            GraphFormat::Json => Self::from_json(&content)?,
        };
        tracing::debug!(path = %path.display(), nodes = graph.node_count(), "loaded graph");
        Ok(graph)
    }

    /// Save a graph file, choosing the format from the extension
    pub fn save(&self, path: &Path) -> Result<(), GraphError> {
        let content = self.encode(GraphFormat::from_path(path))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn envelope(&self) -> GraphFile {
        GraphFile {
            version: GRAPH_FORMAT_VERSION,
            graph: self.clone(),
        }
    }

    fn open_envelope(file: GraphFile) -> Result<Self, GraphError> {
        // Version check
        if file.version > GRAPH_FORMAT_VERSION {
            return Err(GraphError::Serialization(format!(
                "Graph format version {} is newer than supported version {}",
                file.version, GRAPH_FORMAT_VERSION
            )));
        }
        file.graph.validate()?;
        Ok(file.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, NodeKind};
    use crate::types::Array;

    fn sample() -> Graph {
        let mut graph = Graph::new();
        graph.add_node("input", Node::input(vec![2])).unwrap();
        graph
            .add_node(
                "li",
                Node::new(NodeKind::LeakyIntegrator {
                    tau: Array::vector(vec![0.01, 0.02]),
                    r: Array::scalar(1.0),
                    v_leak: Array::scalar(0.0),
                })
                .with_metadata("module_path", "li"),
            )
            .unwrap();
        graph.add_node("output", Node::output(vec![2])).unwrap();
        graph.connect("input", "li").unwrap();
        graph.connect("li", "output").unwrap();
        graph
    }

    #[test]
    fn test_ron_serialization() {
        let graph = sample();
        let ron = graph.to_ron().unwrap();
        let loaded = Graph::from_ron(&ron).unwrap();
        assert_eq!(loaded, graph);
    }

    #[test]
    fn test_json_serialization() {
        let graph = sample();
        let json = graph.to_json().unwrap();
        assert!(json.contains("\"LI\""));
        assert_eq!(Graph::from_json(&json).unwrap(), graph);
    }

    #[test]
    fn test_newer_version_is_rejected() {
        let json = serde_json::json!({ "version": GRAPH_FORMAT_VERSION + 1, "graph": Graph::new() });
        assert!(Graph::from_json(&json.to_string()).is_err());
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(GraphFormat::from_path(Path::new("net.json")), GraphFormat::Json);
        assert_eq!(GraphFormat::from_path(Path::new("net.ron")), GraphFormat::Ron);
    }
}
