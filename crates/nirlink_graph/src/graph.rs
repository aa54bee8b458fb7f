// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure containing nodes and edges.

use crate::edge::Edge;
use crate::node::{Node, NodeKind, INPUT_PORT, OUTPUT_PORT};
use crate::types::{Metadata, Shape, TypeSignature};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A NIR graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Nodes by unique name
    nodes: IndexMap<String, Node>,
    /// Signal-flow edges between nodes
    edges: Vec<Edge>,
    /// Shapes of the input boundary nodes
    #[serde(default)]
    pub input_type: TypeSignature,
    /// Shapes of the output boundary nodes
    #[serde(default)]
    pub output_type: TypeSignature,
    /// Opaque metadata
    #[serde(default)]
    pub metadata: Metadata,
}

/// Call order of a graph whose recurrent edges have been set aside
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOrder {
    /// Nodes in dependency order, ignoring feedback edges
    pub order: Vec<String>,
    /// Edges that close a cycle through a stateful node
    pub feedback: Vec<Edge>,
}

impl Graph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node under a unique name
    pub fn add_node(&mut self, name: impl Into<String>, node: Node) -> Result<(), GraphError> {
        let name = name.into();
        if self.nodes.contains_key(&name) {
            return Err(GraphError::DuplicateNode(name));
        }
        let boundary = node.kind.is_boundary();
        self.nodes.insert(name, node);
        if boundary {
            self.refresh_boundary_types();
        }
        Ok(())
    }

    /// Remove a node and its edges
    pub fn remove_node(&mut self, name: &str) -> Option<Node> {
        self.edges.retain(|e| !e.involves_node(name));
        let node = self.nodes.shift_remove(name)?;
        if node.kind.is_boundary() {
            self.refresh_boundary_types();
        }
        Some(node)
    }

    /// Get a node by name
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    /// Get a mutable node by name
    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.get_mut(name)
    }

    /// Whether a node with this name exists
    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Get all nodes
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Get all `(name, node)` pairs in insertion order
    pub fn named_nodes(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Get all node names in insertion order
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Add an edge between two existing nodes
    pub fn connect(
        &mut self,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Result<(), GraphError> {
        let edge = Edge::new(source, destination);
        for name in [&edge.source, &edge.destination] {
            if !self.nodes.contains_key(name) {
                return Err(GraphError::NodeNotFound(name.clone()));
            }
        }
        self.edges.push(edge);
        Ok(())
    }

    /// Get all edges
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Get the number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Get edges leaving a node
    pub fn edges_from<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.source == name)
    }

    /// Get edges entering a node
    pub fn edges_to<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Edge> {
        self.edges.iter().filter(move |e| e.destination == name)
    }

    /// Names of the nodes feeding a node, one entry per edge
    pub fn predecessors<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.edges_to(name).map(|e| e.source.as_str())
    }

    /// Names of the nodes fed by a node, one entry per edge
    pub fn successors<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> {
        self.edges_from(name).map(|e| e.destination.as_str())
    }

    /// Names of the input boundary nodes
    pub fn input_nodes(&self) -> impl Iterator<Item = &str> {
        self.named_nodes()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Input { .. }))
            .map(|(name, _)| name)
    }

    /// Names of the output boundary nodes
    pub fn output_nodes(&self) -> impl Iterator<Item = &str> {
        self.named_nodes()
            .filter(|(_, n)| matches!(n.kind, NodeKind::Output { .. }))
            .map(|(name, _)| name)
    }

    /// Rebuild the graph signatures from the boundary nodes' own types
    pub fn refresh_boundary_types(&mut self) {
        let mut input_type = TypeSignature::new();
        let mut output_type = TypeSignature::new();
        for (name, node) in &self.nodes {
            match node.kind {
                NodeKind::Input { .. } => {
                    if let Some(shape) = node.output_shape() {
                        input_type.insert(name.clone(), shape.clone());
                    }
                }
                NodeKind::Output { .. } => {
                    if let Some(shape) = node.input_shape() {
                        output_type.insert(name.clone(), shape.clone());
                    }
                }
                _ => {}
            }
        }
        self.input_type = input_type;
        self.output_type = output_type;
    }

    /// Check edge endpoints and boundary signatures, recursing into subgraphs
    pub fn validate(&self) -> Result<(), GraphError> {
        for edge in &self.edges {
            if !self.contains(&edge.source) || !self.contains(&edge.destination) {
                return Err(GraphError::DanglingEdge {
                    from: edge.source.clone(),
                    to: edge.destination.clone(),
                });
            }
        }

        self.validate_boundary(&self.input_type, |node| match node.kind {
            NodeKind::Input { .. } => Some(node.output_shape()),
            _ => None,
        })?;
        self.validate_boundary(&self.output_type, |node| match node.kind {
            NodeKind::Output { .. } => Some(node.input_shape()),
            _ => None,
        })?;

        for node in self.nodes.values() {
            if let NodeKind::Graph(inner) = &node.kind {
                inner.validate()?;
            }
        }
        Ok(())
    }

    fn validate_boundary(
        &self,
        signature: &TypeSignature,
        boundary_shape: impl Fn(&Node) -> Option<Option<&Shape>>,
    ) -> Result<(), GraphError> {
        for (name, shape) in signature.iter() {
            let declared = self.nodes.get(name).and_then(&boundary_shape);
            if declared != Some(Some(shape)) {
                return Err(GraphError::BoundaryTypeMismatch(name.to_string()));
            }
        }
        for (name, node) in &self.nodes {
            if let Some(Some(shape)) = boundary_shape(node) {
                if signature.get(name) != Some(shape) {
                    return Err(GraphError::BoundaryTypeMismatch(name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Get nodes in topological order (for evaluation)
    pub fn topological_order(&self) -> Result<Vec<String>, CycleError> {
        self.order_without(&HashSet::new())
    }

    fn order_without(&self, skipped: &HashSet<usize>) -> Result<Vec<String>, CycleError> {
        let mut visited = HashSet::new();
        let mut temp_mark = Vec::new();
        let mut order = Vec::new();

        for name in self.nodes.keys() {
            if !visited.contains(name.as_str()) {
                self.visit(name, skipped, &mut visited, &mut temp_mark, &mut order)?;
            }
        }

        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        skipped: &HashSet<usize>,
        visited: &mut HashSet<&'a str>,
        temp_mark: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<(), CycleError> {
        if let Some(pos) = temp_mark.iter().position(|n| *n == name) {
            return Err(CycleError {
                nodes: temp_mark[pos..].iter().map(|n| n.to_string()).collect(),
            });
        }
        if visited.contains(name) {
            return Ok(());
        }

        temp_mark.push(name);

        // Visit all nodes that this node depends on
        for (index, edge) in self.edges.iter().enumerate() {
            if edge.destination == name && !skipped.contains(&index) {
                self.visit(&edge.source, skipped, visited, temp_mark, order)?;
            }
        }

        temp_mark.pop();
        visited.insert(name);
        order.push(name.to_string());

        Ok(())
    }

    /// Call order that tolerates recurrent cycles.
    ///
    /// Edges closing a cycle are found by a depth-first walk starting at the
    /// input nodes. A cycle is accepted only when `allow_recurrent` is set and
    /// the cycle passes through at least one stateful node; the closing edge is
    /// then reported as feedback instead of an ordering constraint.
    pub fn execution_order(&self, allow_recurrent: bool) -> Result<ExecutionOrder, CycleError> {
        let back_edges = self.back_edges();
        let skipped: HashSet<usize> = back_edges.iter().copied().collect();

        for &index in &back_edges {
            let edge = &self.edges[index];
            let cycle = self.cycle_members(edge, &skipped);
            let recurrent = cycle
                .iter()
                .any(|name| self.nodes.get(name.as_str()).is_some_and(|n| n.kind.is_stateful()));
            if !allow_recurrent || !recurrent {
                return Err(CycleError { nodes: cycle });
            }
        }

        let order = self.order_without(&skipped)?;
        let feedback: Vec<Edge> = back_edges.iter().map(|&i| self.edges[i].clone()).collect();
        for edge in &feedback {
            tracing::debug!(source = %edge.source, destination = %edge.destination, "feedback edge");
        }
        Ok(ExecutionOrder { order, feedback })
    }

    fn back_edges(&self) -> Vec<usize> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Open,
            Done,
        }

        fn walk<'a>(
            graph: &'a Graph,
            name: &'a str,
            marks: &mut HashMap<&'a str, Mark>,
            back: &mut Vec<usize>,
        ) {
            marks.insert(name, Mark::Open);
            for (index, edge) in graph.edges.iter().enumerate() {
                if edge.source != name {
                    continue;
                }
                match marks.get(edge.destination.as_str()) {
                    Some(Mark::Open) => back.push(index),
                    Some(Mark::Done) => {}
                    None => walk(graph, &edge.destination, marks, back),
                }
            }
            marks.insert(name, Mark::Done);
        }

        let mut marks = HashMap::new();
        let mut back = Vec::new();
        let roots = self.input_nodes().chain(self.node_names());
        for name in roots {
            if !marks.contains_key(name) {
                walk(self, name, &mut marks, &mut back);
            }
        }
        back.sort_unstable();
        back
    }

    /// Nodes lying on a cycle closed by `edge` (reachable from its destination
    /// and reaching its source without using skipped edges)
    fn cycle_members(&self, edge: &Edge, skipped: &HashSet<usize>) -> Vec<String> {
        let reach = |start: &str, forward: bool| {
            let mut seen: HashSet<String> = HashSet::new();
            let mut stack = vec![start.to_string()];
            while let Some(name) = stack.pop() {
                if !seen.insert(name.clone()) {
                    continue;
                }
                for (index, e) in self.edges.iter().enumerate() {
                    if skipped.contains(&index) {
                        continue;
                    }
                    let (from, to) = if forward {
                        (&e.source, &e.destination)
                    } else {
                        (&e.destination, &e.source)
                    };
                    if *from == name {
                        stack.push(to.clone());
                    }
                }
            }
            seen
        };
        let downstream = reach(&edge.destination, true);
        let upstream = reach(&edge.source, false);
        self.nodes
            .keys()
            .filter(|name| downstream.contains(*name) && upstream.contains(*name))
            .cloned()
            .collect()
    }

    /// Fill unknown node signatures by propagating shapes from the inputs.
    ///
    /// Every known signature is checked against what arrives on its edges.
    pub fn infer_types(&mut self) -> Result<(), GraphError> {
        let ExecutionOrder { order, feedback } = self.execution_order(true)?;

        for name in &order {
            let mut arriving: Option<Shape> = None;
            for edge in self.edges_to(name) {
                if feedback.contains(edge) {
                    continue;
                }
                let Some(shape) = self.nodes[edge.source.as_str()].output_shape() else {
                    continue;
                };
                match &arriving {
                    Some(prev) if prev != shape => {
                        return Err(GraphError::ShapeMismatch {
                            node: name.clone(),
                            expected: format!("{prev:?}"),
                            found: shape.clone(),
                        });
                    }
                    _ => arriving = Some(shape.clone()),
                }
            }
            let Some(shape) = arriving else { continue };

            let node = &mut self.nodes[name.as_str()];
            if let NodeKind::Input { .. } = node.kind {
                continue;
            }
            match node.input_shape() {
                Some(declared) if *declared != shape => {
                    return Err(GraphError::ShapeMismatch {
                        node: name.clone(),
                        expected: format!("{declared:?}"),
                        found: shape,
                    });
                }
                Some(_) => {}
                None => node.input_type = TypeSignature::single(INPUT_PORT, shape.clone()),
            }

            match &mut node.kind {
                NodeKind::Output { shape: boundary } => {
                    *boundary = shape.clone();
                    node.output_type = TypeSignature::single(OUTPUT_PORT, shape);
                }
                NodeKind::Graph(inner) => {
                    inner.set_input_shape(&shape);
                    inner.infer_types()?;
                    node.output_type = TypeSignature::maybe(OUTPUT_PORT, inner.output_type.first().cloned());
                }
                kind if node.output_type.is_empty() => {
                    let out = kind.output_shape(&shape).map_err(|err| err.at_node(name))?;
                    node.output_type = TypeSignature::single(OUTPUT_PORT, out);
                }
                _ => {}
            }
        }

        self.refresh_boundary_types();
        Ok(())
    }

    /// Declare the shape of every input boundary node
    pub fn set_input_shape(&mut self, shape: &[usize]) {
        for node in self.nodes.values_mut() {
            if let NodeKind::Input { shape: boundary } = &mut node.kind {
                *boundary = shape.to_vec();
                node.input_type = TypeSignature::single(INPUT_PORT, shape.to_vec());
                node.output_type = TypeSignature::single(OUTPUT_PORT, shape.to_vec());
            }
        }
        self.refresh_boundary_types();
    }
}

/// Error raised by graph construction, validation or persistence
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Node name already used
    #[error("Duplicate node name: {0}")]
    DuplicateNode(String),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Edge refers to a missing node
    #[error("Edge {from} -> {to} refers to a missing node")]
    DanglingEdge {
        /// Edge source
        from: String,
        /// Edge destination
        to: String,
    },

    /// Graph signature disagrees with a boundary node
    #[error("Graph signature disagrees with boundary node {0}")]
    BoundaryTypeMismatch(String),

    /// Incompatible shapes meet at a node
    #[error("Shape mismatch at {node}: expected {expected}, found {found:?}")]
    ShapeMismatch {
        /// Node name (or kind when the name is not known)
        node: String,
        /// Description of the accepted shape
        expected: String,
        /// Shape that arrived
        found: Shape,
    },

    /// Graph contains a cycle that cannot be executed
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// RON or JSON encoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// File could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GraphError {
    fn at_node(self, name: &str) -> Self {
        match self {
            GraphError::ShapeMismatch { expected, found, .. } => GraphError::ShapeMismatch {
                node: name.to_string(),
                expected,
                found,
            },
            other => other,
        }
    }
}

/// Error when graph contains a cycle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Graph contains a cycle through {nodes:?}")]
pub struct CycleError {
    /// Nodes on the offending cycle
    pub nodes: Vec<String>,
}
