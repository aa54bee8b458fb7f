// SPDX-License-Identifier: MIT OR Apache-2.0
//! Explicit, hierarchical module state.
//!
//! State is an owned snapshot keyed by call-path segments. A run consumes the
//! caller's tree and returns a fresh one; nothing is kept between runs.

use crate::module::{ModuleError, Result};
use crate::tensor::Tensor;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Named state variables of one layer (e.g. membrane potential `v`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerState(IndexMap<String, Tensor>);

impl LayerState {
    /// Create an empty layer state
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable
    pub fn with(mut self, name: impl Into<String>, value: Tensor) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Get a variable
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.0.get(name)
    }

    /// Iterate over `(name, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Entry of a [`StateTree`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StateNode {
    /// State of a primitive layer
    Layer(LayerState),
    /// State of a composite module's children
    Scope(StateTree),
    /// Signal retained for the next call (recurrent feedback)
    Feedback(Tensor),
}

impl StateNode {
    fn kind(&self) -> &'static str {
        match self {
            StateNode::Layer(_) => "layer state",
            StateNode::Scope(_) => "scope",
            StateNode::Feedback(_) => "feedback signal",
        }
    }
}

/// Hierarchical state keyed by call-path segment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateTree(IndexMap<String, StateNode>);

impl StateTree {
    /// Create an empty tree (first call)
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the tree holds no state at all
    pub fn is_empty(&self) -> bool {
        self.leaf_paths().is_empty()
    }

    /// Number of direct entries
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Get a direct entry
    pub fn get(&self, key: &str) -> Option<&StateNode> {
        self.0.get(key)
    }

    /// Insert a direct entry
    pub fn insert(&mut self, key: impl Into<String>, node: StateNode) {
        self.0.insert(key.into(), node);
    }

    /// Iterate over direct entries
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateNode)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Get an entry by path segments
    pub fn get_path<S: AsRef<str>>(&self, segments: &[S]) -> Option<&StateNode> {
        let (last, parents) = segments.split_last()?;
        let mut tree = self;
        for segment in parents {
            match tree.0.get(segment.as_ref())? {
                StateNode::Scope(inner) => tree = inner,
                _ => return None,
            }
        }
        tree.0.get(last.as_ref())
    }

    /// Layer state at a path, if present
    pub fn layer<S: AsRef<str>>(&self, segments: &[S]) -> Option<&LayerState> {
        match self.get_path(segments)? {
            StateNode::Layer(state) => Some(state),
            _ => None,
        }
    }

    /// Remove and return the entry at a path
    pub fn take_path<S: AsRef<str>>(&mut self, segments: &[S]) -> Result<Option<StateNode>> {
        self.take_at(segments, 0)
    }

    fn take_at<S: AsRef<str>>(&mut self, segments: &[S], depth: usize) -> Result<Option<StateNode>> {
        let Some(segment) = segments.get(depth) else {
            return Ok(None);
        };
        if depth + 1 == segments.len() {
            return Ok(self.0.shift_remove(segment.as_ref()));
        }
        match self.0.get_mut(segment.as_ref()) {
            None => Ok(None),
            Some(StateNode::Scope(inner)) => inner.take_at(segments, depth + 1),
            Some(other) => Err(mismatch(
                &segments[..=depth],
                format!("expected a scope, found a {}", other.kind()),
            )),
        }
    }

    /// Insert an entry at a path, creating intermediate scopes
    pub fn insert_path<S: AsRef<str>>(&mut self, segments: &[S], node: StateNode) -> Result<()> {
        if segments.is_empty() {
            return Err(mismatch(segments, "empty state path".to_string()));
        }
        self.insert_at(segments, 0, node)
    }

    fn insert_at<S: AsRef<str>>(&mut self, segments: &[S], depth: usize, node: StateNode) -> Result<()> {
        let segment = segments[depth].as_ref();
        if depth + 1 == segments.len() {
            self.0.insert(segment.to_string(), node);
            return Ok(());
        }
        let entry = self
            .0
            .entry(segment.to_string())
            .or_insert_with(|| StateNode::Scope(StateTree::new()));
        match entry {
            StateNode::Scope(inner) => inner.insert_at(segments, depth + 1, node),
            other => Err(mismatch(
                &segments[..=depth],
                format!("expected a scope, found a {}", other.kind()),
            )),
        }
    }

    /// Dotted paths of every non-scope entry
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        self.collect_leaves("", &mut paths);
        paths
    }

    fn collect_leaves(&self, prefix: &str, out: &mut Vec<String>) {
        for (key, node) in &self.0 {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match node {
                StateNode::Scope(inner) => inner.collect_leaves(&path, out),
                _ => out.push(path),
            }
        }
    }
}

fn mismatch<S: AsRef<str>>(segments: &[S], reason: String) -> ModuleError {
    ModuleError::StructuralMismatch {
        path: segments.iter().map(|s| s.as_ref()).collect::<Vec<&str>>().join("."),
        reason,
    }
}

/// Check that an incoming state entry has the expected kind
pub(crate) fn expect_layer<S: AsRef<str>>(segments: &[S], node: Option<StateNode>) -> Result<Option<LayerState>> {
    match node {
        None => Ok(None),
        Some(StateNode::Layer(state)) => Ok(Some(state)),
        Some(other) => Err(mismatch(segments, format!("expected layer state, found a {}", other.kind()))),
    }
}

/// Check that an incoming feedback entry has the expected kind
pub(crate) fn expect_feedback<S: AsRef<str>>(segments: &[S], node: Option<StateNode>) -> Result<Option<Tensor>> {
    match node {
        None => Ok(None),
        Some(StateNode::Feedback(value)) => Ok(Some(value)),
        Some(other) => Err(mismatch(segments, format!("expected a feedback signal, found a {}", other.kind()))),
    }
}
