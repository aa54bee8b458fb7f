// SPDX-License-Identifier: MIT OR Apache-2.0
//! Mapping registries for both conversion directions.
//!
//! A [`ModuleMap`] decides which modules become graph nodes during tracing;
//! a [`NodeMap`] decides how each node kind becomes a module again. The two
//! are independent and need not be inverses.

use crate::error::{BridgeError, Result};
use crate::interpreter::Interpreter;
use indexmap::IndexMap;
use nirlink_graph::{Node, NodeTag};
use nirlink_nn::{lineage, Module, TypeKey};

/// Converts a module into a graph node
pub type ConvertFn = fn(&dyn Module) -> Result<Node>;

/// Builds a module from a graph node
pub type NodeConstructor = fn(&Node, &Interpreter<'_>) -> Result<Box<dyn Module>>;

/// How a registered module is represented in the graph
#[derive(Debug, Clone, Copy)]
pub enum Conversion {
    /// Emit the node returned by the function
    Convert(ConvertFn),
    /// Trace the module's own forward into a nested graph node
    Subgraph,
}

/// Registry entry for one module type
#[derive(Debug, Clone, Copy)]
pub struct ModuleMapping {
    /// Conversion applied to matching modules
    pub conversion: Conversion,
    /// Tie-breaker among matches at the same lineage distance (higher wins)
    pub priority: i32,
}

impl ModuleMapping {
    /// Mapping through a conversion function with default priority
    pub fn convert(f: ConvertFn) -> Self {
        Self {
            conversion: Conversion::Convert(f),
            priority: 0,
        }
    }

    /// Mapping to a nested subgraph with default priority
    pub fn subgraph() -> Self {
        Self {
            conversion: Conversion::Subgraph,
            priority: 0,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Tracing registry keyed by module type
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    entries: IndexMap<TypeKey, ModuleMapping>,
}

impl ModuleMap {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a conversion function
    pub fn register(&mut self, key: TypeKey, f: ConvertFn) {
        self.entries.insert(key, ModuleMapping::convert(f));
    }

    /// Register a full mapping
    pub fn register_mapping(&mut self, key: TypeKey, mapping: ModuleMapping) {
        self.entries.insert(key, mapping);
    }

    /// Register a type to be traced into a nested graph node
    pub fn register_subgraph(&mut self, key: TypeKey) {
        self.entries.insert(key, ModuleMapping::subgraph());
    }

    /// Builder form of [`ModuleMap::register`]
    pub fn with(mut self, key: TypeKey, f: ConvertFn) -> Self {
        self.register(key, f);
        self
    }

    /// Remove an entry
    pub fn unregister(&mut self, key: TypeKey) -> Option<ModuleMapping> {
        self.entries.shift_remove(&key)
    }

    /// Get the entry for an exact key
    pub fn get(&self, key: TypeKey) -> Option<&ModuleMapping> {
        self.entries.get(&key)
    }

    /// Whether a key is registered
    pub fn contains(&self, key: TypeKey) -> bool {
        self.entries.contains_key(&key)
    }

    /// Registered keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = TypeKey> + '_ {
        self.entries.keys().copied()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Find the mapping that applies to `module`.
///
/// Candidates are ranked by a total order: lineage distance (the module's
/// own type first, then direct supertypes, and so on), then registry position
/// in `maps` (earlier wins), then priority (higher wins). The nearest level
/// with any match decides. Two best candidates that agree on all three keys
/// are ambiguous.
pub fn resolve<'m>(module: &dyn Module, maps: &[&'m ModuleMap]) -> Result<Option<&'m ModuleMapping>> {
    for level in lineage(module) {
        let mut candidates: Vec<(usize, TypeKey, &'m ModuleMapping)> = Vec::new();
        for (rank, &map) in maps.iter().enumerate() {
            for &key in &level {
                if let Some(mapping) = map.get(key) {
                    candidates.push((rank, key, mapping));
                }
            }
        }
        if candidates.is_empty() {
            continue;
        }

        candidates.sort_by_key(|&(rank, _, mapping)| (rank, std::cmp::Reverse(mapping.priority)));
        let (rank, _, best) = candidates[0];
        let tied: Vec<TypeKey> = candidates
            .iter()
            .filter(|&&(r, _, m)| r == rank && m.priority == best.priority)
            .map(|&(_, key, _)| key)
            .collect();
        if tied.len() > 1 {
            return Err(BridgeError::AmbiguousMapping {
                module: module.type_key(),
                candidates: tied,
            });
        }
        return Ok(Some(best));
    }
    Ok(None)
}

/// Interpretation registry keyed by node kind
#[derive(Debug, Clone, Default)]
pub struct NodeMap {
    constructors: IndexMap<NodeTag, NodeConstructor>,
}

impl NodeMap {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any previous one for the tag
    pub fn register(&mut self, tag: NodeTag, constructor: NodeConstructor) {
        self.constructors.insert(tag, constructor);
    }

    /// Builder form of [`NodeMap::register`]
    pub fn with(mut self, tag: NodeTag, constructor: NodeConstructor) -> Self {
        self.register(tag, constructor);
        self
    }

    /// Constructor for a tag
    pub fn get(&self, tag: NodeTag) -> Option<NodeConstructor> {
        self.constructors.get(&tag).copied()
    }

    /// Whether a tag is registered
    pub fn contains(&self, tag: NodeTag) -> bool {
        self.constructors.contains_key(&tag)
    }

    /// Registered tags in insertion order
    pub fn tags(&self) -> impl Iterator<Item = NodeTag> + '_ {
        self.constructors.keys().copied()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nirlink_graph::NodeKind;
    use nirlink_nn::{layers::PROJECTION, Linear, Tensor};

    fn linear_node(_: &dyn Module) -> Result<Node> {
        Ok(Node::untyped(NodeKind::Flatten { start_dim: 0, end_dim: -1 }))
    }

    fn projection_node(_: &dyn Module) -> Result<Node> {
        Ok(Node::untyped(NodeKind::Flatten { start_dim: 1, end_dim: -1 }))
    }

    fn picked(mapping: &ModuleMapping) -> i64 {
        let Conversion::Convert(f) = mapping.conversion else {
            panic!("expected a conversion function");
        };
        match f(&Linear::new(Tensor::zeros(&[1, 1]))).unwrap().kind {
            NodeKind::Flatten { start_dim, .. } => start_dim,
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_most_specific_type_wins() {
        let map = ModuleMap::new()
            .with(PROJECTION, projection_node)
            .with(Linear::TYPE, linear_node);
        let module = Linear::new(Tensor::zeros(&[1, 1]));
        let mapping = resolve(&module, &[&map]).unwrap().unwrap();
        assert_eq!(picked(mapping), 0);
    }

    #[test]
    fn test_supertype_matches_when_type_missing() {
        let map = ModuleMap::new().with(PROJECTION, projection_node);
        let mapping = resolve(&Linear::new(Tensor::zeros(&[1, 1])), &[&map]).unwrap().unwrap();
        assert_eq!(picked(mapping), 1);
    }

    #[test]
    fn test_user_map_precedes_default_map() {
        let user = ModuleMap::new().with(Linear::TYPE, projection_node);
        let defaults = ModuleMap::new().with(Linear::TYPE, linear_node);
        let module = Linear::new(Tensor::zeros(&[1, 1]));
        let mapping = resolve(&module, &[&user, &defaults]).unwrap().unwrap();
        assert_eq!(picked(mapping), 1);
    }

    #[test]
    fn test_unregistered_module_is_recursed() {
        let map = ModuleMap::new();
        assert!(resolve(&Linear::new(Tensor::zeros(&[1, 1])), &[&map]).unwrap().is_none());
    }
}
