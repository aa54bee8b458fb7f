// SPDX-License-Identifier: MIT OR Apache-2.0
//! Module abstraction.
//!
//! A [`Module`] never computes on tensors directly. Its `forward` describes the
//! data flow against a [`Scope`], which decides what a call means: the eager
//! executor runs layers on real tensors, a tracer records a graph. Signals are
//! opaque handles owned by the scope.

use crate::tensor::{Tensor, TensorError};
use crate::state::LayerState;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Module errors
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Tensor arithmetic failed
    #[error("Tensor error at {path}: {source}")]
    Tensor {
        /// Module path where the error happened
        path: String,
        /// Underlying error
        source: TensorError,
    },

    /// Wrong number of inputs
    #[error("{module} expects {expected} input(s), got {found}")]
    Arity {
        /// Module or operation name
        module: String,
        /// Accepted input count
        expected: usize,
        /// Provided input count
        found: usize,
    },

    /// Signal handle does not belong to the running scope
    #[error("Unknown signal {0:?}")]
    UnknownSignal(Signal),

    /// State does not match the structure of the module
    #[error("State mismatch at {path}: {reason}")]
    StructuralMismatch {
        /// State path
        path: String,
        /// What disagreed
        reason: String,
    },

    /// Error raised by a scope implemented outside this crate
    #[error(transparent)]
    External(Box<dyn std::error::Error + Send + Sync>),
}

/// Result type for module operations
pub type Result<T> = std::result::Result<T, ModuleError>;

impl From<TensorError> for ModuleError {
    fn from(source: TensorError) -> Self {
        // Path is filled in by the executor that ran the layer
        ModuleError::Tensor {
            path: String::new(),
            source,
        }
    }
}

/// Discriminant identifying a module type (or an abstract supertype)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(&'static str);

impl TypeKey {
    /// Create a key from a type name
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// Get the type name
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Supertypes of a module by distance: index 0 holds direct supertypes,
/// index 1 their supertypes, and so on
pub type Supertypes = &'static [&'static [TypeKey]];

/// Handle to a value flowing through a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal(usize);

impl Signal {
    /// Create a handle from a scope-specific index
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Scope-specific index
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Free functional operation on signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Elementwise sum of all operands
    Add,
    /// Elementwise difference of two operands
    Sub,
    /// Elementwise product of all operands
    Mul,
}

impl Op {
    /// Operator name
    pub fn name(&self) -> &'static str {
        match self {
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
        }
    }

    /// Whether the operation is a plain summation of its operands
    pub fn is_summation(&self) -> bool {
        matches!(self, Op::Add)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Capability interface a module's `forward` runs against
pub trait Scope {
    /// Call a child module under `name`
    fn call(&mut self, name: &str, module: &dyn Module, inputs: &[Signal]) -> Result<Signal>;

    /// Apply a functional operation
    fn apply(&mut self, op: Op, inputs: &[Signal]) -> Result<Signal>;

    /// Evaluate a primitive layer at the current path
    fn evaluate(&mut self, layer: &dyn Layer, inputs: &[Signal]) -> Result<Signal>;

    /// Signal retained under `key` by the previous call, if any
    fn recall(&mut self, key: &str) -> Result<Option<Signal>>;

    /// Retain a signal under `key` for the next call
    fn retain(&mut self, key: &str, signal: Signal) -> Result<()>;

    /// `lhs + rhs`
    fn add(&mut self, lhs: Signal, rhs: Signal) -> Result<Signal> {
        self.apply(Op::Add, &[lhs, rhs])
    }

    /// `lhs - rhs`
    fn sub(&mut self, lhs: Signal, rhs: Signal) -> Result<Signal> {
        self.apply(Op::Sub, &[lhs, rhs])
    }

    /// `lhs * rhs`
    fn mul(&mut self, lhs: Signal, rhs: Signal) -> Result<Signal> {
        self.apply(Op::Mul, &[lhs, rhs])
    }
}

/// A unit of computation in a module hierarchy
pub trait Module: fmt::Debug + Send + Sync {
    /// Identity of this module's type
    fn type_key(&self) -> TypeKey;

    /// Supertypes, nearest first
    fn supertypes(&self) -> Supertypes {
        &[]
    }

    /// Named child modules, in declaration order.
    ///
    /// Every name `forward` passes to [`Scope::call`] must appear here; the
    /// tracer rejects calls to undeclared children.
    fn children(&self) -> Vec<(&str, &dyn Module)> {
        Vec::new()
    }

    /// Describe the data flow of one call
    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> Result<Signal>;

    /// Downcasting support for conversion functions
    fn as_any(&self) -> &dyn Any;
}

/// Type lineage of a module: its own key first, then supertypes by distance
pub fn lineage(module: &dyn Module) -> Vec<Vec<TypeKey>> {
    std::iter::once(vec![module.type_key()])
        .chain(module.supertypes().iter().map(|level| level.to_vec()))
        .collect()
}

/// Primitive computation over concrete tensors
pub trait Layer: Send + Sync {
    /// Layer name for diagnostics
    fn layer_name(&self) -> &'static str;

    /// Whether [`Layer::step`] reads and writes state
    fn is_stateful(&self) -> bool {
        false
    }

    /// Compute one step, returning the output and the updated state
    fn step(&self, input: &Tensor, state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)>;
}

/// Hierarchical call path with per-path occurrence counting.
///
/// Calling the same child name twice within one run yields `name`, then
/// `name_1`, `name_2`, ... so that shared modules get distinct paths.
#[derive(Debug, Default)]
pub struct CallPath {
    segments: Vec<String>,
    seen: HashMap<String, usize>,
}

impl CallPath {
    /// Create an empty (root) path
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a child, returning its unique segment
    pub fn enter(&mut self, name: &str) -> String {
        let full = self.qualify(name);
        let count = self.seen.entry(full).or_insert(0);
        let segment = if *count == 0 {
            name.to_string()
        } else {
            format!("{name}_{count}")
        };
        *count += 1;
        self.segments.push(segment.clone());
        segment
    }

    /// Leave the current child
    pub fn exit(&mut self) {
        self.segments.pop();
    }

    /// Segments from the root
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Dotted form of the current path
    pub fn current(&self) -> String {
        self.segments.join(".")
    }

    /// Dotted form of a name below the current path
    pub fn qualify(&self, name: &str) -> String {
        if self.segments.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.current())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_path_disambiguates_repeats() {
        let mut path = CallPath::new();
        assert_eq!(path.enter("block"), "block");
        assert_eq!(path.enter("fc"), "fc");
        assert_eq!(path.current(), "block.fc");
        path.exit();
        assert_eq!(path.enter("fc"), "fc_1");
        assert_eq!(path.current(), "block.fc_1");
        path.exit();
        path.exit();
        assert_eq!(path.enter("fc"), "fc");
    }

    #[test]
    fn test_op_summation() {
        assert!(Op::Add.is_summation());
        assert!(!Op::Mul.is_summation());
        assert_eq!(Op::Sub.to_string(), "sub");
    }
}
