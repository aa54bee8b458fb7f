// SPDX-License-Identifier: MIT OR Apache-2.0
//! Composite modules.
//!
//! Containers only describe data flow between their children; they never
//! touch tensors, so every scope (eager or tracing) sees the same calls.

use crate::module::{Module, ModuleError, Op, Result, Scope, Signal, TypeKey};
use std::any::Any;

/// Children run one after another, each feeding the next
#[derive(Debug, Default)]
pub struct Sequential {
    children: Vec<(String, Box<dyn Module>)>,
}

impl Sequential {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("Sequential");

    /// Create an empty sequence
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named child
    pub fn push(mut self, name: impl Into<String>, module: impl Module + 'static) -> Self {
        self.children.push((name.into(), Box::new(module)));
        self
    }

    /// Append a boxed child
    pub fn push_boxed(mut self, name: impl Into<String>, module: Box<dyn Module>) -> Self {
        self.children.push((name.into(), module));
        self
    }

    /// Number of children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the sequence is empty
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Module for Sequential {
    fn type_key(&self) -> TypeKey {
        Self::TYPE
    }

    fn children(&self) -> Vec<(&str, &dyn Module)> {
        self.children.iter().map(|(name, m)| (name.as_str(), m.as_ref())).collect()
    }

    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> Result<Signal> {
        let [input] = inputs else {
            return Err(ModuleError::Arity {
                module: Self::TYPE.to_string(),
                expected: 1,
                found: inputs.len(),
            });
        };
        let mut x = *input;
        for (name, child) in &self.children {
            x = scope.call(name, child.as_ref(), &[x])?;
        }
        Ok(x)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Every branch receives the same input; their outputs are summed
#[derive(Debug, Default)]
pub struct Parallel {
    branches: Vec<(String, Box<dyn Module>)>,
}

impl Parallel {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("Parallel");

    /// Create a module without branches
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named branch
    pub fn branch(mut self, name: impl Into<String>, module: impl Module + 'static) -> Self {
        self.branches.push((name.into(), Box::new(module)));
        self
    }
}

impl Module for Parallel {
    fn type_key(&self) -> TypeKey {
        Self::TYPE
    }

    fn children(&self) -> Vec<(&str, &dyn Module)> {
        self.branches.iter().map(|(name, m)| (name.as_str(), m.as_ref())).collect()
    }

    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> Result<Signal> {
        let outputs = self
            .branches
            .iter()
            .map(|(name, branch)| scope.call(name, branch.as_ref(), inputs))
            .collect::<Result<Vec<_>>>()?;
        if outputs.is_empty() {
            return Err(ModuleError::Arity {
                module: Self::TYPE.to_string(),
                expected: 1,
                found: 0,
            });
        }
        scope.apply(Op::Add, &outputs)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A cell whose output, passed through a feedback module, is added to the
/// next call's input.
///
/// ```text
/// out[t] = cell(x[t] + feedback(out[t-1]))
/// ```
///
/// The first call has no previous output and runs `cell(x[0])`.
#[derive(Debug)]
pub struct Recurrent {
    cell: Box<dyn Module>,
    feedback: Box<dyn Module>,
}

impl Recurrent {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("Recurrent");

    /// State key under which the previous output is retained
    pub const RETAINED: &'static str = "out";

    /// Create a recurrent wrapper
    pub fn new(cell: impl Module + 'static, feedback: impl Module + 'static) -> Self {
        Self {
            cell: Box::new(cell),
            feedback: Box::new(feedback),
        }
    }
}

impl Module for Recurrent {
    fn type_key(&self) -> TypeKey {
        Self::TYPE
    }

    fn children(&self) -> Vec<(&str, &dyn Module)> {
        vec![("cell", self.cell.as_ref()), ("feedback", self.feedback.as_ref())]
    }

    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> Result<Signal> {
        let [x] = inputs else {
            return Err(ModuleError::Arity {
                module: Self::TYPE.to_string(),
                expected: 1,
                found: inputs.len(),
            });
        };
        let drive = match scope.recall(Self::RETAINED)? {
            Some(previous) => {
                let fed_back = scope.call("feedback", self.feedback.as_ref(), &[previous])?;
                scope.add(*x, fed_back)?
            }
            None => *x,
        };
        let out = scope.call("cell", self.cell.as_ref(), &[drive])?;
        scope.retain(Self::RETAINED, out)?;
        Ok(out)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::layers::{Linear, Scale};
    use crate::neurons::Lif;
    use crate::state::{StateNode, StateTree};
    use crate::tensor::Tensor;

    #[test]
    fn test_sequential_state_paths() {
        let net = Sequential::new()
            .push("fc", Scale::new(Tensor::scalar(2.0)))
            .push("lif", Lif::simple(0.01, 1.0));
        let (_, state) = Executor::run(&net, &[Tensor::from_vec(vec![1.0])], StateTree::new()).unwrap();
        assert_eq!(state.leaf_paths(), vec!["lif"]);
    }

    #[test]
    fn test_parallel_sums_branches() {
        let net = Parallel::new()
            .branch("a", Scale::new(Tensor::scalar(2.0)))
            .branch("b", Scale::new(Tensor::scalar(3.0)));
        let (y, _) = Executor::run(&net, &[Tensor::from_vec(vec![1.0])], StateTree::new()).unwrap();
        assert_eq!(y.data(), &[5.0]);
    }

    #[test]
    fn test_recurrent_feeds_back_previous_output() {
        let net = Recurrent::new(
            Scale::new(Tensor::scalar(1.0)),
            Linear::new(Tensor::new(vec![1, 1], vec![0.5]).unwrap()),
        );
        let x = Tensor::from_vec(vec![1.0]);
        let (outputs, state) = Executor::run_sequence(&net, &[x.clone(), x.clone(), x], StateTree::new()).unwrap();
        let values: Vec<f32> = outputs.iter().map(|t| t.data()[0]).collect();
        assert_eq!(values, vec![1.0, 1.5, 1.75]);
        assert!(matches!(state.get(Recurrent::RETAINED), Some(StateNode::Feedback(_))));
    }

    #[test]
    fn test_foreign_state_is_rejected() {
        let net = Sequential::new().push("lif", Lif::simple(0.01, 1.0));
        let mut state = StateTree::new();
        state.insert("other", StateNode::Feedback(Tensor::scalar(0.0)));
        let err = Executor::run(&net, &[Tensor::from_vec(vec![1.0])], state).unwrap_err();
        assert!(matches!(err, ModuleError::StructuralMismatch { .. }));
    }
}
