// SPDX-License-Identifier: MIT OR Apache-2.0
//! Eager execution of module hierarchies.

use crate::module::{CallPath, Layer, Module, ModuleError, Op, Result, Scope, Signal};
use crate::state::{expect_feedback, expect_layer, StateNode, StateTree};
use crate::tensor::{Tensor, TensorError};

/// State key used for a primitive layer run as the root module
pub const ROOT_STATE_KEY: &str = "root";

/// Scope that evaluates layers on concrete tensors.
///
/// Each stateful layer reads its state from the incoming tree at its call
/// path and writes the updated state to a fresh outgoing tree. Any incoming
/// entry left unread at the end of a run means the state was produced by a
/// differently shaped module and is reported as a structural mismatch.
pub struct Executor {
    /// Signal values by handle
    values: Vec<Tensor>,
    /// Current call path
    path: CallPath,
    /// State handed in by the caller (consumed while running)
    incoming: StateTree,
    /// State produced by this run
    outgoing: StateTree,
}

impl Executor {
    /// Run `module` once on `inputs`, threading `state`
    pub fn run(module: &dyn Module, inputs: &[Tensor], state: StateTree) -> Result<(Tensor, StateTree)> {
        let mut exec = Self {
            values: inputs.to_vec(),
            path: CallPath::new(),
            incoming: state,
            outgoing: StateTree::new(),
        };
        let signals: Vec<Signal> = (0..inputs.len()).map(Signal::new).collect();
        let output = module.forward(&mut exec, &signals)?;

        let unused = exec.incoming.leaf_paths();
        if !unused.is_empty() {
            return Err(ModuleError::StructuralMismatch {
                path: unused.join(", "),
                reason: "state entry is not used by any module".to_string(),
            });
        }

        let value = exec.value(output)?.clone();
        tracing::trace!(module = %module.type_key(), shape = ?value.shape(), "run complete");
        Ok((value, exec.outgoing))
    }

    /// Run `module` over a sequence of inputs, threading state between steps
    pub fn run_sequence(
        module: &dyn Module,
        inputs: &[Tensor],
        mut state: StateTree,
    ) -> Result<(Vec<Tensor>, StateTree)> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            let (output, next) = Self::run(module, std::slice::from_ref(input), state)?;
            outputs.push(output);
            state = next;
        }
        Ok((outputs, state))
    }

    fn value(&self, signal: Signal) -> Result<&Tensor> {
        self.values
            .get(signal.index())
            .ok_or(ModuleError::UnknownSignal(signal))
    }

    fn push(&mut self, value: Tensor) -> Signal {
        self.values.push(value);
        Signal::new(self.values.len() - 1)
    }

    fn located(&self, err: TensorError) -> ModuleError {
        ModuleError::Tensor {
            path: self.path.current(),
            source: err,
        }
    }

    fn state_path(&self, key: Option<&str>) -> Vec<String> {
        let mut segments = self.path.segments().to_vec();
        match key {
            Some(key) => segments.push(key.to_string()),
            None if segments.is_empty() => segments.push(ROOT_STATE_KEY.to_string()),
            None => {}
        }
        segments
    }
}

impl Scope for Executor {
    fn call(&mut self, name: &str, module: &dyn Module, inputs: &[Signal]) -> Result<Signal> {
        self.path.enter(name);
        let result = module.forward(self, inputs);
        self.path.exit();
        result
    }

    fn apply(&mut self, op: Op, inputs: &[Signal]) -> Result<Signal> {
        let arity_ok = match op {
            Op::Sub => inputs.len() == 2,
            Op::Add | Op::Mul => !inputs.is_empty(),
        };
        if !arity_ok {
            return Err(ModuleError::Arity {
                module: op.to_string(),
                expected: if op == Op::Sub { 2 } else { 1 },
                found: inputs.len(),
            });
        }

        let mut acc = self.value(inputs[0])?.clone();
        for &signal in &inputs[1..] {
            let rhs = self.value(signal)?;
            let next = match op {
                Op::Add => acc.add(rhs),
                Op::Sub => acc.sub(rhs),
                Op::Mul => acc.mul(rhs),
            };
            acc = next.map_err(|e| self.located(e))?;
        }
        Ok(self.push(acc))
    }

    fn evaluate(&mut self, layer: &dyn Layer, inputs: &[Signal]) -> Result<Signal> {
        let [input] = inputs else {
            return Err(ModuleError::Arity {
                module: layer.layer_name().to_string(),
                expected: 1,
                found: inputs.len(),
            });
        };
        let segments = self.state_path(None);
        let state = if layer.is_stateful() {
            expect_layer(&segments, self.incoming.take_path(&segments)?)?
        } else {
            None
        };

        let input = self.value(*input)?;
        let (output, next) = layer.step(input, state.as_ref()).map_err(|err| match err {
            ModuleError::Tensor { source, .. } => self.located(source),
            ModuleError::StructuralMismatch { reason, .. } => ModuleError::StructuralMismatch {
                path: segments.join("."),
                reason,
            },
            other => other,
        })?;
        if let Some(next) = next {
            self.outgoing.insert_path(&segments, StateNode::Layer(next))?;
        }
        tracing::trace!(path = %self.path.current(), layer = layer.layer_name(), "step");
        Ok(self.push(output))
    }

    fn recall(&mut self, key: &str) -> Result<Option<Signal>> {
        let segments = self.state_path(Some(key));
        let value = expect_feedback(&segments, self.incoming.take_path(&segments)?)?;
        Ok(value.map(|v| self.push(v)))
    }

    fn retain(&mut self, key: &str, signal: Signal) -> Result<()> {
        let segments = self.state_path(Some(key));
        let value = self.value(signal)?.clone();
        self.outgoing.insert_path(&segments, StateNode::Feedback(value))
    }
}
