// SPDX-License-Identifier: MIT OR Apache-2.0
//! Interpretation of graphs as callable modules.

use crate::config::InterpretConfig;
use crate::error::{BridgeError, Result};
use crate::registry::NodeMap;
use indexmap::IndexMap;
use nirlink_graph::{ExecutionOrder, Graph};
use nirlink_nn::module::Result as ModuleResult;
use nirlink_nn::{Executor, Module, ModuleError, Op, Scope, Signal, StateTree, Tensor, TypeKey};
use std::any::Any;
use std::collections::HashMap;

/// Prefix of the state keys holding feedback values between calls
pub const FEEDBACK_PREFIX: &str = "feedback:";

/// Turn `graph` into a composed module using `node_map`
pub fn interpret(graph: &Graph, node_map: &NodeMap) -> Result<GraphExecutor> {
    Interpreter::new(node_map).interpret(graph)
}

/// Configurable interpreter, also handed to node constructors
#[derive(Debug, Clone)]
pub struct Interpreter<'a> {
    node_map: &'a NodeMap,
    config: InterpretConfig,
}

impl<'a> Interpreter<'a> {
    /// Create an interpreter over a registry
    pub fn new(node_map: &'a NodeMap) -> Self {
        Self {
            node_map,
            config: InterpretConfig::default(),
        }
    }

    /// Replace the settings
    pub fn with_config(mut self, config: InterpretConfig) -> Self {
        self.config = config;
        self
    }

    /// Current settings
    pub fn config(&self) -> &InterpretConfig {
        &self.config
    }

    /// Registry used for node construction
    pub fn node_map(&self) -> &NodeMap {
        self.node_map
    }

    /// Build a composed module mirroring `graph`
    pub fn interpret(&self, graph: &Graph) -> Result<GraphExecutor> {
        graph.validate()?;
        let input = single_boundary(graph.input_nodes(), "input")?;
        let output = single_boundary(graph.output_nodes(), "output")?;
        let ExecutionOrder { order, feedback } = graph.execution_order(self.config.allow_recurrent)?;

        let mut modules: IndexMap<String, Box<dyn Module>> = IndexMap::new();
        for (name, node) in graph.named_nodes() {
            if node.kind.is_boundary() {
                continue;
            }
            let constructor = self.node_map.get(node.tag()).ok_or_else(|| BridgeError::UnsupportedNode {
                node: name.to_string(),
                tag: node.tag(),
            })?;
            let module = constructor(node, self).map_err(|err| match err {
                BridgeError::Conversion { reason, .. } => BridgeError::Conversion {
                    subject: format!("node `{name}`"),
                    reason,
                },
                other => other,
            })?;
            modules.insert(name.to_string(), module);
        }

        let steps: Vec<Step> = order
            .iter()
            .map(|name| Step {
                name: name.clone(),
                routes: graph
                    .edges_to(name)
                    .map(|edge| Route {
                        source: edge.source.clone(),
                        feedback: feedback.contains(edge),
                    })
                    .collect(),
            })
            .collect();

        let mut feedback_sources: Vec<String> = Vec::new();
        for edge in &feedback {
            if !feedback_sources.contains(&edge.source) {
                feedback_sources.push(edge.source.clone());
            }
        }

        tracing::info!(
            nodes = graph.node_count(),
            modules = modules.len(),
            feedback = feedback.len(),
            "interpreted graph"
        );
        Ok(GraphExecutor {
            steps,
            modules,
            feedback_sources,
            input,
            output,
        })
    }
}

fn single_boundary<'g>(mut names: impl Iterator<Item = &'g str>, role: &str) -> Result<String> {
    match (names.next(), names.next()) {
        (Some(name), None) => Ok(name.to_string()),
        (None, _) => Err(BridgeError::UnsupportedBoundary(format!("graph has no {role} node"))),
        (Some(_), Some(_)) => Err(BridgeError::UnsupportedBoundary(format!("graph has more than one {role} node"))),
    }
}

/// Signal arriving at a node
#[derive(Debug, Clone)]
struct Route {
    source: String,
    /// Delivers the source's value from the previous call
    feedback: bool,
}

/// One node in call order with its incoming routes
#[derive(Debug, Clone)]
struct Step {
    name: String,
    routes: Vec<Route>,
}

/// Module composed from a graph.
///
/// Every node runs as a child named after the node, so the state of a
/// stateful node lives under its node name. Signals arriving at a node are
/// summed. A feedback edge delivers its source's output from the previous
/// call; on the first call it delivers nothing, and a node that receives
/// nothing at all is skipped.
#[derive(Debug)]
pub struct GraphExecutor {
    steps: Vec<Step>,
    modules: IndexMap<String, Box<dyn Module>>,
    feedback_sources: Vec<String>,
    input: String,
    output: String,
}

impl GraphExecutor {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("GraphExecutor");

    /// Run one step, threading `state` (`None` on the first call)
    pub fn call(&self, input: &Tensor, state: Option<StateTree>) -> Result<(Tensor, StateTree)> {
        Ok(Executor::run(self, std::slice::from_ref(input), state.unwrap_or_default())?)
    }

    /// Run over a sequence of inputs, threading state between steps
    pub fn call_sequence(&self, inputs: &[Tensor], state: Option<StateTree>) -> Result<(Vec<Tensor>, StateTree)> {
        Ok(Executor::run_sequence(self, inputs, state.unwrap_or_default())?)
    }

    /// Node names in call order
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|step| step.name.as_str())
    }

    /// Module built for a node
    pub fn module(&self, name: &str) -> Option<&dyn Module> {
        self.modules.get(name).map(AsRef::as_ref)
    }

    /// Nodes whose outputs are fed back to the next call
    pub fn feedback_sources(&self) -> &[String] {
        &self.feedback_sources
    }

    /// State key under which the previous output of `source` is kept
    pub fn feedback_key(source: &str) -> String {
        format!("{FEEDBACK_PREFIX}{source}")
    }
}

impl Module for GraphExecutor {
    fn type_key(&self) -> TypeKey {
        Self::TYPE
    }

    fn children(&self) -> Vec<(&str, &dyn Module)> {
        self.modules.iter().map(|(name, m)| (name.as_str(), m.as_ref())).collect()
    }

    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> ModuleResult<Signal> {
        let [input] = inputs else {
            return Err(ModuleError::Arity {
                module: Self::TYPE.to_string(),
                expected: 1,
                found: inputs.len(),
            });
        };

        // Each source's previous output is read once and shared by all its feedback edges
        let mut previous: HashMap<&str, Option<Signal>> = HashMap::new();
        for source in &self.feedback_sources {
            previous.insert(source.as_str(), scope.recall(&Self::feedback_key(source))?);
        }

        let mut values: HashMap<&str, Signal> = HashMap::new();
        for step in &self.steps {
            let arriving = if step.name == self.input {
                vec![*input]
            } else {
                let mut arriving = Vec::with_capacity(step.routes.len());
                for route in &step.routes {
                    let value = if route.feedback {
                        previous.get(route.source.as_str()).copied().flatten()
                    } else {
                        values.get(route.source.as_str()).copied()
                    };
                    arriving.extend(value);
                }
                arriving
            };

            let x = match arriving.as_slice() {
                [] => {
                    tracing::trace!(node = %step.name, "no signal arrived, skipping");
                    continue;
                }
                [single] => *single,
                _ => scope.apply(Op::Add, &arriving)?,
            };
            let y = match self.modules.get(&step.name) {
                Some(module) => scope.call(&step.name, module.as_ref(), &[x])?,
                None => x,
            };
            values.insert(step.name.as_str(), y);
        }

        for source in &self.feedback_sources {
            if let Some(&value) = values.get(source.as_str()) {
                scope.retain(&Self::feedback_key(source), value)?;
            }
        }

        values.get(self.output.as_str()).copied().ok_or_else(|| {
            BridgeError::UnsupportedBoundary(format!("no signal reached output `{}`", self.output)).into()
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
