// SPDX-License-Identifier: MIT OR Apache-2.0
//! Symbolic tracing of module hierarchies into graphs.
//!
//! The root module's `forward` runs against a recording [`Scope`] in which
//! signals are proxies: lists of the graph nodes whose outputs make up the
//! value. No tensor is ever computed.
//!
//! - A call to a registered module emits one node, wired from every producer
//!   in its input proxy.
//! - A call to an unregistered module is recursed into under its name.
//! - Addition is eliminated: its result proxy is the union of its operands,
//!   so all producers fan into the next consumer and are summed there.
//! - Any other operation, or a primitive layer with no mapping, is rejected.
//! - A recalled signal is a pending source; the edges it feeds are connected
//!   to whatever is retained under the same key once the trace completes.

use crate::config::TraceConfig;
use crate::error::{BridgeError, Result};
use crate::registry::{resolve, Conversion, ModuleMap, ModuleMapping};
use indexmap::IndexMap;
use nirlink_graph::{Graph, Node, NodeKind};
use nirlink_nn::module::Result as ModuleResult;
use nirlink_nn::{CallPath, Layer, Module, ModuleError, Op, Scope, Signal, ROOT_STATE_KEY};
use std::collections::HashSet;

/// Metadata key holding the module path a node was traced from
pub const MODULE_PATH_KEY: &str = "module_path";
/// Metadata key holding the module type a node was traced from
pub const MODULE_TYPE_KEY: &str = "module_type";

/// Trace `root` into a graph using `module_map`, falling back to `default_map`
pub fn trace(root: &dyn Module, module_map: &ModuleMap, default_map: Option<&ModuleMap>) -> Result<Graph> {
    let mut tracer = Tracer::new(module_map);
    if let Some(defaults) = default_map {
        tracer = tracer.with_defaults(defaults);
    }
    tracer.trace(root)
}

/// Configurable tracer
#[derive(Debug, Clone)]
pub struct Tracer<'a> {
    module_map: &'a ModuleMap,
    default_map: Option<&'a ModuleMap>,
    config: TraceConfig,
}

impl<'a> Tracer<'a> {
    /// Create a tracer over a user registry
    pub fn new(module_map: &'a ModuleMap) -> Self {
        Self {
            module_map,
            default_map: None,
            config: TraceConfig::default(),
        }
    }

    /// Consult `default_map` for modules the user registry does not cover
    pub fn with_defaults(mut self, default_map: &'a ModuleMap) -> Self {
        self.default_map = Some(default_map);
        self
    }

    /// Replace the settings
    pub fn with_config(mut self, config: TraceConfig) -> Self {
        self.config = config;
        self
    }

    /// Current settings
    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Registries in precedence order
    fn maps(&self) -> Vec<&'a ModuleMap> {
        std::iter::once(self.module_map).chain(self.default_map).collect()
    }

    /// Trace `root` into a validated graph
    pub fn trace(&self, root: &dyn Module) -> Result<Graph> {
        let mut graph = self.trace_graph(root, true)?;
        if self.config.infer_types {
            if let Some(shape) = &self.config.input_shape {
                graph.set_input_shape(shape);
                graph.infer_types()?;
            }
        }
        graph.validate()?;
        tracing::info!(
            root = %root.type_key(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "traced module"
        );
        Ok(graph)
    }

    /// Trace one level of graph. At the top level a registered root becomes a
    /// single node and the input carries the configured shape; subgraph
    /// mappings trace the module they are registered for with `top_level`
    /// false.
    fn trace_graph(&self, root: &dyn Module, top_level: bool) -> Result<Graph> {
        let mut recorder = Recorder::new(self);
        // Nested inputs stay untyped; inference types them from the enclosing graph
        let shape = if top_level { self.config.input_shape.clone() } else { None };
        let input = recorder.add_input(shape)?;

        let mapping = if top_level {
            resolve(root, &self.maps())?
        } else {
            None
        };
        let output = match mapping {
            Some(mapping) => recorder.emit(ROOT_STATE_KEY, root, mapping, &[input])?,
            None => recorder.recurse(root, &[input])?,
        };
        recorder.finish(output)
    }
}

/// Origin of part of a traced value
#[derive(Debug, Clone, PartialEq, Eq)]
enum Source {
    /// Output of a graph node
    Node(String),
    /// Value retained under a key by the previous call
    Pending(String),
}

/// Recording scope for one graph level
struct Recorder<'t, 'a> {
    tracer: &'t Tracer<'a>,
    graph: Graph,
    proxies: Vec<Vec<Source>>,
    path: CallPath,
    /// `(key, destination)` edges waiting for the retained value of `key`
    pending: Vec<(String, String)>,
    retained: IndexMap<String, Vec<Source>>,
    /// Child names declared by each module being recursed into
    declared: Vec<Vec<String>>,
}

impl<'t, 'a> Recorder<'t, 'a> {
    fn new(tracer: &'t Tracer<'a>) -> Self {
        Self {
            tracer,
            graph: Graph::new(),
            proxies: Vec::new(),
            path: CallPath::new(),
            pending: Vec::new(),
            retained: IndexMap::new(),
            declared: Vec::new(),
        }
    }

    fn push(&mut self, sources: Vec<Source>) -> Signal {
        self.proxies.push(sources);
        Signal::new(self.proxies.len() - 1)
    }

    fn proxy(&self, signal: Signal) -> std::result::Result<&[Source], ModuleError> {
        self.proxies
            .get(signal.index())
            .map(Vec::as_slice)
            .ok_or(ModuleError::UnknownSignal(signal))
    }

    fn location(&self) -> String {
        if self.path.segments().is_empty() {
            "<root>".to_string()
        } else {
            self.path.current()
        }
    }

    fn add_input(&mut self, shape: Option<Vec<usize>>) -> Result<Signal> {
        let node = match shape {
            Some(shape) => Node::input(shape),
            None => Node::untyped(NodeKind::Input { shape: Vec::new() }),
        };
        let name = self.tracer.config.input_name.clone();
        self.graph.add_node(name.clone(), node)?;
        Ok(self.push(vec![Source::Node(name)]))
    }

    /// Connect every producer of `signal` to `destination`
    fn wire(&mut self, signal: Signal, destination: &str) -> Result<()> {
        let sources = self.proxy(signal)?.to_vec();
        for source in sources {
            match source {
                Source::Node(name) => self.graph.connect(name, destination)?,
                Source::Pending(key) => self.pending.push((key, destination.to_string())),
            }
        }
        Ok(())
    }

    /// Emit a leaf node for a registered module
    fn emit(&mut self, name: &str, module: &dyn Module, mapping: &ModuleMapping, inputs: &[Signal]) -> Result<Signal> {
        let [input] = inputs else {
            return Err(BridgeError::Module(ModuleError::Arity {
                module: name.to_string(),
                expected: 1,
                found: inputs.len(),
            }));
        };

        let mut node = match mapping.conversion {
            Conversion::Convert(convert) => convert(module)?,
            Conversion::Subgraph => Node::subgraph(self.tracer.trace_graph(module, false)?),
        };
        if self.tracer.config.record_module_paths {
            node.metadata.insert(MODULE_PATH_KEY.to_string(), name.into());
            node.metadata.insert(MODULE_TYPE_KEY.to_string(), module.type_key().name().into());
        }
        tracing::debug!(node = name, kind = %node.tag(), "emitted node");

        self.graph.add_node(name, node)?;
        self.wire(*input, name)?;
        Ok(self.push(vec![Source::Node(name.to_string())]))
    }

    /// Add the output boundary, resolve pending feedback and hand the graph over
    fn finish(mut self, output: Signal) -> Result<Graph> {
        let name = self.tracer.config.output_name.clone();
        self.graph
            .add_node(name.clone(), Node::untyped(NodeKind::Output { shape: Vec::new() }))?;
        self.wire(output, &name)?;

        let mut queue: Vec<(String, String)> = std::mem::take(&mut self.pending);
        let mut seen: HashSet<(String, String)> = HashSet::new();
        while let Some((key, destination)) = queue.pop() {
            if !seen.insert((key.clone(), destination.clone())) {
                continue;
            }
            let sources = self.retained.get(&key).ok_or_else(|| BridgeError::UnsupportedOperation {
                operation: format!("recall of `{key}` that is never retained"),
                path: destination.clone(),
            })?;
            for source in sources.clone() {
                match source {
                    Source::Node(name) => {
                        tracing::debug!(source = %name, destination = %destination, "feedback edge");
                        self.graph.connect(name, destination.clone())?;
                    }
                    Source::Pending(inner) => queue.push((inner, destination.clone())),
                }
            }
        }
        Ok(self.graph)
    }

    /// Run an unregistered module's own `forward` at the current path
    fn recurse(&mut self, module: &dyn Module, inputs: &[Signal]) -> Result<Signal> {
        let children = module.children().into_iter().map(|(name, _)| name.to_string()).collect();
        self.declared.push(children);
        let result = module.forward(self, inputs);
        self.declared.pop();
        Ok(result?)
    }

    fn visit(&mut self, module: &dyn Module, inputs: &[Signal]) -> Result<Signal> {
        let path = self.path.current();
        match resolve(module, &self.tracer.maps())? {
            Some(mapping) => self.emit(&path, module, mapping, inputs),
            None => {
                tracing::trace!(path = %path, module = %module.type_key(), "recursing into module");
                self.recurse(module, inputs)
            }
        }
    }
}

impl Scope for Recorder<'_, '_> {
    fn call(&mut self, name: &str, module: &dyn Module, inputs: &[Signal]) -> ModuleResult<Signal> {
        if let Some(declared) = self.declared.last() {
            if !declared.iter().any(|child| child == name) {
                return Err(BridgeError::UnsupportedOperation {
                    operation: format!("call of `{name}`, which is not a declared child"),
                    path: self.location(),
                }
                .into());
            }
        }
        self.path.enter(name);
        let result = self.visit(module, inputs);
        self.path.exit();
        Ok(result?)
    }

    fn apply(&mut self, op: Op, inputs: &[Signal]) -> ModuleResult<Signal> {
        if !op.is_summation() {
            return Err(BridgeError::UnsupportedOperation {
                operation: op.to_string(),
                path: self.location(),
            }
            .into());
        }
        if inputs.is_empty() {
            return Err(ModuleError::Arity {
                module: op.to_string(),
                expected: 1,
                found: 0,
            });
        }
        let mut sources = Vec::new();
        for &signal in inputs {
            sources.extend_from_slice(self.proxy(signal)?);
        }
        tracing::debug!(path = %self.location(), operands = inputs.len(), "eliminated addition");
        Ok(self.push(sources))
    }

    fn evaluate(&mut self, layer: &dyn Layer, _inputs: &[Signal]) -> ModuleResult<Signal> {
        Err(BridgeError::UnsupportedOperation {
            operation: layer.layer_name().to_string(),
            path: self.location(),
        }
        .into())
    }

    fn recall(&mut self, key: &str) -> ModuleResult<Option<Signal>> {
        let key = self.path.qualify(key);
        Ok(Some(self.push(vec![Source::Pending(key)])))
    }

    fn retain(&mut self, key: &str, signal: Signal) -> ModuleResult<()> {
        let key = self.path.qualify(key);
        let sources = self.proxy(signal)?.to_vec();
        if self.retained.insert(key.clone(), sources).is_some() {
            tracing::warn!(key = %key, "signal retained twice, keeping the last one");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::default_module_map;
    use nirlink_graph::NodeTag;
    use nirlink_nn::{Lif, Linear, Recurrent, Scale, Sequential, Tensor};

    #[test]
    fn test_sequential_traces_in_order() {
        let net = Sequential::new()
            .push("scale", Scale::new(Tensor::scalar(2.0)))
            .push("lif", Lif::simple(0.01, 1.0));
        let graph = trace(&net, &default_module_map(), None).unwrap();
        let names: Vec<&str> = graph.node_names().collect();
        assert_eq!(names, vec!["input", "scale", "lif", "output"]);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_registered_root_becomes_single_node() {
        let graph = trace(&Lif::simple(0.01, 1.0), &default_module_map(), None).unwrap();
        assert_eq!(graph.node(ROOT_STATE_KEY).unwrap().tag(), NodeTag::Lif);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_recurrent_feedback_is_wired() {
        let net = Recurrent::new(
            Lif::simple(0.01, 1.0),
            Linear::new(Tensor::new(vec![1, 1], vec![0.5]).unwrap()),
        );
        let graph = trace(&net, &default_module_map(), None).unwrap();
        let into_cell: Vec<&str> = graph.predecessors("cell").collect();
        assert_eq!(into_cell, vec!["input", "feedback"]);
        let into_feedback: Vec<&str> = graph.predecessors("feedback").collect();
        assert_eq!(into_feedback, vec!["cell"]);
    }

    #[test]
    fn test_unregistered_layer_is_unsupported() {
        let net = Sequential::new().push("scale", Scale::new(Tensor::scalar(2.0)));
        let err = trace(&net, &ModuleMap::new(), None).unwrap_err();
        match err {
            BridgeError::UnsupportedOperation { operation, path } => {
                assert_eq!(operation, "Scale");
                assert_eq!(path, "scale");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_module_paths_recorded() {
        let net = Sequential::new().push("scale", Scale::new(Tensor::scalar(2.0)));
        let config = TraceConfig {
            record_module_paths: true,
            ..TraceConfig::default()
        };
        let map = default_module_map();
        let graph = Tracer::new(&map).with_config(config).trace(&net).unwrap();
        let node = graph.node("scale").unwrap();
        assert_eq!(node.metadata[MODULE_PATH_KEY], "scale");
        assert_eq!(node.metadata[MODULE_TYPE_KEY], "Scale");
    }
}
