// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tracing and interpretation end to end.

use nirlink_bridge::{
    default_module_map, default_node_map, interpret, trace, BridgeError, InterpretConfig, Interpreter, ModuleMap,
    ModuleMapping, TraceConfig, Tracer,
};
use nirlink_graph::{Array, Graph, Node, NodeKind, NodeTag};
use nirlink_nn::module::Result as ModuleResult;
use nirlink_nn::{
    Affine, Executor, LeakyIntegrator, Lif, Linear, Module, ModuleError, Op, Parallel, Recurrent, Scale, Scope,
    Sequential, Signal, StateNode, StateTree, Supertypes, Tensor, TypeKey,
};
use std::any::Any;

const SYNAPSE: TypeKey = TypeKey::new("Synapse");
const FILTER: TypeKey = TypeKey::new("Filter");

/// Registered leaf with two supertypes at the same distance
#[derive(Debug)]
struct Hybrid;

impl Module for Hybrid {
    fn type_key(&self) -> TypeKey {
        TypeKey::new("Hybrid")
    }

    fn supertypes(&self) -> Supertypes {
        &[&[SYNAPSE, FILTER]]
    }

    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> ModuleResult<Signal> {
        scope.apply(Op::Add, inputs)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registered leaf whose supertypes sit at two distances
#[derive(Debug)]
struct Tiered;

impl Module for Tiered {
    fn type_key(&self) -> TypeKey {
        TypeKey::new("Tiered")
    }

    fn supertypes(&self) -> Supertypes {
        &[&[SYNAPSE], &[FILTER]]
    }

    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> ModuleResult<Signal> {
        scope.apply(Op::Add, inputs)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Squares its input
#[derive(Debug)]
struct Gate;

impl Module for Gate {
    fn type_key(&self) -> TypeKey {
        TypeKey::new("Gate")
    }

    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> ModuleResult<Signal> {
        let [x] = inputs else {
            return Err(ModuleError::Arity {
                module: "Gate".to_string(),
                expected: 1,
                found: inputs.len(),
            });
        };
        scope.mul(*x, *x)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Calls the same child twice and adds the results
#[derive(Debug)]
struct Twice {
    f: Scale,
}

impl Module for Twice {
    fn type_key(&self) -> TypeKey {
        TypeKey::new("Twice")
    }

    fn children(&self) -> Vec<(&str, &dyn Module)> {
        vec![("f", &self.f as &dyn Module)]
    }

    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> ModuleResult<Signal> {
        let a = scope.call("f", &self.f, inputs)?;
        let b = scope.call("f", &self.f, inputs)?;
        scope.apply(Op::Add, &[a, b])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Subtracts its input from itself
#[derive(Debug)]
struct Cancel;

impl Module for Cancel {
    fn type_key(&self) -> TypeKey {
        TypeKey::new("Cancel")
    }

    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> ModuleResult<Signal> {
        let [x] = inputs else {
            return Err(ModuleError::Arity {
                module: "Cancel".to_string(),
                expected: 1,
                found: inputs.len(),
            });
        };
        scope.sub(*x, *x)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Adds its previous output to the current one
#[derive(Debug)]
struct Echo {
    gain: Scale,
}

impl Module for Echo {
    fn type_key(&self) -> TypeKey {
        TypeKey::new("Echo")
    }

    fn children(&self) -> Vec<(&str, &dyn Module)> {
        vec![("gain", &self.gain as &dyn Module)]
    }

    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> ModuleResult<Signal> {
        let previous = scope.recall("previous")?;
        let y = scope.call("gain", &self.gain, inputs)?;
        scope.retain("previous", y)?;
        match previous {
            Some(previous) => scope.add(y, previous),
            None => Ok(y),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Calls a child it does not list in `children`
#[derive(Debug)]
struct Hidden {
    inner: Scale,
}

impl Module for Hidden {
    fn type_key(&self) -> TypeKey {
        TypeKey::new("Hidden")
    }

    fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> ModuleResult<Signal> {
        scope.call("inner", &self.inner, inputs)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn synapse_node(_: &dyn Module) -> nirlink_bridge::Result<Node> {
    Ok(Node::untyped(NodeKind::Scale { scale: Array::scalar(1.0) }))
}

fn filter_node(_: &dyn Module) -> nirlink_bridge::Result<Node> {
    Ok(Node::untyped(NodeKind::Threshold { threshold: Array::scalar(1.0) }))
}

fn spiking_network() -> Sequential {
    let weight = Tensor::new(vec![2, 3], vec![0.4, 0.2, 0.0, 0.1, 0.3, 0.5]).unwrap();
    Sequential::new()
        .push("fc", Affine::new(weight, Tensor::from_vec(vec![0.05, 0.0])).unwrap())
        .push("lif", Lif::simple(0.004, 0.3))
}

fn drive(steps: usize) -> Vec<Tensor> {
    (0..steps)
        .map(|t| Tensor::from_vec(vec![1.0, 0.5 + 0.1 * t as f32, 2.0]))
        .collect()
}

/// `input -> names... -> output` over unit integrators, plus `extra` edges
fn integrator_chain(names: &[&str], extra: &[(&str, &str)]) -> Graph {
    let mut graph = Graph::new();
    graph.add_node("input", Node::input(vec![1])).unwrap();
    let mut previous = "input";
    for &name in names {
        graph
            .add_node(name, Node::new(NodeKind::Integrator { r: Array::scalar(1.0) }))
            .unwrap();
        graph.connect(previous, name).unwrap();
        previous = name;
    }
    graph.add_node("output", Node::output(vec![1])).unwrap();
    graph.connect(previous, "output").unwrap();
    for &(source, destination) in extra {
        graph.connect(source, destination).unwrap();
    }
    graph
}

/// Output of the second of two threaded calls with a unit input
fn second_output(graph: &Graph) -> f32 {
    let exec = interpret(graph, &default_node_map()).unwrap();
    let x = Tensor::from_vec(vec![1.0]);
    let (_, state) = exec.call(&x, None).unwrap();
    let (y, _) = exec.call(&x, Some(state)).unwrap();
    y.data()[0]
}

fn assert_close(a: &[Tensor], b: &[Tensor]) {
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b) {
        let diff = x.max_abs_diff(y).expect("shapes differ");
        assert!(diff < 1e-6, "{x:?} != {y:?}");
    }
}

#[test]
fn test_round_trip_matches_eager_run() {
    let net = spiking_network();
    let graph = trace(&net, &default_module_map(), None).unwrap();
    assert_eq!(graph.node_names().collect::<Vec<_>>(), vec!["input", "fc", "lif", "output"]);
    assert_eq!(graph.node("fc").unwrap().tag(), NodeTag::Affine);
    assert_eq!(graph.node("lif").unwrap().tag(), NodeTag::Lif);

    let exec = interpret(&graph, &default_node_map()).unwrap();
    let inputs = drive(6);
    let (expected, eager_state) = Executor::run_sequence(&net, &inputs, StateTree::new()).unwrap();
    let (actual, graph_state) = exec.call_sequence(&inputs, None).unwrap();
    assert_close(&expected, &actual);
    assert!(actual.iter().any(|t| t.data().contains(&1.0)), "network never spiked");
    assert_eq!(eager_state.leaf_paths(), graph_state.leaf_paths());
}

#[test]
fn test_tracing_is_idempotent() {
    let net = spiking_network();
    let map = default_module_map();
    let first = trace(&net, &map, None).unwrap();
    let second = trace(&net, &map, None).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_shared_module_traced_once_per_call() {
    let net = Twice {
        f: Scale::new(Tensor::scalar(3.0)),
    };
    let graph = trace(&net, &default_module_map(), None).unwrap();
    assert_eq!(graph.node_names().collect::<Vec<_>>(), vec!["input", "f", "f_1", "output"]);
    assert_eq!(graph.predecessors("output").collect::<Vec<_>>(), vec!["f", "f_1"]);
    assert_eq!(graph.edge_count(), 4);

    let exec = interpret(&graph, &default_node_map()).unwrap();
    let (y, _) = exec.call(&Tensor::from_vec(vec![2.0]), None).unwrap();
    assert_eq!(y.data(), &[12.0]);
}

#[test]
fn test_equal_precedence_is_ambiguous() {
    let map = ModuleMap::new().with(SYNAPSE, synapse_node).with(FILTER, filter_node);
    let err = trace(&Hybrid, &map, None).unwrap_err();
    match err {
        BridgeError::AmbiguousMapping { module, candidates } => {
            assert_eq!(module.name(), "Hybrid");
            assert_eq!(candidates, vec![SYNAPSE, FILTER]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_priority_breaks_tie() {
    let mut map = ModuleMap::new().with(SYNAPSE, synapse_node);
    map.register_mapping(FILTER, ModuleMapping::convert(filter_node).with_priority(1));
    let graph = trace(&Hybrid, &map, None).unwrap();
    assert_eq!(graph.node("root").unwrap().tag(), NodeTag::Threshold);
}

#[test]
fn test_nearer_supertype_wins() {
    let map = ModuleMap::new().with(FILTER, filter_node).with(SYNAPSE, synapse_node);
    let graph = trace(&Tiered, &map, None).unwrap();
    assert_eq!(graph.node("root").unwrap().tag(), NodeTag::Scale);
}

#[test]
fn test_user_map_overrides_defaults() {
    let user = ModuleMap::new().with(Scale::TYPE, filter_node);
    let defaults = default_module_map();
    let net = Sequential::new().push("gain", Scale::new(Tensor::scalar(2.0)));
    let graph = trace(&net, &user, Some(&defaults)).unwrap();
    assert_eq!(graph.node("gain").unwrap().tag(), NodeTag::Threshold);
}

#[test]
fn test_multiplication_is_unsupported() {
    let net = Sequential::new()
        .push("gain", Scale::new(Tensor::scalar(2.0)))
        .push("gate", Gate);
    let err = trace(&net, &default_module_map(), None).unwrap_err();
    match err {
        BridgeError::UnsupportedOperation { operation, path } => {
            assert_eq!(operation, "mul");
            assert_eq!(path, "gate");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_threaded_state_differs_from_fresh_state() {
    let net = Sequential::new().push(
        "li",
        LeakyIntegrator::new(Tensor::scalar(0.01), Tensor::scalar(1.0), Tensor::scalar(0.0)),
    );
    let graph = trace(&net, &default_module_map(), None).unwrap();
    let exec = interpret(&graph, &default_node_map()).unwrap();
    let x = Tensor::from_vec(vec![1.0]);

    let (first, state) = exec.call(&x, None).unwrap();
    let (fresh, _) = exec.call(&x, None).unwrap();
    let (threaded, _) = exec.call(&x, Some(state.clone())).unwrap();
    assert_eq!(first, fresh);
    assert_ne!(first, threaded);
    assert_eq!(state.leaf_paths(), vec!["li"]);
}

#[test]
fn test_foreign_state_is_structural_mismatch() {
    let graph = trace(&spiking_network(), &default_module_map(), None).unwrap();
    let exec = interpret(&graph, &default_node_map()).unwrap();
    let mut state = StateTree::new();
    state.insert("somewhere_else", StateNode::Feedback(Tensor::scalar(0.0)));
    let err = exec.call(&drive(1)[0], Some(state)).unwrap_err();
    assert!(matches!(err, BridgeError::StructuralMismatch { .. }), "{err}");
}

#[test]
fn test_recurrent_graph_matches_eager_recurrent() {
    let net = Recurrent::new(
        Lif::simple(0.004, 0.3),
        Linear::new(Tensor::new(vec![1, 1], vec![0.8]).unwrap()),
    );
    let graph = trace(&net, &default_module_map(), None).unwrap();
    let exec = interpret(&graph, &default_node_map()).unwrap();
    assert_eq!(exec.feedback_sources(), &["feedback".to_string()]);

    let inputs: Vec<Tensor> = (0..8).map(|_| Tensor::from_vec(vec![0.9])).collect();
    let (expected, _) = Executor::run_sequence(&net, &inputs, StateTree::new()).unwrap();
    let (actual, _) = exec.call_sequence(&inputs, None).unwrap();
    assert_close(&expected, &actual);
}

#[test]
fn test_recurrent_graph_rejected_when_disabled() {
    let net = Recurrent::new(Lif::simple(0.004, 0.3), Scale::new(Tensor::scalar(0.5)));
    let graph = trace(&net, &default_module_map(), None).unwrap();
    let node_map = default_node_map();
    let config = InterpretConfig {
        allow_recurrent: false,
        ..InterpretConfig::default()
    };
    let err = Interpreter::new(&node_map).with_config(config).interpret(&graph).unwrap_err();
    assert!(matches!(err, BridgeError::Cycle(_)));
}

#[test]
fn test_subgraph_mapping_nests_graph_and_state() {
    let net = Sequential::new().push(
        "par",
        Parallel::new()
            .branch("a", Lif::simple(0.004, 0.3))
            .branch("b", Scale::new(Tensor::scalar(0.5))),
    );
    let mut map = default_module_map();
    map.register_subgraph(Parallel::TYPE);
    let graph = trace(&net, &map, None).unwrap();

    let NodeKind::Graph(inner) = &graph.node("par").unwrap().kind else {
        panic!("expected a subgraph node");
    };
    assert_eq!(inner.node_names().collect::<Vec<_>>(), vec!["input", "a", "b", "output"]);
    assert_eq!(inner.predecessors("output").collect::<Vec<_>>(), vec!["a", "b"]);

    let exec = interpret(&graph, &default_node_map()).unwrap();
    let inputs: Vec<Tensor> = (0..4).map(|_| Tensor::from_vec(vec![1.2])).collect();
    let (expected, _) = Executor::run_sequence(&net, &inputs, StateTree::new()).unwrap();
    let (actual, state) = exec.call_sequence(&inputs, None).unwrap();
    assert_close(&expected, &actual);
    assert_eq!(state.leaf_paths(), vec!["par.a"]);
}

#[test]
fn test_persisted_graph_interprets_identically() {
    let graph = trace(&spiking_network(), &default_module_map(), None).unwrap();
    let restored = Graph::from_ron(&graph.to_ron().unwrap()).unwrap();
    assert_eq!(restored, graph);

    let inputs = drive(3);
    let node_map = default_node_map();
    let (a, _) = interpret(&graph, &node_map).unwrap().call_sequence(&inputs, None).unwrap();
    let (b, _) = interpret(&restored, &node_map).unwrap().call_sequence(&inputs, None).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_interpreted_graph_traces_back() {
    let original = trace(&spiking_network(), &default_module_map(), None).unwrap();
    let exec = interpret(&original, &default_node_map()).unwrap();
    let retraced = trace(&exec, &default_module_map(), None).unwrap();
    assert_eq!(
        retraced.node_names().collect::<Vec<_>>(),
        original.node_names().collect::<Vec<_>>()
    );
    assert_eq!(retraced.edge_count(), original.edge_count());
}

#[test]
fn test_declared_input_shape_types_nodes() {
    let map = default_module_map();
    let config = TraceConfig {
        input_shape: Some(vec![3]),
        ..TraceConfig::default()
    };
    let graph = Tracer::new(&map).with_config(config).trace(&spiking_network()).unwrap();
    assert_eq!(graph.node("fc").unwrap().output_shape(), Some(&vec![2]));
    assert_eq!(graph.node("output").unwrap().input_shape(), Some(&vec![2]));
}

#[test]
fn test_interpreter_dt_reaches_neurons() {
    let net = Sequential::new().push(
        "li",
        LeakyIntegrator::new(Tensor::scalar(0.01), Tensor::scalar(1.0), Tensor::scalar(0.0)),
    );
    let graph = trace(&net, &default_module_map(), None).unwrap();
    let node_map = default_node_map();
    let config = InterpretConfig {
        dt: 0.002,
        ..InterpretConfig::default()
    };
    let exec = Interpreter::new(&node_map).with_config(config).interpret(&graph).unwrap();
    let li = exec.module("li").unwrap().as_any().downcast_ref::<LeakyIntegrator>().unwrap();
    assert_eq!(li.dt, 0.002);
}

#[test]
fn test_subtraction_is_unsupported() {
    let net = Sequential::new()
        .push("gain", Scale::new(Tensor::scalar(2.0)))
        .push("cancel", Cancel);
    let err = trace(&net, &default_module_map(), None).unwrap_err();
    match err {
        BridgeError::UnsupportedOperation { operation, path } => {
            assert_eq!(operation, "sub");
            assert_eq!(path, "cancel");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_subgraph_with_declared_input_shape() {
    let weight = Tensor::new(vec![2, 3], vec![0.4, 0.2, 0.0, 0.1, 0.3, 0.5]).unwrap();
    let net = Sequential::new()
        .push("fc", Affine::new(weight, Tensor::from_vec(vec![0.05, 0.0])).unwrap())
        .push(
            "par",
            Parallel::new()
                .branch("a", Lif::simple(0.004, 0.3))
                .branch("b", Scale::new(Tensor::scalar(0.5))),
        );
    let mut map = default_module_map();
    map.register_subgraph(Parallel::TYPE);
    let config = TraceConfig {
        input_shape: Some(vec![3]),
        ..TraceConfig::default()
    };
    let graph = Tracer::new(&map).with_config(config).trace(&net).unwrap();

    let par = graph.node("par").unwrap();
    assert_eq!(par.input_shape(), Some(&vec![2]));
    assert_eq!(par.output_shape(), Some(&vec![2]));
    let NodeKind::Graph(inner) = &par.kind else {
        panic!("expected a subgraph node");
    };
    assert_eq!(inner.node("input").unwrap().output_shape(), Some(&vec![2]));
    assert_eq!(graph.node("output").unwrap().input_shape(), Some(&vec![2]));
}

#[test]
fn test_recalled_value_feeds_output() {
    let net = Echo {
        gain: Scale::new(Tensor::scalar(2.0)),
    };
    let graph = trace(&net, &default_module_map(), None).unwrap();
    assert_eq!(graph.predecessors("output").collect::<Vec<_>>(), vec!["gain", "gain"]);
    assert_eq!(graph.edge_count(), 3);
}

#[test]
fn test_undeclared_child_is_rejected() {
    let net = Sequential::new().push(
        "hidden",
        Hidden {
            inner: Scale::new(Tensor::scalar(2.0)),
        },
    );
    let err = trace(&net, &default_module_map(), None).unwrap_err();
    match err {
        BridgeError::UnsupportedOperation { operation, path } => {
            assert!(operation.contains("inner"), "{operation}");
            assert_eq!(path, "hidden");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_declared_children_name_traced_nodes() {
    let net = spiking_network();
    let graph = trace(&net, &default_module_map(), None).unwrap();
    for (name, _) in net.children() {
        assert!(graph.contains(name), "missing node for child `{name}`");
    }
}

#[test]
fn test_parallel_feedback_edges_both_deliver() {
    let graph = integrator_chain(&["i"], &[("i", "i"), ("i", "i")]);
    let exec = interpret(&graph, &default_node_map()).unwrap();
    assert_eq!(exec.feedback_sources(), &["i".to_string()]);

    // v1 = 0.001, v2 = v1 + dt * (1 + 2 * v1)
    let y = second_output(&graph);
    assert!((y - 0.002002).abs() < 1e-8, "{y}");
}

#[test]
fn test_feedback_fans_out_to_every_consumer() {
    let graph = integrator_chain(&["a", "b"], &[("b", "a"), ("b", "b")]);
    let exec = interpret(&graph, &default_node_map()).unwrap();
    assert_eq!(exec.feedback_sources(), &["b".to_string()]);

    // b2 = b1 + dt * (a2 + b1), where a2 is also fed by b1
    let y = second_output(&graph);
    assert!((y - 3.001001e-6).abs() < 1e-10, "{y}");
}
