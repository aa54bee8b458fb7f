// SPDX-License-Identifier: MIT OR Apache-2.0
//! Eager execution of composed networks.

use nirlink_nn::{
    Affine, Executor, Lif, ModuleError, Parallel, Sequential, StateTree, Tensor,
};

fn network() -> Sequential {
    let weight = Tensor::new(vec![2, 2], vec![1.0, 0.5, 0.0, 1.0]).unwrap();
    Sequential::new()
        .push("fc", Affine::new(weight, Tensor::from_vec(vec![0.0, 0.1])).unwrap())
        .push("lif", Lif::simple(0.002, 0.4))
}

#[test]
fn test_state_changes_outputs() {
    let net = network();
    let x = Tensor::from_vec(vec![0.6, 0.2]);

    let (fresh_a, _) = Executor::run(&net, std::slice::from_ref(&x), StateTree::new()).unwrap();
    let (fresh_b, _) = Executor::run(&net, std::slice::from_ref(&x), StateTree::new()).unwrap();
    assert_eq!(fresh_a, fresh_b);

    let (outputs, state) = Executor::run_sequence(&net, &[x.clone(), x], StateTree::new()).unwrap();
    assert_ne!(outputs[0], outputs[1]);
    assert_eq!(state.leaf_paths(), vec!["lif"]);
}

#[test]
fn test_shared_module_gets_distinct_state() {
    let net = Parallel::new()
        .branch("left", Lif::simple(0.01, 1.0))
        .branch("right", Lif::simple(0.01, 1.0));
    let (_, state) = Executor::run(&net, &[Tensor::from_vec(vec![1.0])], StateTree::new()).unwrap();
    assert_eq!(state.leaf_paths(), vec!["left", "right"]);
}

#[test]
fn test_state_from_other_network_is_rejected() {
    let other = Sequential::new().push("neuron", Lif::simple(0.01, 1.0));
    let (_, foreign) = Executor::run(&other, &[Tensor::from_vec(vec![1.0, 1.0])], StateTree::new()).unwrap();

    let err = Executor::run(&network(), &[Tensor::from_vec(vec![1.0, 1.0])], foreign).unwrap_err();
    assert!(matches!(err, ModuleError::StructuralMismatch { .. }));
}

#[test]
fn test_shape_errors_carry_the_module_path() {
    let err = Executor::run(&network(), &[Tensor::from_vec(vec![1.0, 2.0, 3.0])], StateTree::new()).unwrap_err();
    match err {
        ModuleError::Tensor { path, .. } => assert_eq!(path, "fc"),
        other => panic!("unexpected error: {other}"),
    }
}
