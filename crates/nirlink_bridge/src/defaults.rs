// SPDX-License-Identifier: MIT OR Apache-2.0
//! Default registries for the built-in layers and node kinds.

use crate::error::{BridgeError, Result};
use crate::interpreter::Interpreter;
use crate::registry::{ModuleMap, NodeMap};
use nirlink_graph::{Array, Node, NodeKind, NodeTag};
use nirlink_nn::{
    Affine, AvgPool2d, CubaLif, Flatten, IntegrateAndFire, Integrator, LeakyIntegrator, Lif, Linear,
    Module, Scale, SumPool2d, Tensor, Threshold, Window,
};

/// Copy a tensor into a graph array
pub fn tensor_to_array(tensor: &Tensor) -> Array {
    Array {
        shape: tensor.shape().to_vec(),
        data: tensor.data().to_vec(),
    }
}

/// Copy a graph array into a tensor
pub fn array_to_tensor(array: &Array) -> Result<Tensor> {
    Tensor::new(array.shape.clone(), array.data.clone()).map_err(|e| BridgeError::Conversion {
        subject: "array".to_string(),
        reason: e.to_string(),
    })
}

fn downcast<T: Module + 'static>(module: &dyn Module) -> Result<&T> {
    module.as_any().downcast_ref::<T>().ok_or_else(|| BridgeError::Conversion {
        subject: module.type_key().to_string(),
        reason: format!("not a {}", std::any::type_name::<T>()),
    })
}

fn wrong_kind(node: &Node, expected: NodeTag) -> BridgeError {
    BridgeError::Conversion {
        subject: node.tag().to_string(),
        reason: format!("constructor for {expected} received a {} node", node.tag()),
    }
}

// Tracing direction

fn affine_to_node(module: &dyn Module) -> Result<Node> {
    let m = downcast::<Affine>(module)?;
    Ok(Node::new(NodeKind::Affine {
        weight: tensor_to_array(&m.weight),
        bias: tensor_to_array(&m.bias),
    }))
}

fn linear_to_node(module: &dyn Module) -> Result<Node> {
    let m = downcast::<Linear>(module)?;
    Ok(Node::new(NodeKind::Linear {
        weight: tensor_to_array(&m.weight),
    }))
}

fn scale_to_node(module: &dyn Module) -> Result<Node> {
    let m = downcast::<Scale>(module)?;
    Ok(Node::new(NodeKind::Scale {
        scale: tensor_to_array(&m.scale),
    }))
}

fn threshold_to_node(module: &dyn Module) -> Result<Node> {
    let m = downcast::<Threshold>(module)?;
    Ok(Node::new(NodeKind::Threshold {
        threshold: tensor_to_array(&m.threshold),
    }))
}

fn flatten_to_node(module: &dyn Module) -> Result<Node> {
    let m = downcast::<Flatten>(module)?;
    Ok(Node::new(NodeKind::Flatten {
        start_dim: m.start_dim,
        end_dim: m.end_dim,
    }))
}

fn sum_pool_to_node(module: &dyn Module) -> Result<Node> {
    let Window { kernel_size, stride, padding } = downcast::<SumPool2d>(module)?.window;
    Ok(Node::new(NodeKind::SumPool2d { kernel_size, stride, padding }))
}

fn avg_pool_to_node(module: &dyn Module) -> Result<Node> {
    let Window { kernel_size, stride, padding } = downcast::<AvgPool2d>(module)?.window;
    Ok(Node::new(NodeKind::AvgPool2d { kernel_size, stride, padding }))
}

fn integrator_to_node(module: &dyn Module) -> Result<Node> {
    let m = downcast::<Integrator>(module)?;
    Ok(Node::new(NodeKind::Integrator { r: tensor_to_array(&m.r) }))
}

fn if_to_node(module: &dyn Module) -> Result<Node> {
    let m = downcast::<IntegrateAndFire>(module)?;
    Ok(Node::new(NodeKind::IntegrateAndFire {
        r: tensor_to_array(&m.r),
        v_threshold: tensor_to_array(&m.v_threshold),
        v_reset: tensor_to_array(&m.v_reset),
    }))
}

fn li_to_node(module: &dyn Module) -> Result<Node> {
    let m = downcast::<LeakyIntegrator>(module)?;
    Ok(Node::new(NodeKind::LeakyIntegrator {
        tau: tensor_to_array(&m.tau),
        r: tensor_to_array(&m.r),
        v_leak: tensor_to_array(&m.v_leak),
    }))
}

fn lif_to_node(module: &dyn Module) -> Result<Node> {
    let m = downcast::<Lif>(module)?;
    Ok(Node::new(NodeKind::Lif {
        tau: tensor_to_array(&m.tau),
        r: tensor_to_array(&m.r),
        v_leak: tensor_to_array(&m.v_leak),
        v_threshold: tensor_to_array(&m.v_threshold),
        v_reset: tensor_to_array(&m.v_reset),
    }))
}

fn cuba_lif_to_node(module: &dyn Module) -> Result<Node> {
    let m = downcast::<CubaLif>(module)?;
    Ok(Node::new(NodeKind::CubaLif {
        tau_syn: tensor_to_array(&m.tau_syn),
        tau_mem: tensor_to_array(&m.tau_mem),
        r: tensor_to_array(&m.r),
        v_leak: tensor_to_array(&m.v_leak),
        v_threshold: tensor_to_array(&m.v_threshold),
        v_reset: tensor_to_array(&m.v_reset),
        w_in: tensor_to_array(&m.w_in),
    }))
}

/// Tracing registry covering every built-in primitive layer and neuron
pub fn default_module_map() -> ModuleMap {
    let mut map = ModuleMap::new();
    map.register(Affine::TYPE, affine_to_node);
    map.register(Linear::TYPE, linear_to_node);
    map.register(Scale::TYPE, scale_to_node);
    map.register(Threshold::TYPE, threshold_to_node);
    map.register(Flatten::TYPE, flatten_to_node);
    map.register(SumPool2d::TYPE, sum_pool_to_node);
    map.register(AvgPool2d::TYPE, avg_pool_to_node);
    map.register(Integrator::TYPE, integrator_to_node);
    map.register(IntegrateAndFire::TYPE, if_to_node);
    map.register(LeakyIntegrator::TYPE, li_to_node);
    map.register(Lif::TYPE, lif_to_node);
    map.register(CubaLif::TYPE, cuba_lif_to_node);
    map
}

// Interpretation direction

fn build_affine(node: &Node, _: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::Affine { weight, bias } = &node.kind else {
        return Err(wrong_kind(node, NodeTag::Affine));
    };
    let layer = Affine::new(array_to_tensor(weight)?, array_to_tensor(bias)?).map_err(|e| BridgeError::Conversion {
        subject: NodeTag::Affine.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Box::new(layer))
}

fn build_linear(node: &Node, _: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::Linear { weight } = &node.kind else {
        return Err(wrong_kind(node, NodeTag::Linear));
    };
    Ok(Box::new(Linear::new(array_to_tensor(weight)?)))
}

fn build_scale(node: &Node, _: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::Scale { scale } = &node.kind else {
        return Err(wrong_kind(node, NodeTag::Scale));
    };
    Ok(Box::new(Scale::new(array_to_tensor(scale)?)))
}

fn build_threshold(node: &Node, _: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::Threshold { threshold } = &node.kind else {
        return Err(wrong_kind(node, NodeTag::Threshold));
    };
    Ok(Box::new(Threshold::new(array_to_tensor(threshold)?)))
}

fn build_flatten(node: &Node, _: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::Flatten { start_dim, end_dim } = node.kind else {
        return Err(wrong_kind(node, NodeTag::Flatten));
    };
    Ok(Box::new(Flatten::new(start_dim, end_dim)))
}

fn build_sum_pool(node: &Node, _: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::SumPool2d { kernel_size, stride, padding } = node.kind else {
        return Err(wrong_kind(node, NodeTag::SumPool2d));
    };
    Ok(Box::new(SumPool2d::new(Window { kernel_size, stride, padding })))
}

fn build_avg_pool(node: &Node, _: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::AvgPool2d { kernel_size, stride, padding } = node.kind else {
        return Err(wrong_kind(node, NodeTag::AvgPool2d));
    };
    Ok(Box::new(AvgPool2d::new(Window { kernel_size, stride, padding })))
}

fn build_integrator(node: &Node, interp: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::Integrator { r } = &node.kind else {
        return Err(wrong_kind(node, NodeTag::Integrator));
    };
    Ok(Box::new(Integrator::new(array_to_tensor(r)?).with_dt(interp.config().dt)))
}

fn build_if(node: &Node, interp: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::IntegrateAndFire { r, v_threshold, v_reset } = &node.kind else {
        return Err(wrong_kind(node, NodeTag::IntegrateAndFire));
    };
    let neuron = IntegrateAndFire::new(array_to_tensor(r)?, array_to_tensor(v_threshold)?, array_to_tensor(v_reset)?);
    Ok(Box::new(neuron.with_dt(interp.config().dt)))
}

fn build_li(node: &Node, interp: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::LeakyIntegrator { tau, r, v_leak } = &node.kind else {
        return Err(wrong_kind(node, NodeTag::LeakyIntegrator));
    };
    let neuron = LeakyIntegrator::new(array_to_tensor(tau)?, array_to_tensor(r)?, array_to_tensor(v_leak)?);
    Ok(Box::new(neuron.with_dt(interp.config().dt)))
}

fn build_lif(node: &Node, interp: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::Lif { tau, r, v_leak, v_threshold, v_reset } = &node.kind else {
        return Err(wrong_kind(node, NodeTag::Lif));
    };
    let neuron = Lif::new(
        array_to_tensor(tau)?,
        array_to_tensor(r)?,
        array_to_tensor(v_leak)?,
        array_to_tensor(v_threshold)?,
        array_to_tensor(v_reset)?,
    );
    Ok(Box::new(neuron.with_dt(interp.config().dt)))
}

fn build_cuba_lif(node: &Node, interp: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::CubaLif { tau_syn, tau_mem, r, v_leak, v_threshold, v_reset, w_in } = &node.kind else {
        return Err(wrong_kind(node, NodeTag::CubaLif));
    };
    let neuron = CubaLif::new(
        array_to_tensor(tau_syn)?,
        array_to_tensor(tau_mem)?,
        array_to_tensor(r)?,
        array_to_tensor(v_leak)?,
        array_to_tensor(v_threshold)?,
        array_to_tensor(v_reset)?,
    )
    .with_w_in(array_to_tensor(w_in)?);
    Ok(Box::new(neuron.with_dt(interp.config().dt)))
}

fn build_subgraph(node: &Node, interp: &Interpreter<'_>) -> Result<Box<dyn Module>> {
    let NodeKind::Graph(graph) = &node.kind else {
        return Err(wrong_kind(node, NodeTag::Graph));
    };
    Ok(Box::new(interp.interpret(graph)?))
}

/// Interpretation registry covering every node kind in the catalog
pub fn default_node_map() -> NodeMap {
    let mut map = NodeMap::new();
    map.register(NodeTag::Affine, build_affine);
    map.register(NodeTag::Linear, build_linear);
    map.register(NodeTag::Scale, build_scale);
    map.register(NodeTag::Threshold, build_threshold);
    map.register(NodeTag::Flatten, build_flatten);
    map.register(NodeTag::SumPool2d, build_sum_pool);
    map.register(NodeTag::AvgPool2d, build_avg_pool);
    map.register(NodeTag::Integrator, build_integrator);
    map.register(NodeTag::IntegrateAndFire, build_if);
    map.register(NodeTag::LeakyIntegrator, build_li);
    map.register(NodeTag::Lif, build_lif);
    map.register(NodeTag::CubaLif, build_cuba_lif);
    map.register(NodeTag::Graph, build_subgraph);
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_catalog() {
        let nodes = default_node_map();
        for tag in NodeTag::all() {
            let boundary = matches!(tag, NodeTag::Input | NodeTag::Output);
            assert_eq!(nodes.contains(*tag), !boundary, "{tag}");
        }
        assert_eq!(default_module_map().len(), 12);
    }

    #[test]
    fn test_wrong_concrete_type_is_conversion_error() {
        let err = lif_to_node(&Scale::new(Tensor::scalar(1.0))).unwrap_err();
        assert!(matches!(err, BridgeError::Conversion { .. }));
    }

    #[test]
    fn test_array_tensor_copy() {
        let array = Array::new(vec![2, 1], vec![1.0, 2.0]).unwrap();
        let tensor = array_to_tensor(&array).unwrap();
        assert_eq!(tensor.shape(), &[2, 1]);
        assert_eq!(tensor_to_array(&tensor), array);
    }
}
