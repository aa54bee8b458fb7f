// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node catalog for NIR graphs.
//!
//! Every node is one of a fixed set of primitive operation kinds, each with its
//! own typed parameters. Neuron parameters follow the continuous-time NIR
//! definitions; discretization is left to whoever executes the graph.

use crate::graph::{Graph, GraphError};
use crate::types::{Array, Metadata, Shape, TypeSignature};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the single input port of primitive nodes
pub const INPUT_PORT: &str = "input";
/// Name of the single output port of primitive nodes
pub const OUTPUT_PORT: &str = "output";

/// Primitive operation kind with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// Graph input boundary
    Input {
        /// Shape of the incoming signal
        shape: Shape,
    },
    /// Graph output boundary
    Output {
        /// Shape of the outgoing signal
        shape: Shape,
    },
    /// `y = W x + b`
    Affine {
        /// Weight matrix `[out, in]`
        weight: Array,
        /// Bias vector `[out]`
        bias: Array,
    },
    /// `y = W x`
    Linear {
        /// Weight matrix `[out, in]`
        weight: Array,
    },
    /// `y = s * x`
    Scale {
        /// Elementwise scale
        scale: Array,
    },
    /// `y = H(x - threshold)`
    Threshold {
        /// Elementwise threshold
        threshold: Array,
    },
    /// Collapse a range of dimensions into one
    Flatten {
        /// First flattened dimension (negative counts from the end)
        start_dim: i64,
        /// Last flattened dimension (negative counts from the end)
        end_dim: i64,
    },
    /// Average over 2-D windows of a `[.., H, W]` signal
    AvgPool2d {
        /// Window size
        kernel_size: [usize; 2],
        /// Window stride
        stride: [usize; 2],
        /// Zero padding on each side
        padding: [usize; 2],
    },
    /// Sum over 2-D windows of a `[.., H, W]` signal
    SumPool2d {
        /// Window size
        kernel_size: [usize; 2],
        /// Window stride
        stride: [usize; 2],
        /// Zero padding on each side
        padding: [usize; 2],
    },
    /// Integrator: `dv/dt = r I`
    #[serde(rename = "I")]
    Integrator {
        /// Resistance
        r: Array,
    },
    /// Integrate-and-fire neuron
    #[serde(rename = "IF")]
    IntegrateAndFire {
        /// Resistance
        r: Array,
        /// Firing threshold
        v_threshold: Array,
        /// Potential after a spike
        v_reset: Array,
    },
    /// Leaky integrator: `tau dv/dt = (v_leak - v) + r I`
    #[serde(rename = "LI")]
    LeakyIntegrator {
        /// Membrane time constant
        tau: Array,
        /// Resistance
        r: Array,
        /// Resting potential
        v_leak: Array,
    },
    /// Leaky integrate-and-fire neuron
    #[serde(rename = "LIF")]
    Lif {
        /// Membrane time constant
        tau: Array,
        /// Resistance
        r: Array,
        /// Resting potential
        v_leak: Array,
        /// Firing threshold
        v_threshold: Array,
        /// Potential after a spike
        v_reset: Array,
    },
    /// Current-based leaky integrate-and-fire neuron
    #[serde(rename = "CubaLIF")]
    CubaLif {
        /// Synaptic time constant
        tau_syn: Array,
        /// Membrane time constant
        tau_mem: Array,
        /// Resistance
        r: Array,
        /// Resting potential
        v_leak: Array,
        /// Firing threshold
        v_threshold: Array,
        /// Potential after a spike
        v_reset: Array,
        /// Input weight onto the synaptic current
        w_in: Array,
    },
    /// Nested graph
    Graph(Box<Graph>),
}

/// Data-free discriminant of [`NodeKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeTag {
    /// [`NodeKind::Input`]
    Input,
    /// [`NodeKind::Output`]
    Output,
    /// [`NodeKind::Affine`]
    Affine,
    /// [`NodeKind::Linear`]
    Linear,
    /// [`NodeKind::Scale`]
    Scale,
    /// [`NodeKind::Threshold`]
    Threshold,
    /// [`NodeKind::Flatten`]
    Flatten,
    /// [`NodeKind::AvgPool2d`]
    AvgPool2d,
    /// [`NodeKind::SumPool2d`]
    SumPool2d,
    /// [`NodeKind::Integrator`]
    Integrator,
    /// [`NodeKind::IntegrateAndFire`]
    IntegrateAndFire,
    /// [`NodeKind::LeakyIntegrator`]
    LeakyIntegrator,
    /// [`NodeKind::Lif`]
    Lif,
    /// [`NodeKind::CubaLif`]
    CubaLif,
    /// [`NodeKind::Graph`]
    Graph,
}

impl NodeTag {
    /// Every tag in the catalog
    pub fn all() -> &'static [NodeTag] {
        &[
            NodeTag::Input,
            NodeTag::Output,
            NodeTag::Affine,
            NodeTag::Linear,
            NodeTag::Scale,
            NodeTag::Threshold,
            NodeTag::Flatten,
            NodeTag::AvgPool2d,
            NodeTag::SumPool2d,
            NodeTag::Integrator,
            NodeTag::IntegrateAndFire,
            NodeTag::LeakyIntegrator,
            NodeTag::Lif,
            NodeTag::CubaLif,
            NodeTag::Graph,
        ]
    }

    /// Name used by the NIR format
    pub fn nir_name(&self) -> &'static str {
        match self {
            NodeTag::Input => "Input",
            NodeTag::Output => "Output",
            NodeTag::Affine => "Affine",
            NodeTag::Linear => "Linear",
            NodeTag::Scale => "Scale",
            NodeTag::Threshold => "Threshold",
            NodeTag::Flatten => "Flatten",
            NodeTag::AvgPool2d => "AvgPool2d",
            NodeTag::SumPool2d => "SumPool2d",
            NodeTag::Integrator => "I",
            NodeTag::IntegrateAndFire => "IF",
            NodeTag::LeakyIntegrator => "LI",
            NodeTag::Lif => "LIF",
            NodeTag::CubaLif => "CubaLIF",
            NodeTag::Graph => "NIRGraph",
        }
    }
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.nir_name())
    }
}

impl NodeKind {
    /// Discriminant of this kind
    pub fn tag(&self) -> NodeTag {
        match self {
            NodeKind::Input { .. } => NodeTag::Input,
            NodeKind::Output { .. } => NodeTag::Output,
            NodeKind::Affine { .. } => NodeTag::Affine,
            NodeKind::Linear { .. } => NodeTag::Linear,
            NodeKind::Scale { .. } => NodeTag::Scale,
            NodeKind::Threshold { .. } => NodeTag::Threshold,
            NodeKind::Flatten { .. } => NodeTag::Flatten,
            NodeKind::AvgPool2d { .. } => NodeTag::AvgPool2d,
            NodeKind::SumPool2d { .. } => NodeTag::SumPool2d,
            NodeKind::Integrator { .. } => NodeTag::Integrator,
            NodeKind::IntegrateAndFire { .. } => NodeTag::IntegrateAndFire,
            NodeKind::LeakyIntegrator { .. } => NodeTag::LeakyIntegrator,
            NodeKind::Lif { .. } => NodeTag::Lif,
            NodeKind::CubaLif { .. } => NodeTag::CubaLif,
            NodeKind::Graph(_) => NodeTag::Graph,
        }
    }

    /// Whether the node carries state from one call to the next
    pub fn is_stateful(&self) -> bool {
        match self {
            NodeKind::Integrator { .. }
            | NodeKind::IntegrateAndFire { .. }
            | NodeKind::LeakyIntegrator { .. }
            | NodeKind::Lif { .. }
            | NodeKind::CubaLif { .. } => true,
            NodeKind::Graph(graph) => graph.nodes().any(|n| n.kind.is_stateful()),
            _ => false,
        }
    }

    /// Whether this is an input or output boundary
    pub fn is_boundary(&self) -> bool {
        matches!(self, NodeKind::Input { .. } | NodeKind::Output { .. })
    }

    /// Input and output shapes implied by the parameters alone
    fn declared_shapes(&self) -> (Option<Shape>, Option<Shape>) {
        match self {
            NodeKind::Input { shape } | NodeKind::Output { shape } => {
                (Some(shape.clone()), Some(shape.clone()))
            }
            NodeKind::Affine { weight, .. } | NodeKind::Linear { weight } => {
                match weight.shape.as_slice() {
                    [rows, cols] => (Some(vec![*cols]), Some(vec![*rows])),
                    _ => (None, None),
                }
            }
            NodeKind::Scale { scale: p }
            | NodeKind::Threshold { threshold: p }
            | NodeKind::Integrator { r: p } => {
                let shape = p.population_shape();
                (shape.clone(), shape)
            }
            NodeKind::IntegrateAndFire { r, v_threshold, v_reset } => {
                let shape = population([r, v_threshold, v_reset]);
                (shape.clone(), shape)
            }
            NodeKind::LeakyIntegrator { tau, r, v_leak } => {
                let shape = population([tau, r, v_leak]);
                (shape.clone(), shape)
            }
            NodeKind::Lif { tau, r, v_leak, v_threshold, v_reset } => {
                let shape = population([tau, r, v_leak, v_threshold, v_reset]);
                (shape.clone(), shape)
            }
            NodeKind::CubaLif { tau_syn, tau_mem, r, v_leak, v_threshold, v_reset, w_in } => {
                let shape = population([tau_syn, tau_mem, r, v_leak, v_threshold, v_reset, w_in]);
                (shape.clone(), shape)
            }
            NodeKind::Graph(graph) => (
                graph.input_type.first().cloned(),
                graph.output_type.first().cloned(),
            ),
            NodeKind::Flatten { .. } | NodeKind::AvgPool2d { .. } | NodeKind::SumPool2d { .. } => {
                (None, None)
            }
        }
    }

    /// Compute the output shape produced from an input of the given shape
    pub fn output_shape(&self, input: &[usize]) -> Result<Shape, GraphError> {
        let mismatch = |expected: String| GraphError::ShapeMismatch {
            node: self.tag().to_string(),
            expected,
            found: input.to_vec(),
        };
        match self {
            NodeKind::Input { shape } | NodeKind::Output { shape } => {
                if shape.as_slice() != input {
                    return Err(mismatch(format!("{shape:?}")));
                }
                Ok(shape.clone())
            }
            NodeKind::Affine { weight, .. } | NodeKind::Linear { weight } => {
                let [rows, cols] = weight.shape.as_slice() else {
                    return Err(mismatch("a 2-D weight".to_string()));
                };
                match input.split_last() {
                    Some((last, batch)) if last == cols => {
                        let mut shape = batch.to_vec();
                        shape.push(*rows);
                        Ok(shape)
                    }
                    _ => Err(mismatch(format!("[.., {cols}]"))),
                }
            }
            NodeKind::Flatten { start_dim, end_dim } => {
                flatten_shape(input, *start_dim, *end_dim)
                    .ok_or_else(|| mismatch(format!("rank covering dims {start_dim}..={end_dim}")))
            }
            NodeKind::AvgPool2d { kernel_size, stride, padding }
            | NodeKind::SumPool2d { kernel_size, stride, padding } => {
                pooled_shape(input, *kernel_size, *stride, *padding)
                    .ok_or_else(|| mismatch(format!("[.., H, W] with H, W >= {kernel_size:?}")))
            }
            NodeKind::Graph(graph) => graph
                .output_type
                .first()
                .cloned()
                .ok_or_else(|| mismatch("a subgraph with a known output type".to_string())),
            _ => {
                let (expected, _) = self.declared_shapes();
                match expected {
                    Some(shape) if shape.as_slice() != input => Err(mismatch(format!("{shape:?}"))),
                    _ => Ok(input.to_vec()),
                }
            }
        }
    }
}

fn population<const N: usize>(params: [&Array; N]) -> Option<Shape> {
    params.iter().find_map(|p| p.population_shape())
}

/// Shape after flattening dimensions `start_dim..=end_dim`
pub fn flatten_shape(shape: &[usize], start_dim: i64, end_dim: i64) -> Option<Shape> {
    let rank = shape.len() as i64;
    let start = if start_dim < 0 { start_dim + rank } else { start_dim };
    let end = if end_dim < 0 { end_dim + rank } else { end_dim };
    if start < 0 || end >= rank || start > end {
        return None;
    }
    let (start, end) = (start as usize, end as usize);
    let mut out = shape[..start].to_vec();
    out.push(shape[start..=end].iter().product());
    out.extend_from_slice(&shape[end + 1..]);
    Some(out)
}

/// Shape after 2-D pooling over the last two dimensions
pub fn pooled_shape(
    shape: &[usize],
    kernel_size: [usize; 2],
    stride: [usize; 2],
    padding: [usize; 2],
) -> Option<Shape> {
    if shape.len() < 2 || stride.contains(&0) {
        return None;
    }
    let lead = shape.len() - 2;
    let mut out = shape[..lead].to_vec();
    for axis in 0..2 {
        let padded = shape[lead + axis] + 2 * padding[axis];
        if padded < kernel_size[axis] {
            return None;
        }
        out.push((padded - kernel_size[axis]) / stride[axis] + 1);
    }
    Some(out)
}

/// A node in a NIR graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Operation and parameters
    pub kind: NodeKind,
    /// Input signature (empty when unknown)
    #[serde(default)]
    pub input_type: TypeSignature,
    /// Output signature (empty when unknown)
    #[serde(default)]
    pub output_type: TypeSignature,
    /// Opaque metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl Node {
    /// Create a node, deriving its signatures from the parameters where possible
    pub fn new(kind: NodeKind) -> Self {
        let (input, output) = kind.declared_shapes();
        Self {
            input_type: TypeSignature::maybe(INPUT_PORT, input),
            output_type: TypeSignature::maybe(OUTPUT_PORT, output),
            kind,
            metadata: Metadata::new(),
        }
    }

    /// Create a node whose signatures are left for shape inference
    pub fn untyped(kind: NodeKind) -> Self {
        Self {
            kind,
            input_type: TypeSignature::new(),
            output_type: TypeSignature::new(),
            metadata: Metadata::new(),
        }
    }

    /// Create an input boundary node
    pub fn input(shape: Shape) -> Self {
        Self::new(NodeKind::Input { shape })
    }

    /// Create an output boundary node
    pub fn output(shape: Shape) -> Self {
        Self::new(NodeKind::Output { shape })
    }

    /// Wrap a graph as a subgraph node
    pub fn subgraph(graph: Graph) -> Self {
        Self::new(NodeKind::Graph(Box::new(graph)))
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Discriminant of this node's kind
    pub fn tag(&self) -> NodeTag {
        self.kind.tag()
    }

    /// Shape of the primary input, if known
    pub fn input_shape(&self) -> Option<&Shape> {
        self.input_type.first()
    }

    /// Shape of the primary output, if known
    pub fn output_shape(&self) -> Option<&Shape> {
        self.output_type.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affine_declares_types() {
        let node = Node::new(NodeKind::Affine {
            weight: Array::new(vec![2, 3], vec![0.0; 6]).unwrap(),
            bias: Array::vector(vec![0.0; 2]),
        });
        assert_eq!(node.input_shape(), Some(&vec![3]));
        assert_eq!(node.output_shape(), Some(&vec![2]));
        assert_eq!(node.tag(), NodeTag::Affine);
    }

    #[test]
    fn test_scalar_neuron_has_unknown_types() {
        let node = Node::new(NodeKind::LeakyIntegrator {
            tau: Array::scalar(0.01),
            r: Array::scalar(1.0),
            v_leak: Array::scalar(0.0),
        });
        assert!(node.input_type.is_empty());
        assert!(node.kind.is_stateful());
        assert_eq!(node.kind.output_shape(&[5]).unwrap(), vec![5]);
    }

    #[test]
    fn test_flatten_and_pool_shapes() {
        assert_eq!(flatten_shape(&[2, 3, 4], 0, -1), Some(vec![24]));
        assert_eq!(flatten_shape(&[2, 3, 4], 1, 2), Some(vec![2, 12]));
        assert_eq!(flatten_shape(&[2, 3], 1, 0), None);
        assert_eq!(pooled_shape(&[1, 4, 4], [2, 2], [2, 2], [0, 0]), Some(vec![1, 2, 2]));
        assert_eq!(pooled_shape(&[1, 1, 1], [2, 2], [1, 1], [0, 0]), None);
    }

    #[test]
    fn test_affine_rejects_wrong_input() {
        let kind = NodeKind::Linear {
            weight: Array::new(vec![2, 3], vec![0.0; 6]).unwrap(),
        };
        assert!(kind.output_shape(&[4]).is_err());
        assert_eq!(kind.output_shape(&[3]).unwrap(), vec![2]);
    }

    #[test]
    fn test_nir_names() {
        assert_eq!(NodeTag::Lif.to_string(), "LIF");
        assert_eq!(NodeTag::CubaLif.nir_name(), "CubaLIF");
        assert_eq!(NodeTag::all().len(), 15);
    }
}
