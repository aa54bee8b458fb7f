// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stateless primitive layers.

use crate::module::{Layer, Module, Result, Scope, Signal, Supertypes, TypeKey};
use crate::state::LayerState;
use crate::tensor::{Tensor, TensorError};
use std::any::Any;

/// Abstract supertype of weight projections
pub const PROJECTION: TypeKey = TypeKey::new("Projection");
/// Abstract supertype of window pooling layers
pub const POOLING: TypeKey = TypeKey::new("Pooling");

/// Implement [`Module`] for a primitive that is evaluated directly by the scope
macro_rules! primitive_module {
    ($ty:ty, $key:expr, $supertypes:expr) => {
        impl Module for $ty {
            fn type_key(&self) -> TypeKey {
                $key
            }

            fn supertypes(&self) -> Supertypes {
                $supertypes
            }

            fn forward(&self, scope: &mut dyn Scope, inputs: &[Signal]) -> Result<Signal> {
                scope.evaluate(self, inputs)
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}
pub(crate) use primitive_module;

/// `y = W x + b`
#[derive(Debug, Clone, PartialEq)]
pub struct Affine {
    /// Weight `[out, in]`
    pub weight: Tensor,
    /// Bias `[out]`
    pub bias: Tensor,
}

impl Affine {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("Affine");

    /// Create an affine map, checking that the bias matches the weight rows
    pub fn new(weight: Tensor, bias: Tensor) -> std::result::Result<Self, TensorError> {
        match weight.shape() {
            [rows, _] if bias.shape() == [*rows] => Ok(Self { weight, bias }),
            _ => Err(TensorError::ShapeMismatch {
                op: "build affine from",
                lhs: weight.shape().to_vec(),
                rhs: bias.shape().to_vec(),
            }),
        }
    }
}

primitive_module!(Affine, Affine::TYPE, &[&[PROJECTION]]);

impl Layer for Affine {
    fn layer_name(&self) -> &'static str {
        "Affine"
    }

    fn step(&self, input: &Tensor, _state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        Ok((input.matvec(&self.weight)?.add(&self.bias)?, None))
    }
}

/// `y = W x`
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    /// Weight `[out, in]`
    pub weight: Tensor,
}

impl Linear {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("Linear");

    /// Create a linear map
    pub fn new(weight: Tensor) -> Self {
        Self { weight }
    }
}

primitive_module!(Linear, Linear::TYPE, &[&[PROJECTION]]);

impl Layer for Linear {
    fn layer_name(&self) -> &'static str {
        "Linear"
    }

    fn step(&self, input: &Tensor, _state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        Ok((input.matvec(&self.weight)?, None))
    }
}

/// `y = s * x`
#[derive(Debug, Clone, PartialEq)]
pub struct Scale {
    /// Elementwise scale
    pub scale: Tensor,
}

impl Scale {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("Scale");

    /// Create a scaling layer
    pub fn new(scale: Tensor) -> Self {
        Self { scale }
    }
}

primitive_module!(Scale, Scale::TYPE, &[]);

impl Layer for Scale {
    fn layer_name(&self) -> &'static str {
        "Scale"
    }

    fn step(&self, input: &Tensor, _state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        Ok((input.mul(&self.scale)?, None))
    }
}

/// Heaviside step against a threshold
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    /// Elementwise threshold
    pub threshold: Tensor,
}

impl Threshold {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("Threshold");

    /// Create a threshold layer
    pub fn new(threshold: Tensor) -> Self {
        Self { threshold }
    }
}

primitive_module!(Threshold, Threshold::TYPE, &[]);

impl Layer for Threshold {
    fn layer_name(&self) -> &'static str {
        "Threshold"
    }

    fn step(&self, input: &Tensor, _state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        Ok((input.step_above(&self.threshold)?, None))
    }
}

/// Collapse a range of dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flatten {
    /// First flattened dimension
    pub start_dim: i64,
    /// Last flattened dimension
    pub end_dim: i64,
}

impl Flatten {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("Flatten");

    /// Create a flatten layer
    pub fn new(start_dim: i64, end_dim: i64) -> Self {
        Self { start_dim, end_dim }
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new(0, -1)
    }
}

primitive_module!(Flatten, Flatten::TYPE, &[]);

impl Layer for Flatten {
    fn layer_name(&self) -> &'static str {
        "Flatten"
    }

    fn step(&self, input: &Tensor, _state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        Ok((input.flatten(self.start_dim, self.end_dim)?, None))
    }
}

/// Window geometry shared by the pooling layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Window size
    pub kernel_size: [usize; 2],
    /// Window stride
    pub stride: [usize; 2],
    /// Zero padding on each side
    pub padding: [usize; 2],
}

impl Window {
    /// Non-overlapping window of the given size
    pub fn square(size: usize) -> Self {
        Self {
            kernel_size: [size, size],
            stride: [size, size],
            padding: [0, 0],
        }
    }

    fn area(&self) -> f32 {
        (self.kernel_size[0] * self.kernel_size[1]) as f32
    }
}

/// Sum over 2-D windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SumPool2d {
    /// Window geometry
    pub window: Window,
}

impl SumPool2d {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("SumPool2d");

    /// Create a sum pooling layer
    pub fn new(window: Window) -> Self {
        Self { window }
    }
}

primitive_module!(SumPool2d, SumPool2d::TYPE, &[&[POOLING]]);

impl Layer for SumPool2d {
    fn layer_name(&self) -> &'static str {
        "SumPool2d"
    }

    fn step(&self, input: &Tensor, _state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        let Window { kernel_size, stride, padding } = self.window;
        Ok((input.sum_pool2d(kernel_size, stride, padding)?, None))
    }
}

/// Average over 2-D windows (padding counts towards the window size)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvgPool2d {
    /// Window geometry
    pub window: Window,
}

impl AvgPool2d {
    /// Type key
    pub const TYPE: TypeKey = TypeKey::new("AvgPool2d");

    /// Create an average pooling layer
    pub fn new(window: Window) -> Self {
        Self { window }
    }
}

primitive_module!(AvgPool2d, AvgPool2d::TYPE, &[&[POOLING]]);

impl Layer for AvgPool2d {
    fn layer_name(&self) -> &'static str {
        "AvgPool2d"
    }

    fn step(&self, input: &Tensor, _state: Option<&LayerState>) -> Result<(Tensor, Option<LayerState>)> {
        let Window { kernel_size, stride, padding } = self.window;
        let area = self.window.area();
        Ok((input.sum_pool2d(kernel_size, stride, padding)?.map(|x| x / area), None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Executor;
    use crate::state::StateTree;

    #[test]
    fn test_affine_runs_eagerly() {
        let layer = Affine::new(
            Tensor::new(vec![2, 2], vec![1.0, 0.0, 0.0, 2.0]).unwrap(),
            Tensor::from_vec(vec![0.5, -0.5]),
        )
        .unwrap();
        let (y, state) = Executor::run(&layer, &[Tensor::from_vec(vec![1.0, 1.0])], StateTree::new()).unwrap();
        assert_eq!(y.data(), &[1.5, 1.5]);
        assert!(state.is_empty());
    }

    #[test]
    fn test_affine_rejects_bad_bias() {
        let weight = Tensor::zeros(&[2, 3]);
        assert!(Affine::new(weight, Tensor::zeros(&[3])).is_err());
    }

    #[test]
    fn test_avg_pool_divides_by_area() {
        let pool = AvgPool2d::new(Window::square(2));
        let x = Tensor::new(vec![1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let (y, _) = pool.step(&x, None).unwrap();
        assert_eq!(y.data(), &[2.5]);
    }

    #[test]
    fn test_projection_lineage() {
        let layer = Linear::new(Tensor::zeros(&[1, 1]));
        let lineage = crate::module::lineage(&layer);
        assert_eq!(lineage, vec![vec![Linear::TYPE], vec![PROJECTION]]);
    }
}
