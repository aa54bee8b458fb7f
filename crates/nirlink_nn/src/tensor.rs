// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dense `f32` tensors.
//!
//! Only what the layers in this crate need: elementwise arithmetic with
//! scalar broadcasting, matrix-vector products over the last dimension,
//! reshaping and 2-D window pooling.

use nirlink_graph::node::{flatten_shape, pooled_shape};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tensor errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TensorError {
    /// Data length does not fill the shape
    #[error("Shape {shape:?} needs {expected} values, got {found}")]
    DataLength {
        /// Requested shape
        shape: Vec<usize>,
        /// Element count implied by the shape
        expected: usize,
        /// Provided element count
        found: usize,
    },

    /// Operands cannot be combined
    #[error("Cannot {op} tensors of shapes {lhs:?} and {rhs:?}")]
    ShapeMismatch {
        /// Operation name
        op: &'static str,
        /// Left operand shape
        lhs: Vec<usize>,
        /// Right operand shape
        rhs: Vec<usize>,
    },
}

/// Result type for tensor operations
pub type Result<T> = std::result::Result<T, TensorError>;

/// Row-major `f32` tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor from a shape and matching data
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TensorError::DataLength {
                shape,
                expected,
                found: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Create a one-dimensional tensor
    pub fn from_vec(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Create a zero-dimensional tensor
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// Create a tensor filled with one value
    pub fn full(shape: &[usize], value: f32) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![value; shape.iter().product()],
        }
    }

    /// Create a tensor of zeros
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Dimension sizes
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Row-major values
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Whether this tensor broadcasts as a single value
    pub fn is_scalar(&self) -> bool {
        self.data.len() == 1
    }

    /// Apply a function to every element
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// Combine two tensors elementwise.
    ///
    /// A single-element operand broadcasts, as does an operand whose shape is
    /// a suffix of the other's.
    pub fn zip_map(&self, other: &Tensor, op: &'static str, f: impl Fn(f32, f32) -> f32) -> Result<Tensor> {
        if self.shape == other.shape {
            let data = self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect();
            return Ok(Tensor { shape: self.shape.clone(), data });
        }
        if other.is_scalar() {
            let b = other.data[0];
            return Ok(self.map(|a| f(a, b)));
        }
        if self.is_scalar() {
            let a = self.data[0];
            return Ok(other.map(|b| f(a, b)));
        }
        // Trailing-dimension broadcast, e.g. a `[n]` bias over a `[batch, n]` signal
        if self.shape.ends_with(&other.shape) {
            let n = other.data.len();
            let data = self.data.iter().enumerate().map(|(i, &a)| f(a, other.data[i % n])).collect();
            return Ok(Tensor { shape: self.shape.clone(), data });
        }
        if other.shape.ends_with(&self.shape) {
            let n = self.data.len();
            let data = other.data.iter().enumerate().map(|(i, &b)| f(self.data[i % n], b)).collect();
            return Ok(Tensor { shape: other.shape.clone(), data });
        }
        Err(TensorError::ShapeMismatch {
            op,
            lhs: self.shape.clone(),
            rhs: other.shape.clone(),
        })
    }

    /// Elementwise sum
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_map(other, "add", |a, b| a + b)
    }

    /// Elementwise difference
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_map(other, "subtract", |a, b| a - b)
    }

    /// Elementwise product
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.zip_map(other, "multiply", |a, b| a * b)
    }

    /// Heaviside step: 1 where `self > threshold`, else 0
    pub fn step_above(&self, threshold: &Tensor) -> Result<Tensor> {
        self.zip_map(threshold, "compare", |a, b| if a > b { 1.0 } else { 0.0 })
    }

    /// Choose `on_true` where `mask` is non-zero, `self` elsewhere
    pub fn select(&self, mask: &Tensor, on_true: &Tensor) -> Result<Tensor> {
        let mask = mask.zip_map(self, "select", |m, _| m)?;
        let base = self.zip_map(&mask, "select", |s, _| s)?;
        let on_true = on_true.zip_map(&mask, "select", |t, _| t)?;
        if on_true.shape != mask.shape {
            return Err(TensorError::ShapeMismatch {
                op: "select",
                lhs: mask.shape,
                rhs: on_true.shape,
            });
        }
        let data = base
            .data
            .iter()
            .zip(&mask.data)
            .zip(&on_true.data)
            .map(|((&s, &m), &t)| if m != 0.0 { t } else { s })
            .collect();
        Ok(Tensor { shape: mask.shape, data })
    }

    /// Multiply by a `[out, in]` matrix over the last dimension
    pub fn matvec(&self, weight: &Tensor) -> Result<Tensor> {
        let mismatch = || TensorError::ShapeMismatch {
            op: "project",
            lhs: self.shape.clone(),
            rhs: weight.shape.clone(),
        };
        let [rows, cols] = weight.shape[..] else {
            return Err(mismatch());
        };
        let Some((&last, batch)) = self.shape.split_last() else {
            return Err(mismatch());
        };
        if last != cols {
            return Err(mismatch());
        }

        let mut data = Vec::with_capacity(self.data.len() / cols.max(1) * rows);
        for row in self.data.chunks(cols.max(1)) {
            for r in 0..rows {
                let w = &weight.data[r * cols..(r + 1) * cols];
                data.push(w.iter().zip(row).map(|(a, b)| a * b).sum());
            }
        }
        let mut shape = batch.to_vec();
        shape.push(rows);
        Tensor::new(shape, data)
    }

    /// Reinterpret with a new shape holding the same number of elements
    pub fn reshape(&self, shape: Vec<usize>) -> Result<Tensor> {
        Tensor::new(shape, self.data.clone())
    }

    /// Collapse dimensions `start_dim..=end_dim` (negative counts from the end)
    pub fn flatten(&self, start_dim: i64, end_dim: i64) -> Result<Tensor> {
        let shape = flatten_shape(&self.shape, start_dim, end_dim).ok_or_else(|| TensorError::ShapeMismatch {
            op: "flatten",
            lhs: self.shape.clone(),
            rhs: Vec::new(),
        })?;
        self.reshape(shape)
    }

    /// Sum over 2-D windows of the last two dimensions (zero padding)
    pub fn sum_pool2d(
        &self,
        kernel_size: [usize; 2],
        stride: [usize; 2],
        padding: [usize; 2],
    ) -> Result<Tensor> {
        let mismatch = || TensorError::ShapeMismatch {
            op: "pool",
            lhs: self.shape.clone(),
            rhs: kernel_size.to_vec(),
        };
        let shape = pooled_shape(&self.shape, kernel_size, stride, padding).ok_or_else(mismatch)?;
        let lead = self.shape.len() - 2;
        let (h, w) = (self.shape[lead], self.shape[lead + 1]);
        if h * w == 0 {
            return Err(mismatch());
        }
        let (out_h, out_w) = (shape[lead], shape[lead + 1]);

        let planes: usize = self.shape[..lead].iter().product();
        let mut data = Vec::with_capacity(planes * out_h * out_w);
        for plane in self.data.chunks(h * w).take(planes) {
            for oy in 0..out_h {
                for ox in 0..out_w {
                    let mut acc = 0.0;
                    for ky in 0..kernel_size[0] {
                        for kx in 0..kernel_size[1] {
                            let y = (oy * stride[0] + ky).checked_sub(padding[0]);
                            let x = (ox * stride[1] + kx).checked_sub(padding[1]);
                            if let (Some(y), Some(x)) = (y, x) {
                                if y < h && x < w {
                                    acc += plane[y * w + x];
                                }
                            }
                        }
                    }
                    data.push(acc);
                }
            }
        }
        Tensor::new(shape, data)
    }

    /// Largest absolute elementwise difference, or `None` if shapes differ
    pub fn max_abs_diff(&self, other: &Tensor) -> Option<f32> {
        (self.shape == other.shape).then(|| {
            self.data
                .iter()
                .zip(&other.data)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f32::max)
        })
    }
}
