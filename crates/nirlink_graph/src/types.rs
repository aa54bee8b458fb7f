// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parameter arrays, shapes and type signatures carried by nodes.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Tensor shape (row-major dimension sizes)
pub type Shape = Vec<usize>;

/// Opaque key/value metadata attached to nodes and graphs
pub type Metadata = IndexMap<String, serde_json::Value>;

/// Dense `f32` parameter array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Array {
    /// Dimension sizes
    pub shape: Shape,
    /// Row-major values
    pub data: Vec<f32>,
}

impl Array {
    /// Create an array, returning `None` if the data does not fill the shape
    pub fn new(shape: Shape, data: Vec<f32>) -> Option<Self> {
        (shape.iter().product::<usize>() == data.len()).then_some(Self { shape, data })
    }

    /// Create a zero-dimensional array holding one value
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    /// Create a one-dimensional array
    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Create an array filled with a single value
    pub fn full(shape: Shape, value: f32) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![value; len],
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the array has no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this array holds a single broadcastable value
    pub fn is_scalar(&self) -> bool {
        self.data.len() == 1
    }

    /// Shape of the neuron population described by this parameter, if any.
    ///
    /// Scalars broadcast over any population and therefore carry no shape.
    pub fn population_shape(&self) -> Option<Shape> {
        (!self.is_scalar()).then(|| self.shape.clone())
    }
}

/// Named tensor-shape signature (e.g. `{"input": [3]}`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeSignature(IndexMap<String, Shape>);

impl TypeSignature {
    /// Create an empty (unknown) signature
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a signature with a single named port
    pub fn single(name: impl Into<String>, shape: Shape) -> Self {
        let mut ports = IndexMap::new();
        ports.insert(name.into(), shape);
        Self(ports)
    }

    /// Signature with a single port, or empty when the shape is unknown
    pub fn maybe(name: impl Into<String>, shape: Option<Shape>) -> Self {
        shape.map(|s| Self::single(name, s)).unwrap_or_default()
    }

    /// Set the shape of a port
    pub fn insert(&mut self, name: impl Into<String>, shape: Shape) {
        self.0.insert(name.into(), shape);
    }

    /// Get the shape of a port
    pub fn get(&self, name: &str) -> Option<&Shape> {
        self.0.get(name)
    }

    /// Shape of the first port
    pub fn first(&self) -> Option<&Shape> {
        self.0.values().next()
    }

    /// Whether no port shape is known
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of ports
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over `(port, shape)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Shape)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_shape_check() {
        assert!(Array::new(vec![2, 3], vec![0.0; 6]).is_some());
        assert!(Array::new(vec![2, 3], vec![0.0; 5]).is_none());
        assert_eq!(Array::scalar(1.5).population_shape(), None);
        assert_eq!(Array::vector(vec![1.0, 2.0]).population_shape(), Some(vec![2]));
    }

    #[test]
    fn test_signature_ports() {
        let mut sig = TypeSignature::single("input", vec![4]);
        sig.insert("bias", vec![2]);
        assert_eq!(sig.len(), 2);
        assert_eq!(sig.first(), Some(&vec![4]));
        assert!(TypeSignature::maybe("input", None).is_empty());
    }
}
