//! Dense tensors used across the sampling pipeline
//!
//! A tensor is a flat row-major buffer plus an explicit shape. Everything the
//! pipeline does to latents (scheduler math, pixel conversion) is elementwise
//! over this buffer, so no numeric library is needed.

use crate::error::{PipelineError, Result};

/// Dense row-major tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T = f32> {
    shape: Vec<usize>,
    data: Vec<T>,
}

/// Token ids handed to the text encoder, shape `[1, 77]`
pub type TokenTensor = Tensor<i32>;

impl<T: Copy> Tensor<T> {
    /// Wrap a buffer, checking that its length matches the shape
    pub fn new(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(PipelineError::ShapeMismatch {
                stage: "tensor",
                expected: shape.to_vec(),
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    /// Tensor of the given shape with every element set to `value`
    pub fn full(shape: &[usize], value: T) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![value; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of dimension `axis`
    pub fn dim(&self, axis: usize) -> usize {
        self.shape[axis]
    }

    /// Fail with `ShapeMismatch` unless the shape is exactly `expected`
    pub fn expect_shape(&self, stage: &'static str, expected: &[usize]) -> Result<()> {
        if self.shape != expected {
            return Err(PipelineError::ShapeMismatch {
                stage,
                expected: expected.to_vec(),
                actual: self.shape.clone(),
            });
        }
        Ok(())
    }
}

impl Tensor<f32> {
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Elementwise combination of two equally-shaped tensors into a fresh tensor
    ///
    /// Panics if the shapes differ.
    pub fn zip_map(&self, other: &Tensor<f32>, f: impl Fn(f32, f32) -> f32) -> Tensor<f32> {
        assert_eq!(
            self.shape, other.shape,
            "elementwise op on mismatched shapes"
        );
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Tensor {
            shape: self.shape.clone(),
            data,
        }
    }

    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }
}
