// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor shapes.

use std::fmt;

/// Row-major dimensions of an array.
///
/// A rank-0 shape counts one element. The binary array format uses rank 0
/// for "empty" arrays instead; see [`crate::serialize`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// ```
    /// use tensor_core::Shape;
    /// let s = Shape::new(vec![1, 3, 4, 4]);
    /// assert_eq!(s.num_elements(), 48);
    /// ```
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    pub fn scalar() -> Self {
        Self { dims: vec![] }
    }

    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    pub fn matrix(rows: usize, cols: usize) -> Self {
        Self {
            dims: vec![rows, cols],
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Product of the dimensions. Overflow is only ruled out for shapes
    /// that passed [`Self::checked_num_elements`].
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Product of the dimensions, or `None` if it does not fit in `usize`.
    pub fn checked_num_elements(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Leading dimension, treated as the batch size.
    pub fn batch(&self) -> Option<usize> {
        self.dims.first().copied()
    }

    /// The same shape with the leading dimension replaced.
    pub fn with_batch(&self, batch: usize) -> Self {
        let mut dims = self.dims.clone();
        if let Some(first) = dims.first_mut() {
            *first = batch;
        }
        Self { dims }
    }

    /// Collapses everything after the first axis: `[n, a, b] -> [n, a*b]`.
    pub fn flatten_2d(&self) -> Self {
        match self.dims.split_first() {
            Some((&n, rest)) => Self::matrix(n, rest.iter().product()),
            None => Self::matrix(1, 1),
        }
    }

    /// Size in bytes for a given [`crate::DType`].
    pub fn size_bytes(&self, dtype: crate::DType) -> usize {
        self.num_elements() * dtype.size_bytes()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(dims.to_vec())
    }
}
