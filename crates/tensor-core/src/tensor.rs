// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host-side tensors as read from serialized data.

use crate::{Context, DType, NDArray, Shape, TensorError};

/// An owned host tensor holding little-endian element bytes of any
/// supported [`DType`].
///
/// Parameter files and NDList payloads decode into `Tensor`s; values are
/// converted to `f32` when they move onto a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    data: Vec<u8>,
}

impl Tensor {
    /// An empty array: rank 0, no data.
    pub fn empty() -> Self {
        Self {
            shape: Shape::scalar(),
            dtype: DType::F32,
            data: Vec::new(),
        }
    }

    /// Wraps raw little-endian bytes, checking the length against the shape.
    pub fn from_bytes(shape: Shape, dtype: DType, data: Vec<u8>) -> Result<Self, TensorError> {
        let expected = shape.size_bytes(dtype);
        if data.len() != expected {
            return Err(TensorError::SizeMismatch {
                op: "tensor from bytes",
                expected: expected / dtype.size_bytes(),
                actual: data.len() / dtype.size_bytes(),
            });
        }
        Ok(Self { shape, dtype, data })
    }

    /// ```
    /// use tensor_core::{Shape, Tensor};
    /// let t = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
    /// assert_eq!(t.to_f32_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    /// ```
    pub fn from_f32(shape: Shape, values: &[f32]) -> Result<Self, TensorError> {
        if values.len() != shape.num_elements() {
            return Err(TensorError::SizeMismatch {
                op: "tensor from f32",
                expected: shape.num_elements(),
                actual: values.len(),
            });
        }
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Ok(Self {
            shape,
            dtype: DType::F32,
            data,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// `true` for the rank-0, dataless array of the binary format.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of stored elements (0 for an empty array).
    pub fn num_elements(&self) -> usize {
        self.data.len() / self.dtype.size_bytes()
    }

    /// Converts every element to `f32`.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>, TensorError> {
        let n = self.dtype.size_bytes();
        let chunks = self.data.chunks_exact(n);
        let values = match self.dtype {
            DType::F32 => chunks
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            DType::F64 => chunks
                .map(|c| {
                    f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
                })
                .collect(),
            DType::F16 => chunks
                .map(|c| half::f16::from_le_bytes([c[0], c[1]]).to_f32())
                .collect(),
            DType::U8 => self.data.iter().map(|&b| b as f32).collect(),
            DType::I8 => self.data.iter().map(|&b| b as i8 as f32).collect(),
            DType::I32 => chunks
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32)
                .collect(),
            DType::I64 => chunks
                .map(|c| {
                    i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]) as f32
                })
                .collect(),
        };
        Ok(values)
    }

    /// Copies the tensor onto a device as `f32`.
    pub fn to_device(&self, ctx: Context) -> Result<NDArray, TensorError> {
        NDArray::from_host(self.shape.clone(), ctx, &self.to_f32_vec()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f32_roundtrip() {
        let data = [1.5f32, -2.0, 3.25, 0.0, 5.0, 6.0];
        let t = Tensor::from_f32(Shape::matrix(2, 3), &data).unwrap();
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.num_elements(), 6);
        assert_eq!(t.to_f32_vec().unwrap(), data.to_vec());
    }

    #[test]
    fn test_from_bytes_checks_length() {
        assert!(Tensor::from_bytes(Shape::vector(3), DType::F32, vec![0; 10]).is_err());
        assert!(Tensor::from_bytes(Shape::vector(3), DType::I8, vec![0; 3]).is_ok());
    }

    #[test]
    fn test_integer_and_float_conversions() {
        let i32s: Vec<u8> = [-3i32, 7].iter().flat_map(|v| v.to_le_bytes()).collect();
        let t = Tensor::from_bytes(Shape::vector(2), DType::I32, i32s).unwrap();
        assert_eq!(t.to_f32_vec().unwrap(), vec![-3.0, 7.0]);

        let f64s: Vec<u8> = [0.5f64, -1.25].iter().flat_map(|v| v.to_le_bytes()).collect();
        let t = Tensor::from_bytes(Shape::vector(2), DType::F64, f64s).unwrap();
        assert_eq!(t.to_f32_vec().unwrap(), vec![0.5, -1.25]);

        let t = Tensor::from_bytes(Shape::vector(2), DType::I8, vec![0xFF, 0x02]).unwrap();
        assert_eq!(t.to_f32_vec().unwrap(), vec![-1.0, 2.0]);

        let halfs: Vec<u8> = [half::f16::from_f32(1.5), half::f16::from_f32(-2.0)]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let t = Tensor::from_bytes(Shape::vector(2), DType::F16, halfs).unwrap();
        assert_eq!(t.to_f32_vec().unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn test_empty() {
        let t = Tensor::empty();
        assert!(t.is_empty());
        assert_eq!(t.num_elements(), 0);
        assert!(t.to_f32_vec().unwrap().is_empty());
    }

    #[test]
    fn test_to_device() {
        let t = Tensor::from_f32(Shape::vector(3), &[1.0, 2.0, 3.0]).unwrap();
        let a = t.to_device(Context::cpu(13)).unwrap();
        assert_eq!(a.shape(), &Shape::vector(3));
        assert_eq!(a.to_vec().unwrap(), vec![1.0, 2.0, 3.0]);
    }
}
