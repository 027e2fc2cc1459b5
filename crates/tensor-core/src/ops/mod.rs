// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Compute kernels over contiguous `f32` slices.
//!
//! Kernels write into caller-provided output slices and never allocate.
//! Every kernel checks slice lengths and returns
//! [`TensorError::SizeMismatch`](crate::TensorError::SizeMismatch) instead
//! of panicking on bad input.

mod batch_norm_op;
mod elementwise_op;
mod gelu_op;
mod layer_norm_op;
mod matmul_op;
mod softmax_op;

pub use batch_norm_op::{batch_norm_inference, BatchNormParams};
pub use elementwise_op::{add, map_unary, mul, UnaryOp};
pub use gelu_op::gelu;
pub use layer_norm_op::layer_norm;
pub use matmul_op::{matmul, Transpose};
pub use softmax_op::softmax;

use crate::TensorError;

pub(crate) fn check_len(op: &'static str, expected: usize, actual: usize) -> Result<(), TensorError> {
    if expected == actual {
        Ok(())
    } else {
        Err(TensorError::SizeMismatch {
            op,
            expected,
            actual,
        })
    }
}
