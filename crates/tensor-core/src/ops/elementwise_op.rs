// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Element-wise binary and unary kernels.

use super::check_len;
use super::gelu_op::gelu_scalar;
use crate::TensorError;

/// Unary activations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Relu,
    Sigmoid,
    Tanh,
    /// `ln(1 + e^x)`
    SoftRelu,
    Gelu,
}

impl UnaryOp {
    #[inline]
    fn apply(self, x: f32) -> f32 {
        match self {
            UnaryOp::Relu => x.max(0.0),
            UnaryOp::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::SoftRelu => {
                // ln(1 + e^x) without overflowing for large x.
                if x > 20.0 {
                    x
                } else {
                    x.exp().ln_1p()
                }
            }
            UnaryOp::Gelu => gelu_scalar(x),
        }
    }
}

pub fn map_unary(op: UnaryOp, input: &[f32], output: &mut [f32]) -> Result<(), TensorError> {
    check_len("unary", input.len(), output.len())?;
    for (d, &x) in output.iter_mut().zip(input) {
        *d = op.apply(x);
    }
    Ok(())
}

pub fn add(lhs: &[f32], rhs: &[f32], output: &mut [f32]) -> Result<(), TensorError> {
    binary("elemwise_add", lhs, rhs, output, |a, b| a + b)
}

pub fn mul(lhs: &[f32], rhs: &[f32], output: &mut [f32]) -> Result<(), TensorError> {
    binary("elemwise_mul", lhs, rhs, output, |a, b| a * b)
}

fn binary(
    op: &'static str,
    lhs: &[f32],
    rhs: &[f32],
    output: &mut [f32],
    f: impl Fn(f32, f32) -> f32,
) -> Result<(), TensorError> {
    check_len(op, lhs.len(), rhs.len())?;
    check_len(op, lhs.len(), output.len())?;
    for ((d, &a), &b) in output.iter_mut().zip(lhs).zip(rhs) {
        *d = f(a, b);
    }
    Ok(())
}
