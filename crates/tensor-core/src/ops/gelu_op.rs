// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! GELU activation (tanh approximation).

use super::check_len;
use crate::TensorError;

/// `sqrt(2/π)`.
const SQRT_2_OVER_PI: f32 = 0.797_884_6;

const GELU_COEFF: f32 = 0.044715;

/// `0.5 · x · (1 + tanh(√(2/π) · (x + 0.044715 · x³)))`, element-wise.
pub fn gelu(input: &[f32], output: &mut [f32]) -> Result<(), TensorError> {
    check_len("gelu", input.len(), output.len())?;
    for (d, &x) in output.iter_mut().zip(input) {
        *d = gelu_scalar(x);
    }
    Ok(())
}

#[inline(always)]
pub(crate) fn gelu_scalar(x: f32) -> f32 {
    let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x);
    0.5 * x * (1.0 + inner.tanh())
}
