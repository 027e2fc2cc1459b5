// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Softmax along the trailing axis.

use super::check_len;
use crate::TensorError;

/// Row-wise softmax over rows of `axis_len` elements.
///
/// Subtracts the row maximum before exponentiating so large logits do not
/// overflow.
pub fn softmax(input: &[f32], output: &mut [f32], axis_len: usize) -> Result<(), TensorError> {
    check_len("softmax", input.len(), output.len())?;
    if axis_len == 0 || input.is_empty() {
        return Ok(());
    }
    if input.len() % axis_len != 0 {
        return Err(TensorError::SizeMismatch {
            op: "softmax axis",
            expected: axis_len * (input.len() / axis_len + 1),
            actual: input.len(),
        });
    }

    for (src, dst) in input
        .chunks_exact(axis_len)
        .zip(output.chunks_exact_mut(axis_len))
    {
        let max = src.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for (d, &s) in dst.iter_mut().zip(src) {
            let e = (s - max).exp();
            *d = e;
            sum += e;
        }
        if sum > 0.0 {
            let inv = 1.0 / sum;
            dst.iter_mut().for_each(|d| *d *= inv);
        }
    }
    Ok(())
}
