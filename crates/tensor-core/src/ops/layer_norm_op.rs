// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Layer normalization over the trailing axis.

use super::check_len;
use crate::TensorError;

/// `output = gamma * (x - mean) / sqrt(var + eps) + beta`, per row of
/// `gamma.len()` elements.
pub fn layer_norm(
    input: &[f32],
    gamma: &[f32],
    beta: &[f32],
    eps: f32,
    output: &mut [f32],
) -> Result<(), TensorError> {
    check_len("layer_norm output", input.len(), output.len())?;
    check_len("layer_norm beta", gamma.len(), beta.len())?;
    let width = gamma.len();
    if width == 0 || input.len() % width != 0 {
        return Err(TensorError::SizeMismatch {
            op: "layer_norm gamma",
            expected: width,
            actual: input.len(),
        });
    }

    for (src, dst) in input.chunks_exact(width).zip(output.chunks_exact_mut(width)) {
        let n = width as f32;
        let mean = src.iter().sum::<f32>() / n;
        let var = src.iter().map(|&x| (x - mean) * (x - mean)).sum::<f32>() / n;
        let inv_std = 1.0 / (var + eps).sqrt();
        for (i, (d, &x)) in dst.iter_mut().zip(src).enumerate() {
            *d = gamma[i] * (x - mean) * inv_std + beta[i];
        }
    }
    Ok(())
}
