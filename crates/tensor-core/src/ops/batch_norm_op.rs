// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Batch normalization in inference mode.

use super::check_len;
use crate::TensorError;

/// Per-channel parameters and running statistics.
#[derive(Debug, Clone, Copy)]
pub struct BatchNormParams<'a> {
    pub gamma: &'a [f32],
    pub beta: &'a [f32],
    pub moving_mean: &'a [f32],
    pub moving_var: &'a [f32],
    pub eps: f32,
    /// Treat `gamma` as all ones.
    pub fix_gamma: bool,
}

/// Normalizes an `[N, C, spatial...]` input with the running statistics:
/// `y = gamma · (x - mean) / sqrt(var + eps) + beta` per channel.
///
/// `spatial` is the product of the dimensions after the channel axis.
pub fn batch_norm_inference(
    input: &[f32],
    output: &mut [f32],
    channels: usize,
    spatial: usize,
    params: &BatchNormParams<'_>,
) -> Result<(), TensorError> {
    check_len("batch_norm output", input.len(), output.len())?;
    check_len("batch_norm gamma", channels, params.gamma.len())?;
    check_len("batch_norm beta", channels, params.beta.len())?;
    check_len("batch_norm moving_mean", channels, params.moving_mean.len())?;
    check_len("batch_norm moving_var", channels, params.moving_var.len())?;
    let plane = channels * spatial;
    if plane == 0 || input.len() % plane != 0 {
        return Err(TensorError::SizeMismatch {
            op: "batch_norm input",
            expected: plane,
            actual: input.len(),
        });
    }

    let scale: Vec<f32> = (0..channels)
        .map(|c| {
            let g = if params.fix_gamma { 1.0 } else { params.gamma[c] };
            g / (params.moving_var[c] + params.eps).sqrt()
        })
        .collect();

    for (src, dst) in input.chunks_exact(plane).zip(output.chunks_exact_mut(plane)) {
        for c in 0..channels {
            let range = c * spatial..(c + 1) * spatial;
            let (mean, beta, s) = (params.moving_mean[c], params.beta[c], scale[c]);
            for (d, &x) in dst[range.clone()].iter_mut().zip(&src[range]) {
                *d = (x - mean) * s + beta;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_channel_statistics() {
        // N=1, C=2, spatial=2
        let x = [1.0, 3.0, 10.0, 20.0];
        let mut y = [0.0; 4];
        let params = BatchNormParams {
            gamma: &[2.0, 1.0],
            beta: &[0.0, 1.0],
            moving_mean: &[2.0, 15.0],
            moving_var: &[1.0, 25.0],
            eps: 0.0,
            fix_gamma: false,
        };
        batch_norm_inference(&x, &mut y, 2, 2, &params).unwrap();
        assert_eq!(y, [-2.0, 2.0, 0.0, 2.0]);
    }

    #[test]
    fn test_fix_gamma_ignores_gamma() {
        let mut y = [0.0; 2];
        let params = BatchNormParams {
            gamma: &[100.0],
            beta: &[0.0],
            moving_mean: &[0.0],
            moving_var: &[1.0],
            eps: 0.0,
            fix_gamma: true,
        };
        batch_norm_inference(&[1.0, -1.0], &mut y, 1, 1, &params).unwrap();
        assert_eq!(y, [1.0, -1.0]);
    }

    #[test]
    fn test_channel_count_checked() {
        let mut y = [0.0; 4];
        let params = BatchNormParams {
            gamma: &[1.0],
            beta: &[0.0],
            moving_mean: &[0.0],
            moving_var: &[1.0],
            eps: 0.0,
            fix_gamma: false,
        };
        assert!(batch_norm_inference(&[0.0; 4], &mut y, 2, 2, &params).is_err());
    }
}
