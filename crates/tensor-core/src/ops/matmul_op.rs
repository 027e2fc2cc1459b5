// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Matrix multiplication.

use super::check_len;
use crate::TensorError;

/// Layout of the right-hand operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transpose {
    /// `rhs` is stored `[k, n]`.
    None,
    /// `rhs` is stored `[n, k]`, as fully-connected weights are.
    Rhs,
}

/// `out[m, n] = lhs[m, k] @ rhs`, overwriting `out`.
///
/// ```
/// use tensor_core::{matmul, Transpose};
/// let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
/// let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
/// let mut c = [0.0; 4];
/// matmul(&a, &b, &mut c, 2, 3, 2, Transpose::None).unwrap();
/// assert_eq!(c, [58.0, 64.0, 139.0, 154.0]);
/// ```
pub fn matmul(
    lhs: &[f32],
    rhs: &[f32],
    out: &mut [f32],
    m: usize,
    k: usize,
    n: usize,
    transpose: Transpose,
) -> Result<(), TensorError> {
    check_len("matmul lhs", m * k, lhs.len())?;
    check_len("matmul rhs", k * n, rhs.len())?;
    check_len("matmul out", m * n, out.len())?;

    out.fill(0.0);
    match transpose {
        // ikj order keeps the inner loop a contiguous saxpy over a row of out.
        Transpose::None => {
            for i in 0..m {
                let out_row = &mut out[i * n..(i + 1) * n];
                for p in 0..k {
                    let a_ip = lhs[i * k + p];
                    let rhs_row = &rhs[p * n..(p + 1) * n];
                    for (o, &b) in out_row.iter_mut().zip(rhs_row) {
                        *o += a_ip * b;
                    }
                }
            }
        }
        Transpose::Rhs => {
            for i in 0..m {
                let lhs_row = &lhs[i * k..(i + 1) * k];
                for j in 0..n {
                    let rhs_row = &rhs[j * k..(j + 1) * k];
                    out[i * n + j] = lhs_row.iter().zip(rhs_row).map(|(a, b)| a * b).sum();
                }
            }
        }
    }
    Ok(())
}
