// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for device memory pools.

/// Errors raised by [`MemoryPool`](crate::MemoryPool) and budget parsing.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The request would push the device past its budget.
    #[error("out of memory on {device}: requested {requested_bytes} bytes, {available_bytes} available (budget: {budget})")]
    OutOfMemory {
        device: String,
        requested_bytes: usize,
        available_bytes: usize,
        budget: crate::MemoryBudget,
    },

    /// Zero-element buffers are never handed out.
    #[error("cannot allocate zero-sized buffer on {device}")]
    ZeroSizedAllocation { device: String },

    /// A budget string could not be understood.
    #[error("invalid memory budget '{input}': {reason}")]
    InvalidBudget { input: String, reason: String },
}
