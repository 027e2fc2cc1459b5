// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor operations.

use crate::{DType, Shape};

/// Errors raised by tensors, kernels and the binary array format.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// A buffer holds a different number of elements than required.
    #[error("size mismatch in {op}: expected {expected} elements, got {actual}")]
    SizeMismatch {
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Two shapes that must agree do not.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// The element type cannot be used here.
    #[error("unsupported dtype {dtype:?} for {op}")]
    UnsupportedDType { op: &'static str, dtype: DType },

    /// An unknown numeric type flag was found in serialized data.
    #[error("unknown type flag {0}")]
    UnknownTypeFlag(i32),

    /// A device type code outside CPU, GPU and pinned memory.
    #[error("unknown device type code {0}")]
    UnknownDevice(i32),

    /// Serialized array data is malformed.
    #[error("malformed array data: {0}")]
    Format(String),

    /// A lock around device storage was poisoned by a panicking thread.
    #[error("device storage lock poisoned")]
    Poisoned,

    /// The device pool refused the allocation.
    #[error(transparent)]
    Memory(#[from] device_memory::MemoryError),
}
