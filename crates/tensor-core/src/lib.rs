// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor types shared by the graph, the executor and the predictor.
//!
//! This crate provides:
//! - [`Shape`] and [`DType`] — dimensions and element types.
//! - [`Context`] / [`DeviceKind`] — where an array lives (`cpu/0`, `gpu/2`,
//!   pinned host memory).
//! - [`NDArray`] — a cheap, cloneable handle to an `f32` buffer on a device.
//!   Clones alias the same storage.
//! - [`Tensor`] — an owned host-side tensor of any supported dtype, as read
//!   from a parameter file.
//! - [`serialize`] — the named-array binary bundle used for parameter blobs
//!   and NDList payloads.
//! - Kernels over `f32` slices: matmul, softmax, layer norm, GELU, batch
//!   norm (inference) and elementwise maps.
//!
//! # Device model
//! ```text
//!  Context ──► device::pool(ctx) ──► MemoryPool (one per device)
//!                                          │ allocate(n)
//!                                          ▼
//!  NDArray { shape, ctx, Arc<RwLock<DeviceBuffer>> }
//! ```

mod context;
pub mod device;
mod dtype;
mod error;
mod ndarray;
mod ops;
pub mod serialize;
mod shape;
mod tensor;

pub use context::{Context, DeviceKind};
pub use dtype::DType;
pub use error::TensorError;
pub use ndarray::NDArray;
pub use ops::{
    add, batch_norm_inference, gelu, layer_norm, map_unary, matmul, mul, softmax,
    BatchNormParams, Transpose, UnaryOp,
};
pub use shape::Shape;
pub use tensor::Tensor;
