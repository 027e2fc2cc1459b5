// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device array handles.

use crate::{device, Context, Shape, TensorError};
use device_memory::DeviceBuffer;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A handle to an `f32` array resident on one device.
///
/// Cloning is cheap and aliases the same storage: this is how a parameter
/// source and several sessions share one set of weights. Storage goes back
/// to the device pool when the last handle is dropped.
///
/// ```
/// use tensor_core::{Context, NDArray, Shape};
///
/// let a = NDArray::zeros(Shape::from([2, 2]), Context::cpu(0)).unwrap();
/// a.sync_copy_from_host(&[1.0, 2.0, 3.0, 4.0]).unwrap();
/// assert_eq!(a.to_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
/// ```
#[derive(Clone)]
pub struct NDArray {
    shape: Shape,
    ctx: Context,
    storage: Arc<RwLock<DeviceBuffer>>,
}

impl NDArray {
    /// Allocates a zero-filled array from the device pool of `ctx`.
    pub fn zeros(shape: Shape, ctx: Context) -> Result<Self, TensorError> {
        let buffer = device::pool(ctx).allocate(shape.num_elements())?;
        Ok(Self {
            shape,
            ctx,
            storage: Arc::new(RwLock::new(buffer)),
        })
    }

    /// Allocates an array and fills it from host memory.
    pub fn from_host(shape: Shape, ctx: Context, data: &[f32]) -> Result<Self, TensorError> {
        let array = Self::zeros(shape, ctx)?;
        array.sync_copy_from_host(data)?;
        Ok(array)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn context(&self) -> Context {
        self.ctx
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.shape.num_elements()
    }

    /// `true` if both handles refer to the same storage.
    pub fn ptr_eq(&self, other: &NDArray) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// Number of live handles sharing this storage.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// Copies exactly `self.size()` values from host memory.
    pub fn sync_copy_from_host(&self, data: &[f32]) -> Result<(), TensorError> {
        if data.len() != self.size() {
            return Err(TensorError::SizeMismatch {
                op: "copy from host",
                expected: self.size(),
                actual: data.len(),
            });
        }
        self.write()?.as_mut_slice().copy_from_slice(data);
        Ok(())
    }

    /// Copies exactly `self.size()` values into host memory.
    pub fn sync_copy_to_host(&self, out: &mut [f32]) -> Result<(), TensorError> {
        if out.len() != self.size() {
            return Err(TensorError::SizeMismatch {
                op: "copy to host",
                expected: self.size(),
                actual: out.len(),
            });
        }
        out.copy_from_slice(self.read()?.as_slice());
        Ok(())
    }

    /// Copies the contents of `src`, which must have the same element count.
    pub fn copy_from(&self, src: &NDArray) -> Result<(), TensorError> {
        if self.ptr_eq(src) {
            return Ok(());
        }
        if src.size() != self.size() {
            return Err(TensorError::ShapeMismatch {
                op: "copy",
                lhs: self.shape.clone(),
                rhs: src.shape.clone(),
            });
        }
        let from = src.read()?;
        self.write()?.as_mut_slice().copy_from_slice(from.as_slice());
        Ok(())
    }

    pub fn to_vec(&self) -> Result<Vec<f32>, TensorError> {
        Ok(self.read()?.as_slice().to_vec())
    }

    /// Shared access to the device buffer.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, DeviceBuffer>, TensorError> {
        self.storage.read().map_err(|_| TensorError::Poisoned)
    }

    /// Exclusive access to the device buffer.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, DeviceBuffer>, TensorError> {
        self.storage.write().map_err(|_| TensorError::Poisoned)
    }

    /// A handle with a new shape over the same storage.
    pub fn reshaped(&self, shape: Shape) -> Result<Self, TensorError> {
        if shape.num_elements() != self.size() {
            return Err(TensorError::ShapeMismatch {
                op: "reshape view",
                lhs: self.shape.clone(),
                rhs: shape,
            });
        }
        Ok(Self {
            shape,
            ctx: self.ctx,
            storage: Arc::clone(&self.storage),
        })
    }
}

impl std::fmt::Debug for NDArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NDArray")
            .field("shape", &self.shape)
            .field("ctx", &self.ctx)
            .finish()
    }
}
