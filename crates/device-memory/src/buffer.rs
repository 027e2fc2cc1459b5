// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! RAII device buffer.

use crate::pool::PoolInner;
use std::sync::Arc;

/// One live allocation on a device.
///
/// Dropping the buffer returns its storage to the owning
/// [`MemoryPool`](crate::MemoryPool) and releases its bytes from the budget.
pub struct DeviceBuffer {
    data: Vec<f32>,
    pool: Arc<PoolInner>,
}

impl DeviceBuffer {
    pub(crate) fn new(data: Vec<f32>, pool: Arc<PoolInner>) -> Self {
        Self { data, pool }
    }

    /// Number of `f32` elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes charged against the device budget.
    pub fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Name of the device this buffer lives on (e.g. `"gpu/1"`).
    pub fn device(&self) -> &str {
        self.pool.label()
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.reclaim(data);
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.pool.label())
            .field("len", &self.data.len())
            .finish()
    }
}
