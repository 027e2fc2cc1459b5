// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Budgeted allocator for one device.
//!
//! [`MemoryPool`] hands out zero-filled `f32` buffers:
//!
//! 1. Requests that would push live bytes past the budget fail with
//!    `OutOfMemory` and are counted.
//! 2. Returned storage is kept in a free list binned by size class (the next
//!    power of two, at least [`MIN_SIZE_CLASS`] elements) and handed out
//!    again to a request of the same class.
//! 3. Counters are kept in [`AllocationStats`].
//!
//! The pool is `Send + Sync`; buffers hold an `Arc` to the shared state so
//! they can return storage from any thread.

use crate::{AllocationStats, DeviceBuffer, MemoryBudget, MemoryError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Smallest size class, in elements.
pub const MIN_SIZE_CLASS: usize = 1024;

const ELEM_BYTES: usize = std::mem::size_of::<f32>();

/// State shared between a pool and its outstanding buffers.
pub struct PoolInner {
    label: String,
    budget: MemoryBudget,
    allocated_bytes: AtomicUsize,
    live_buffers: AtomicUsize,
    free_buffers: Mutex<HashMap<usize, Vec<Vec<f32>>>>,
    free_list_bytes: AtomicUsize,
    stats: Mutex<AllocationStats>,
}

impl PoolInner {
    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    /// Takes storage back from a dropped [`DeviceBuffer`].
    pub(crate) fn reclaim(&self, buffer: Vec<f32>) {
        let bytes = buffer.len() * ELEM_BYTES;
        self.allocated_bytes.fetch_sub(bytes, Ordering::AcqRel);
        self.live_buffers.fetch_sub(1, Ordering::AcqRel);

        if let Ok(mut stats) = self.stats.lock() {
            stats.record_release();
        }

        let class = size_class_for(buffer.len());
        self.free_list_bytes
            .fetch_add(buffer.capacity() * ELEM_BYTES, Ordering::AcqRel);
        if let Ok(mut free) = self.free_buffers.lock() {
            free.entry(class).or_default().push(buffer);
        }
    }
}

/// Allocator for one device's memory domain.
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

impl MemoryPool {
    /// Creates a pool labelled with the device name it serves.
    pub fn new(label: impl Into<String>, budget: MemoryBudget) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                label: label.into(),
                budget,
                allocated_bytes: AtomicUsize::new(0),
                live_buffers: AtomicUsize::new(0),
                free_buffers: Mutex::new(HashMap::new()),
                free_list_bytes: AtomicUsize::new(0),
                stats: Mutex::new(AllocationStats::default()),
            }),
        }
    }

    /// Allocates a zero-filled buffer of `num_elements` `f32` values.
    pub fn allocate(&self, num_elements: usize) -> Result<DeviceBuffer, MemoryError> {
        if num_elements == 0 {
            return Err(MemoryError::ZeroSizedAllocation {
                device: self.inner.label.clone(),
            });
        }

        let requested = num_elements.saturating_mul(ELEM_BYTES);
        let budget = self.inner.budget.as_bytes();
        let reserved = self
            .inner
            .allocated_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(requested)
                    .filter(|&total| total <= budget)
            });

        let current = match reserved {
            Ok(previous) => previous + requested,
            Err(current) => {
                if let Ok(mut stats) = self.inner.stats.lock() {
                    stats.record_oom();
                }
                tracing::warn!(
                    device = %self.inner.label,
                    requested,
                    live = current,
                    "device allocation rejected by budget"
                );
                return Err(MemoryError::OutOfMemory {
                    device: self.inner.label.clone(),
                    requested_bytes: requested,
                    available_bytes: budget.saturating_sub(current),
                    budget: self.inner.budget,
                });
            }
        };

        let class = size_class_for(num_elements);
        let recycled = self
            .inner
            .free_buffers
            .lock()
            .ok()
            .and_then(|mut free| free.get_mut(&class).and_then(Vec::pop));

        let reused = recycled.is_some();
        let data = match recycled {
            Some(mut buf) => {
                self.inner
                    .free_list_bytes
                    .fetch_sub(buf.capacity() * ELEM_BYTES, Ordering::AcqRel);
                buf.clear();
                buf.resize(num_elements, 0.0);
                buf
            }
            None => vec![0.0f32; num_elements],
        };

        self.inner.live_buffers.fetch_add(1, Ordering::AcqRel);
        if let Ok(mut stats) = self.inner.stats.lock() {
            stats.record_allocation(requested, reused);
            stats.update_peak(current);
        }

        Ok(DeviceBuffer::new(data, Arc::clone(&self.inner)))
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Bytes currently held by live buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.inner.allocated_bytes.load(Ordering::Acquire)
    }

    /// Number of buffers not yet dropped.
    pub fn live_buffers(&self) -> usize {
        self.inner.live_buffers.load(Ordering::Acquire)
    }

    pub fn available_bytes(&self) -> usize {
        self.inner
            .budget
            .as_bytes()
            .saturating_sub(self.allocated_bytes())
    }

    pub fn budget(&self) -> MemoryBudget {
        self.inner.budget
    }

    pub fn stats(&self) -> AllocationStats {
        self.inner
            .stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Bytes parked in the free list.
    pub fn free_list_bytes(&self) -> usize {
        self.inner.free_list_bytes.load(Ordering::Acquire)
    }

    /// Drops every cached free buffer. Live buffers are unaffected.
    pub fn shrink(&self) {
        if let Ok(mut free) = self.inner.free_buffers.lock() {
            free.clear();
            self.inner.free_list_bytes.store(0, Ordering::Release);
        }
    }
}

fn size_class_for(num_elements: usize) -> usize {
    num_elements.max(MIN_SIZE_CLASS).next_power_of_two()
}

impl std::fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPool")
            .field("device", &self.inner.label)
            .field("budget", &self.inner.budget)
            .field("allocated_bytes", &self.allocated_bytes())
            .field("live_buffers", &self.live_buffers())
            .finish()
    }
}
