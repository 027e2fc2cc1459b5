// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-memory
//!
//! Budget-enforced memory pools standing in for the memory domain of one
//! device (a CPU socket, a GPU slot, or pinned host memory).
//!
//! # Key Components
//!
//! - [`MemoryBudget`] — a ceiling for one device, parsed from strings such
//!   as `"512M"` or `"unlimited"`.
//! - [`MemoryPool`] — hands out zero-filled `f32` buffers, enforces the
//!   budget, and recycles returned storage through a size-class free list.
//! - [`DeviceBuffer`] — RAII owner of one allocation. Dropping it gives the
//!   storage back to its pool.
//! - [`AllocationStats`] — counters for reuse, failures and high-water mark.
//!
//! # Ownership Model
//!
//! ```text
//! MemoryPool::allocate(n)
//!       │
//!       ▼
//!  DeviceBuffer  ◄─── owns Vec<f32>, holds Arc<PoolInner>
//!       │
//!       │  drop()
//!       ▼
//!  PoolInner::reclaim()  ──► free list (binned by size class)
//! ```
//!
//! Sessions never free device memory by hand. A tensor handle drops its
//! buffer and the pool's live-byte counter goes back down, which is what the
//! tests use to prove a failed session creation leaked nothing.
//!
//! # Example
//! ```
//! use device_memory::{MemoryBudget, MemoryPool};
//!
//! let pool = MemoryPool::new("cpu/0", MemoryBudget::from_mb(1));
//! let buf = pool.allocate(256).unwrap();
//! assert_eq!(pool.allocated_bytes(), 1024);
//! drop(buf);
//! assert_eq!(pool.allocated_bytes(), 0);
//! ```

mod budget;
mod buffer;
mod error;
pub mod pool;
mod stats;

pub use budget::MemoryBudget;
pub use buffer::DeviceBuffer;
pub use error::MemoryError;
pub use pool::MemoryPool;
pub use stats::AllocationStats;
