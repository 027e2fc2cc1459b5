// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Process-wide registry of device memory pools.
//!
//! Every [`Context`] gets its own [`MemoryPool`] on first use. Pools are
//! unlimited unless a budget is set with [`set_default_budget`] (for pools
//! created afterwards) or [`set_budget`] (for one device). Replacing a pool
//! does not touch buffers already allocated from the old one; they return
//! their storage to it when dropped.

use crate::Context;
use device_memory::{MemoryBudget, MemoryPool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

struct Registry {
    default_budget: MemoryBudget,
    pools: HashMap<Context, Arc<MemoryPool>>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        Mutex::new(Registry {
            default_budget: MemoryBudget::unlimited(),
            pools: HashMap::new(),
        })
    })
}

/// Returns the pool serving `ctx`, creating it if needed.
pub fn pool(ctx: Context) -> Arc<MemoryPool> {
    let mut reg = registry().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let budget = reg.default_budget;
    Arc::clone(
        reg.pools
            .entry(ctx)
            .or_insert_with(|| Arc::new(MemoryPool::new(ctx.to_string(), budget))),
    )
}

/// Installs a fresh pool with `budget` for one device.
pub fn set_budget(ctx: Context, budget: MemoryBudget) {
    let mut reg = registry().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    tracing::debug!(device = %ctx, %budget, "device budget set");
    reg.pools
        .insert(ctx, Arc::new(MemoryPool::new(ctx.to_string(), budget)));
}

/// Budget applied to pools created from now on.
pub fn set_default_budget(budget: MemoryBudget) {
    let mut reg = registry().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    reg.default_budget = budget;
}

/// Contexts that have a pool, in sorted order.
pub fn active_devices() -> Vec<Context> {
    let reg = registry().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut devices: Vec<Context> = reg.pools.keys().copied().collect();
    devices.sort();
    devices
}
