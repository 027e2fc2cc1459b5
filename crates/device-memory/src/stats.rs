// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Pool counters.

/// Cumulative counters for one [`MemoryPool`](crate::MemoryPool).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AllocationStats {
    /// Successful allocations.
    pub allocations: u64,
    /// Allocations served from the free list.
    pub reused: u64,
    /// Requests rejected by the budget.
    pub oom_count: u64,
    /// Buffers returned to the pool.
    pub releases: u64,
    /// High-water mark of live bytes.
    pub peak_bytes: usize,
    /// Total bytes ever handed out.
    pub cumulative_bytes: u64,
}

impl AllocationStats {
    /// Fraction of allocations that recycled storage, in `[0, 1]`.
    pub fn reuse_ratio(&self) -> f64 {
        if self.allocations == 0 {
            return 0.0;
        }
        self.reused as f64 / self.allocations as f64
    }

    pub(crate) fn record_allocation(&mut self, bytes: usize, reused: bool) {
        self.allocations += 1;
        if reused {
            self.reused += 1;
        }
        self.cumulative_bytes += bytes as u64;
    }

    pub(crate) fn record_oom(&mut self) {
        self.oom_count += 1;
    }

    pub(crate) fn record_release(&mut self) {
        self.releases += 1;
    }

    pub(crate) fn update_peak(&mut self, live_bytes: usize) {
        self.peak_bytes = self.peak_bytes.max(live_bytes);
    }

    pub fn summary(&self) -> String {
        format!(
            "{} allocations ({:.0}% reused), {} releases, {} OOMs, peak {:.2} MB",
            self.allocations,
            self.reuse_ratio() * 100.0,
            self.releases,
            self.oom_count,
            self.peak_bytes as f64 / (1024.0 * 1024.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_ratio() {
        let mut s = AllocationStats::default();
        assert_eq!(s.reuse_ratio(), 0.0);
        s.record_allocation(16, false);
        s.record_allocation(16, true);
        s.record_allocation(16, true);
        s.record_allocation(16, false);
        assert!((s.reuse_ratio() - 0.5).abs() < 1e-9);
        assert_eq!(s.cumulative_bytes, 64);
    }

    #[test]
    fn test_summary() {
        let mut s = AllocationStats::default();
        s.record_allocation(1024, false);
        s.record_release();
        s.record_oom();
        let text = s.summary();
        assert!(text.contains("1 allocations"));
        assert!(text.contains("1 releases"));
        assert!(text.contains("1 OOMs"));
    }
}
