// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Span records and the handles callers hold while timing.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tensor_core::Context;

/// Sentinel end time of a span that has not been closed.
const OPEN: u64 = u64::MAX;

// ── Clock ──────────────────────────────────────────────────────────

/// Monotonic microsecond clock relative to a resettable epoch.
#[derive(Debug)]
pub(crate) struct Clock {
    origin: Instant,
    epoch_us: AtomicU64,
}

impl Clock {
    pub(crate) fn new() -> Self {
        Self {
            origin: Instant::now(),
            epoch_us: AtomicU64::new(0),
        }
    }

    fn absolute_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    /// Microseconds since the current epoch.
    pub(crate) fn now_us(&self) -> u64 {
        self.absolute_us()
            .saturating_sub(self.epoch_us.load(Ordering::Acquire))
    }

    pub(crate) fn reset_epoch(&self) {
        self.epoch_us.store(self.absolute_us(), Ordering::Release);
    }
}

// ── Thread ids ─────────────────────────────────────────────────────

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Small stable integer for the calling thread, used as the trace `tid`.
pub(crate) fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

// ── SpanRecord ─────────────────────────────────────────────────────

/// One timed region. Queued in its device bucket at creation; the end time
/// is stamped in place later.
#[derive(Debug)]
pub struct SpanRecord {
    pub name: String,
    pub category: String,
    pub device: Context,
    pub thread_id: u64,
    pub start_us: u64,
    /// Run the span was begun in; see [`crate::Profiler::dump`].
    pub(crate) run: u64,
    end_us: AtomicU64,
    metadata: Mutex<BTreeMap<String, String>>,
}

impl SpanRecord {
    pub(crate) fn new(
        name: String,
        category: String,
        device: Context,
        start_us: u64,
        run: u64,
    ) -> Self {
        Self {
            name,
            category,
            device,
            thread_id: current_thread_id(),
            start_us,
            run,
            end_us: AtomicU64::new(OPEN),
            metadata: Mutex::new(BTreeMap::new()),
        }
    }

    /// End time, or `None` while the span is open.
    pub fn end_us(&self) -> Option<u64> {
        match self.end_us.load(Ordering::Acquire) {
            OPEN => None,
            end => Some(end),
        }
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata
            .lock()
            .map(|m| m.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

// ── Span ───────────────────────────────────────────────────────────

/// Handle to a recorded span.
///
/// Ending is explicit; dropping a `Span` without calling [`Span::end`]
/// leaves it open and the dump reports it as incomplete. Use
/// [`SpanGuard`] for scope-bound timing.
#[derive(Debug, Clone)]
pub struct Span {
    record: Arc<SpanRecord>,
    clock: Arc<Clock>,
}

impl Span {
    pub(crate) fn new(record: Arc<SpanRecord>, clock: Arc<Clock>) -> Self {
        Self { record, clock }
    }

    /// Stamps the end time. Only the first call has an effect.
    pub fn end(&self) {
        let now = self.clock.now_us().max(self.record.start_us);
        let _ = self.record.end_us.compare_exchange(
            OPEN,
            now,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn add_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        match self.record.metadata.lock() {
            Ok(mut m) => {
                m.insert(key.into(), value.into());
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key.into(), value.into());
            }
        }
    }

    pub fn record(&self) -> &SpanRecord {
        &self.record
    }
}

/// Ends its span when dropped. Holds nothing when the profiler was not
/// running.
#[derive(Debug)]
pub struct SpanGuard {
    span: Option<Span>,
}

impl SpanGuard {
    pub(crate) fn new(span: Option<Span>) -> Self {
        Self { span }
    }

    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    pub fn add_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(span) = &self.span {
            span.add_metadata(key, value);
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Some(span) = self.span.take() {
            span.end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        let clock = Arc::new(Clock::new());
        let record = Arc::new(SpanRecord::new(
            "forward".into(),
            "predict".into(),
            Context::cpu(0),
            clock.now_us(),
            1,
        ));
        Span::new(record, clock)
    }

    #[test]
    fn test_end_is_stamped_once() {
        let s = span();
        assert_eq!(s.record().end_us(), None);
        s.end();
        let first = s.record().end_us().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        s.end();
        assert_eq!(s.record().end_us(), Some(first));
        assert!(first >= s.record().start_us);
    }

    #[test]
    fn test_guard_ends_on_drop() {
        let s = span();
        {
            let _guard = SpanGuard::new(Some(s.clone()));
        }
        assert!(s.record().end_us().is_some());
    }

    #[test]
    fn test_metadata() {
        let s = span();
        s.add_metadata("batch", "4");
        assert_eq!(s.record().metadata().get("batch").map(String::as_str), Some("4"));
    }

    #[test]
    fn test_thread_ids_differ() {
        let here = current_thread_id();
        let there = std::thread::spawn(current_thread_id).join().unwrap();
        assert_ne!(here, there);
        assert_eq!(here, current_thread_id());
    }
}
