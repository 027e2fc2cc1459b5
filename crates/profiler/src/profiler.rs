// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The profiler: device buckets, state machine and dump.
//!
//! # Buckets
//!
//! ```text
//!  index:  0 .. cpu_count-1 | cpu_count .. cpu_count+gpu_slots-1 | last
//!  device: cpu/0 .. cpu/N   | gpu/0 .. gpu/M                     | cpu pinned/
//! ```
//!
//! Each bucket is an MPSC channel. Producers send through a shared
//! `Sender`; the `Receiver` sits behind a mutex that only `dump` takes.
//!
//! The recording path reads only atomics: the running flag, the
//! operator-capture flag and the run counter. The state mutex is taken by
//! configuration calls and `dump`.

use crate::options::{ModelIdentity, ProfilerMode, ProfilerOptions, ProfilerState, RuntimeFlags};
use crate::span::{Clock, Span, SpanGuard, SpanRecord};
use crate::trace::{self, TraceDocument, TraceEvent};
use crate::ProfilerError;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tensor_core::{Context, DeviceKind};

static GLOBAL: OnceLock<Arc<Profiler>> = OnceLock::new();

struct Bucket {
    device: String,
    sender: Sender<Arc<SpanRecord>>,
    receiver: Mutex<Receiver<Arc<SpanRecord>>>,
}

impl Bucket {
    fn new(device: String) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            device,
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

/// Settings guarded by the state mutex.
struct Inner {
    state: ProfilerState,
    output_path: PathBuf,
    mode: ProfilerMode,
    model: ModelIdentity,
    flags: RuntimeFlags,
    started_at: DateTime<Local>,
}

/// Summary returned by [`Profiler::dump`].
#[derive(Debug, Clone)]
pub struct DumpReport {
    pub path: PathBuf,
    /// Spans written as B/E pairs.
    pub spans: usize,
    /// Spans still open at dump time.
    pub incomplete: usize,
}

pub struct Profiler {
    buckets: Vec<Bucket>,
    cpu_count: usize,
    gpu_slots: usize,
    running: AtomicBool,
    /// Mirrors `Inner::mode == AllOperator`.
    operators: AtomicBool,
    /// Incremented each time the profiler enters `Running`.
    run: AtomicU64,
    clock: Arc<Clock>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Profiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profiler")
            .field("buckets", &self.buckets.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Profiler {
    /// Creates a standalone profiler. Starts `Running` if
    /// `options.autostart` is set.
    pub fn new(options: ProfilerOptions) -> Self {
        let cpu_count = options.cpu_count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let gpu_slots = options.gpu_slots;

        let mut buckets = Vec::with_capacity(cpu_count + gpu_slots + 1);
        buckets.extend((0..cpu_count).map(|i| Bucket::new(Context::cpu(i).to_string())));
        buckets.extend((0..gpu_slots).map(|i| Bucket::new(Context::gpu(i).to_string())));
        buckets.push(Bucket::new(Context::pinned().to_string()));

        let profiler = Self {
            buckets,
            cpu_count,
            gpu_slots,
            running: AtomicBool::new(false),
            operators: AtomicBool::new(options.mode == ProfilerMode::AllOperator),
            run: AtomicU64::new(0),
            clock: Arc::new(Clock::new()),
            inner: Mutex::new(Inner {
                state: ProfilerState::NotRunning,
                output_path: options.output_path,
                mode: options.mode,
                model: options.model,
                flags: options.flags,
                started_at: Local::now(),
            }),
        };
        if options.autostart {
            profiler.set_state(ProfilerState::Running);
        }
        tracing::debug!(cpu_count, gpu_slots, "profiler created");
        profiler
    }

    // ── Global instance ────────────────────────────────────────────

    /// Installs the process-wide profiler. Fails if it already exists.
    pub fn init(options: ProfilerOptions) -> Result<Arc<Profiler>, ProfilerError> {
        let mut created = false;
        let profiler = GLOBAL.get_or_init(|| {
            created = true;
            Arc::new(Profiler::new(options))
        });
        if created {
            Ok(Arc::clone(profiler))
        } else {
            Err(ProfilerError::AlreadyInitialized)
        }
    }

    /// The process-wide profiler, created with default options on first
    /// use.
    pub fn global() -> Arc<Profiler> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Profiler::new(ProfilerOptions::default()))))
    }

    // ── State machine ──────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Entering `Running` resets the epoch and the recorded start time.
    pub fn set_state(&self, state: ProfilerState) {
        let mut inner = self.lock();
        self.apply_state(&mut inner, state);
    }

    fn apply_state(&self, inner: &mut Inner, state: ProfilerState) {
        inner.state = state;
        match state {
            ProfilerState::Running => {
                self.clock.reset_epoch();
                inner.started_at = Local::now();
                self.run.fetch_add(1, Ordering::AcqRel);
                self.running.store(true, Ordering::Release);
                tracing::info!(mode = ?inner.mode, "profiler started");
            }
            ProfilerState::NotRunning => {
                self.running.store(false, Ordering::Release);
            }
        }
    }

    pub fn set_config(&self, mode: ProfilerMode, output_path: impl Into<PathBuf>) {
        let mut inner = self.lock();
        self.apply_mode(&mut inner, mode);
        inner.output_path = output_path.into();
    }

    fn apply_mode(&self, inner: &mut Inner, mode: ProfilerMode) {
        inner.mode = mode;
        self.operators
            .store(mode == ProfilerMode::AllOperator, Ordering::Release);
    }

    /// Applies the mutable parts of `options`: mode, output path, model
    /// identity, flags and autostart. Bucket counts are fixed at
    /// construction.
    pub fn configure(&self, options: ProfilerOptions) {
        if options.gpu_slots != self.gpu_slots
            || options.cpu_count.is_some_and(|n| n != self.cpu_count)
        {
            tracing::warn!(
                gpu_slots = self.gpu_slots,
                cpu_count = self.cpu_count,
                "bucket layout is fixed after construction; ignoring new counts"
            );
        }
        let mut inner = self.lock();
        self.apply_mode(&mut inner, options.mode);
        inner.output_path = options.output_path;
        inner.model = options.model;
        inner.flags = options.flags;
        if options.autostart && inner.state != ProfilerState::Running {
            self.apply_state(&mut inner, ProfilerState::Running);
        }
    }

    pub fn state(&self) -> ProfilerState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn mode(&self) -> ProfilerMode {
        self.lock().mode
    }

    pub fn output_path(&self) -> PathBuf {
        self.lock().output_path.clone()
    }

    /// Whether per-operator spans should be recorded right now. Lock-free;
    /// called once per executed operator.
    pub fn records_operators(&self) -> bool {
        self.is_running() && self.operators.load(Ordering::Acquire)
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    // ── Recording ──────────────────────────────────────────────────

    pub fn bucket_index(&self, device: Context) -> Result<usize, ProfilerError> {
        let index = match device.kind {
            DeviceKind::Cpu if device.id < self.cpu_count => device.id,
            DeviceKind::Gpu if device.id < self.gpu_slots => self.cpu_count + device.id,
            DeviceKind::CpuPinned => self.cpu_count + self.gpu_slots,
            _ => return Err(ProfilerError::UnknownDevice(device)),
        };
        Ok(index)
    }

    /// Starts a span on `device`'s bucket. Returns `None` when the profiler
    /// is not running or the device has no bucket.
    pub fn begin_span(
        &self,
        device: Context,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Option<Span> {
        if !self.is_running() {
            return None;
        }
        let index = match self.bucket_index(device) {
            Ok(index) => index,
            Err(e) => {
                tracing::error!(error = %e, "span dropped");
                return None;
            }
        };
        let record = Arc::new(SpanRecord::new(
            name.into(),
            category.into(),
            device,
            self.clock.now_us(),
            self.run.load(Ordering::Acquire),
        ));
        // The receiver lives as long as the bucket, so send cannot fail.
        let _ = self.buckets[index].sender.send(Arc::clone(&record));
        Some(Span::new(record, Arc::clone(&self.clock)))
    }

    /// [`Self::begin_span`] wrapped in a guard that ends it on drop.
    pub fn scoped(
        &self,
        device: Context,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> SpanGuard {
        SpanGuard::new(self.begin_span(device, name, category))
    }

    // ── Dump ───────────────────────────────────────────────────────

    /// Stops the profiler, drains every bucket and writes the trace file.
    ///
    /// Destructive: drained spans are gone. Spans still open are written
    /// with the dump time as their end and `args.incomplete = "true"`.
    ///
    /// Only spans of the current run are written. A span begun while a
    /// dump was stopping the profiler can reach its bucket after the
    /// drain; it is timed against an epoch that no longer holds, so the
    /// next dump discards it along with anything else left over from an
    /// earlier run.
    pub fn dump(&self) -> Result<DumpReport, ProfilerError> {
        self.set_state(ProfilerState::NotRunning);
        let inner = self.lock();
        let dump_us = self.clock.now_us();
        let run = self.run.load(Ordering::Acquire);

        let mut events: Vec<TraceEvent> = self
            .buckets
            .iter()
            .enumerate()
            .map(|(pid, b)| TraceEvent::process_name(pid, &b.device))
            .collect();

        let mut spans = 0;
        let mut incomplete = 0;
        let mut stale = 0;
        for (pid, bucket) in self.buckets.iter().enumerate() {
            let receiver = bucket
                .receiver
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            while let Ok(record) = receiver.try_recv() {
                if record.run != run {
                    stale += 1;
                    continue;
                }
                let mut args = record.metadata();
                let end = match record.end_us() {
                    Some(end) => end,
                    None => {
                        incomplete += 1;
                        args.insert("incomplete".into(), "true".into());
                        dump_us.max(record.start_us)
                    }
                };
                events.push(span_event(&record, "B", record.start_us, pid, args.clone()));
                events.push(span_event(&record, "E", end, pid, args));
                spans += 1;
            }
        }

        if stale > 0 {
            tracing::debug!(stale, "discarded spans from an earlier run");
        }

        let doc = TraceDocument {
            trace_events: events,
            display_time_unit: "ms",
            other_data: trace::other_data(inner.started_at, &inner.model, inner.flags),
        };
        let bytes = doc.to_pretty_bytes()?;
        std::fs::write(&inner.output_path, bytes)?;

        tracing::info!(
            path = %inner.output_path.display(),
            spans,
            incomplete,
            "profile dumped"
        );
        Ok(DumpReport {
            path: inner.output_path.clone(),
            spans,
            incomplete,
        })
    }
}

fn span_event(
    record: &SpanRecord,
    ph: &'static str,
    ts: u64,
    pid: usize,
    args: BTreeMap<String, String>,
) -> TraceEvent {
    TraceEvent {
        name: record.name.clone(),
        cat: Some(record.category.clone()),
        ph,
        ts: Some(ts),
        pid,
        tid: Some(record.thread_id),
        args,
    }
}
