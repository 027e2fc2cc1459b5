// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # profiler
//!
//! Concurrent span recorder producing Chrome Trace Event files.
//!
//! Every span belongs to one device bucket (`cpu/N`, `gpu/N`,
//! `cpu pinned/`). Recording never blocks on other producers: each bucket
//! is an MPSC channel, and only [`Profiler::dump`] takes the consumer side.
//!
//! ```text
//!  NotRunning ──set_state(Running)──► Running ──dump()/set_state──► NotRunning
//!                                        │
//!   begin_span(ctx, name, cat) ──────────┘  returns Some(Span) only while running
//! ```
//!
//! # Example
//! ```no_run
//! use profiler::{Profiler, ProfilerOptions, ProfilerState};
//! use tensor_core::Context;
//!
//! let profiler = Profiler::new(ProfilerOptions::default());
//! profiler.set_state(ProfilerState::Running);
//! {
//!     let _span = profiler.scoped(Context::cpu(0), "forward", "predict");
//!     // ... timed work ...
//! }
//! let report = profiler.dump().unwrap();
//! println!("{} spans written to {}", report.spans, report.path.display());
//! ```

mod error;
mod options;
mod profiler;
mod span;
mod trace;

pub use error::ProfilerError;
pub use options::{
    ModelIdentity, ProfilerMode, ProfilerOptions, ProfilerState, RuntimeFlags, DEFAULT_GPU_SLOTS,
    DEFAULT_OUTPUT,
};
pub use profiler::{DumpReport, Profiler};
pub use span::{Span, SpanGuard, SpanRecord};
pub use trace::TraceEvent;
