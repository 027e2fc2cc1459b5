// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the profiler.

use tensor_core::Context;

#[derive(Debug, thiserror::Error)]
pub enum ProfilerError {
    /// The trace file could not be written.
    #[error("failed to write trace: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize trace: {0}")]
    Serialize(#[from] serde_json::Error),

    /// [`crate::Profiler::init`] was called after the global profiler
    /// already existed.
    #[error("global profiler is already initialized")]
    AlreadyInitialized,

    /// A span was attributed to a device with no bucket.
    #[error("no profiler bucket for device {0}")]
    UnknownDevice(Context),

    /// Host metadata for the trace could not be gathered.
    #[error("failed to gather trace metadata: {0}")]
    Metadata(String),
}
