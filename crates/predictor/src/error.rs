// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for predictor sessions.

use graph_ir::GraphError;
use profiler::ProfilerError;
use tensor_core::{Shape, TensorError};

/// Errors that can occur while creating, reshaping or running a session.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    // ── Configuration errors ───────────────────────────────────────
    /// The provided input shapes do not determine every shape in the graph.
    #[error("shape inference incomplete: {num_unknown} shapes left unknown; provide more input shapes")]
    IncompleteShapes { num_unknown: usize },

    /// A reshape would change a shape that must stay fixed.
    #[error("{kind} '{name}' would change shape from {old} to {new}; only named inputs may be reshaped")]
    ShapeChanged {
        kind: &'static str,
        name: String,
        old: Shape,
        new: Shape,
    },

    #[error("unknown input '{0}'")]
    UnknownInput(String),

    /// Host data does not match the bound array's element count.
    #[error("'{key}' holds {expected} elements, got {actual}")]
    SizeMismatch {
        key: String,
        expected: usize,
        actual: usize,
    },

    #[error("output index {index} out of range ({count} outputs)")]
    OutputIndex { index: usize, count: usize },

    #[error("step {step} out of range ({total} steps)")]
    InvalidStep { step: usize, total: usize },

    /// The session's state was moved into a reshaped session.
    #[error("session was invalidated by reshape")]
    SessionInvalidated,

    #[error("NDList index {index} out of range ({len} entries)")]
    IndexOutOfRange { index: usize, len: usize },

    /// Malformed arguments at the status-code boundary.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // ── Resource errors ────────────────────────────────────────────
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("parameter source: {0}")]
    ParameterSource(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ── Lower layers ───────────────────────────────────────────────
    #[error("tensor error: {0}")]
    Tensor(#[from] TensorError),

    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("profiler error: {0}")]
    Profiler(#[from] ProfilerError),

    #[error("configuration error: {0}")]
    Config(String),

    /// An invariant of the session or executor was violated.
    #[error("internal error: {0}")]
    Internal(String),
}
