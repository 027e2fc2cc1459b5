// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for graph parsing, validation and shape inference.

use tensor_core::{Shape, TensorError};

/// Errors that can occur when working with computation graphs.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The graph JSON is malformed.
    #[error("failed to parse graph: {0}")]
    Parse(#[from] serde_json::Error),

    /// The graph structure is inconsistent (dangling inputs, cycles,
    /// duplicate variables, wrong arity).
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    /// A node names an operator the registry does not know.
    #[error("unknown operator '{op}' in node '{node}'")]
    UnknownOperator { node: String, op: String },

    /// An operator attribute is missing or cannot be parsed.
    #[error("invalid attribute '{key}' = '{value}' on node '{node}'")]
    InvalidAttribute {
        node: String,
        key: String,
        value: String,
    },

    /// A requested output key matches no internal output.
    #[error("output '{0}' not found in graph internals")]
    OutputNotFound(String),

    /// Two shape constraints on the same entry disagree.
    #[error("shape mismatch at '{node}': expected {expected}, got {actual}")]
    ShapeMismatch {
        node: String,
        expected: Shape,
        actual: Shape,
    },

    /// An input shape is unusable for the operator (e.g. wrong rank).
    #[error("invalid shape for '{node}': {detail}")]
    InvalidShape { node: String, detail: String },

    /// A kernel rejected its operands at execution time.
    #[error("kernel failed in '{node}': {source}")]
    Kernel {
        node: String,
        #[source]
        source: TensorError,
    },
}
