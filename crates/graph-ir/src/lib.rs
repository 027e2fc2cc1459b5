// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # graph-ir
//!
//! The symbolic computation graph a predictor session is built from.
//!
//! - [`Graph`] — nodes parsed from graph JSON, with a **type-state
//!   pattern** (`Loaded` → `Validated`).
//! - [`OpKind`] — the operator registry: arity, auxiliary inputs, shape
//!   rules and the kernel each operator runs.
//! - [`ShapeInference`] — result of [`Graph::infer_shapes`], the fixed-point
//!   pass that completes argument, auxiliary and output shapes from the
//!   caller's input shapes.
//!
//! # Example
//! ```
//! use graph_ir::Graph;
//! use std::collections::HashMap;
//! use tensor_core::Shape;
//!
//! let json = r#"{"nodes": [
//!     {"op": "null", "name": "x"},
//!     {"op": "_copy", "name": "y", "inputs": [[0, 0]]}
//! ], "heads": [[1, 0]]}"#;
//! let graph = Graph::from_json(json).unwrap().validate().unwrap();
//! assert_eq!(graph.list_outputs(), ["y_output"]);
//!
//! let known = HashMap::from([("x".to_string(), Shape::from([1, 3, 4, 4]))]);
//! let shapes = graph.infer_shapes(&known).unwrap();
//! assert!(shapes.is_complete());
//! assert_eq!(shapes.out_shapes[0], Some(Shape::from([1, 3, 4, 4])));
//! ```

mod error;
pub mod graph;
mod infer;
mod ops;

pub use error::GraphError;
pub use graph::{Graph, Node, NodeEntry};
pub use infer::ShapeInference;
pub use ops::OpKind;
