// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # predictor
//!
//! Embeddable inference sessions over serialized computation graphs.
//!
//! A [`Session`] is built from a graph JSON document, a parameter source
//! and the shapes of its inputs. It infers every other shape, binds the
//! graph to device memory through an [`ExecutionBackend`] and then runs
//! forward passes until it is freed or reshaped.
//!
//! # Key Components
//!
//! - [`Session`] / [`SessionBuilder`] — create, reshape, set input, forward,
//!   read output, free.
//! - [`ExecutionBackend`] / [`Executor`] — the seam to the operator
//!   library; [`HostBackend`] is the reference implementation.
//! - [`Params`] / [`ParameterSource`] / [`SharedParameterStore`] — inline
//!   parameter blobs and parameters shared across sessions.
//! - [`NDList`] — decoded named-array bundles (e.g. mean images).
//! - [`PredictorConfig`] — TOML configuration for devices and the profiler.
//! - [`api`] — status-code entry points with per-thread error messages.
//!
//! # Example
//! ```
//! use predictor::{Params, Session};
//! use tensor_core::{Context, Shape};
//!
//! let json = r#"{"nodes": [
//!     {"op": "null", "name": "x"},
//!     {"op": "Activation", "name": "act", "attrs": {"act_type": "relu"}, "inputs": [[0, 0]]}
//! ], "heads": [[1, 0]]}"#;
//! let params = tensor_core::serialize::encode_list(&[], &[]).unwrap();
//!
//! let mut session =
//!     Session::create(json, Params::Bytes(&params), Context::cpu(0), &[("x", Shape::from([2]))])
//!         .unwrap();
//! session.set_input("x", &[-1.0, 2.0]).unwrap();
//! session.forward().unwrap();
//! assert_eq!(session.output_to_vec(0).unwrap(), vec![0.0, 2.0]);
//! session.free().unwrap();
//! ```

pub mod api;
mod config;
mod error;
mod executor;
mod ndlist;
mod params;
mod session;

pub use config::{DeviceSection, PredictorConfig, ProfilerSection};
pub use error::PredictError;
pub use executor::{ExecutionBackend, Executor, GraphExecutor, HostBackend};
pub use ndlist::{NDList, NDListEntry};
pub use params::{Lease, LoadedParams, ParameterSource, Params, SharedParameterStore};
pub use session::{Session, SessionBuilder};
