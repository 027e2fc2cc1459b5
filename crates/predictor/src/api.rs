// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Status-code entry points.
//!
//! Every function returns `0` on success and `-1` on failure. The failure
//! message is kept per thread and read back with [`get_last_error`].
//! Panics inside an entry point are caught and reported the same way.
//!
//! Input shapes use a compressed-row layout: the shape of `keys[i]` is
//! `shape_data[indptr[i]..indptr[i + 1]]`.
//!
//! ```
//! use predictor::api;
//!
//! let json = r#"{"nodes": [{"op": "null", "name": "x"},
//!     {"op": "_copy", "name": "id", "inputs": [[0, 0]]}], "heads": [[1, 0]]}"#;
//! let mut handle = None;
//! let rc = api::pred_create(json, &[], 1, 0, &["x"], &[0, 2], &[1, 3], &mut handle);
//! assert_eq!(rc, 0);
//! let mut handle = handle.unwrap();
//! assert_eq!(api::pred_set_input(&mut handle, "x", &[1.0, 2.0, 3.0]), 0);
//! assert_eq!(api::pred_forward(&mut handle), 0);
//! let mut out = [0.0f32; 3];
//! assert_eq!(api::pred_get_output(&handle, 0, &mut out), 0);
//! assert_eq!(api::pred_free(handle), 0);
//! ```

use crate::{NDList, ParameterSource, Params, PredictError, PredictorConfig, Session};
use profiler::{Profiler, ProfilerMode, ProfilerState};
use std::any::Any;
use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tensor_core::{Context, Shape};

/// Owned session handle.
pub type PredictorHandle = Box<Session>;
/// Owned NDList handle.
pub type NDListHandle = Box<NDList>;

thread_local! {
    static LAST_ERROR: RefCell<String> = RefCell::new(String::new());
}

/// Message of the last failure on this thread.
pub fn get_last_error() -> String {
    LAST_ERROR.with(|e| e.borrow().clone())
}

fn set_last_error(msg: String) {
    LAST_ERROR.with(|e| *e.borrow_mut() = msg);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn guarded<F>(entry: &str, f: F) -> i32
where
    F: FnOnce() -> Result<(), PredictError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            tracing::debug!(entry, error = %e, "call failed");
            set_last_error(e.to_string());
            -1
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            tracing::error!(entry, panic = %msg, "panic caught at API boundary");
            set_last_error(format!("{entry}: panic: {msg}"));
            -1
        }
    }
}

/// Decodes the compressed-row shape encoding.
fn parse_shapes(
    keys: &[&str],
    indptr: &[u32],
    shape_data: &[u32],
) -> Result<Vec<(String, Shape)>, PredictError> {
    if indptr.len() != keys.len() + 1 {
        return Err(PredictError::InvalidArgument(format!(
            "indptr has {} entries for {} keys",
            indptr.len(),
            keys.len()
        )));
    }
    if indptr[0] != 0 {
        return Err(PredictError::InvalidArgument("indptr must start at 0".into()));
    }
    let mut shapes = Vec::with_capacity(keys.len());
    for (i, key) in keys.iter().enumerate() {
        let (lo, hi) = (indptr[i] as usize, indptr[i + 1] as usize);
        let dims = shape_data.get(lo..hi).ok_or_else(|| {
            PredictError::InvalidArgument(format!(
                "shape range {lo}..{hi} of '{key}' outside {} dims",
                shape_data.len()
            ))
        })?;
        shapes.push((
            key.to_string(),
            Shape::new(dims.iter().map(|&d| d as usize).collect()),
        ));
    }
    Ok(shapes)
}

/// An empty blob means "no parameters": every input is zero-filled.
fn inline_params(bytes: &[u8]) -> Params<'_> {
    if bytes.is_empty() {
        Params::Bytes(&EMPTY_BUNDLE)
    } else {
        Params::Bytes(bytes)
    }
}

#[allow(clippy::too_many_arguments)]
fn create_with(
    symbol_json: &str,
    params: Params<'_>,
    dev_type: i32,
    dev_id: i32,
    input_keys: &[&str],
    input_shape_indptr: &[u32],
    input_shape_data: &[u32],
    output_keys: Option<&[&str]>,
    out: &mut Option<PredictorHandle>,
) -> Result<(), PredictError> {
    let ctx = Context::from_codes(dev_type, dev_id)?;
    let shapes = parse_shapes(input_keys, input_shape_indptr, input_shape_data)?;
    let mut builder = Session::builder(symbol_json, params)
        .context(ctx)
        .input_shapes(shapes);
    if let Some(keys) = output_keys {
        builder = builder.output_keys(keys.iter().copied());
    }
    *out = Some(Box::new(builder.build()?));
    Ok(())
}

// ── Sessions ───────────────────────────────────────────────────────

/// Creates a session from a graph and an inline parameter bundle.
#[allow(clippy::too_many_arguments)]
pub fn pred_create(
    symbol_json: &str,
    param_bytes: &[u8],
    dev_type: i32,
    dev_id: i32,
    input_keys: &[&str],
    input_shape_indptr: &[u32],
    input_shape_data: &[u32],
    out: &mut Option<PredictorHandle>,
) -> i32 {
    guarded("pred_create", || {
        create_with(
            symbol_json,
            inline_params(param_bytes),
            dev_type,
            dev_id,
            input_keys,
            input_shape_indptr,
            input_shape_data,
            None,
            out,
        )
    })
}

/// Like [`pred_create`], with outputs restricted to `output_keys`.
#[allow(clippy::too_many_arguments)]
pub fn pred_create_partial_out(
    symbol_json: &str,
    param_bytes: &[u8],
    dev_type: i32,
    dev_id: i32,
    input_keys: &[&str],
    input_shape_indptr: &[u32],
    input_shape_data: &[u32],
    output_keys: &[&str],
    out: &mut Option<PredictorHandle>,
) -> i32 {
    guarded("pred_create_partial_out", || {
        create_with(
            symbol_json,
            inline_params(param_bytes),
            dev_type,
            dev_id,
            input_keys,
            input_shape_indptr,
            input_shape_data,
            Some(output_keys),
            out,
        )
    })
}

/// Creates a session whose parameters are shared from `source`.
#[allow(clippy::too_many_arguments)]
pub fn pred_create_from_source(
    symbol_json: &str,
    source: Arc<dyn ParameterSource>,
    model_id: &str,
    dev_type: i32,
    dev_id: i32,
    input_keys: &[&str],
    input_shape_indptr: &[u32],
    input_shape_data: &[u32],
    out: &mut Option<PredictorHandle>,
) -> i32 {
    guarded("pred_create_from_source", || {
        create_with(
            symbol_json,
            Params::external(source, model_id),
            dev_type,
            dev_id,
            input_keys,
            input_shape_indptr,
            input_shape_data,
            None,
            out,
        )
    })
}

/// Reshapes `handle` into a new session stored in `out`. On success
/// `handle` is invalidated and should be freed.
pub fn pred_reshape(
    input_keys: &[&str],
    input_shape_indptr: &[u32],
    input_shape_data: &[u32],
    handle: &mut PredictorHandle,
    out: &mut Option<PredictorHandle>,
) -> i32 {
    guarded("pred_reshape", || {
        let shapes = parse_shapes(input_keys, input_shape_indptr, input_shape_data)?;
        let shapes: Vec<(&str, Shape)> = shapes
            .iter()
            .map(|(k, s)| (k.as_str(), s.clone()))
            .collect();
        *out = Some(Box::new(handle.reshape(&shapes)?));
        Ok(())
    })
}

pub fn pred_set_input(handle: &mut PredictorHandle, key: &str, data: &[f32]) -> i32 {
    guarded("pred_set_input", || handle.set_input(key, data))
}

pub fn pred_forward(handle: &mut PredictorHandle) -> i32 {
    guarded("pred_forward", || handle.forward())
}

/// Runs one operator; `step_left` receives the number of steps remaining.
pub fn pred_partial_forward(handle: &mut PredictorHandle, step: i32, step_left: &mut i32) -> i32 {
    guarded("pred_partial_forward", || {
        let step = usize::try_from(step)
            .map_err(|_| PredictError::InvalidArgument(format!("negative step {step}")))?;
        let left = handle.partial_forward(step)?;
        *step_left = i32::try_from(left)
            .map_err(|_| PredictError::Internal(format!("{left} steps do not fit in i32")))?;
        Ok(())
    })
}

/// Writes the dimensions of output `index` into `shape_out`.
pub fn pred_get_output_shape(handle: &PredictorHandle, index: u32, shape_out: &mut Vec<u32>) -> i32 {
    guarded("pred_get_output_shape", || {
        let shape = handle.output_shape(index as usize)?;
        shape_out.clear();
        for &d in shape.dims() {
            shape_out.push(u32::try_from(d).map_err(|_| {
                PredictError::Internal(format!("dimension {d} does not fit in u32"))
            })?);
        }
        Ok(())
    })
}

pub fn pred_get_output(handle: &PredictorHandle, index: u32, data: &mut [f32]) -> i32 {
    guarded("pred_get_output", || handle.output(index as usize, data))
}

pub fn pred_free(handle: PredictorHandle) -> i32 {
    guarded("pred_free", || (*handle).free())
}

// ── NDList ─────────────────────────────────────────────────────────

pub fn ndlist_create(bytes: &[u8], out: &mut Option<NDListHandle>, out_length: &mut u32) -> i32 {
    guarded("ndlist_create", || {
        let list = NDList::decode(bytes)?;
        *out_length = u32::try_from(list.len())
            .map_err(|_| PredictError::InvalidArgument(format!("{} entries", list.len())))?;
        *out = Some(Box::new(list));
        Ok(())
    })
}

pub fn ndlist_get(
    handle: &NDListHandle,
    index: u32,
    out_key: &mut String,
    out_data: &mut Vec<f32>,
    out_shape: &mut Vec<u32>,
) -> i32 {
    guarded("ndlist_get", || {
        let entry = handle.get(index as usize)?;
        out_key.clear();
        out_key.push_str(entry.key);
        out_data.clear();
        out_data.extend_from_slice(entry.data);
        out_shape.clear();
        out_shape.extend(entry.shape.dims().iter().map(|&d| d as u32));
        Ok(())
    })
}

pub fn ndlist_free(handle: NDListHandle) -> i32 {
    guarded("ndlist_free", || {
        drop(handle);
        Ok(())
    })
}

// ── Profiler ───────────────────────────────────────────────────────

/// `1` starts the global profiler, `0` stops it.
pub fn profiler_set_state(state: i32) -> i32 {
    guarded("profiler_set_state", || {
        let state = match state {
            0 => ProfilerState::NotRunning,
            1 => ProfilerState::Running,
            other => {
                return Err(PredictError::InvalidArgument(format!(
                    "profiler state {other}; expected 0 or 1"
                )))
            }
        };
        Profiler::global().set_state(state);
        Ok(())
    })
}

/// `mode` is `0` (symbolic) or `1` (all operators).
pub fn profiler_set_config(mode: i32, filename: &str) -> i32 {
    guarded("profiler_set_config", || {
        let mode = match mode {
            0 => ProfilerMode::Symbolic,
            1 => ProfilerMode::AllOperator,
            other => {
                return Err(PredictError::InvalidArgument(format!(
                    "profiler mode {other}; expected 0 or 1"
                )))
            }
        };
        Profiler::global().set_config(mode, filename);
        Ok(())
    })
}

pub fn profiler_dump() -> i32 {
    guarded("profiler_dump", || {
        Profiler::global().dump()?;
        Ok(())
    })
}

/// Applies a TOML config file, or defaults plus the environment when
/// `config_path` is `None`.
pub fn init(config_path: Option<&Path>) -> i32 {
    guarded("init", || {
        let config = match config_path {
            Some(path) => PredictorConfig::from_file(path)?,
            None => PredictorConfig::default(),
        };
        config.apply()?;
        Ok(())
    })
}

/// A bundle with no arrays and no names.
static EMPTY_BUNDLE: [u8; 32] = [
    0x12, 0x01, 0, 0, 0, 0, 0, 0, // magic
    0, 0, 0, 0, 0, 0, 0, 0, // reserved
    0, 0, 0, 0, 0, 0, 0, 0, // arrays
    0, 0, 0, 0, 0, 0, 0, 0, // names
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shapes() {
        let shapes = parse_shapes(&["a", "b"], &[0, 2, 3], &[1, 4, 7]).unwrap();
        assert_eq!(shapes[0], ("a".to_string(), Shape::from([1, 4])));
        assert_eq!(shapes[1], ("b".to_string(), Shape::from([7])));
    }

    #[test]
    fn test_parse_shapes_rejects_bad_indptr() {
        assert!(parse_shapes(&["a"], &[0], &[1]).is_err());
        assert!(parse_shapes(&["a"], &[1, 2], &[1, 2]).is_err());
        assert!(parse_shapes(&["a"], &[0, 5], &[1, 2]).is_err());
        assert!(parse_shapes(&["a", "b"], &[0, 2, 1], &[1, 2]).is_err());
    }

    #[test]
    fn test_empty_bundle_decodes() {
        let list = tensor_core::serialize::decode_list(&EMPTY_BUNDLE).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_failure_sets_last_error() {
        let mut out = None;
        let rc = pred_create("not json", &[], 1, 0, &[], &[0], &[], &mut out);
        assert_eq!(rc, -1);
        assert!(out.is_none());
        assert!(get_last_error().contains("graph error"));
    }

    #[test]
    fn test_panic_is_caught() {
        let rc = guarded("test", || panic!("boom"));
        assert_eq!(rc, -1);
        assert!(get_last_error().contains("boom"));
    }

    #[test]
    fn test_bad_device_code() {
        let mut out = None;
        let json = r#"{"nodes": [{"op": "null", "name": "x"}], "heads": [[0, 0]]}"#;
        assert_eq!(pred_create(json, &[], 9, 0, &["x"], &[0, 1], &[2], &mut out), -1);
    }

    #[test]
    fn test_overflowing_shape_fails_cleanly() {
        let mut out = None;
        let json = r#"{"nodes": [{"op": "null", "name": "x"},
            {"op": "_copy", "name": "id", "inputs": [[0, 0]]}], "heads": [[1, 0]]}"#;
        let dim = u32::MAX;
        let rc = pred_create(json, &[], 1, 0, &["x"], &[0, 3], &[dim, dim, dim], &mut out);
        assert_eq!(rc, -1);
        assert!(out.is_none());
        assert!(get_last_error().contains("invalid shape"));
        assert!(!get_last_error().contains("panic"));
    }

    #[test]
    fn test_ndlist_roundtrip() {
        let shape = Shape::from([2]);
        let bytes =
            tensor_core::serialize::encode_named_f32([("k", &shape, &[1.0f32, 2.0][..])]).unwrap();
        let mut handle = None;
        let mut len = 0;
        assert_eq!(ndlist_create(&bytes, &mut handle, &mut len), 0);
        assert_eq!(len, 1);
        let handle = handle.unwrap();
        let (mut key, mut data, mut dims) = (String::new(), Vec::new(), Vec::new());
        assert_eq!(ndlist_get(&handle, 0, &mut key, &mut data, &mut dims), 0);
        assert_eq!((key.as_str(), data, dims), ("k", vec![1.0, 2.0], vec![2]));
        assert_eq!(ndlist_get(&handle, 1, &mut key, &mut Vec::new(), &mut Vec::new()), -1);
        assert_eq!(ndlist_free(handle), 0);
    }

    #[test]
    fn test_profiler_codes() {
        assert_eq!(profiler_set_state(7), -1);
        assert_eq!(profiler_set_config(3, "x.json"), -1);
    }
}
