// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! End-to-end session behaviour: create, reshape, forward, shared
//! parameters, memory accounting, the status-code API and trace output.
//!
//! Tests that check pool accounting each use their own device id so
//! parallel tests never share a pool.

use predictor::{api, NDList, ParameterSource, Params, PredictError, Session, SharedParameterStore};
use profiler::{Profiler, ProfilerMode, ProfilerOptions, ProfilerState};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use tensor_core::{device, serialize, Context, Shape};

const IDENTITY: &str = r#"{"nodes": [
    {"op": "null", "name": "x"},
    {"op": "_copy", "name": "identity", "inputs": [[0, 0]]}
], "heads": [[1, 0]]}"#;

const FC_BN: &str = r#"{"nodes": [
    {"op": "null", "name": "data"},
    {"op": "null", "name": "fc_weight"},
    {"op": "null", "name": "fc_bias"},
    {"op": "FullyConnected", "name": "fc", "attrs": {"num_hidden": "3"}, "inputs": [[0, 0], [1, 0], [2, 0]]},
    {"op": "null", "name": "bn_gamma"},
    {"op": "null", "name": "bn_beta"},
    {"op": "null", "name": "bn_moving_mean"},
    {"op": "null", "name": "bn_moving_var"},
    {"op": "BatchNorm", "name": "bn", "attrs": {"eps": "0.001"},
     "inputs": [[3, 0], [4, 0], [5, 0], [6, 0], [7, 0]]}
], "heads": [[8, 0]]}"#;

fn quiet_profiler() -> Arc<Profiler> {
    Arc::new(Profiler::new(ProfilerOptions {
        cpu_count: Some(64),
        gpu_slots: 0,
        ..Default::default()
    }))
}

fn empty_params() -> Vec<u8> {
    serialize::encode_list(&[], &[]).unwrap()
}

fn fc_bn_params() -> Vec<u8> {
    let w = Shape::from([3, 4]);
    let v = Shape::from([3]);
    let weight: Vec<f32> = (0..12).map(|i| (i as f32 - 6.0) * 0.1).collect();
    serialize::encode_named_f32([
        ("arg:fc_weight", &w, &weight[..]),
        ("arg:fc_bias", &v, &[0.1f32, -0.2, 0.3][..]),
        ("arg:bn_gamma", &v, &[1.0f32, 1.0, 1.0][..]),
        ("arg:bn_beta", &v, &[0.0f32, 0.5, -0.5][..]),
        ("aux:bn_moving_mean", &v, &[0.1f32, 0.0, -0.1][..]),
        ("aux:bn_moving_var", &v, &[1.0f32, 4.0, 0.25][..]),
        ("arg:not_in_graph", &v, &[9.0f32, 9.0, 9.0][..]),
    ])
    .unwrap()
}

fn fc_bn_session(bytes: &[u8], ctx: Context, batch: usize) -> Session {
    Session::builder(FC_BN, Params::Bytes(bytes))
        .context(ctx)
        .input_shape("data", Shape::from([batch, 4]))
        .profiler(quiet_profiler())
        .build()
        .unwrap()
}

fn ramp(n: usize) -> Vec<f32> {
    (0..n).map(|i| (i as f32) * 0.25 - 1.0).collect()
}

// ── Scenarios ──────────────────────────────────────────────────────

#[test]
fn test_identity_forward() {
    let params = empty_params();
    let mut s = Session::builder(IDENTITY, Params::Bytes(&params))
        .input_shape("x", Shape::from([1, 3, 4, 4]))
        .profiler(quiet_profiler())
        .build()
        .unwrap();
    s.set_input("x", &[1.0; 48]).unwrap();
    s.forward().unwrap();
    assert_eq!(s.output_shape(0).unwrap(), &Shape::from([1, 3, 4, 4]));
    let mut out = vec![0.0f32; 48];
    s.output(0, &mut out).unwrap();
    assert!(out.iter().all(|&v| v == 1.0));
    s.free().unwrap();
}

#[test]
fn test_identity_reshape_to_larger_batch() {
    let params = empty_params();
    let mut s = Session::builder(IDENTITY, Params::Bytes(&params))
        .input_shape("x", Shape::from([1, 3, 4, 4]))
        .profiler(quiet_profiler())
        .build()
        .unwrap();
    let mut bigger = s.reshape(&[("x", Shape::from([2, 3, 4, 4]))]).unwrap();
    bigger.forward().unwrap();
    assert_eq!(bigger.output_shape(0).unwrap(), &Shape::from([2, 3, 4, 4]));
    assert!(matches!(
        bigger.set_input("x", &[1.0; 48]),
        Err(PredictError::SizeMismatch { expected: 96, actual: 48, .. })
    ));
    bigger.set_input("x", &[1.0; 96]).unwrap();
    s.free().unwrap();
    bigger.free().unwrap();
}

#[test]
fn test_unknown_shapes_fail_create() {
    let params = empty_params();
    let result = Session::builder(IDENTITY, Params::Bytes(&params))
        .profiler(quiet_profiler())
        .build();
    assert!(matches!(result, Err(PredictError::IncompleteShapes { .. })));
}

#[test]
fn test_missing_output_key() {
    let params = fc_bn_params();
    let result = Session::builder(FC_BN, Params::Bytes(&params))
        .input_shape("data", Shape::from([1, 4]))
        .output_keys(["no_such_layer"])
        .profiler(quiet_profiler())
        .build();
    assert!(matches!(
        result,
        Err(PredictError::Graph(graph_ir::GraphError::OutputNotFound(_)))
    ));
}

// ── Reshape ────────────────────────────────────────────────────────

#[test]
fn test_reshape_conserves_params_and_aux() {
    let params = fc_bn_params();
    let mut s = fc_bn_session(&params, Context::cpu(0), 2);
    let weight = s.arg_array("fc_weight").unwrap().clone();
    let mean = s.aux_array("bn_moving_mean").unwrap().clone();
    let data_before = s.arg_array("data").unwrap().clone();

    let next = s.reshape(&[("data", Shape::from([5, 4]))]).unwrap();
    for name in ["fc_weight", "fc_bias", "bn_gamma", "bn_beta"] {
        assert_eq!(next.arg_shape(name), Some(&Shape::from(if name == "fc_weight" {
            vec![3, 4]
        } else {
            vec![3]
        })));
    }
    assert!(next.arg_array("fc_weight").unwrap().ptr_eq(&weight));
    assert!(next.aux_array("bn_moving_mean").unwrap().ptr_eq(&mean));
    assert!(!next.arg_array("data").unwrap().ptr_eq(&data_before));
    assert_eq!(next.arg_shape("data"), Some(&Shape::from([5, 4])));
    assert_eq!(next.output_shape(0).unwrap(), &Shape::from([5, 3]));
    assert!(!s.is_valid());
}

#[test]
fn test_rebind_matches_fresh_session() {
    let params = fc_bn_params();
    let mut first = fc_bn_session(&params, Context::cpu(0), 2);
    first.set_input("data", &ramp(8)).unwrap();
    first.forward().unwrap();

    let mut reshaped = first.reshape(&[("data", Shape::from([5, 4]))]).unwrap();
    reshaped.set_input("data", &ramp(20)).unwrap();
    reshaped.forward().unwrap();

    let mut fresh = fc_bn_session(&params, Context::cpu(0), 5);
    fresh.set_input("data", &ramp(20)).unwrap();
    fresh.forward().unwrap();

    assert_eq!(reshaped.output_to_vec(0).unwrap(), fresh.output_to_vec(0).unwrap());

    // And back down again.
    let mut small = reshaped.reshape(&[("data", Shape::from([2, 4]))]).unwrap();
    small.set_input("data", &ramp(8)).unwrap();
    small.forward().unwrap();
    let mut fresh_small = fc_bn_session(&params, Context::cpu(0), 2);
    fresh_small.set_input("data", &ramp(8)).unwrap();
    fresh_small.forward().unwrap();
    assert_eq!(small.output_to_vec(0).unwrap(), fresh_small.output_to_vec(0).unwrap());
}

#[test]
fn test_forward_values() {
    let params = fc_bn_params();
    let mut s = fc_bn_session(&params, Context::cpu(0), 1);
    s.set_input("data", &[1.0, 0.0, 0.0, 0.0]).unwrap();
    s.forward().unwrap();
    // fc = column 0 of each weight row + bias: [-0.6 + 0.1, -0.2 - 0.2, 0.2 + 0.3]
    // bn (gamma fixed to 1) = (fc - mean) / sqrt(var + eps) + beta
    let fc = [-0.5f32, -0.4, 0.5];
    let mean = [0.1f32, 0.0, -0.1];
    let var = [1.0f32, 4.0, 0.25];
    let beta = [0.0f32, 0.5, -0.5];
    let out = s.output_to_vec(0).unwrap();
    for c in 0..3 {
        let expected = (fc[c] - mean[c]) / (var[c] + 1e-3).sqrt() + beta[c];
        assert!((out[c] - expected).abs() < 1e-4, "channel {c}: {} vs {expected}", out[c]);
    }
}

#[test]
fn test_partial_forward_matches_forward() {
    let params = fc_bn_params();
    let mut stepped = fc_bn_session(&params, Context::cpu(0), 3);
    let mut whole = fc_bn_session(&params, Context::cpu(0), 3);
    for s in [&mut stepped, &mut whole] {
        s.set_input("data", &ramp(12)).unwrap();
    }
    whole.forward().unwrap();

    let total = stepped.num_steps();
    assert_eq!(total, 2);
    let mut step = 0;
    loop {
        let left = stepped.partial_forward(step).unwrap();
        assert_eq!(left, total - step - 1);
        if left == 0 {
            break;
        }
        step += 1;
    }
    assert_eq!(stepped.output_to_vec(0).unwrap(), whole.output_to_vec(0).unwrap());
}

#[test]
fn test_partial_outputs_expose_internals() {
    let params = fc_bn_params();
    let mut s = Session::create_partial(
        FC_BN,
        Params::Bytes(&params),
        Context::cpu(0),
        &[("data", Shape::from([2, 4]))],
        &["fc", "bn"],
    )
    .unwrap();
    assert_eq!(s.output_names(), &["fc_output".to_string(), "bn_output".to_string()]);
    s.set_input("data", &ramp(8)).unwrap();
    s.forward().unwrap();
    assert_eq!(s.output_shape(0).unwrap(), &Shape::from([2, 3]));
    assert_eq!(s.output_to_vec(1).unwrap().len(), 6);
}

// ── Shared parameters ──────────────────────────────────────────────

#[test]
fn test_external_params_are_shared() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("fcbn.params"), fc_bn_params()).unwrap();
    let ctx = Context::cpu(41);
    let store = Arc::new(SharedParameterStore::new(dir.path(), ctx));
    let source: Arc<dyn ParameterSource> = store.clone();

    let make = || {
        Session::builder(FC_BN, Params::external(Arc::clone(&source), "fcbn"))
            .context(ctx)
            .input_shape("data", Shape::from([2, 4]))
            .profiler(quiet_profiler())
            .build()
            .unwrap()
    };
    let mut a = make();
    let b = make();
    assert!(a.has_shared_params());
    assert_eq!(store.ref_count("fcbn"), 2);
    assert!(a
        .arg_array("fc_weight")
        .unwrap()
        .ptr_eq(b.arg_array("fc_weight").unwrap()));
    assert!(a
        .aux_array("bn_moving_var")
        .unwrap()
        .ptr_eq(b.aux_array("bn_moving_var").unwrap()));

    // Reshape carries the lease to the new session.
    let reshaped = a.reshape(&[("data", Shape::from([3, 4]))]).unwrap();
    a.free().unwrap();
    assert_eq!(store.ref_count("fcbn"), 2);

    reshaped.free().unwrap();
    assert_eq!(store.ref_count("fcbn"), 1);
    b.free().unwrap();
    assert!(!store.is_cached("fcbn"));
    assert_eq!(device::pool(ctx).allocated_bytes(), 0);
}

#[test]
fn test_failed_create_unloads_external_params() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("fcbn.params"), fc_bn_params()).unwrap();
    let ctx = Context::cpu(42);
    let store = Arc::new(SharedParameterStore::new(dir.path(), ctx));

    // A 5-wide input infers fc_weight as [3, 5], which the shared [3, 4]
    // array cannot satisfy.
    let result = Session::builder(FC_BN, Params::external(store.clone(), "fcbn"))
        .context(ctx)
        .input_shape("data", Shape::from([2, 5]))
        .profiler(quiet_profiler())
        .build();
    assert!(matches!(result, Err(PredictError::InvalidParams(_))));
    assert_eq!(store.ref_count("fcbn"), 0);
    assert!(!store.is_cached("fcbn"));
    assert_eq!(device::pool(ctx).allocated_bytes(), 0);
}

// ── Memory accounting ──────────────────────────────────────────────

#[test]
fn test_free_returns_memory() {
    let ctx = Context::cpu(43);
    let pool = device::pool(ctx);
    let baseline = pool.allocated_bytes();
    let params = fc_bn_params();

    let mut s = fc_bn_session(&params, ctx, 4);
    assert!(pool.allocated_bytes() > baseline);
    let mut bigger = s.reshape(&[("data", Shape::from([8, 4]))]).unwrap();
    bigger.set_input("data", &ramp(32)).unwrap();
    bigger.forward().unwrap();
    s.free().unwrap();
    bigger.free().unwrap();
    assert_eq!(pool.allocated_bytes(), baseline);
}

#[test]
fn test_failed_create_releases_memory() {
    let ctx = Context::cpu(44);
    let pool = device::pool(ctx);
    let baseline = pool.allocated_bytes();

    // bn_beta with the wrong element count fails after fc params are on
    // the device.
    let w = Shape::from([3, 4]);
    let bad = Shape::from([2]);
    let params = serialize::encode_named_f32([
        ("arg:fc_weight", &w, &[0.0f32; 12][..]),
        ("arg:bn_beta", &bad, &[0.0f32; 2][..]),
    ])
    .unwrap();
    let result = Session::builder(FC_BN, Params::Bytes(&params))
        .context(ctx)
        .input_shape("data", Shape::from([2, 4]))
        .profiler(quiet_profiler())
        .build();
    assert!(matches!(result, Err(PredictError::InvalidParams(_))));
    assert_eq!(pool.allocated_bytes(), baseline);
}

#[test]
fn test_failed_reshape_leaves_session_usable() {
    let params = fc_bn_params();
    let mut s = fc_bn_session(&params, Context::cpu(0), 2);
    // Changing the feature width would change fc_weight.
    let err = s.reshape(&[("data", Shape::from([2, 6]))]).unwrap_err();
    assert!(matches!(
        err,
        PredictError::ShapeChanged { kind: "arg", ref name, .. } if name == "fc_weight"
    ));
    assert!(s.is_valid());
    s.set_input("data", &ramp(8)).unwrap();
    s.forward().unwrap();
}

// ── Status-code API ────────────────────────────────────────────────

#[test]
fn test_api_lifecycle() {
    let params = fc_bn_params();
    let mut handle = None;
    let rc = api::pred_create(FC_BN, &params, 1, 0, &["data"], &[0, 2], &[2, 4], &mut handle);
    assert_eq!(rc, 0, "{}", api::get_last_error());
    let mut handle = handle.unwrap();

    let mut shape = Vec::new();
    assert_eq!(api::pred_get_output_shape(&handle, 0, &mut shape), 0);
    assert_eq!(shape, vec![2, 3]);
    assert_eq!(api::pred_set_input(&mut handle, "data", &ramp(8)), 0);
    assert_eq!(api::pred_forward(&mut handle), 0);

    let mut reshaped = None;
    assert_eq!(
        api::pred_reshape(&["data"], &[0, 2], &[4, 4], &mut handle, &mut reshaped),
        0
    );
    let mut reshaped = reshaped.unwrap();
    assert_eq!(api::pred_forward(&mut handle), -1);
    assert!(api::get_last_error().contains("invalidated"));

    let mut left = -1;
    assert_eq!(api::pred_partial_forward(&mut reshaped, 0, &mut left), 0);
    assert_eq!(left, 1);
    assert_eq!(api::pred_partial_forward(&mut reshaped, 5, &mut left), -1);

    let mut out = vec![0.0f32; 12];
    assert_eq!(api::pred_get_output(&reshaped, 0, &mut out), 0);
    assert_eq!(api::pred_get_output(&reshaped, 1, &mut out), -1);
    assert!(api::get_last_error().contains("out of range"));

    assert_eq!(api::pred_free(handle), 0);
    assert_eq!(api::pred_free(reshaped), 0);
}

#[test]
fn test_api_partial_out_and_errors() {
    let params = fc_bn_params();
    let mut handle = None;
    let rc = api::pred_create_partial_out(
        FC_BN,
        &params,
        1,
        0,
        &["data"],
        &[0, 2],
        &[1, 4],
        &["fc"],
        &mut handle,
    );
    assert_eq!(rc, 0, "{}", api::get_last_error());
    let mut handle = handle.unwrap();
    assert_eq!(api::pred_set_input(&mut handle, "nope", &[0.0; 4]), -1);
    assert!(api::get_last_error().contains("nope"));
    assert_eq!(api::pred_free(handle), 0);

    let mut none = None;
    let rc = api::pred_create(FC_BN, &params, 1, 0, &["data"], &[0, 3], &[1, 4], &mut none);
    assert_eq!(rc, -1);
    assert!(none.is_none());
    assert!(api::get_last_error().contains("invalid argument"));
}

#[test]
fn test_api_create_from_source() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("m.params"), fc_bn_params()).unwrap();
    let store = Arc::new(SharedParameterStore::new(dir.path(), Context::cpu(45)));
    let mut handle = None;
    let rc = api::pred_create_from_source(
        FC_BN,
        store.clone(),
        "m",
        1,
        45,
        &["data"],
        &[0, 2],
        &[1, 4],
        &mut handle,
    );
    assert_eq!(rc, 0, "{}", api::get_last_error());
    assert_eq!(store.ref_count("m"), 1);
    assert_eq!(api::pred_free(handle.unwrap()), 0);
    assert!(!store.is_cached("m"));
}

// ── Profiler ───────────────────────────────────────────────────────

#[test]
fn test_session_spans_in_trace() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = Arc::new(Profiler::new(ProfilerOptions {
        output_path: dir.path().join("session.json"),
        mode: ProfilerMode::AllOperator,
        cpu_count: Some(2),
        gpu_slots: 1,
        ..Default::default()
    }));
    profiler.set_state(ProfilerState::Running);

    let params = fc_bn_params();
    let mut s = Session::builder(FC_BN, Params::Bytes(&params))
        .input_shape("data", Shape::from([2, 4]))
        .profiler(Arc::clone(&profiler))
        .build()
        .unwrap();
    s.set_input("data", &ramp(8)).unwrap();
    s.forward().unwrap();
    let mut reshaped = s.reshape(&[("data", Shape::from([3, 4]))]).unwrap();
    s.free().unwrap();
    reshaped.set_input("data", &ramp(12)).unwrap();
    reshaped.forward().unwrap();
    let report = profiler.dump().unwrap();
    // load_symbol, load_params, shape_inference, bind, forward, fc, bn,
    // then reshape, forward, fc, bn
    assert_eq!(report.spans, 11);
    assert_eq!(report.incomplete, 0);

    let text = std::fs::read_to_string(&report.path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    let events = doc["traceEvents"].as_array().unwrap();

    let mut begins: HashMap<String, u64> = HashMap::new();
    let mut pairs = 0;
    for e in events.iter().filter(|e| e["ph"] != "M") {
        let name = e["name"].as_str().unwrap().to_string();
        let ts = e["ts"].as_u64().unwrap();
        match e["ph"].as_str().unwrap() {
            "B" => {
                assert!(begins.insert(name, ts).is_none());
            }
            "E" => {
                let start = begins.remove(&name).unwrap();
                assert!(ts >= start, "{name}: end {ts} before start {start}");
                pairs += 1;
            }
            other => panic!("unexpected phase {other}"),
        }
    }
    assert_eq!(pairs, 11);
    let category = |name: &str| {
        events
            .iter()
            .find(|e| e["name"] == name)
            .map(|e| e["cat"].as_str().unwrap().to_string())
            .unwrap()
    };
    assert_eq!(category("bind"), "create");
    assert_eq!(category("forward"), "predict");
    assert_eq!(category("reshape"), "predict");
    assert_eq!(category("fc"), "operator");

    // Buckets are empty after a dump.
    profiler.set_state(ProfilerState::Running);
    assert_eq!(profiler.dump().unwrap().spans, 0);
    reshaped.free().unwrap();
}

#[test]
fn test_symbolic_mode_skips_operators() {
    let dir = tempfile::tempdir().unwrap();
    let profiler = Arc::new(Profiler::new(ProfilerOptions {
        output_path: dir.path().join("symbolic.json"),
        mode: ProfilerMode::Symbolic,
        cpu_count: Some(1),
        gpu_slots: 0,
        ..Default::default()
    }));
    profiler.set_state(ProfilerState::Running);
    let params = fc_bn_params();
    let mut s = Session::builder(FC_BN, Params::Bytes(&params))
        .input_shape("data", Shape::from([1, 4]))
        .profiler(Arc::clone(&profiler))
        .build()
        .unwrap();
    s.forward().unwrap();
    assert_eq!(profiler.dump().unwrap().spans, 5);
}

// ── NDList ─────────────────────────────────────────────────────────

fn ndlist_entry() -> impl Strategy<Value = (String, Vec<usize>, Vec<f32>)> {
    ("[a-z_]{1,12}", prop::collection::vec(1usize..5, 1..4)).prop_flat_map(|(name, dims)| {
        let n: usize = dims.iter().product();
        (
            Just(name),
            Just(dims),
            prop::collection::vec(-1.0e6f32..1.0e6, n),
        )
    })
}

proptest! {
    #[test]
    fn test_ndlist_decode_preserves_entries(entries in prop::collection::vec(ndlist_entry(), 0..6)) {
        let shapes: Vec<Shape> = entries.iter().map(|(_, d, _)| Shape::new(d.clone())).collect();
        let bytes = serialize::encode_named_f32(
            entries
                .iter()
                .zip(&shapes)
                .map(|((name, _, values), shape)| (name.as_str(), shape, values.as_slice())),
        )
        .unwrap();
        let list = NDList::decode(&bytes).unwrap();
        prop_assert_eq!(list.len(), entries.len());
        for (i, (name, _, values)) in entries.iter().enumerate() {
            let e = list.get(i).unwrap();
            prop_assert_eq!(e.key, name.as_str());
            prop_assert_eq!(e.shape, &shapes[i]);
            prop_assert_eq!(e.data, values.as_slice());
        }
    }
}
