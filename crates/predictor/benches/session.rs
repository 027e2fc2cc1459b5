// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Session benchmarks: forward passes of a small MLP and the cost of a
//! reshape round trip.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use predictor::{Params, Session};
use std::hint::black_box;
use tensor_core::{serialize, Context, Shape};

const MLP: &str = r#"{"nodes": [
    {"op": "null", "name": "data"},
    {"op": "null", "name": "fc1_weight"},
    {"op": "null", "name": "fc1_bias"},
    {"op": "FullyConnected", "name": "fc1", "attrs": {"num_hidden": "256"}, "inputs": [[0, 0], [1, 0], [2, 0]]},
    {"op": "Activation", "name": "relu1", "attrs": {"act_type": "relu"}, "inputs": [[3, 0]]},
    {"op": "null", "name": "fc2_weight"},
    {"op": "null", "name": "fc2_bias"},
    {"op": "FullyConnected", "name": "fc2", "attrs": {"num_hidden": "10"}, "inputs": [[4, 0], [5, 0], [6, 0]]},
    {"op": "softmax", "name": "prob", "inputs": [[7, 0]]}
], "heads": [[8, 0]]}"#;

const FEATURES: usize = 128;

fn params() -> Vec<u8> {
    let w1 = Shape::from([256, FEATURES]);
    let b1 = Shape::from([256]);
    let w2 = Shape::from([10, 256]);
    let b2 = Shape::from([10]);
    let fill = |n: usize| (0..n).map(|i| ((i % 13) as f32 - 6.0) * 0.01).collect::<Vec<_>>();
    let (w1v, b1v, w2v, b2v) = (fill(256 * FEATURES), fill(256), fill(2560), fill(10));
    serialize::encode_named_f32([
        ("arg:fc1_weight", &w1, &w1v[..]),
        ("arg:fc1_bias", &b1, &b1v[..]),
        ("arg:fc2_weight", &w2, &w2v[..]),
        ("arg:fc2_bias", &b2, &b2v[..]),
    ])
    .unwrap()
}

fn bench_forward(c: &mut Criterion) {
    let bytes = params();
    let mut group = c.benchmark_group("forward");
    for &batch in &[1usize, 8, 32] {
        let mut session = Session::create(
            MLP,
            Params::Bytes(&bytes),
            Context::cpu(0),
            &[("data", Shape::from([batch, FEATURES]))],
        )
        .unwrap();
        let input = vec![0.5f32; batch * FEATURES];
        group.bench_with_input(BenchmarkId::new("mlp", batch), &batch, |b, _| {
            b.iter(|| {
                session.set_input("data", black_box(&input)).unwrap();
                session.forward().unwrap();
                black_box(session.output_to_vec(0).unwrap());
            })
        });
    }
    group.finish();
}

fn bench_reshape(c: &mut Criterion) {
    let bytes = params();
    let mut session = Some(
        Session::create(
            MLP,
            Params::Bytes(&bytes),
            Context::cpu(0),
            &[("data", Shape::from([1, FEATURES]))],
        )
        .unwrap(),
    );
    let mut batch = 1;
    c.bench_function("reshape_1_to_16", |b| {
        b.iter(|| {
            batch = if batch == 1 { 16 } else { 1 };
            if let Some(mut current) = session.take() {
                let next = current
                    .reshape(&[("data", Shape::from([batch, FEATURES]))])
                    .unwrap();
                current.free().unwrap();
                session = Some(black_box(next));
            }
        })
    });
}

criterion_group!(benches, bench_forward, bench_reshape);
criterion_main!(benches);
