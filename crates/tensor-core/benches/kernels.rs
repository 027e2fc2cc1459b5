// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmarks for the `f32` kernels.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use tensor_core::{matmul, softmax, Transpose};

fn bench_matmul(c: &mut Criterion) {
    let mut group = c.benchmark_group("matmul");
    for &dim in &[64usize, 128, 256] {
        let a = vec![0.5f32; dim * dim];
        let b = vec![0.25f32; dim * dim];
        let mut out = vec![0.0f32; dim * dim];
        group.bench_with_input(BenchmarkId::new("square", dim), &dim, |bench, &d| {
            bench.iter(|| {
                matmul(black_box(&a), black_box(&b), &mut out, d, d, d, Transpose::None).unwrap();
                black_box(&out);
            })
        });
        group.bench_with_input(BenchmarkId::new("fc_weights", dim), &dim, |bench, &d| {
            bench.iter(|| {
                matmul(black_box(&a), black_box(&b), &mut out, d, d, d, Transpose::Rhs).unwrap();
                black_box(&out);
            })
        });
    }
    group.finish();
}

fn bench_softmax(c: &mut Criterion) {
    let rows = 64;
    let width = 1000;
    let input: Vec<f32> = (0..rows * width).map(|i| (i % 17) as f32 * 0.1).collect();
    let mut output = vec![0.0f32; rows * width];
    c.bench_function("softmax_64x1000", |b| {
        b.iter(|| {
            softmax(black_box(&input), &mut output, width).unwrap();
            black_box(&output);
        })
    });
}

criterion_group!(benches, bench_matmul, bench_softmax);
criterion_main!(benches);
