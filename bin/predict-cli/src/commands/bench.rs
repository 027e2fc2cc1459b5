// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `predict-rt bench` command: concurrent sessions across batch sizes.
//!
//! Every session runs on its own blocking task and shares one copy of the
//! parameters through a [`SharedParameterStore`]. Each task reshapes its
//! session through the batch sweep, so the run also exercises rebinding.

use super::{finish_profiling, parse_dims, read_params, start_profiling};
use predictor::{ParameterSource, Params, Session, SharedParameterStore};
use profiler::Profiler;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tensor_core::{device, Context, Shape};

const MODEL_ID: &str = "bench";

pub struct BenchArgs {
    pub symbol: PathBuf,
    pub params: Option<PathBuf>,
    pub input: String,
    pub dims: String,
    pub batches: String,
    pub sessions: usize,
    pub iterations: usize,
    pub profile: Option<PathBuf>,
}

/// Latencies of one session at one batch size.
struct Sample {
    batch: usize,
    latencies: Vec<Duration>,
}

pub async fn execute(args: BenchArgs, profiler: Arc<Profiler>) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             predict-rt · Benchmark Suite            ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let dims = parse_dims(&args.dims)?;
    let batches = parse_dims(&args.batches)?;
    if batches.is_empty() || batches.contains(&0) {
        anyhow::bail!("batch sizes must be positive");
    }
    let sessions = args.sessions.max(1);
    let iterations = args.iterations.max(1);

    let json = Arc::new(std::fs::read_to_string(&args.symbol)?);
    let ctx = Context::cpu(0);
    let store = Arc::new(SharedParameterStore::new(".", ctx));
    store.register_bytes(MODEL_ID, &read_params(args.params.as_deref())?)?;

    println!("  Input:      {} [N, {}]", args.input, args.dims);
    println!("  Batches:    {batches:?}");
    println!("  Sessions:   {sessions}");
    println!("  Iterations: {iterations}");
    println!();

    start_profiling(&profiler, args.profile.as_deref());
    let started = Instant::now();

    // ── Workers ────────────────────────────────────────────────
    let mut handles = Vec::with_capacity(sessions);
    for worker in 0..sessions {
        let json = Arc::clone(&json);
        let source: Arc<dyn ParameterSource> = store.clone();
        let profiler = Arc::clone(&profiler);
        let input = args.input.clone();
        let dims = dims.clone();
        let batches = batches.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            run_worker(worker, &json, source, profiler, ctx, &input, &dims, &batches, iterations)
        }));
    }

    let mut by_batch: BTreeMap<usize, Vec<Duration>> = BTreeMap::new();
    for handle in handles {
        for sample in handle.await?? {
            by_batch.entry(sample.batch).or_default().extend(sample.latencies);
        }
    }
    let wall = started.elapsed();

    // ── Results Table ──────────────────────────────────────────
    println!(
        "  {:>6} {:>8} {:>10} {:>10} {:>10} {:>12}",
        "Batch", "Runs", "Mean", "p50", "p95", "Samples/s",
    );
    println!("  {}", "-".repeat(62));
    for (batch, mut latencies) in by_batch {
        latencies.sort();
        let total: Duration = latencies.iter().sum();
        let mean_ms = total.as_secs_f64() * 1000.0 / latencies.len() as f64;
        let throughput = if total.is_zero() {
            0.0
        } else {
            (batch * latencies.len()) as f64 / total.as_secs_f64()
        };
        println!(
            "  {:>6} {:>8} {:>8.3}ms {:>8.3}ms {:>8.3}ms {:>12.1}",
            batch,
            latencies.len(),
            mean_ms,
            percentile(&latencies, 0.50).as_secs_f64() * 1000.0,
            percentile(&latencies, 0.95).as_secs_f64() * 1000.0,
            throughput,
        );
    }
    println!();

    // ── Memory ─────────────────────────────────────────────────
    let pool = device::pool(ctx);
    println!("  Wall time: {:.2}ms", wall.as_secs_f64() * 1000.0);
    println!("  Pool:      {}", pool.stats().summary());
    pool.shrink();
    if !pool.budget().is_unlimited() {
        println!(
            "  Headroom:  {:.2} MB",
            pool.available_bytes() as f64 / (1024.0 * 1024.0)
        );
    }
    println!(
        "  Shared:    {:.2} MB of parameters",
        store.cached_bytes() as f64 / (1024.0 * 1024.0)
    );
    println!();

    finish_profiling(&profiler)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    worker: usize,
    json: &str,
    source: Arc<dyn ParameterSource>,
    profiler: Arc<Profiler>,
    ctx: Context,
    input: &str,
    dims: &[usize],
    batches: &[usize],
    iterations: usize,
) -> anyhow::Result<Vec<Sample>> {
    let base = Shape::new(std::iter::once(1).chain(dims.iter().copied()).collect());
    let shape_for = |batch: usize| base.with_batch(batch);

    let mut session = Session::builder(json, Params::External {
        source,
        model_id: MODEL_ID.to_string(),
    })
    .context(ctx)
    .input_shape(input, shape_for(batches[0]))
    .profiler(profiler)
    .build()?;

    let mut samples = Vec::with_capacity(batches.len());
    for &batch in batches {
        let shape = shape_for(batch);
        if session.arg_shape(input) != Some(&shape) {
            let next = session.reshape(&[(input, shape.clone())])?;
            std::mem::replace(&mut session, next).free()?;
        }
        let data = vec![0.5f32; shape.num_elements()];
        let mut latencies = Vec::with_capacity(iterations);
        for _ in 0..iterations {
            let started = Instant::now();
            session.set_input(input, &data)?;
            session.forward()?;
            latencies.push(started.elapsed());
        }
        tracing::debug!(worker, batch, "batch finished");
        samples.push(Sample { batch, latencies });
    }
    session.free()?;
    Ok(samples)
}

/// Nearest-rank percentile of sorted durations.
fn percentile(sorted: &[Duration], q: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let rank = ((sorted.len() as f64 * q).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}
