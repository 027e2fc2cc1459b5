// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `predict-rt run` command: one forward pass through a fresh session.
//!
//! ```text
//! Session::builder → build (load_symbol, load_params, shape_inference, bind)
//!                  → set_input → forward → output → free
//! ```

use super::{finish_profiling, parse_device, parse_file_arg, parse_shape_arg, read_f32_file, read_params, start_profiling, truncate};
use predictor::{Params, Session};
use profiler::Profiler;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub struct RunArgs {
    pub symbol: PathBuf,
    pub params: Option<PathBuf>,
    pub shapes: Vec<String>,
    pub inputs: Vec<String>,
    pub fill: f32,
    pub outputs: Option<String>,
    pub device: String,
    pub top_k: usize,
    pub profile: Option<PathBuf>,
}

pub async fn execute(args: RunArgs, profiler: Arc<Profiler>) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║            predict-rt · Inference Runner            ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    // ── Configuration ──────────────────────────────────────────
    let ctx = parse_device(&args.device)?;
    let shapes = args
        .shapes
        .iter()
        .map(|s| parse_shape_arg(s))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let files = args
        .inputs
        .iter()
        .map(|s| parse_file_arg(s))
        .collect::<anyhow::Result<HashMap<_, _>>>()?;
    let json = std::fs::read_to_string(&args.symbol)?;
    let params = read_params(args.params.as_deref())?;

    println!("  Config:");
    println!("   Symbol:  {}", args.symbol.display());
    match &args.params {
        Some(p) => println!("   Params:  {}", p.display()),
        None => println!("   Params:  <none, zero-filled>"),
    }
    println!("   Device:  {ctx}");
    for (name, shape) in &shapes {
        println!("   Input:   {name} {shape}");
    }
    println!();

    start_profiling(&profiler, args.profile.as_deref());

    // ── Create ─────────────────────────────────────────────────
    println!("  [1/3] Creating session...");
    let started = Instant::now();
    let mut builder = Session::builder(&json, Params::Bytes(&params))
        .context(ctx)
        .input_shapes(shapes.clone())
        .profiler(Arc::clone(&profiler));
    if let Some(keys) = &args.outputs {
        builder = builder.output_keys(keys.split(',').map(str::trim));
    }
    let mut session = builder.build()?;
    println!(
        "        {} args, {} aux, {} outputs, {} ops ({:.2}ms)",
        session.arg_names().len(),
        session.aux_names().len(),
        session.num_outputs(),
        session.num_steps(),
        started.elapsed().as_secs_f64() * 1000.0,
    );
    println!();

    // ── Inputs ─────────────────────────────────────────────────
    println!("  [2/3] Setting inputs...");
    for (name, _) in &shapes {
        match files.get(name) {
            Some(path) => {
                let data = read_f32_file(path)?;
                session.set_input(name, &data)?;
                println!("        {name} ← {}", path.display());
            }
            None => {
                let size = session
                    .arg_shape(name)
                    .map(|s| s.num_elements())
                    .unwrap_or(0);
                session.set_input(name, &vec![args.fill; size])?;
                println!("        {name} ← {} × {}", size, args.fill);
            }
        }
    }
    println!();

    // ── Forward ────────────────────────────────────────────────
    println!("  [3/3] Running forward...");
    let started = Instant::now();
    session.forward()?;
    let forward_ms = started.elapsed().as_secs_f64() * 1000.0;
    println!("        Done in {forward_ms:.2}ms");
    println!();

    print_outputs(&session, args.top_k)?;

    session.free()?;
    for device in tensor_core::device::active_devices() {
        let pool = tensor_core::device::pool(device);
        tracing::info!(%device, live = pool.live_buffers(), "{}", pool.stats().summary());
    }
    finish_profiling(&profiler)?;
    Ok(())
}

fn print_outputs(session: &Session, top_k: usize) -> anyhow::Result<()> {
    println!("  Outputs:");
    for (i, name) in session.output_names().iter().enumerate() {
        let shape = session.output_shape(i)?;
        let values = session.output_to_vec(i)?;
        println!("   {} {}", truncate(name, 40), shape);

        let mut ranked: Vec<(usize, f32)> = values.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        for (rank, (index, value)) in ranked.into_iter().take(top_k).enumerate() {
            println!("     #{:<2} [{index:>5}] {value:>12.6}", rank + 1);
        }
    }
    println!();
    Ok(())
}
