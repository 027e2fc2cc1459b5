// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # predict-rt
//!
//! Command-line interface for predictor sessions.
//!
//! ## Usage
//! ```bash
//! # Run one forward pass and print the top classes
//! predict-rt run --symbol model-symbol.json --params model.params --shape data=1,3,32,32
//!
//! # List arguments, auxiliary states and inferred shapes
//! predict-rt inspect --symbol model-symbol.json --shape data=1,3,32,32
//!
//! # Decode a named-array bundle (e.g. a mean image)
//! predict-rt ndlist mean.nd
//!
//! # Concurrent sessions across batch sizes, with a trace
//! predict-rt bench --symbol model-symbol.json --params model.params \
//!     --input data --dims 3,32,32 --batches 1,4,16 --sessions 4 --profile bench.json
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "predict-rt",
    about = "Inference sessions over serialized computation graphs",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a session, fill its inputs, run forward and print outputs.
    Run {
        /// Graph JSON file.
        #[arg(short, long)]
        symbol: PathBuf,

        /// Parameter bundle. Inputs without parameters are zero-filled.
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Input shape as `name=d0,d1,...` (repeatable).
        #[arg(long = "shape", required = true)]
        shapes: Vec<String>,

        /// Raw little-endian f32 file for an input, as `name=path` (repeatable).
        #[arg(long = "input")]
        inputs: Vec<String>,

        /// Value for shaped inputs that have no input file.
        #[arg(long, default_value_t = 1.0)]
        fill: f32,

        /// Restrict outputs to these internal entries (comma-separated).
        #[arg(long)]
        outputs: Option<String>,

        /// Device as `cpu`, `gpu`, `cpu_pinned`, optionally with `:id`.
        #[arg(short, long, default_value = "cpu")]
        device: String,

        /// Number of top entries to print per output.
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,

        /// Record a trace and write it to this file.
        #[arg(long)]
        profile: Option<PathBuf>,
    },

    /// Print the arguments, auxiliary states and outputs of a graph.
    Inspect {
        /// Graph JSON file.
        #[arg(short, long)]
        symbol: PathBuf,

        /// Input shape as `name=d0,d1,...` (repeatable).
        #[arg(long = "shape")]
        shapes: Vec<String>,
    },

    /// Decode a named-array bundle and list its entries.
    Ndlist {
        /// Bundle file.
        file: PathBuf,

        /// Number of leading values to print per entry.
        #[arg(long, default_value_t = 4)]
        preview: usize,
    },

    /// Run concurrent sessions across batch sizes and report latency.
    Bench {
        /// Graph JSON file.
        #[arg(short, long)]
        symbol: PathBuf,

        /// Parameter bundle, shared by every session.
        #[arg(short, long)]
        params: Option<PathBuf>,

        /// Name of the batched input.
        #[arg(long, default_value = "data")]
        input: String,

        /// Per-sample dimensions of the input (comma-separated).
        #[arg(long)]
        dims: String,

        /// Batch sizes to sweep (comma-separated).
        #[arg(long, default_value = "1,4,16")]
        batches: String,

        /// Concurrent sessions.
        #[arg(long, default_value_t = 2)]
        sessions: usize,

        /// Forward passes per session and batch size.
        #[arg(long, default_value_t = 20)]
        iterations: usize,

        /// Record a trace and write it to this file.
        #[arg(long)]
        profile: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let profiler = commands::apply_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            symbol,
            params,
            shapes,
            inputs,
            fill,
            outputs,
            device,
            top_k,
            profile,
        } => {
            commands::run::execute(
                commands::run::RunArgs {
                    symbol,
                    params,
                    shapes,
                    inputs,
                    fill,
                    outputs,
                    device,
                    top_k,
                    profile,
                },
                profiler,
            )
            .await
        }
        Commands::Inspect { symbol, shapes } => commands::inspect::execute(symbol, shapes).await,
        Commands::Ndlist { file, preview } => commands::ndlist::execute(file, preview).await,
        Commands::Bench {
            symbol,
            params,
            input,
            dims,
            batches,
            sessions,
            iterations,
            profile,
        } => {
            commands::bench::execute(
                commands::bench::BenchArgs {
                    symbol,
                    params,
                    input,
                    dims,
                    batches,
                    sessions,
                    iterations,
                    profile,
                },
                profiler,
            )
            .await
        }
    }
}
