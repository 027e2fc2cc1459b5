// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Subcommands and the helpers they share.

pub mod bench;
pub mod inspect;
pub mod ndlist;
pub mod run;

use anyhow::Context as _;
use predictor::PredictorConfig;
use profiler::{Profiler, ProfilerState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tensor_core::{Context, DeviceKind, Shape};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Loads the TOML config (or defaults) and applies it to the process.
pub fn apply_config(path: Option<&Path>) -> anyhow::Result<Arc<Profiler>> {
    let config = match path {
        Some(path) => PredictorConfig::from_file(path)?,
        None => PredictorConfig::default(),
    };
    Ok(config.apply()?)
}

/// Starts recording into `path`, keeping the configured mode.
pub fn start_profiling(profiler: &Profiler, path: Option<&Path>) {
    if let Some(path) = path {
        profiler.set_config(profiler.mode(), path);
        profiler.set_state(ProfilerState::Running);
    }
}

/// Dumps the trace if the profiler is recording.
pub fn finish_profiling(profiler: &Profiler) -> anyhow::Result<()> {
    if profiler.is_running() {
        let report = profiler.dump()?;
        println!(
            "  Trace: {} spans ({} incomplete) → {}",
            report.spans,
            report.incomplete,
            report.path.display()
        );
    }
    Ok(())
}

/// Parses `d0,d1,...`.
pub fn parse_dims(raw: &str) -> anyhow::Result<Vec<usize>> {
    raw.split(',')
        .map(|d| {
            d.trim()
                .parse::<usize>()
                .with_context(|| format!("invalid dimension '{d}' in '{raw}'"))
        })
        .collect()
}

/// Parses `name=d0,d1,...`.
pub fn parse_shape_arg(raw: &str) -> anyhow::Result<(String, Shape)> {
    let (name, dims) = raw
        .split_once('=')
        .with_context(|| format!("expected name=d0,d1,... but got '{raw}'"))?;
    Ok((name.trim().to_string(), Shape::new(parse_dims(dims)?)))
}

/// Parses `name=path`.
pub fn parse_file_arg(raw: &str) -> anyhow::Result<(String, PathBuf)> {
    let (name, path) = raw
        .split_once('=')
        .with_context(|| format!("expected name=path but got '{raw}'"))?;
    Ok((name.trim().to_string(), PathBuf::from(path.trim())))
}

/// Parses `cpu`, `gpu:1`, `cpu_pinned`.
pub fn parse_device(raw: &str) -> anyhow::Result<Context> {
    let (kind, id) = match raw.split_once(':') {
        Some((kind, id)) => (kind, id.parse::<usize>().with_context(|| format!("bad device id in '{raw}'"))?),
        None => (raw, 0),
    };
    let kind = match kind.trim().to_ascii_lowercase().as_str() {
        "cpu" => DeviceKind::Cpu,
        "gpu" => DeviceKind::Gpu,
        "cpu_pinned" | "pinned" => DeviceKind::CpuPinned,
        other => anyhow::bail!("unknown device kind '{other}'; expected cpu, gpu or cpu_pinned"),
    };
    Ok(Context::new(kind, id))
}

/// Reads a raw little-endian `f32` file.
pub fn read_f32_file(path: &Path) -> anyhow::Result<Vec<f32>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("cannot read '{}'", path.display()))?;
    if bytes.len() % 4 != 0 {
        anyhow::bail!(
            "'{}' is {} bytes, not a whole number of f32 values",
            path.display(),
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Reads the parameter bundle, or an empty bundle when none is given.
pub fn read_params(path: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    match path {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("cannot read params '{}'", path.display()))
        }
        None => Ok(tensor_core::serialize::encode_list(&[], &[])?),
    }
}

/// Truncates a string to `max` characters with an ellipsis.
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}
