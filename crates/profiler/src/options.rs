// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Profiler configuration.
//!
//! Options are plain data. The environment is only consulted through
//! [`ProfilerOptions::from_env`]; nothing reads it implicitly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default trace file name.
pub const DEFAULT_OUTPUT: &str = "profile.json";

/// Default number of GPU buckets.
pub const DEFAULT_GPU_SLOTS: usize = 32;

/// Whether the profiler is accepting spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilerState {
    NotRunning,
    Running,
}

/// What gets recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilerMode {
    /// Session phases only (load, infer, bind, forward).
    Symbolic,
    /// Session phases plus one span per executed operator.
    #[default]
    #[serde(alias = "all")]
    AllOperator,
}

impl ProfilerMode {
    /// Parses `0`/`symbolic` and `1`/`all`/`all_operator`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "0" | "symbolic" => Some(Self::Symbolic),
            "1" | "all" | "all_operator" => Some(Self::AllOperator),
            _ => None,
        }
    }
}

/// Identity of the model being served, copied into the trace metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelIdentity {
    pub name: Option<String>,
    pub path: Option<String>,
    pub params: Option<String>,
    pub symbol: Option<String>,
    /// Directory models are served from.
    pub base_dir: Option<String>,
}

/// Process flags recorded as booleans in the trace metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeFlags {
    pub initialize_eager: bool,
    pub initialize_eager_async: bool,
    pub is_client: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerOptions {
    pub output_path: PathBuf,
    pub mode: ProfilerMode,
    /// Enter `Running` as soon as the profiler is created or configured.
    pub autostart: bool,
    /// GPU buckets to reserve. Only honoured at construction.
    pub gpu_slots: usize,
    /// CPU buckets to reserve; defaults to the available parallelism.
    /// Only honoured at construction.
    pub cpu_count: Option<usize>,
    #[serde(skip)]
    pub model: ModelIdentity,
    #[serde(skip)]
    pub flags: RuntimeFlags,
}

impl Default for ProfilerOptions {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            mode: ProfilerMode::AllOperator,
            autostart: false,
            gpu_slots: DEFAULT_GPU_SLOTS,
            cpu_count: None,
            model: ModelIdentity::default(),
            flags: RuntimeFlags::default(),
        }
    }
}

impl ProfilerOptions {
    /// Samples the `PREDICT_*` environment variables.
    ///
    /// | Variable                          | Field                 |
    /// |-----------------------------------|-----------------------|
    /// | `PREDICT_PROFILE_TARGET`          | `output_path`         |
    /// | `PREDICT_PROFILER_MODE`           | `mode`                |
    /// | `PREDICT_PROFILER_AUTOSTART`      | `autostart`           |
    /// | `PREDICT_MODEL_NAME` / `_PATH` / `_PARAMS` / `_SYMBOL` | `model` |
    /// | `PREDICT_BASE_DIR`                | `model.base_dir`      |
    /// | `PREDICT_INITIALIZE_EAGER`, `PREDICT_INITIALIZE_EAGER_ASYNC`, `PREDICT_IS_CLIENT` | `flags` |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Self::default();
        if let Some(path) = lookup("PREDICT_PROFILE_TARGET").filter(|p| !p.is_empty()) {
            options.output_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("PREDICT_PROFILER_MODE") {
            match ProfilerMode::parse(&raw) {
                Some(mode) => options.mode = mode,
                None => tracing::warn!(value = %raw, "ignoring unrecognised PREDICT_PROFILER_MODE"),
            }
        }
        options.autostart = env_flag(&lookup, "PREDICT_PROFILER_AUTOSTART");
        options.model = ModelIdentity {
            name: lookup("PREDICT_MODEL_NAME"),
            path: lookup("PREDICT_MODEL_PATH"),
            params: lookup("PREDICT_MODEL_PARAMS"),
            symbol: lookup("PREDICT_MODEL_SYMBOL"),
            base_dir: lookup("PREDICT_BASE_DIR"),
        };
        options.flags = RuntimeFlags {
            initialize_eager: env_flag(&lookup, "PREDICT_INITIALIZE_EAGER"),
            initialize_eager_async: env_flag(&lookup, "PREDICT_INITIALIZE_EAGER_ASYNC"),
            is_client: env_flag(&lookup, "PREDICT_IS_CLIENT"),
        };
        options
    }
}

fn env_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> bool {
    lookup(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
