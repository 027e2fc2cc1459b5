// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Predictor configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! model_dir = "./models"
//!
//! [profiler]
//! output_path = "profile.json"
//! mode = "all_operator"     # or "symbolic"
//! autostart = false
//! gpu_slots = 32
//!
//! [device]
//! memory_budget = "512M"    # or "unlimited"
//! ```

use crate::{PredictError, SharedParameterStore};
use device_memory::MemoryBudget;
use profiler::{Profiler, ProfilerError, ProfilerMode, ProfilerOptions, DEFAULT_GPU_SLOTS, DEFAULT_OUTPUT};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tensor_core::Context;

/// Configuration for the predictor runtime.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    pub profiler: ProfilerSection,
    pub device: DeviceSection,
    /// Directory served by the shared parameter store.
    pub model_dir: Option<PathBuf>,
}

/// `[profiler]` table.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProfilerSection {
    pub output_path: PathBuf,
    pub mode: ProfilerMode,
    pub autostart: bool,
    pub gpu_slots: usize,
}

impl Default for ProfilerSection {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            mode: ProfilerMode::default(),
            autostart: false,
            gpu_slots: DEFAULT_GPU_SLOTS,
        }
    }
}

/// `[device]` table.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Per-device ceiling (human-readable, e.g. `"512M"`).
    pub memory_budget: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            memory_budget: "unlimited".to_string(),
        }
    }
}

impl PredictorConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, PredictError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PredictError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, PredictError> {
        toml::from_str(toml_str)
            .map_err(|e| PredictError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, PredictError> {
        toml::to_string_pretty(self)
            .map_err(|e| PredictError::Config(format!("TOML serialise error: {e}")))
    }

    /// Parses the memory budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, PredictError> {
        MemoryBudget::parse(&self.device.memory_budget)
            .map_err(|e| PredictError::Config(format!("invalid budget: {e}")))
    }

    /// Profiler options from the `[profiler]` table. Model identity and
    /// runtime flags still come from the environment.
    pub fn profiler_options(&self) -> ProfilerOptions {
        let mut env = ProfilerOptions::from_env();
        if env.model.base_dir.is_none() {
            env.model.base_dir = self.model_dir.as_ref().map(|d| d.display().to_string());
        }
        ProfilerOptions {
            output_path: self.profiler.output_path.clone(),
            mode: self.profiler.mode,
            autostart: self.profiler.autostart,
            gpu_slots: self.profiler.gpu_slots,
            cpu_count: None,
            model: env.model,
            flags: env.flags,
        }
    }

    /// Applies the configuration to the process: installs the default
    /// device budget and sets up the global profiler.
    ///
    /// The global profiler is created from this config if it does not
    /// exist yet, otherwise its mutable settings are updated.
    pub fn apply(&self) -> Result<Arc<Profiler>, PredictError> {
        let budget = self.parse_budget()?;
        tensor_core::device::set_default_budget(budget);

        let options = self.profiler_options();
        let profiler = match Profiler::init(options.clone()) {
            Ok(profiler) => profiler,
            Err(ProfilerError::AlreadyInitialized) => {
                let profiler = Profiler::global();
                profiler.configure(options);
                profiler
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!(
            %budget,
            output = %self.profiler.output_path.display(),
            "predictor configured"
        );
        Ok(profiler)
    }

    /// Parameter store over [`Self::model_dir`], if one is configured.
    pub fn parameter_store(&self, ctx: Context) -> Option<Arc<SharedParameterStore>> {
        self.model_dir
            .as_ref()
            .map(|dir| Arc::new(SharedParameterStore::new(dir, ctx)))
    }
}
