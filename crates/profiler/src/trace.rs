// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Trace Event document written by [`crate::Profiler::dump`].
//!
//! ```text
//! {
//!     "traceEvents": [
//!         {"name": "process_name", "ph": "M", "pid": 0, "args": {"name": "cpu/0"}},
//!         {"name": "forward", "cat": "predict", "ph": "B", "ts": 10, "pid": 0, "tid": 1, "args": {}},
//!         {"name": "forward", "cat": "predict", "ph": "E", "ts": 42, "pid": 0, "tid": 1, "args": {}}
//!     ],
//!     "displayTimeUnit": "ms",
//!     "otherData": {"hostname": "...", ...}
//! }
//! ```

use crate::options::{ModelIdentity, RuntimeFlags};
use crate::ProfilerError;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

const HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";

/// One entry of `traceEvents`.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEvent {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cat: Option<String>,
    pub ph: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
    pub pid: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<u64>,
    pub args: BTreeMap<String, String>,
}

impl TraceEvent {
    /// `process_name` metadata event naming a device bucket.
    pub(crate) fn process_name(pid: usize, device: &str) -> Self {
        Self {
            name: "process_name".into(),
            cat: None,
            ph: "M",
            ts: None,
            pid,
            tid: None,
            args: BTreeMap::from([("name".to_string(), device.to_string())]),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TraceDocument {
    #[serde(rename = "traceEvents")]
    pub trace_events: Vec<TraceEvent>,
    #[serde(rename = "displayTimeUnit")]
    pub display_time_unit: &'static str,
    #[serde(rename = "otherData")]
    pub other_data: serde_json::Value,
}

impl TraceDocument {
    /// Serializes with four-space indentation.
    pub(crate) fn to_pretty_bytes(&self) -> Result<Vec<u8>, ProfilerError> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        out.push(b'\n');
        Ok(out)
    }
}

// ── otherData ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct BuildInfo {
    version: &'static str,
    commit: &'static str,
    date: &'static str,
}

#[derive(Debug, Serialize)]
struct HostMetadata {
    hostname: String,
    username: String,
    build: BuildInfo,
    start_at: String,
    end_at: String,
    is_client: bool,
    eager_mode: bool,
    eager_mode_async: bool,
    model_name: Option<String>,
    model_path: Option<String>,
    model_params: Option<String>,
    symbol_params: Option<String>,
    base_dir: Option<String>,
}

/// Builds the `otherData` block. Any failure is reported in place as
/// `{"error": msg}` so the trace is still written.
pub(crate) fn other_data(
    started: DateTime<Local>,
    model: &ModelIdentity,
    flags: RuntimeFlags,
) -> serde_json::Value {
    match gather(started, model, flags) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "trace metadata unavailable");
            serde_json::json!({ "error": e.to_string() })
        }
    }
}

fn gather(
    started: DateTime<Local>,
    model: &ModelIdentity,
    flags: RuntimeFlags,
) -> Result<serde_json::Value, ProfilerError> {
    let metadata = HostMetadata {
        hostname: hostname()?,
        username: username(),
        build: BuildInfo {
            version: env!("CARGO_PKG_VERSION"),
            commit: option_env!("PREDICT_BUILD_COMMIT").unwrap_or("unknown"),
            date: option_env!("PREDICT_BUILD_DATE").unwrap_or("unknown"),
        },
        start_at: format_time(&started),
        end_at: format_time(&Local::now()),
        is_client: flags.is_client,
        eager_mode: flags.initialize_eager,
        eager_mode_async: flags.initialize_eager_async,
        model_name: model.name.clone(),
        model_path: model.path.clone(),
        model_params: model.params.clone(),
        symbol_params: model.symbol.clone(),
        base_dir: model.base_dir.clone(),
    };
    serde_json::to_value(metadata).map_err(|e| ProfilerError::Metadata(e.to_string()))
}

/// `ctime`-style timestamp, e.g. `Mon Oct 19 14:03:12 2026`.
fn format_time(t: &DateTime<Local>) -> String {
    t.format("%a %b %e %H:%M:%S %Y").to_string()
}

fn hostname() -> Result<String, ProfilerError> {
    hostname_from(Path::new(HOSTNAME_PATH))
}

/// Reads the kernel hostname, falling back to `$HOSTNAME`.
fn hostname_from(path: &Path) -> Result<String, ProfilerError> {
    match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => Ok(content.trim().to_string()),
        read => std::env::var("HOSTNAME").map_err(|_| {
            let detail = match read {
                Ok(_) => "empty".to_string(),
                Err(e) => e.to_string(),
            };
            ProfilerError::Metadata(format!(
                "hostname unavailable ({}: {detail})",
                path.display()
            ))
        }),
    }
}

fn username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_name_event_shape() {
        let e = TraceEvent::process_name(3, "gpu/1");
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["name"], "process_name");
        assert_eq!(v["ph"], "M");
        assert_eq!(v["pid"], 3);
        assert_eq!(v["args"]["name"], "gpu/1");
        assert!(v.get("ts").is_none());
        assert!(v.get("tid").is_none());
    }

    #[test]
    fn test_four_space_indent() {
        let doc = TraceDocument {
            trace_events: vec![],
            display_time_unit: "ms",
            other_data: serde_json::json!({}),
        };
        let text = String::from_utf8(doc.to_pretty_bytes().unwrap()).unwrap();
        assert!(text.contains("\n    \"displayTimeUnit\": \"ms\""));
    }

    #[test]
    fn test_other_data_fields() {
        let model = ModelIdentity {
            name: Some("mlp".into()),
            base_dir: Some("/srv/models".into()),
            ..Default::default()
        };
        let flags = RuntimeFlags {
            is_client: true,
            ..Default::default()
        };
        let v = other_data(Local::now(), &model, flags);
        // Either full metadata or the in-band error, never a panic.
        if v.get("error").is_none() {
            assert_eq!(v["model_name"], "mlp");
            assert_eq!(v["is_client"], true);
            assert_eq!(v["base_dir"], "/srv/models");
            assert_eq!(v["eager_mode"], false);
            assert!(v["build"]["version"].is_string());
        }
    }

    #[test]
    fn test_hostname_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostname");
        std::fs::write(&path, "edge-node-7\n").unwrap();
        assert_eq!(hostname_from(&path).unwrap(), "edge-node-7");
    }
}
