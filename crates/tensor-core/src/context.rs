// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device kinds and contexts.

use crate::TensorError;
use std::fmt;

/// Kind of memory domain an array lives in.
///
/// The discriminants are the device type codes used by the public API and
/// stored in serialized arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Cpu = 1,
    Gpu = 2,
    CpuPinned = 3,
}

impl DeviceKind {
    pub fn from_code(code: i32) -> Result<Self, TensorError> {
        match code {
            1 => Ok(DeviceKind::Cpu),
            2 => Ok(DeviceKind::Gpu),
            3 => Ok(DeviceKind::CpuPinned),
            other => Err(TensorError::UnknownDevice(other)),
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// A device kind plus device index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Context {
    pub kind: DeviceKind,
    pub id: usize,
}

impl Context {
    pub fn new(kind: DeviceKind, id: usize) -> Self {
        Self { kind, id }
    }

    pub fn cpu(id: usize) -> Self {
        Self::new(DeviceKind::Cpu, id)
    }

    pub fn gpu(id: usize) -> Self {
        Self::new(DeviceKind::Gpu, id)
    }

    /// Pinned host memory has a single domain; its id is always 0.
    pub fn pinned() -> Self {
        Self::new(DeviceKind::CpuPinned, 0)
    }

    /// Builds a context from API codes.
    pub fn from_codes(kind: i32, id: i32) -> Result<Self, TensorError> {
        let kind = DeviceKind::from_code(kind)?;
        let id = usize::try_from(id)
            .map_err(|_| TensorError::Format(format!("negative device id {id}")))?;
        Ok(Self::new(kind, id))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::cpu(0)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DeviceKind::Cpu => write!(f, "cpu/{}", self.id),
            DeviceKind::Gpu => write!(f, "gpu/{}", self.id),
            DeviceKind::CpuPinned => f.write_str("cpu pinned/"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(DeviceKind::from_code(1).unwrap(), DeviceKind::Cpu);
        assert_eq!(DeviceKind::from_code(2).unwrap(), DeviceKind::Gpu);
        assert_eq!(DeviceKind::from_code(3).unwrap(), DeviceKind::CpuPinned);
        assert!(matches!(
            DeviceKind::from_code(9),
            Err(TensorError::UnknownDevice(9))
        ));
        assert_eq!(DeviceKind::Gpu.code(), 2);
    }

    #[test]
    fn test_from_codes_rejects_negative_id() {
        assert!(Context::from_codes(1, -1).is_err());
        assert_eq!(Context::from_codes(2, 3).unwrap(), Context::gpu(3));
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Context::cpu(0).to_string(), "cpu/0");
        assert_eq!(Context::gpu(7).to_string(), "gpu/7");
        assert_eq!(Context::pinned().to_string(), "cpu pinned/");
    }
}
