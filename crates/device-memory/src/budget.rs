// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-device memory ceilings.

use crate::MemoryError;
use std::fmt;

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;
const GIB: usize = 1024 * MIB;

/// The most bytes a single device pool may have live at once.
///
/// Parsing accepts `K`/`KB`, `M`/`MB`, `G`/`GB` suffixes (powers of 1024),
/// plain byte counts, and the word `unlimited`.
///
/// ```
/// use device_memory::MemoryBudget;
///
/// assert_eq!(MemoryBudget::parse("2G").unwrap().as_mb(), 2048);
/// assert!(MemoryBudget::parse("unlimited").unwrap().is_unlimited());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemoryBudget {
    bytes: usize,
}

impl MemoryBudget {
    /// A budget that never rejects an allocation.
    pub const fn unlimited() -> Self {
        Self { bytes: usize::MAX }
    }

    pub fn from_bytes(bytes: usize) -> Self {
        Self { bytes }
    }

    pub fn from_mb(mb: usize) -> Self {
        Self {
            bytes: mb.saturating_mul(MIB),
        }
    }

    pub fn from_gb(gb: usize) -> Self {
        Self {
            bytes: gb.saturating_mul(GIB),
        }
    }

    pub fn as_bytes(&self) -> usize {
        self.bytes
    }

    /// Megabytes, truncated.
    pub fn as_mb(&self) -> usize {
        self.bytes / MIB
    }

    pub fn is_unlimited(&self) -> bool {
        self.bytes == usize::MAX
    }

    /// Parses a budget string such as `"512M"`, `"1GB"`, `"4096"` or
    /// `"unlimited"`. Case-insensitive, surrounding whitespace ignored.
    pub fn parse(input: &str) -> Result<Self, MemoryError> {
        let invalid = |reason: &str| MemoryError::InvalidBudget {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty string"));
        }
        let upper = trimmed.to_ascii_uppercase();
        if upper == "UNLIMITED" || upper == "NONE" {
            return Ok(Self::unlimited());
        }

        let (digits, multiplier) = [
            ("GB", GIB),
            ("G", GIB),
            ("MB", MIB),
            ("M", MIB),
            ("KB", KIB),
            ("K", KIB),
            ("B", 1),
        ]
        .iter()
        .find_map(|(suffix, mult)| upper.strip_suffix(suffix).map(|rest| (rest, *mult)))
        .unwrap_or((upper.as_str(), 1));

        let value: usize = digits
            .trim()
            .parse()
            .map_err(|_| invalid("expected a number with an optional K/M/G suffix"))?;
        let bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| invalid("value overflows usize"))?;
        if bytes == 0 {
            return Err(invalid("budget must be non-zero"));
        }
        Ok(Self { bytes })
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl fmt::Display for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = self.bytes;
        if self.is_unlimited() {
            f.write_str("unlimited")
        } else if b >= GIB && b % GIB == 0 {
            write!(f, "{} GB", b / GIB)
        } else if b >= MIB && b % MIB == 0 {
            write!(f, "{} MB", b / MIB)
        } else if b >= KIB && b % KIB == 0 {
            write!(f, "{} KB", b / KIB)
        } else {
            write!(f, "{b} B")
        }
    }
}
