// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Decoded named-array bundles, flattened into one `f32` buffer.
//!
//! ```text
//!  keys    [ "mean",   "std",   "" ]
//!  indptr  [ 0,        3,       6,  7 ]
//!  data    [ m m m  |  s s s  | e ]
//! ```

use crate::PredictError;
use tensor_core::{serialize, Shape};

/// Immutable list of `(key, shape, values)` entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NDList {
    keys: Vec<String>,
    shapes: Vec<Shape>,
    /// `indptr[i]..indptr[i + 1]` delimits entry `i` in `data`.
    indptr: Vec<usize>,
    data: Vec<f32>,
}

/// Borrowed view of one entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NDListEntry<'a> {
    pub key: &'a str,
    pub shape: &'a Shape,
    pub data: &'a [f32],
}

impl NDList {
    /// Decodes a whole bundle. Values of every dtype are converted to
    /// `f32`; bundles without names get empty keys.
    pub fn decode(bytes: &[u8]) -> Result<Self, PredictError> {
        let list = serialize::decode_list(bytes)?;
        let mut out = NDList {
            keys: Vec::with_capacity(list.len()),
            shapes: Vec::with_capacity(list.len()),
            indptr: Vec::with_capacity(list.len() + 1),
            data: Vec::new(),
        };
        out.indptr.push(0);
        for (key, tensor) in list.iter() {
            out.data.extend(tensor.to_f32_vec()?);
            out.keys.push(key.to_string());
            out.shapes.push(tensor.shape().clone());
            out.indptr.push(out.data.len());
        }
        tracing::debug!(entries = out.len(), values = out.data.len(), "ndlist decoded");
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<NDListEntry<'_>, PredictError> {
        if index >= self.len() {
            return Err(PredictError::IndexOutOfRange {
                index,
                len: self.len(),
            });
        }
        Ok(self.entry(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = NDListEntry<'_>> + '_ {
        (0..self.len()).map(|i| self.entry(i))
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn entry(&self, i: usize) -> NDListEntry<'_> {
        NDListEntry {
            key: &self.keys[i],
            shape: &self.shapes[i],
            data: &self.data[self.indptr[i]..self.indptr[i + 1]],
        }
    }
}
