// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Named-array bundle format.
//!
//! Parameter blobs and NDList payloads share one little-endian layout:
//!
//! ```text
//! u64 0x112 | u64 reserved | u64 count | count × ARRAY
//! u64 name_count | name_count × (u64 len | len bytes)
//!
//! ARRAY v2      u32 0xF993FAC9 | i32 storage | u32 ndim | ndim × i64 | TAIL
//! ARRAY v1      u32 0xF993FAC8 |               u32 ndim | ndim × i64 | TAIL
//! ARRAY legacy  u32 ndim (no magic)                     | ndim × u32 | TAIL
//! TAIL          (only when ndim > 0) i32 dev_type | i32 dev_id | i32 type_flag | data
//! ```
//!
//! `name_count` is either zero or equal to `count`. A zero-rank array is
//! an empty array and carries no tail. Only dense storage is accepted.

use crate::{DType, DeviceKind, Shape, Tensor, TensorError};

/// Magic number of a serialized array list.
pub const LIST_MAGIC: u64 = 0x112;
/// Magic number of a v2 array (with storage type).
pub const ARRAY_V2_MAGIC: u32 = 0xF993_FAC9;
/// Magic number of a v1 array.
pub const ARRAY_V1_MAGIC: u32 = 0xF993_FAC8;

const DENSE_STORAGE: i32 = 0;

/// Arrays plus their names, in file order. `names` is empty when the file
/// carries no names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArrayList {
    pub arrays: Vec<Tensor>,
    pub names: Vec<String>,
}

impl ArrayList {
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// `(name, tensor)` pairs. Unnamed lists yield empty names.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.arrays.iter().enumerate().map(|(i, t)| {
            let name = self.names.get(i).map(String::as_str).unwrap_or("");
            (name, t)
        })
    }
}

/// Decodes a whole bundle.
pub fn decode_list(bytes: &[u8]) -> Result<ArrayList, TensorError> {
    let mut r = Reader::new(bytes);
    let magic = r.u64()?;
    if magic != LIST_MAGIC {
        return Err(TensorError::Format(format!(
            "bad list magic {magic:#x}, expected {LIST_MAGIC:#x}"
        )));
    }
    let _reserved = r.u64()?;

    let count = r.len_prefix()?;
    let mut arrays = Vec::with_capacity(count);
    for _ in 0..count {
        arrays.push(read_array(&mut r)?);
    }

    let name_count = r.len_prefix()?;
    if name_count != 0 && name_count != count {
        return Err(TensorError::Format(format!(
            "{name_count} names for {count} arrays"
        )));
    }
    let mut names = Vec::with_capacity(name_count);
    for _ in 0..name_count {
        let len = r.len_prefix()?;
        let raw = r.take(len)?;
        let name = std::str::from_utf8(raw)
            .map_err(|e| TensorError::Format(format!("array name is not UTF-8: {e}")))?;
        names.push(name.to_string());
    }

    if r.remaining() != 0 {
        tracing::debug!(trailing = r.remaining(), "ignoring trailing bytes after array list");
    }
    Ok(ArrayList { arrays, names })
}

/// Encodes tensors in the v2 layout. `names` may be empty or one per array.
pub fn encode_list(arrays: &[Tensor], names: &[String]) -> Result<Vec<u8>, TensorError> {
    if !names.is_empty() && names.len() != arrays.len() {
        return Err(TensorError::Format(format!(
            "{} names for {} arrays",
            names.len(),
            arrays.len()
        )));
    }
    let mut out = Vec::new();
    out.extend_from_slice(&LIST_MAGIC.to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&(arrays.len() as u64).to_le_bytes());
    for t in arrays {
        write_array(&mut out, t);
    }
    out.extend_from_slice(&(names.len() as u64).to_le_bytes());
    for name in names {
        out.extend_from_slice(&(name.len() as u64).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
    }
    Ok(out)
}

/// Convenience for the common case of named `f32` arrays.
pub fn encode_named_f32<'a, I>(entries: I) -> Result<Vec<u8>, TensorError>
where
    I: IntoIterator<Item = (&'a str, &'a Shape, &'a [f32])>,
{
    let mut arrays = Vec::new();
    let mut names = Vec::new();
    for (name, shape, values) in entries {
        arrays.push(Tensor::from_f32(shape.clone(), values)?);
        names.push(name.to_string());
    }
    encode_list(&arrays, &names)
}

fn write_array(out: &mut Vec<u8>, t: &Tensor) {
    out.extend_from_slice(&ARRAY_V2_MAGIC.to_le_bytes());
    out.extend_from_slice(&DENSE_STORAGE.to_le_bytes());
    if t.is_empty() {
        out.extend_from_slice(&0u32.to_le_bytes());
        return;
    }
    out.extend_from_slice(&(t.shape().rank() as u32).to_le_bytes());
    for &d in t.shape().dims() {
        out.extend_from_slice(&(d as i64).to_le_bytes());
    }
    out.extend_from_slice(&DeviceKind::Cpu.code().to_le_bytes());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(&t.dtype().type_flag().to_le_bytes());
    out.extend_from_slice(t.as_bytes());
}

fn read_array(r: &mut Reader<'_>) -> Result<Tensor, TensorError> {
    let head = r.u32()?;
    let shape = match head {
        ARRAY_V2_MAGIC => {
            let storage = r.i32()?;
            if storage != DENSE_STORAGE {
                return Err(TensorError::Format(format!(
                    "storage type {storage} is not supported, only dense arrays"
                )));
            }
            read_i64_shape(r)?
        }
        ARRAY_V1_MAGIC => read_i64_shape(r)?,
        ndim => {
            let mut dims = Vec::with_capacity(ndim.min(8) as usize);
            for _ in 0..ndim {
                dims.push(r.u32()? as usize);
            }
            Shape::new(dims)
        }
    };

    if shape.rank() == 0 {
        return Ok(Tensor::empty());
    }

    // The saving context is informational; arrays always load to the host.
    let _dev_type = r.i32()?;
    let _dev_id = r.i32()?;
    let dtype = DType::from_type_flag(r.i32()?)?;

    let nbytes = shape
        .num_elements()
        .checked_mul(dtype.size_bytes())
        .ok_or_else(|| TensorError::Format(format!("array {shape} is too large")))?;
    let data = r.take(nbytes)?.to_vec();
    Tensor::from_bytes(shape, dtype, data)
}

fn read_i64_shape(r: &mut Reader<'_>) -> Result<Shape, TensorError> {
    let ndim = r.u32()?;
    let mut dims = Vec::with_capacity(ndim.min(8) as usize);
    for _ in 0..ndim {
        let d = r.i64()?;
        let d = usize::try_from(d)
            .map_err(|_| TensorError::Format(format!("negative dimension {d}")))?;
        dims.push(d);
    }
    Ok(Shape::new(dims))
}

/// Bounds-checked little-endian cursor.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TensorError> {
        if n > self.remaining() {
            return Err(TensorError::Format(format!(
                "unexpected end of data at offset {}: wanted {n} bytes, {} left",
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TensorError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u32(&mut self) -> Result<u32, TensorError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i32(&mut self) -> Result<i32, TensorError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64, TensorError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, TensorError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    /// A u64 count that must fit in the remaining input.
    fn len_prefix(&mut self) -> Result<usize, TensorError> {
        let n = self.u64()?;
        usize::try_from(n)
            .ok()
            .filter(|&n| n <= self.remaining())
            .ok_or_else(|| TensorError::Format(format!("implausible length {n}")))
    }
}
