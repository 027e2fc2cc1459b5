// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Parameter sources: inline blobs and shared, reference-counted stores.
//!
//! A session gets its learned parameters either from an in-memory blob in
//! the named-array bundle format, or from an external [`ParameterSource`]
//! that hands out device arrays shared between sessions.
//!
//! ```text
//!  Params::Bytes(blob) ──decode──► host tensors ──copy──► session-owned arrays
//!
//!  Params::External { source, model_id }
//!        │ load(model_id) ─► (token, names, arrays)   arrays shared, not copied
//!        │ ...
//!        └ unload(token)  ◄─ Lease::release() on free or failed create
//! ```
//!
//! Parameter names carry an `arg:` or `aux:` prefix that routes them to the
//! argument or auxiliary group.

use crate::PredictError;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tensor_core::{serialize, Context, DType, NDArray, Shape, Tensor};

/// Where a session's parameters come from.
#[derive(Clone)]
pub enum Params<'a> {
    /// A named-array bundle held by the caller.
    Bytes(&'a [u8]),
    /// Arrays owned by an external source and shared across sessions.
    External {
        source: Arc<dyn ParameterSource>,
        model_id: String,
    },
}

impl<'a> Params<'a> {
    pub fn external(source: Arc<dyn ParameterSource>, model_id: impl Into<String>) -> Self {
        Params::External {
            source,
            model_id: model_id.into(),
        }
    }
}

impl fmt::Debug for Params<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Params::Bytes(bytes) => write!(f, "Params::Bytes({} bytes)", bytes.len()),
            Params::External { model_id, .. } => write!(f, "Params::External({model_id})"),
        }
    }
}

/// What a [`ParameterSource`] returns for one `load` call.
#[derive(Debug, Clone)]
pub struct LoadedParams {
    /// Passed back to [`ParameterSource::unload`].
    pub token: u64,
    pub names: Vec<String>,
    pub arrays: Vec<NDArray>,
}

/// A backend that owns parameter arrays and lends them to sessions.
///
/// Every successful `load` must be matched by exactly one `unload` of the
/// returned token.
pub trait ParameterSource: Send + Sync {
    fn load(&self, model_id: &str) -> Result<LoadedParams, PredictError>;
    fn unload(&self, token: u64) -> Result<(), PredictError>;
}

// ── Lease ──────────────────────────────────────────────────────────

/// One outstanding `load` on a source. Released exactly once: through
/// [`Lease::release`], or on drop as a fallback.
pub struct Lease {
    source: Arc<dyn ParameterSource>,
    token: u64,
    released: bool,
}

impl Lease {
    pub(crate) fn new(source: Arc<dyn ParameterSource>, token: u64) -> Self {
        Self {
            source,
            token,
            released: false,
        }
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Unloads the token, reporting the source's error.
    pub fn release(mut self) -> Result<(), PredictError> {
        self.released = true;
        self.source.unload(self.token)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.source.unload(self.token) {
                tracing::warn!(token = self.token, error = %e, "parameter unload failed on drop");
            }
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("token", &self.token).finish()
    }
}

// ── Splitting by prefix ────────────────────────────────────────────

/// A parameter before materialization.
#[derive(Debug, Clone)]
pub(crate) enum ParamValue {
    /// Decoded host tensor, copied onto the device.
    Host(Tensor),
    /// Device array referenced as-is.
    Shared(NDArray),
}

/// Parameters routed to the graph's argument and auxiliary inputs.
#[derive(Debug, Default)]
pub(crate) struct ParamGroups {
    pub args: HashMap<String, ParamValue>,
    pub aux: HashMap<String, ParamValue>,
}

impl ParamGroups {
    /// Routes `arg:`/`aux:` names, keeping only names listed in
    /// `arg_names` / `aux_names`.
    pub fn split(
        names: Vec<String>,
        values: Vec<ParamValue>,
        arg_names: &[String],
        aux_names: &[String],
    ) -> Result<Self, PredictError> {
        if names.len() != values.len() {
            return Err(PredictError::InvalidParams(format!(
                "{} names for {} arrays",
                names.len(),
                values.len()
            )));
        }
        let mut groups = Self::default();
        let mut dropped = 0usize;
        for (name, value) in names.into_iter().zip(values) {
            if let Some(key) = name.strip_prefix("arg:") {
                if arg_names.iter().any(|n| n == key) {
                    groups.args.insert(key.to_string(), value);
                    continue;
                }
            } else if let Some(key) = name.strip_prefix("aux:") {
                if aux_names.iter().any(|n| n == key) {
                    groups.aux.insert(key.to_string(), value);
                    continue;
                }
            }
            tracing::debug!(param = %name, "parameter not used by graph");
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped, "ignored parameters the graph does not declare");
        }
        Ok(groups)
    }

    /// Decodes an inline bundle.
    pub fn from_bytes(
        bytes: &[u8],
        arg_names: &[String],
        aux_names: &[String],
    ) -> Result<Self, PredictError> {
        let list = serialize::decode_list(bytes)?;
        if list.names.len() != list.arrays.len() {
            return Err(PredictError::InvalidParams(format!(
                "parameter blob has {} arrays but {} names",
                list.arrays.len(),
                list.names.len()
            )));
        }
        let values = list.arrays.into_iter().map(ParamValue::Host).collect();
        Self::split(list.names, values, arg_names, aux_names)
    }

    pub fn from_loaded(
        loaded: LoadedParams,
        arg_names: &[String],
        aux_names: &[String],
    ) -> Result<Self, PredictError> {
        let values = loaded.arrays.into_iter().map(ParamValue::Shared).collect();
        Self::split(loaded.names, values, arg_names, aux_names)
    }
}

// ── Shared store ───────────────────────────────────────────────────

/// In-process [`ParameterSource`] backed by a model directory.
///
/// `load("resnet")` reads `{dir}/resnet.params` (named-array bundle,
/// memory-mapped) or `{dir}/resnet.safetensors`, materializes every array
/// on the store's device once, and shares the arrays with every session
/// loading the same model. Models loaded from disk are evicted when their
/// last lease is released; models added with
/// [`register_bytes`](Self::register_bytes) stay resident.
pub struct SharedParameterStore {
    dir: PathBuf,
    ctx: Context,
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    models: HashMap<String, CachedModel>,
    /// Outstanding token → model id.
    leases: HashMap<u64, String>,
    next_token: u64,
}

struct CachedModel {
    names: Vec<String>,
    arrays: Vec<NDArray>,
    refs: usize,
    resident: bool,
}

impl SharedParameterStore {
    pub fn new(dir: impl AsRef<Path>, ctx: Context) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            ctx,
            inner: Mutex::new(StoreInner {
                next_token: 1,
                ..Default::default()
            }),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn context(&self) -> Context {
        self.ctx
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Adds a model from an in-memory bundle. It is never evicted.
    pub fn register_bytes(&self, model_id: &str, bytes: &[u8]) -> Result<(), PredictError> {
        let list = serialize::decode_list(bytes)?;
        let (names, arrays) = self.materialize(model_id, list.names, list.arrays)?;
        let mut inner = self.lock();
        if inner.models.contains_key(model_id) {
            return Err(PredictError::ParameterSource(format!(
                "model '{model_id}' is already registered"
            )));
        }
        inner.models.insert(
            model_id.to_string(),
            CachedModel {
                names,
                arrays,
                refs: 0,
                resident: true,
            },
        );
        Ok(())
    }

    /// Outstanding leases on `model_id`.
    pub fn ref_count(&self, model_id: &str) -> usize {
        self.lock().models.get(model_id).map_or(0, |m| m.refs)
    }

    pub fn is_cached(&self, model_id: &str) -> bool {
        self.lock().models.contains_key(model_id)
    }

    /// Bytes held by cached arrays.
    pub fn cached_bytes(&self) -> usize {
        self.lock()
            .models
            .values()
            .flat_map(|m| m.arrays.iter())
            .map(|a| a.size() * std::mem::size_of::<f32>())
            .sum()
    }

    fn read_model(&self, model_id: &str) -> Result<(Vec<String>, Vec<Tensor>), PredictError> {
        let params_path = self.dir.join(format!("{model_id}.params"));
        if params_path.exists() {
            let file = std::fs::File::open(&params_path)?;
            // SAFETY: the mapping is read-only and dropped before returning.
            let mmap = unsafe { memmap2::Mmap::map(&file) }?;
            let list = serialize::decode_list(&mmap)?;
            tracing::info!(
                model = model_id,
                path = %params_path.display(),
                arrays = list.len(),
                "loaded parameter bundle"
            );
            return Ok((list.names, list.arrays));
        }

        let st_path = self.dir.join(format!("{model_id}.safetensors"));
        if st_path.exists() {
            let file = std::fs::File::open(&st_path)?;
            // SAFETY: as above.
            let mmap = unsafe { memmap2::Mmap::map(&file) }?;
            let st = safetensors::SafeTensors::deserialize(&mmap).map_err(|e| {
                PredictError::ParameterSource(format!(
                    "SafeTensors parse error in '{}': {e}",
                    st_path.display()
                ))
            })?;
            let mut entries = st.tensors();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut names = Vec::with_capacity(entries.len());
            let mut tensors = Vec::with_capacity(entries.len());
            for (name, view) in entries {
                let dtype = safetensors_dtype(view.dtype()).ok_or_else(|| {
                    PredictError::ParameterSource(format!(
                        "tensor '{name}' has unsupported dtype {:?}",
                        view.dtype()
                    ))
                })?;
                let dims = if view.shape().is_empty() {
                    vec![1]
                } else {
                    view.shape().to_vec()
                };
                tensors.push(Tensor::from_bytes(Shape::new(dims), dtype, view.data().to_vec())?);
                names.push(name);
            }
            tracing::info!(
                model = model_id,
                path = %st_path.display(),
                arrays = tensors.len(),
                "loaded safetensors"
            );
            return Ok((names, tensors));
        }

        Err(PredictError::ParameterSource(format!(
            "no '{model_id}.params' or '{model_id}.safetensors' in '{}'",
            self.dir.display()
        )))
    }

    /// Copies host tensors onto the store's device. Empty arrays are
    /// skipped; sessions zero-fill anything missing.
    fn materialize(
        &self,
        model_id: &str,
        names: Vec<String>,
        tensors: Vec<Tensor>,
    ) -> Result<(Vec<String>, Vec<NDArray>), PredictError> {
        if names.len() != tensors.len() {
            return Err(PredictError::InvalidParams(format!(
                "model '{model_id}' has {} arrays but {} names",
                tensors.len(),
                names.len()
            )));
        }
        let mut kept_names = Vec::with_capacity(names.len());
        let mut arrays = Vec::with_capacity(tensors.len());
        for (name, tensor) in names.into_iter().zip(tensors) {
            if tensor.is_empty() {
                tracing::debug!(model = model_id, param = %name, "skipping empty array");
                continue;
            }
            arrays.push(tensor.to_device(self.ctx)?);
            kept_names.push(name);
        }
        Ok((kept_names, arrays))
    }
}

impl ParameterSource for SharedParameterStore {
    fn load(&self, model_id: &str) -> Result<LoadedParams, PredictError> {
        if !self.is_cached(model_id) {
            // Read outside the lock; a concurrent loader may win the race,
            // in which case its copy is kept.
            let (names, tensors) = self.read_model(model_id)?;
            let (names, arrays) = self.materialize(model_id, names, tensors)?;
            self.lock()
                .models
                .entry(model_id.to_string())
                .or_insert(CachedModel {
                    names,
                    arrays,
                    refs: 0,
                    resident: false,
                });
        }

        let mut inner = self.lock();
        let token = inner.next_token;
        let model = inner.models.get_mut(model_id).ok_or_else(|| {
            PredictError::ParameterSource(format!("model '{model_id}' was evicted while loading"))
        })?;
        model.refs += 1;
        let loaded = LoadedParams {
            token,
            names: model.names.clone(),
            arrays: model.arrays.clone(),
        };
        let refs = model.refs;
        inner.next_token += 1;
        inner.leases.insert(token, model_id.to_string());
        tracing::debug!(model = model_id, token, refs, "parameters leased");
        Ok(loaded)
    }

    fn unload(&self, token: u64) -> Result<(), PredictError> {
        let mut inner = self.lock();
        let model_id = inner.leases.remove(&token).ok_or_else(|| {
            PredictError::ParameterSource(format!("unknown parameter token {token}"))
        })?;
        let evict = match inner.models.get_mut(&model_id) {
            Some(model) => {
                model.refs = model.refs.saturating_sub(1);
                model.refs == 0 && !model.resident
            }
            None => false,
        };
        if evict {
            inner.models.remove(&model_id);
            tracing::debug!(model = %model_id, "parameters evicted");
        }
        Ok(())
    }
}

impl fmt::Debug for SharedParameterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("SharedParameterStore")
            .field("dir", &self.dir)
            .field("ctx", &self.ctx)
            .field("models", &inner.models.len())
            .field("leases", &inner.leases.len())
            .finish()
    }
}

fn safetensors_dtype(dtype: safetensors::Dtype) -> Option<DType> {
    use safetensors::Dtype as St;
    Some(match dtype {
        St::F32 => DType::F32,
        St::F64 => DType::F64,
        St::F16 => DType::F16,
        St::U8 => DType::U8,
        St::I8 => DType::I8,
        St::I32 => DType::I32,
        St::I64 => DType::I64,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> Vec<u8> {
        let w = Shape::from([2, 2]);
        let m = Shape::from([2]);
        serialize::encode_named_f32([
            ("arg:w", &w, &[1.0f32, 2.0, 3.0, 4.0][..]),
            ("aux:mean", &m, &[0.5f32, 0.5][..]),
            ("arg:unused", &m, &[9.0f32, 9.0][..]),
        ])
        .unwrap()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_routes_by_prefix() {
        let groups =
            ParamGroups::from_bytes(&bundle(), &names(&["x", "w"]), &names(&["mean"])).unwrap();
        assert_eq!(groups.args.len(), 1);
        assert!(groups.args.contains_key("w"));
        assert!(groups.aux.contains_key("mean"));
    }

    #[test]
    fn test_unnamed_blob_rejected() {
        let t = Tensor::from_f32(Shape::from([1]), &[1.0]).unwrap();
        let bytes = serialize::encode_list(&[t], &[]).unwrap();
        assert!(matches!(
            ParamGroups::from_bytes(&bytes, &[], &[]),
            Err(PredictError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_store_refcount_and_eviction() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mlp.params"), bundle()).unwrap();
        let store = SharedParameterStore::new(dir.path(), Context::cpu(0));

        let a = store.load("mlp").unwrap();
        let b = store.load("mlp").unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(store.ref_count("mlp"), 2);
        assert!(a.arrays[0].ptr_eq(&b.arrays[0]));

        store.unload(a.token).unwrap();
        assert!(store.is_cached("mlp"));
        store.unload(b.token).unwrap();
        assert!(!store.is_cached("mlp"));
        assert!(store.unload(b.token).is_err());
    }

    #[test]
    fn test_store_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedParameterStore::new(dir.path(), Context::cpu(0));
        assert!(matches!(
            store.load("nope"),
            Err(PredictError::ParameterSource(_))
        ));
    }

    #[test]
    fn test_registered_models_stay_resident() {
        let dir = tempfile::tempdir().unwrap();
        let store = SharedParameterStore::new(dir.path(), Context::cpu(0));
        store.register_bytes("inline", &bundle()).unwrap();
        let lease = store.load("inline").unwrap();
        store.unload(lease.token).unwrap();
        assert!(store.is_cached("inline"));
        assert!(store.register_bytes("inline", &bundle()).is_err());
    }

    #[test]
    fn test_safetensors_model() {
        let dir = tempfile::tempdir().unwrap();
        let data: Vec<u8> = [1.0f32, 2.0, 3.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let view =
            safetensors::tensor::TensorView::new(safetensors::Dtype::F32, vec![3], &data).unwrap();
        let bytes = safetensors::serialize([("arg:bias", view)], &None).unwrap();
        std::fs::write(dir.path().join("st.safetensors"), bytes).unwrap();

        let store = SharedParameterStore::new(dir.path(), Context::cpu(0));
        let loaded = store.load("st").unwrap();
        assert_eq!(loaded.names, vec!["arg:bias".to_string()]);
        assert_eq!(loaded.arrays[0].to_vec().unwrap(), vec![1.0, 2.0, 3.0]);
        store.unload(loaded.token).unwrap();
    }

    #[test]
    fn test_lease_drop_unloads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.params"), bundle()).unwrap();
        let store = Arc::new(SharedParameterStore::new(dir.path(), Context::cpu(0)));
        let loaded = store.load("m").unwrap();
        let lease = Lease::new(Arc::clone(&store) as Arc<dyn ParameterSource>, loaded.token);
        assert_eq!(store.ref_count("m"), 1);
        drop(lease);
        assert!(!store.is_cached("m"));
    }
}
