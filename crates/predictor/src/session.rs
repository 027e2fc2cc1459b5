// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Predictor sessions.
//!
//! # Lifecycle
//! ```text
//!  create ──► load_symbol ──► load_params ──► shape_inference ──► bind
//!                                                                   │
//!        ┌──────────────────────────────────────────────────────────┘
//!        ▼
//!  set_input ──► forward / partial_forward ──► output ──► free
//!        │
//!        └─ reshape(new shapes) ──► new Session (old one invalidated)
//! ```
//!
//! Every create phase and every forward pass is recorded as a profiler
//! span on the session's device.
//!
//! # Failure
//!
//! Creation either returns a bound session or an error with nothing left
//! behind: device buffers drop back into their pool and an external lease
//! is unloaded. A failed reshape leaves the original session untouched.

use crate::executor::{ExecutionBackend, Executor, HostBackend};
use crate::params::{Lease, ParamGroups, ParamValue, Params};
use crate::PredictError;
use graph_ir::{graph::Validated, Graph};
use profiler::Profiler;
use std::collections::HashMap;
use std::sync::Arc;
use tensor_core::{Context, NDArray, Shape};

/// A graph bound to device memory, ready to run.
///
/// Not internally synchronized: mutating calls take `&mut self`. Distinct
/// sessions may run on different threads at once.
pub struct Session {
    graph: Graph<Validated>,
    ctx: Context,
    arg_names: Vec<String>,
    arg_arrays: Vec<NDArray>,
    aux_names: Vec<String>,
    aux_arrays: Vec<NDArray>,
    output_names: Vec<String>,
    output_arrays: Vec<NDArray>,
    output_shapes: Vec<Shape>,
    key_to_arg: HashMap<String, usize>,
    /// `None` once the session has been invalidated by a reshape.
    executor: Option<Box<dyn Executor>>,
    backend: Arc<dyn ExecutionBackend>,
    lease: Option<Lease>,
    profiler: Arc<Profiler>,
}

/// Options for [`Session`] creation.
pub struct SessionBuilder<'a> {
    symbol_json: &'a str,
    params: Params<'a>,
    ctx: Context,
    input_shapes: Vec<(String, Shape)>,
    output_keys: Option<Vec<String>>,
    backend: Option<Arc<dyn ExecutionBackend>>,
    profiler: Option<Arc<Profiler>>,
}

impl<'a> SessionBuilder<'a> {
    /// Device to bind on. Defaults to `cpu/0`.
    pub fn context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn input_shape(mut self, name: impl Into<String>, shape: impl Into<Shape>) -> Self {
        self.input_shapes.push((name.into(), shape.into()));
        self
    }

    pub fn input_shapes<I, K>(mut self, shapes: I) -> Self
    where
        I: IntoIterator<Item = (K, Shape)>,
        K: Into<String>,
    {
        self.input_shapes
            .extend(shapes.into_iter().map(|(k, s)| (k.into(), s)));
        self
    }

    /// Restricts the outputs to the named internal entries. `"fc1"`
    /// selects `fc1_output`.
    pub fn output_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.output_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Defaults to a [`HostBackend`] recording into the session profiler.
    pub fn backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Defaults to [`Profiler::global`].
    pub fn profiler(mut self, profiler: Arc<Profiler>) -> Self {
        self.profiler = Some(profiler);
        self
    }

    pub fn build(self) -> Result<Session, PredictError> {
        let profiler = self.profiler.unwrap_or_else(Profiler::global);
        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(HostBackend::new(Arc::clone(&profiler))));
        let ctx = self.ctx;

        let graph = {
            let _span = profiler.scoped(ctx, "load_symbol", "create");
            let graph = Graph::from_json(self.symbol_json)?.validate()?;
            match &self.output_keys {
                Some(keys) => graph.select_outputs(keys)?,
                None => graph,
            }
        };
        let arg_names = graph.list_arguments();
        let aux_names = graph.list_auxiliary_states();

        // From here on an early return drops the lease, which unloads it.
        let (mut groups, lease) = {
            let _span = profiler.scoped(ctx, "load_params", "create");
            match self.params {
                Params::Bytes(bytes) => (ParamGroups::from_bytes(bytes, &arg_names, &aux_names)?, None),
                Params::External { source, model_id } => {
                    let loaded = source.load(&model_id)?;
                    let lease = Lease::new(source, loaded.token);
                    (ParamGroups::from_loaded(loaded, &arg_names, &aux_names)?, Some(lease))
                }
            }
        };

        let (arg_shapes, aux_shapes) = {
            let _span = profiler.scoped(ctx, "shape_inference", "create");
            for (name, _) in &self.input_shapes {
                if !arg_names.contains(name) {
                    tracing::warn!(input = %name, "input shape given for unknown argument");
                }
            }
            let known: HashMap<String, Shape> = self.input_shapes.into_iter().collect();
            infer_complete(&graph, &known)?
        };

        let arg_arrays = materialize("arg", &arg_names, &arg_shapes, &mut groups.args, ctx)?;
        let aux_arrays = materialize("aux", &aux_names, &aux_shapes, &mut groups.aux, ctx)?;

        let executor = {
            let _span = profiler.scoped(ctx, "bind", "create");
            backend.bind(&graph, ctx, &arg_arrays, &aux_arrays, None)?
        };

        let session = Session::assemble(
            graph, ctx, arg_names, arg_arrays, aux_names, aux_arrays, executor, backend, lease,
            profiler,
        );
        tracing::info!(
            device = %ctx,
            args = session.arg_arrays.len(),
            aux = session.aux_arrays.len(),
            outputs = session.output_arrays.len(),
            shared_params = session.lease.is_some(),
            "session created"
        );
        Ok(session)
    }
}

impl Session {
    pub fn builder<'a>(symbol_json: &'a str, params: Params<'a>) -> SessionBuilder<'a> {
        SessionBuilder {
            symbol_json,
            params,
            ctx: Context::default(),
            input_shapes: Vec::new(),
            output_keys: None,
            backend: None,
            profiler: None,
        }
    }

    /// Creates a session over every graph output.
    pub fn create(
        symbol_json: &str,
        params: Params<'_>,
        ctx: Context,
        input_shapes: &[(&str, Shape)],
    ) -> Result<Session, PredictError> {
        Self::builder(symbol_json, params)
            .context(ctx)
            .input_shapes(input_shapes.iter().map(|(k, s)| (*k, s.clone())))
            .build()
    }

    /// Creates a session whose outputs are the named internal entries.
    pub fn create_partial(
        symbol_json: &str,
        params: Params<'_>,
        ctx: Context,
        input_shapes: &[(&str, Shape)],
        output_keys: &[&str],
    ) -> Result<Session, PredictError> {
        Self::builder(symbol_json, params)
            .context(ctx)
            .input_shapes(input_shapes.iter().map(|(k, s)| (*k, s.clone())))
            .output_keys(output_keys.iter().copied())
            .build()
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        graph: Graph<Validated>,
        ctx: Context,
        arg_names: Vec<String>,
        arg_arrays: Vec<NDArray>,
        aux_names: Vec<String>,
        aux_arrays: Vec<NDArray>,
        executor: Box<dyn Executor>,
        backend: Arc<dyn ExecutionBackend>,
        lease: Option<Lease>,
        profiler: Arc<Profiler>,
    ) -> Session {
        let output_arrays = executor.outputs().to_vec();
        let output_shapes = output_arrays.iter().map(|a| a.shape().clone()).collect();
        let key_to_arg = arg_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Session {
            output_names: graph.list_outputs(),
            graph,
            ctx,
            arg_names,
            arg_arrays,
            aux_names,
            aux_arrays,
            output_arrays,
            output_shapes,
            key_to_arg,
            executor: Some(executor),
            backend,
            lease,
            profiler,
        }
    }

    fn executor_mut(&mut self) -> Result<&mut Box<dyn Executor>, PredictError> {
        self.executor.as_mut().ok_or(PredictError::SessionInvalidated)
    }

    fn ensure_valid(&self) -> Result<(), PredictError> {
        if self.executor.is_some() {
            Ok(())
        } else {
            Err(PredictError::SessionInvalidated)
        }
    }

    // ── Reshape ────────────────────────────────────────────────────

    /// Rebinds the session for new input shapes.
    ///
    /// Only the arguments named in `new_shapes` may change shape; every
    /// other argument and every auxiliary state must infer to its current
    /// shape. Reshaped inputs are zero-filled, all other arrays carry
    /// over. On success `self` is invalidated and the returned session
    /// owns the executor state and the parameter lease.
    pub fn reshape(&mut self, new_shapes: &[(&str, Shape)]) -> Result<Session, PredictError> {
        self.ensure_valid()?;
        let _span = self.profiler.scoped(self.ctx, "reshape", "predict");
        let mut known = HashMap::with_capacity(new_shapes.len());
        for (name, shape) in new_shapes {
            if !self.key_to_arg.contains_key(*name) {
                return Err(PredictError::UnknownInput(name.to_string()));
            }
            known.insert(name.to_string(), shape.clone());
        }

        let (arg_shapes, aux_shapes) = infer_complete(&self.graph, &known)?;

        let mut arg_arrays = Vec::with_capacity(self.arg_arrays.len());
        for ((name, shape), old) in self.arg_names.iter().zip(arg_shapes).zip(&self.arg_arrays) {
            if known.contains_key(name) {
                arg_arrays.push(NDArray::zeros(shape, self.ctx)?);
            } else if &shape == old.shape() {
                arg_arrays.push(old.clone());
            } else {
                return Err(PredictError::ShapeChanged {
                    kind: "arg",
                    name: name.clone(),
                    old: old.shape().clone(),
                    new: shape,
                });
            }
        }
        for ((name, shape), old) in self.aux_names.iter().zip(aux_shapes).zip(&self.aux_arrays) {
            if &shape != old.shape() {
                return Err(PredictError::ShapeChanged {
                    kind: "aux",
                    name: name.clone(),
                    old: old.shape().clone(),
                    new: shape,
                });
            }
        }
        let aux_arrays = self.aux_arrays.clone();

        let executor = self.backend.bind(
            &self.graph,
            self.ctx,
            &arg_arrays,
            &aux_arrays,
            self.executor.as_deref(),
        )?;

        // Commit: move everything out of `self`.
        self.executor = None;
        self.arg_arrays.clear();
        self.aux_arrays.clear();
        self.output_arrays.clear();
        self.output_shapes.clear();
        self.key_to_arg.clear();
        let session = Session::assemble(
            self.graph.clone(),
            self.ctx,
            std::mem::take(&mut self.arg_names),
            arg_arrays,
            std::mem::take(&mut self.aux_names),
            aux_arrays,
            executor,
            Arc::clone(&self.backend),
            self.lease.take(),
            Arc::clone(&self.profiler),
        );
        tracing::info!(
            device = %session.ctx,
            reshaped = new_shapes.len(),
            "session reshaped"
        );
        Ok(session)
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Copies `data` into the input named `key`. The element count must
    /// match the bound array exactly.
    pub fn set_input(&mut self, key: &str, data: &[f32]) -> Result<(), PredictError> {
        self.ensure_valid()?;
        let index = *self
            .key_to_arg
            .get(key)
            .ok_or_else(|| PredictError::UnknownInput(key.to_string()))?;
        let array = &self.arg_arrays[index];
        if data.len() != array.size() {
            return Err(PredictError::SizeMismatch {
                key: key.to_string(),
                expected: array.size(),
                actual: data.len(),
            });
        }
        array.sync_copy_from_host(data)?;
        Ok(())
    }

    /// Runs the whole graph.
    pub fn forward(&mut self) -> Result<(), PredictError> {
        let profiler = Arc::clone(&self.profiler);
        let ctx = self.ctx;
        let executor = self.executor_mut()?;
        let _span = profiler.scoped(ctx, "forward", "predict");
        executor.forward()
    }

    /// Runs operator `step` of the forward schedule and returns how many
    /// steps remain after it.
    pub fn partial_forward(&mut self, step: usize) -> Result<usize, PredictError> {
        let executor = self.executor_mut()?;
        let total = executor.num_steps();
        if step >= total {
            return Err(PredictError::InvalidStep { step, total });
        }
        executor.run_step(step)?;
        Ok(total - step - 1)
    }

    pub fn num_outputs(&self) -> usize {
        self.output_arrays.len()
    }

    pub fn output_shape(&self, index: usize) -> Result<&Shape, PredictError> {
        self.ensure_valid()?;
        self.output_shapes.get(index).ok_or(PredictError::OutputIndex {
            index,
            count: self.output_shapes.len(),
        })
    }

    /// Copies output `index` into `out`, whose length must equal the
    /// output's element count.
    pub fn output(&self, index: usize, out: &mut [f32]) -> Result<(), PredictError> {
        let array = self.output_array(index)?;
        if out.len() != array.size() {
            return Err(PredictError::SizeMismatch {
                key: self.output_names[index].clone(),
                expected: array.size(),
                actual: out.len(),
            });
        }
        array.sync_copy_to_host(out)?;
        Ok(())
    }

    pub fn output_to_vec(&self, index: usize) -> Result<Vec<f32>, PredictError> {
        Ok(self.output_array(index)?.to_vec()?)
    }

    fn output_array(&self, index: usize) -> Result<&NDArray, PredictError> {
        self.ensure_valid()?;
        self.output_arrays.get(index).ok_or(PredictError::OutputIndex {
            index,
            count: self.output_arrays.len(),
        })
    }

    /// Releases the session. The parameter source is told first, while
    /// the session still holds its arrays; an unload failure is reported
    /// after everything else has dropped with `self`.
    pub fn free(mut self) -> Result<(), PredictError> {
        let unloaded = match self.lease.take() {
            Some(lease) => lease.release(),
            None => Ok(()),
        };
        drop(self);
        unloaded
    }

    // ── Introspection ──────────────────────────────────────────────

    pub fn is_valid(&self) -> bool {
        self.executor.is_some()
    }

    pub fn context(&self) -> Context {
        self.ctx
    }

    pub fn graph(&self) -> &Graph<Validated> {
        &self.graph
    }

    pub fn arg_names(&self) -> &[String] {
        &self.arg_names
    }

    pub fn aux_names(&self) -> &[String] {
        &self.aux_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn output_shapes(&self) -> &[Shape] {
        &self.output_shapes
    }

    pub fn arg_shape(&self, name: &str) -> Option<&Shape> {
        self.arg_array(name).map(NDArray::shape)
    }

    pub fn arg_array(&self, name: &str) -> Option<&NDArray> {
        self.key_to_arg.get(name).map(|&i| &self.arg_arrays[i])
    }

    pub fn aux_array(&self, name: &str) -> Option<&NDArray> {
        self.aux_names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.aux_arrays.get(i))
    }

    /// Operators in the forward schedule; 0 once invalidated.
    pub fn num_steps(&self) -> usize {
        self.executor.as_ref().map_or(0, |e| e.num_steps())
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn has_shared_params(&self) -> bool {
        self.lease.is_some()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("ctx", &self.ctx)
            .field("args", &self.arg_names)
            .field("aux", &self.aux_names)
            .field("outputs", &self.output_names)
            .field("valid", &self.is_valid())
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Runs shape inference and requires every argument and auxiliary shape
/// to be known.
fn infer_complete(
    graph: &Graph<Validated>,
    known: &HashMap<String, Shape>,
) -> Result<(Vec<Shape>, Vec<Shape>), PredictError> {
    let inferred = graph.infer_shapes(known)?;
    if !inferred.is_complete() {
        return Err(PredictError::IncompleteShapes {
            num_unknown: inferred.num_unknown,
        });
    }
    let collect = |shapes: Vec<Option<Shape>>| {
        shapes
            .into_iter()
            .map(|s| s.ok_or(PredictError::IncompleteShapes { num_unknown: 1 }))
            .collect::<Result<Vec<_>, _>>()
    };
    Ok((collect(inferred.arg_shapes)?, collect(inferred.aux_shapes)?))
}

/// Allocates one device array per name: a copy of the host parameter, the
/// shared array itself, or zeros when no parameter was supplied.
fn materialize(
    kind: &str,
    names: &[String],
    shapes: &[Shape],
    params: &mut HashMap<String, ParamValue>,
    ctx: Context,
) -> Result<Vec<NDArray>, PredictError> {
    let mut arrays = Vec::with_capacity(names.len());
    for (name, shape) in names.iter().zip(shapes) {
        let array = match params.remove(name) {
            Some(ParamValue::Host(tensor)) if !tensor.is_empty() => {
                if tensor.num_elements() != shape.num_elements() {
                    return Err(PredictError::InvalidParams(format!(
                        "{kind} '{name}' has {} elements, graph expects {shape}",
                        tensor.num_elements()
                    )));
                }
                NDArray::from_host(shape.clone(), ctx, &tensor.to_f32_vec()?)?
            }
            Some(ParamValue::Shared(array)) => {
                if array.shape() != shape {
                    return Err(PredictError::InvalidParams(format!(
                        "shared {kind} '{name}' has shape {}, graph expects {shape}",
                        array.shape()
                    )));
                }
                if array.context() != ctx {
                    return Err(PredictError::InvalidParams(format!(
                        "shared {kind} '{name}' lives on {}, session runs on {ctx}",
                        array.context()
                    )));
                }
                array
            }
            _ => NDArray::zeros(shape.clone(), ctx)?,
        };
        arrays.push(array);
    }
    Ok(arrays)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::LoadedParams;
    use crate::ParameterSource;
    use graph_ir::GraphError;
    use profiler::ProfilerOptions;
    use std::sync::Mutex;
    use tensor_core::serialize;

    const SCALE: &str = r#"{"nodes": [
        {"op": "null", "name": "x"},
        {"op": "null", "name": "w"},
        {"op": "elemwise_mul", "name": "scaled", "inputs": [[0, 0], [1, 0]]},
        {"op": "Activation", "name": "act", "attrs": {"act_type": "relu"}, "inputs": [[2, 0]]}
    ], "heads": [[3, 0]]}"#;

    fn profiler() -> Arc<Profiler> {
        Arc::new(Profiler::new(ProfilerOptions {
            cpu_count: Some(2),
            gpu_slots: 0,
            ..Default::default()
        }))
    }

    fn params() -> Vec<u8> {
        let shape = Shape::from([4]);
        serialize::encode_named_f32([("arg:w", &shape, &[2.0f32, -1.0, 0.5, 3.0][..])]).unwrap()
    }

    fn session(bytes: &[u8]) -> Session {
        Session::builder(SCALE, Params::Bytes(bytes))
            .input_shape("x", Shape::from([4]))
            .profiler(profiler())
            .build()
            .unwrap()
    }

    #[test]
    fn test_create_binds_params() {
        let bytes = params();
        let s = session(&bytes);
        assert_eq!(s.arg_names(), &["x".to_string(), "w".to_string()]);
        assert_eq!(s.output_names(), &["act_output".to_string()]);
        assert_eq!(s.arg_array("w").unwrap().to_vec().unwrap(), vec![2.0, -1.0, 0.5, 3.0]);
        assert_eq!(s.num_steps(), 2);
    }

    #[test]
    fn test_forward_and_output() {
        let bytes = params();
        let mut s = session(&bytes);
        s.set_input("x", &[1.0, 1.0, 4.0, -1.0]).unwrap();
        s.forward().unwrap();
        let mut out = [0.0f32; 4];
        s.output(0, &mut out).unwrap();
        assert_eq!(out, [2.0, 0.0, 2.0, 0.0]);
        assert!(matches!(
            s.output(0, &mut [0.0; 3]),
            Err(PredictError::SizeMismatch { .. })
        ));
        assert!(matches!(
            s.output_shape(1),
            Err(PredictError::OutputIndex { index: 1, count: 1 })
        ));
    }

    #[test]
    fn test_set_input_errors() {
        let bytes = params();
        let mut s = session(&bytes);
        assert!(matches!(
            s.set_input("y", &[0.0; 4]),
            Err(PredictError::UnknownInput(_))
        ));
        assert!(matches!(
            s.set_input("x", &[0.0; 5]),
            Err(PredictError::SizeMismatch { expected: 4, actual: 5, .. })
        ));
    }

    #[test]
    fn test_missing_shapes_are_incomplete() {
        let bytes = params();
        let result = Session::builder(SCALE, Params::Bytes(&bytes))
            .profiler(profiler())
            .build();
        assert!(matches!(result, Err(PredictError::IncompleteShapes { .. })));
    }

    #[test]
    fn test_param_size_mismatch() {
        let shape = Shape::from([3]);
        let bytes =
            serialize::encode_named_f32([("arg:w", &shape, &[1.0f32, 2.0, 3.0][..])]).unwrap();
        let result = Session::builder(SCALE, Params::Bytes(&bytes))
            .input_shape("x", Shape::from([4]))
            .profiler(profiler())
            .build();
        assert!(matches!(result, Err(PredictError::InvalidParams(_))));
    }

    #[test]
    fn test_reshape_rejects_fixed_param_change() {
        let bytes = params();
        let mut s = session(&bytes);
        // `w` has the same shape as `x`; reshaping `x` alone forces `w` to change.
        let err = s.reshape(&[("x", Shape::from([8]))]).unwrap_err();
        assert!(matches!(err, PredictError::ShapeChanged { kind: "arg", .. }));
        assert!(s.is_valid());
        assert!(matches!(
            s.reshape(&[("nope", Shape::from([4]))]),
            Err(PredictError::UnknownInput(_))
        ));
    }

    #[test]
    fn test_reshape_invalidates_old_session() {
        let bytes = params();
        let mut s = session(&bytes);
        let mut next = s.reshape(&[("x", Shape::from([4]))]).unwrap();
        assert!(!s.is_valid());
        assert!(matches!(s.forward(), Err(PredictError::SessionInvalidated)));
        assert!(matches!(
            s.set_input("x", &[0.0; 4]),
            Err(PredictError::SessionInvalidated)
        ));
        assert_eq!(s.num_steps(), 0);
        next.forward().unwrap();
        s.free().unwrap();
        next.free().unwrap();
    }

    #[test]
    fn test_partial_forward_counts_down() {
        let bytes = params();
        let mut s = session(&bytes);
        s.set_input("x", &[1.0; 4]).unwrap();
        assert_eq!(s.partial_forward(0).unwrap(), 1);
        assert_eq!(s.partial_forward(1).unwrap(), 0);
        assert_eq!(s.output_to_vec(0).unwrap(), vec![2.0, 0.0, 0.5, 3.0]);
        assert!(matches!(
            s.partial_forward(2),
            Err(PredictError::InvalidStep { step: 2, total: 2 })
        ));
    }

    #[test]
    fn test_partial_outputs() {
        let bytes = params();
        let s = Session::builder(SCALE, Params::Bytes(&bytes))
            .input_shape("x", Shape::from([4]))
            .output_keys(["scaled", "w"])
            .profiler(profiler())
            .build()
            .unwrap();
        assert_eq!(s.output_names(), &["scaled_output".to_string(), "w".to_string()]);
        assert_eq!(s.num_outputs(), 2);
    }

    #[test]
    fn test_oversized_input_shape_is_an_error() {
        let bytes = params();
        let result = Session::builder(SCALE, Params::Bytes(&bytes))
            .input_shape("x", Shape::from([usize::MAX / 2, 4]))
            .profiler(profiler())
            .build();
        assert!(matches!(
            result,
            Err(PredictError::Graph(GraphError::InvalidShape { .. }))
        ));

        let mut s = session(&bytes);
        assert!(s.reshape(&[("x", Shape::from([usize::MAX, 2]))]).is_err());
        assert!(s.is_valid());
    }

    /// Lends one `w` array and records how many handles to it exist when
    /// the session gives it back.
    struct CountingSource {
        w: NDArray,
        handles_at_unload: Mutex<Vec<usize>>,
    }

    impl ParameterSource for CountingSource {
        fn load(&self, _model_id: &str) -> Result<LoadedParams, PredictError> {
            Ok(LoadedParams {
                token: 7,
                names: vec!["arg:w".to_string()],
                arrays: vec![self.w.clone()],
            })
        }

        fn unload(&self, token: u64) -> Result<(), PredictError> {
            assert_eq!(token, 7);
            self.handles_at_unload
                .lock()
                .unwrap()
                .push(self.w.handle_count());
            Ok(())
        }
    }

    #[test]
    fn test_free_unloads_before_releasing_arrays() {
        let ctx = Context::cpu(1);
        let source = Arc::new(CountingSource {
            w: NDArray::from_host(Shape::from([4]), ctx, &[1.0, 2.0, 3.0, 4.0]).unwrap(),
            handles_at_unload: Mutex::new(Vec::new()),
        });
        let s = Session::builder(SCALE, Params::external(source.clone(), "scale"))
            .context(ctx)
            .input_shape("x", Shape::from([4]))
            .profiler(profiler())
            .build()
            .unwrap();
        let held = source.w.handle_count();
        assert!(held > 1);

        s.free().unwrap();
        // The session's handles were still alive when the source was told.
        assert_eq!(*source.handles_at_unload.lock().unwrap(), vec![held]);
        assert_eq!(source.w.handle_count(), 1);
    }
}
