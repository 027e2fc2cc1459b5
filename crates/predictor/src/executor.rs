// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Execution backend seam and the host reference backend.
//!
//! A backend binds a validated graph to device arrays and hands back an
//! [`Executor`] that runs it. Sessions only talk to these traits.
//!
//! ```text
//!  Session ──bind(graph, ctx, args, aux, hint)──► ExecutionBackend
//!     ▲                                               │
//!     └────────────── Box<dyn Executor> ◄─────────────┘
//!                       forward() / run_step(i) / outputs()
//! ```
//!
//! [`HostBackend`] executes every operator with the `tensor-core` kernels
//! over pool-allocated device buffers. When a previous executor is passed
//! as a hint, intermediate buffers with a matching element count are reused
//! instead of allocated.

use crate::PredictError;
use graph_ir::{graph::Validated, Graph, GraphError};
use profiler::Profiler;
use std::collections::HashMap;
use std::sync::Arc;
use tensor_core::{Context, NDArray, Shape};

// ── Traits ─────────────────────────────────────────────────────────

/// A graph bound to device memory.
pub trait Executor: Send {
    /// Runs every operator in schedule order.
    fn forward(&mut self) -> Result<(), PredictError>;

    /// Number of operators in the forward schedule.
    fn num_steps(&self) -> usize;

    /// Runs the operator at position `step` of the schedule.
    fn run_step(&mut self, step: usize) -> Result<(), PredictError>;

    /// Output arrays, aligned with the graph heads.
    fn outputs(&self) -> &[NDArray];

    /// Intermediate buffers a rebind may share. Empty by default.
    fn reusable_buffers(&self) -> Vec<NDArray> {
        Vec::new()
    }
}

/// Binds graphs to device memory.
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// `args` and `aux` are aligned with [`Graph::list_arguments`] and
    /// [`Graph::list_auxiliary_states`]. `shared` is the executor being
    /// replaced, if any.
    fn bind(
        &self,
        graph: &Graph<Validated>,
        ctx: Context,
        args: &[NDArray],
        aux: &[NDArray],
        shared: Option<&dyn Executor>,
    ) -> Result<Box<dyn Executor>, PredictError>;
}

// ── Host backend ───────────────────────────────────────────────────

/// Reference backend running the `tensor-core` kernels on the host.
#[derive(Debug, Clone)]
pub struct HostBackend {
    profiler: Arc<Profiler>,
}

impl HostBackend {
    /// Operator spans go to `profiler` when it runs in all-operator mode.
    pub fn new(profiler: Arc<Profiler>) -> Self {
        Self { profiler }
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new(Profiler::global())
    }
}

impl ExecutionBackend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn bind(
        &self,
        graph: &Graph<Validated>,
        ctx: Context,
        args: &[NDArray],
        aux: &[NDArray],
        shared: Option<&dyn Executor>,
    ) -> Result<Box<dyn Executor>, PredictError> {
        let executor = GraphExecutor::bind(graph, ctx, args, aux, shared, Arc::clone(&self.profiler))?;
        Ok(Box::new(executor))
    }
}

/// Host executor: one array per node output, run in post-order.
pub struct GraphExecutor {
    graph: Graph<Validated>,
    ctx: Context,
    schedule: Vec<usize>,
    /// Output array of every node, indexed by node id.
    values: Vec<Option<NDArray>>,
    outputs: Vec<NDArray>,
    profiler: Arc<Profiler>,
}

impl GraphExecutor {
    pub fn bind(
        graph: &Graph<Validated>,
        ctx: Context,
        args: &[NDArray],
        aux: &[NDArray],
        shared: Option<&dyn Executor>,
        profiler: Arc<Profiler>,
    ) -> Result<Self, PredictError> {
        let (arg_nodes, aux_nodes) = graph.variable_nodes();
        if arg_nodes.len() != args.len() || aux_nodes.len() != aux.len() {
            return Err(PredictError::Internal(format!(
                "bind expects {} args and {} aux arrays, got {} and {}",
                arg_nodes.len(),
                aux_nodes.len(),
                args.len(),
                aux.len()
            )));
        }

        let mut values: Vec<Option<NDArray>> = vec![None; graph.nodes().len()];
        let mut known = HashMap::new();
        for (&id, array) in arg_nodes.iter().zip(args).chain(aux_nodes.iter().zip(aux)) {
            known.insert(graph.node(id).name.clone(), array.shape().clone());
            values[id] = Some(array.clone());
        }

        let shapes = graph.infer_shapes(&known)?;
        let schedule = graph.schedule();

        // Buffers offered by the previous executor, grouped by size.
        let mut spare: HashMap<usize, Vec<NDArray>> = HashMap::new();
        if let Some(prev) = shared {
            for buf in prev.reusable_buffers() {
                spare.entry(buf.size()).or_default().push(buf);
            }
        }

        let mut reused = 0usize;
        for &id in &schedule {
            let shape: Shape = shapes.node_shapes[id].clone().ok_or_else(|| {
                PredictError::Internal(format!(
                    "no shape for node '{}' after inference",
                    graph.node(id).name
                ))
            })?;
            let recycled = spare
                .get_mut(&shape.num_elements())
                .and_then(Vec::pop)
                .filter(|buf| buf.context() == ctx);
            let array = match recycled {
                Some(buf) => {
                    reused += 1;
                    buf.reshaped(shape)?
                }
                None => NDArray::zeros(shape, ctx)?,
            };
            values[id] = Some(array);
        }

        let outputs = graph
            .heads()
            .iter()
            .map(|e| {
                values[e.node].clone().ok_or_else(|| {
                    PredictError::Internal(format!("head node {} has no array", e.node))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            device = %ctx,
            ops = schedule.len(),
            reused,
            "graph bound"
        );
        Ok(Self {
            graph: graph.clone(),
            ctx,
            schedule,
            values,
            outputs,
            profiler,
        })
    }

    fn run_node(&self, id: usize) -> Result<(), PredictError> {
        let node = self.graph.node(id);
        let Some(op) = &node.op else {
            return Ok(());
        };
        let missing = || PredictError::Internal(format!("node '{}' is not bound", node.name));

        let out = self.values[id].as_ref().ok_or_else(missing)?;
        let inputs = node
            .inputs
            .iter()
            .map(|e| self.values[e.node].as_ref().ok_or_else(missing))
            .collect::<Result<Vec<&NDArray>, _>>()?;

        let _span = self
            .profiler
            .records_operators()
            .then(|| self.profiler.scoped(self.ctx, node.name.as_str(), "operator"));
        if let Some(guard) = &_span {
            guard.add_metadata("op", node.op_name.as_str());
        }

        // One read guard per distinct storage; the same array may feed
        // several inputs.
        let mut distinct: Vec<&NDArray> = Vec::with_capacity(inputs.len());
        let mut slot = Vec::with_capacity(inputs.len());
        for array in &inputs {
            match distinct.iter().position(|d| d.ptr_eq(array)) {
                Some(i) => slot.push(i),
                None => {
                    slot.push(distinct.len());
                    distinct.push(array);
                }
            }
        }
        let guards = distinct
            .iter()
            .map(|a| a.read())
            .collect::<Result<Vec<_>, _>>()?;
        let slices: Vec<&[f32]> = slot.iter().map(|&i| guards[i].as_slice()).collect();
        let shapes: Vec<&Shape> = inputs.iter().map(|a| a.shape()).collect();

        let mut out_buf = out.write()?;
        op.forward(&slices, &shapes, out_buf.as_mut_slice())
            .map_err(|source| GraphError::Kernel {
                node: node.name.clone(),
                source,
            })?;
        Ok(())
    }
}

impl Executor for GraphExecutor {
    fn forward(&mut self) -> Result<(), PredictError> {
        for &id in &self.schedule {
            self.run_node(id)?;
        }
        Ok(())
    }

    fn num_steps(&self) -> usize {
        self.schedule.len()
    }

    fn run_step(&mut self, step: usize) -> Result<(), PredictError> {
        let id = *self.schedule.get(step).ok_or(PredictError::InvalidStep {
            step,
            total: self.schedule.len(),
        })?;
        self.run_node(id)
    }

    fn outputs(&self) -> &[NDArray] {
        &self.outputs
    }

    fn reusable_buffers(&self) -> Vec<NDArray> {
        self.schedule
            .iter()
            .filter_map(|&id| self.values[id].clone())
            .collect()
    }
}

impl std::fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("ctx", &self.ctx)
            .field("steps", &self.schedule.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}
