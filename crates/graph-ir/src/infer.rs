// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph-level shape inference.
//!
//! Seeds every variable from the caller's shapes (falling back to a
//! `__shape__` hint), then sweeps the operators in execution order until a
//! sweep changes nothing. Each operator fills whatever it can in both
//! directions, so parameter shapes follow from data shapes.

use crate::graph::{Graph, Validated};
use crate::GraphError;
use std::collections::HashMap;
use tensor_core::Shape;

/// Result of a shape-inference pass.
///
/// Vectors are aligned with [`Graph::list_arguments`],
/// [`Graph::list_auxiliary_states`] and [`Graph::list_outputs`].
#[derive(Debug, Clone)]
pub struct ShapeInference {
    pub arg_shapes: Vec<Option<Shape>>,
    pub aux_shapes: Vec<Option<Shape>>,
    pub out_shapes: Vec<Option<Shape>>,
    /// Output shape of every node, indexed by node id. Nodes unreachable
    /// from the heads stay `None`.
    pub node_shapes: Vec<Option<Shape>>,
    /// Reachable node outputs whose shape is still unknown.
    pub num_unknown: usize,
}

impl ShapeInference {
    pub fn is_complete(&self) -> bool {
        self.num_unknown == 0
    }
}

impl Graph<Validated> {
    /// Infers every shape the graph determines from `known`.
    ///
    /// Names in `known` that are not variables of the graph are ignored.
    /// Contradictory constraints fail with [`GraphError::ShapeMismatch`];
    /// shapes left undetermined are reported through
    /// [`ShapeInference::num_unknown`], not as an error.
    pub fn infer_shapes(
        &self,
        known: &HashMap<String, Shape>,
    ) -> Result<ShapeInference, GraphError> {
        let order = self.post_order();
        let nodes = self.nodes();
        let mut shapes: Vec<Option<Shape>> = vec![None; nodes.len()];

        for &id in &order {
            let node = &nodes[id];
            if node.is_variable() {
                shapes[id] = known
                    .get(&node.name)
                    .cloned()
                    .or_else(|| node.shape_hint())
                    .map(|s| bounded(&node.name, s))
                    .transpose()?;
            }
        }

        let ops: Vec<usize> = order
            .iter()
            .copied()
            .filter(|&id| !nodes[id].is_variable())
            .collect();

        // Every productive sweep fills at least one slot.
        let mut sweeps = 0;
        for _ in 0..=nodes.len() {
            sweeps += 1;
            let mut changed = false;
            for &id in &ops {
                let node = &nodes[id];
                let Some(op) = &node.op else { continue };
                let mut inputs: Vec<Option<Shape>> =
                    node.inputs.iter().map(|e| shapes[e.node].clone()).collect();
                let mut output = shapes[id].clone();
                changed |= op.infer(&node.name, &mut inputs, &mut output)?;

                for (entry, inferred) in node.inputs.iter().zip(inputs) {
                    let Some(inferred) = inferred else { continue };
                    let inferred = bounded(&node.name, inferred)?;
                    match &shapes[entry.node] {
                        None => shapes[entry.node] = Some(inferred),
                        Some(existing) if *existing == inferred => {}
                        Some(existing) => {
                            return Err(GraphError::ShapeMismatch {
                                node: node.name.clone(),
                                expected: existing.clone(),
                                actual: inferred,
                            })
                        }
                    }
                }
                shapes[id] = output.map(|s| bounded(&node.name, s)).transpose()?;
            }
            if !changed {
                break;
            }
        }

        let num_unknown = order.iter().filter(|&&id| shapes[id].is_none()).count();
        let (args, aux) = self.variable_nodes();
        let result = ShapeInference {
            arg_shapes: args.iter().map(|&id| shapes[id].clone()).collect(),
            aux_shapes: aux.iter().map(|&id| shapes[id].clone()).collect(),
            out_shapes: self.heads().iter().map(|e| shapes[e.node].clone()).collect(),
            node_shapes: shapes,
            num_unknown,
        };
        tracing::debug!(sweeps, num_unknown, "shape inference finished");
        Ok(result)
    }
}

/// Largest element count an `f32` buffer can hold.
const MAX_ELEMENTS: usize = isize::MAX as usize / std::mem::size_of::<f32>();

/// Rejects shapes whose element count overflows or cannot be allocated.
fn bounded(node: &str, shape: Shape) -> Result<Shape, GraphError> {
    match shape.checked_num_elements() {
        Some(n) if n <= MAX_ELEMENTS => Ok(shape),
        _ => Err(GraphError::InvalidShape {
            node: node.to_string(),
            detail: format!("{shape} has more elements than a buffer can hold"),
        }),
    }
}
