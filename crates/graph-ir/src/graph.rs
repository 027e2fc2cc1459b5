// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Computation graph: a DAG of operator nodes and variables.
//!
//! # JSON layout
//!
//! ```text
//! {
//!   "nodes": [
//!     {"op": "null", "name": "x", "inputs": []},
//!     {"op": "null", "name": "fc_weight", "inputs": []},
//!     {"op": "FullyConnected", "name": "fc",
//!      "attrs": {"num_hidden": "4", "no_bias": "True"},
//!      "inputs": [[0, 0, 0], [1, 0, 0]]}
//!   ],
//!   "arg_nodes": [0, 1],
//!   "heads": [[2, 0, 0]]
//! }
//! ```
//!
//! `op: "null"` marks a variable. Attributes may also appear under the
//! older `attr` / `param` keys. Input entries are `[node, output]` or
//! `[node, output, version]`.
//!
//! # Type-State Pattern
//!
//! ```text
//! Graph<Loaded>     — JSON parsed, operators resolved.
//!       │  .validate()
//!       ▼
//! Graph<Validated>  — references, arity and order checked; ready for
//!                     shape inference and binding.
//! ```

use crate::{GraphError, OpKind};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tensor_core::Shape;

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: graph has been parsed but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph has been validated.
#[derive(Debug, Clone)]
pub struct Validated;

pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

// ── Nodes ──────────────────────────────────────────────────────────

/// Reference to one output of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeEntry {
    pub node: usize,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// `None` for variables.
    pub op: Option<OpKind>,
    /// Operator name as written in the graph (`"null"` for variables).
    pub op_name: String,
    pub attrs: BTreeMap<String, String>,
    pub inputs: Vec<NodeEntry>,
}

impl Node {
    pub fn is_variable(&self) -> bool {
        self.op.is_none()
    }

    /// Shape hint from a `__shape__` attribute, e.g. `"(1,3,224,224)"`.
    ///
    /// Hints with a zero dimension are partial and ignored.
    pub fn shape_hint(&self) -> Option<Shape> {
        let raw = self.attrs.get("__shape__")?;
        let trimmed = raw.trim().trim_start_matches(['(', '[']).trim_end_matches([')', ']']);
        let dims: Result<Vec<usize>, _> = trimmed
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect();
        match dims {
            Ok(dims) if !dims.contains(&0) => Some(Shape::new(dims)),
            _ => None,
        }
    }
}

// ── Raw JSON form ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawGraph {
    nodes: Vec<RawNode>,
    #[serde(default)]
    arg_nodes: Vec<usize>,
    heads: Vec<Vec<usize>>,
}

#[derive(Deserialize)]
struct RawNode {
    op: String,
    name: String,
    #[serde(default, alias = "attr", alias = "param")]
    attrs: BTreeMap<String, String>,
    #[serde(default)]
    inputs: Vec<Vec<usize>>,
}

fn parse_entry(raw: &[usize], context: &str) -> Result<NodeEntry, GraphError> {
    match raw {
        [node, index] | [node, index, _] => Ok(NodeEntry {
            node: *node,
            index: *index,
        }),
        _ => Err(GraphError::InvalidGraph(format!(
            "{context}: malformed entry {raw:?}"
        ))),
    }
}

// ── Graph ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Graph<S: GraphState = Loaded> {
    nodes: Vec<Node>,
    heads: Vec<NodeEntry>,
    _state: std::marker::PhantomData<S>,
}

impl Graph<Loaded> {
    /// Parses graph JSON and resolves every operator.
    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let raw: RawGraph = serde_json::from_str(json)?;

        let mut nodes = Vec::with_capacity(raw.nodes.len());
        for rn in raw.nodes {
            let op = if rn.op == "null" {
                None
            } else {
                Some(OpKind::parse(&rn.name, &rn.op, &rn.attrs)?)
            };
            let inputs = rn
                .inputs
                .iter()
                .map(|e| parse_entry(e, &rn.name))
                .collect::<Result<Vec<_>, _>>()?;
            nodes.push(Node {
                name: rn.name,
                op,
                op_name: rn.op,
                attrs: rn.attrs,
                inputs,
            });
        }

        for &id in &raw.arg_nodes {
            match nodes.get(id) {
                Some(node) if node.is_variable() => {}
                _ => {
                    return Err(GraphError::InvalidGraph(format!(
                        "arg_nodes entry {id} is not a variable"
                    )))
                }
            }
        }

        let heads = raw
            .heads
            .iter()
            .map(|e| parse_entry(e, "heads"))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(nodes = nodes.len(), heads = heads.len(), "parsed graph");
        Ok(Self {
            nodes,
            heads,
            _state: std::marker::PhantomData,
        })
    }

    /// Checks structure and transitions to `Validated`.
    ///
    /// # Checks
    /// - at least one head;
    /// - every input refers to an earlier node (topological order, no
    ///   cycles) and to output 0;
    /// - variables have no inputs, operators get exactly their arity;
    /// - variable names are unique.
    pub fn validate(self) -> Result<Graph<Validated>, GraphError> {
        if self.heads.is_empty() {
            return Err(GraphError::InvalidGraph("graph has no outputs".into()));
        }

        let mut variables = HashSet::new();
        for (id, node) in self.nodes.iter().enumerate() {
            for entry in &node.inputs {
                if entry.node >= id {
                    return Err(GraphError::InvalidGraph(format!(
                        "node '{}' consumes node {} which does not precede it",
                        node.name, entry.node
                    )));
                }
                if entry.index != 0 {
                    return Err(GraphError::InvalidGraph(format!(
                        "node '{}' consumes output {} of '{}' which has one output",
                        node.name, entry.index, self.nodes[entry.node].name
                    )));
                }
            }
            match &node.op {
                None => {
                    if !node.inputs.is_empty() {
                        return Err(GraphError::InvalidGraph(format!(
                            "variable '{}' has inputs",
                            node.name
                        )));
                    }
                    if !variables.insert(node.name.as_str()) {
                        return Err(GraphError::InvalidGraph(format!(
                            "duplicate variable '{}'",
                            node.name
                        )));
                    }
                }
                Some(op) => {
                    if node.inputs.len() != op.num_inputs() {
                        return Err(GraphError::InvalidGraph(format!(
                            "node '{}' ({}) expects {} inputs, got {}",
                            node.name,
                            node.op_name,
                            op.num_inputs(),
                            node.inputs.len()
                        )));
                    }
                }
            }
        }

        for head in &self.heads {
            if head.node >= self.nodes.len() || head.index != 0 {
                return Err(GraphError::InvalidGraph(format!(
                    "head [{}, {}] is out of range",
                    head.node, head.index
                )));
            }
        }

        Ok(Graph {
            nodes: self.nodes,
            heads: self.heads,
            _state: std::marker::PhantomData,
        })
    }
}

impl Graph<Validated> {
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    pub fn heads(&self) -> &[NodeEntry] {
        &self.heads
    }

    /// Nodes reachable from the heads, in depth-first post-order.
    /// Inputs always precede their consumers.
    pub fn post_order(&self) -> Vec<usize> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        let mut stack: Vec<(usize, usize)> = Vec::new();

        for head in &self.heads {
            if visited[head.node] {
                continue;
            }
            visited[head.node] = true;
            stack.push((head.node, 0));
            while let Some(top) = stack.last_mut() {
                let (id, next) = *top;
                if let Some(entry) = self.nodes[id].inputs.get(next) {
                    top.1 += 1;
                    if !visited[entry.node] {
                        visited[entry.node] = true;
                        stack.push((entry.node, 0));
                    }
                } else {
                    order.push(id);
                    stack.pop();
                }
            }
        }
        order
    }

    /// Operator nodes in execution order.
    pub fn schedule(&self) -> Vec<usize> {
        self.post_order()
            .into_iter()
            .filter(|&id| !self.nodes[id].is_variable())
            .collect()
    }

    /// Variable node ids split into (arguments, auxiliary states), each in
    /// post-order.
    pub fn variable_nodes(&self) -> (Vec<usize>, Vec<usize>) {
        let order = self.post_order();
        let mut aux = HashSet::new();
        for &id in &order {
            if let Some(op) = &self.nodes[id].op {
                for &pos in op.mutable_inputs() {
                    aux.insert(self.nodes[id].inputs[pos].node);
                }
            }
        }
        order
            .into_iter()
            .filter(|&id| self.nodes[id].is_variable())
            .partition(|id| !aux.contains(id))
    }

    pub fn list_arguments(&self) -> Vec<String> {
        let (args, _) = self.variable_nodes();
        args.into_iter().map(|id| self.nodes[id].name.clone()).collect()
    }

    pub fn list_auxiliary_states(&self) -> Vec<String> {
        let (_, aux) = self.variable_nodes();
        aux.into_iter().map(|id| self.nodes[id].name.clone()).collect()
    }

    /// Names of the graph outputs: a variable's own name, or
    /// `"{node}_output"` for an operator.
    pub fn list_outputs(&self) -> Vec<String> {
        self.heads.iter().map(|e| self.entry_name(e)).collect()
    }

    pub fn entry_name(&self, entry: &NodeEntry) -> String {
        let node = &self.nodes[entry.node];
        if node.is_variable() {
            node.name.clone()
        } else {
            format!("{}_output", node.name)
        }
    }

    /// Every node output reachable from the heads, as (name, entry).
    pub fn internals(&self) -> Vec<(String, NodeEntry)> {
        self.post_order()
            .into_iter()
            .map(|id| {
                let entry = NodeEntry { node: id, index: 0 };
                (self.entry_name(&entry), entry)
            })
            .collect()
    }

    /// Regroups the graph so its outputs are the internals named by `keys`.
    ///
    /// A key `k` selects the internal output `"{k}_output"`; an exact
    /// internal name is accepted when no such output exists.
    pub fn select_outputs<K: AsRef<str>>(&self, keys: &[K]) -> Result<Self, GraphError> {
        let internals = self.internals();
        let mut heads = Vec::with_capacity(keys.len());
        for key in keys {
            let key = key.as_ref();
            let wanted = format!("{key}_output");
            let found = internals
                .iter()
                .find(|(name, _)| *name == wanted)
                .or_else(|| internals.iter().find(|(name, _)| name == key));
            match found {
                Some((_, entry)) => heads.push(*entry),
                None => return Err(GraphError::OutputNotFound(key.to_string())),
            }
        }
        tracing::debug!(outputs = ?keys.iter().map(AsRef::as_ref).collect::<Vec<_>>(), "selected graph outputs");
        Ok(Self {
            nodes: self.nodes.clone(),
            heads,
            _state: std::marker::PhantomData,
        })
    }

    pub fn num_ops(&self) -> usize {
        self.schedule().len()
    }

    pub fn summary(&self) -> String {
        let (args, aux) = self.variable_nodes();
        format!(
            "Graph: {} ops, {} arguments, {} auxiliary states, {} outputs",
            self.num_ops(),
            args.len(),
            aux.len(),
            self.heads.len()
        )
    }
}

impl<S: GraphState> fmt::Display for Graph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph ({} nodes):", self.nodes.len())?;
        for (id, node) in self.nodes.iter().enumerate() {
            let inputs: Vec<_> = node.inputs.iter().map(|e| e.node.to_string()).collect();
            writeln!(
                f,
                "  [{id:>3}] {:<16} {:<24} <- [{}]",
                node.op_name,
                node.name,
                inputs.join(", ")
            )?;
        }
        Ok(())
    }
}
