// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `predict-rt inspect` command: graph structure and inferred shapes.
//!
//! Runs shape inference with whatever input shapes are given, so it also
//! shows which shapes a session create would still be missing.

use super::{parse_shape_arg, truncate};
use graph_ir::Graph;
use std::collections::HashMap;
use std::path::PathBuf;
use tensor_core::Shape;

pub async fn execute(symbol: PathBuf, shapes: Vec<String>) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║             predict-rt · Graph Inspector            ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let json = std::fs::read_to_string(&symbol)?;
    let graph = Graph::from_json(&json)
        .and_then(Graph::validate)
        .map_err(|e| anyhow::anyhow!("failed to load graph '{}': {e}", symbol.display()))?;
    let known = shapes
        .iter()
        .map(|s| parse_shape_arg(s))
        .collect::<anyhow::Result<HashMap<String, Shape>>>()?;
    let inferred = graph.infer_shapes(&known)?;

    // ── Summary ────────────────────────────────────────────────
    println!("  {}", graph.summary());
    if inferred.is_complete() {
        println!("  Shapes: complete");
    } else {
        println!("  Shapes: {} unknown; add --shape for more inputs", inferred.num_unknown);
    }
    println!();

    print_table("Arguments", &graph.list_arguments(), &inferred.arg_shapes);
    print_table(
        "Auxiliary states",
        &graph.list_auxiliary_states(),
        &inferred.aux_shapes,
    );
    print_table("Outputs", &graph.list_outputs(), &inferred.out_shapes);

    // ── Schedule ───────────────────────────────────────────────
    println!("  Forward schedule:");
    println!("  {:<5} {:<30} {:<18} {:>16}", "Step", "Node", "Op", "Shape");
    println!("  {}", "-".repeat(72));
    for (step, id) in graph.schedule().into_iter().enumerate() {
        let node = graph.node(id);
        println!(
            "  {:<5} {:<30} {:<18} {:>16}",
            step,
            truncate(&node.name, 30),
            truncate(&node.op_name, 18),
            format_shape(inferred.node_shapes[id].as_ref()),
        );
    }
    println!();
    Ok(())
}

fn print_table(title: &str, names: &[String], shapes: &[Option<Shape>]) {
    println!("  {title} ({}):", names.len());
    for (name, shape) in names.iter().zip(shapes) {
        println!("   {:<36} {:>16}", truncate(name, 36), format_shape(shape.as_ref()));
    }
    println!();
}

fn format_shape(shape: Option<&Shape>) -> String {
    shape.map_or_else(|| "?".to_string(), |s| s.to_string())
}
