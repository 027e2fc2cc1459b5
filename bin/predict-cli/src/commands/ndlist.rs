// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `predict-rt ndlist` command: list the entries of a named-array bundle.

use super::truncate;
use predictor::NDList;
use std::path::PathBuf;

pub async fn execute(file: PathBuf, preview: usize) -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║              predict-rt · NDList Reader             ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let bytes = std::fs::read(&file)?;
    let list = NDList::decode(&bytes)?;
    println!("  File:    {}", file.display());
    println!("  Entries: {}", list.len());
    println!();

    println!("  {:<4} {:<28} {:>16} {:>10}  Values", "Idx", "Key", "Shape", "Count");
    println!("  {}", "-".repeat(80));
    for (i, entry) in list.iter().enumerate() {
        let key = if entry.key.is_empty() { "<unnamed>" } else { entry.key };
        let head: Vec<String> = entry
            .data
            .iter()
            .take(preview)
            .map(|v| format!("{v:.4}"))
            .collect();
        let more = if entry.data.len() > preview { ", ..." } else { "" };
        println!(
            "  {:<4} {:<28} {:>16} {:>10}  [{}{more}]",
            i,
            truncate(key, 28),
            entry.shape.to_string(),
            entry.data.len(),
            head.join(", "),
        );
    }
    println!();
    Ok(())
}
