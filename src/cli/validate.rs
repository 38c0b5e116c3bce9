use std::path::Path;

use colored::Colorize;

use crate::error::Result;
use crate::importer::load_transactions;

use super::load_workspace;

/// Everything `classify` loads, without classifying. Advisories and lint
/// findings are printed but never fail the command.
pub fn run(config: &Path) -> Result<()> {
    let ws = load_workspace(config, None, None)?;
    let cfg = &ws.loaded.config;
    let dataset = load_transactions(&ws.loaded.paths.input, &cfg.columns)?;

    let counts = ws.registry.counts();
    println!("Client:        {}", cfg.client.name);
    println!("Taxonomy:      {} entries", ws.taxonomy.len());
    println!(
        "SC mappings:   {} ({} ambiguous)",
        counts.sc_mappings, counts.ambiguous_codes
    );
    println!(
        "Rules:         {} keyword, {} supplier, {} context, {} cost center, {} override",
        counts.keyword_rules,
        counts.supplier_rules,
        counts.context_rules,
        counts.cost_center_rules,
        counts.override_rules
    );
    println!(
        "Input:         {} rows, {} columns",
        dataset.len(),
        dataset.column_count
    );

    let findings: Vec<String> = ws
        .registry
        .advisories()
        .iter()
        .chain(ws.registry.lint().iter())
        .map(ToString::to_string)
        .collect();
    println!();
    if findings.is_empty() {
        println!("{}", "No issues found.".green());
    } else {
        println!("{}", format!("{} warning(s):", findings.len()).yellow().bold());
        for f in &findings {
            println!("  - {f}");
        }
    }
    Ok(())
}
