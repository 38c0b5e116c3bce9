use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::categorizer::ClassificationEngine;
use crate::error::Result;
use crate::fmt::{count, count_pct};
use crate::importer::load_transactions;
use crate::models::{Method, ReviewTier};
use crate::reports::{build_report, results_table, write_report, Report, RunManifest};
use crate::runner::BatchRunner;

use super::load_workspace;

const TOP_UNMAPPED: usize = 10;

pub fn run(config: &Path, input: Option<&Path>, output_dir: Option<&Path>) -> Result<()> {
    let ws = load_workspace(config, input, output_dir)?;
    let cfg = &ws.loaded.config;
    let paths = &ws.loaded.paths;

    println!("{}", format!("Classifying spend for {}", cfg.client.name).bold());
    println!(
        "Loaded {} taxonomy entries and {} SC mappings in {:.2}s",
        count(ws.taxonomy.len()),
        count(ws.registry.counts().sc_mappings),
        ws.load_secs
    );

    let extractor = cfg.classification.extractor()?;
    let dataset = load_transactions(&paths.input, &cfg.columns)?;
    println!(
        "Read {} transactions from {}",
        count(dataset.len()),
        paths.input.display()
    );

    let engine = ClassificationEngine::new(
        &ws.registry,
        &ws.taxonomy,
        extractor,
        cfg.classification.thresholds(),
    );
    let started = Instant::now();
    let outcome = BatchRunner::new(engine).run(&dataset.transactions)?;
    let classify_secs = started.elapsed().as_secs_f64();

    let table = results_table(&dataset, &outcome.results, &cfg.columns);
    let report = build_report(&dataset, &outcome.results, &table, &cfg.aggregations);

    let manifest = RunManifest {
        client: cfg.client.name.clone(),
        generated_at: chrono::Local::now().to_rfc3339(),
        input: paths.input.clone(),
        rule_counts: ws.registry.counts(),
        taxonomy_entries: ws.taxonomy.len(),
        total_rows: report.total_rows,
        overrides_applied: outcome.overrides_applied,
        method_counts: outcome
            .method_counts()
            .into_iter()
            .map(|(m, n)| (m.key().to_string(), n))
            .collect(),
        review_tiers: report
            .tier_counts
            .iter()
            .map(|(t, n)| (t.label().to_string(), *n))
            .collect::<BTreeMap<_, _>>(),
        advisories: ws.registry.advisories().to_vec(),
        classify_secs,
    };
    let out_dir = write_report(
        &paths.output_dir,
        &paths.output_prefix,
        &table,
        &report,
        &cfg.columns,
        &manifest,
    )?;

    print_methods(&report);
    print_tiers(&report);
    print_unmapped(&report);
    if !ws.registry.advisories().is_empty() {
        println!(
            "\n{}",
            format!("{} reference-data warning(s):", ws.registry.advisories().len()).yellow()
        );
        for a in ws.registry.advisories() {
            println!("  - {a}");
        }
    }

    println!(
        "\nClassified {} rows in {classify_secs:.2}s ({} supplier override(s))",
        count(report.total_rows),
        count(outcome.overrides_applied)
    );
    println!("Output: {}", out_dir.display().to_string().green());
    Ok(())
}

fn print_methods(report: &Report) {
    let mut table = Table::new();
    table.set_header(vec!["Method", "Rows"]);
    for method in Method::ALL {
        let n = report.method_count(method);
        if n == 0 {
            continue;
        }
        let label = if method == Method::Unmapped {
            Cell::new(method.label().red())
        } else {
            Cell::new(method.label())
        };
        table.add_row(vec![label, Cell::new(count_pct(n, report.total_rows))]);
    }
    println!("\nClassification methods\n{table}");
}

fn print_tiers(report: &Report) {
    let mut table = Table::new();
    table.set_header(vec!["Review tier", "Rows"]);
    for tier in ReviewTier::ALL {
        let label = match tier {
            ReviewTier::AutoAccept => tier.label().green(),
            ReviewTier::QuickReview => tier.label().yellow(),
            ReviewTier::ManualReview => tier.label().red(),
        };
        table.add_row(vec![
            Cell::new(label),
            Cell::new(count_pct(report.tier_count(tier), report.total_rows)),
        ]);
    }
    println!("\nReview tiers\n{table}");
}

fn print_unmapped(report: &Report) {
    if report.unmapped.is_empty() {
        return;
    }
    let mut table = Table::new();
    table.set_header(vec!["Spend category", "Rows"]);
    for (value, n) in report.unmapped.iter().take(TOP_UNMAPPED) {
        table.add_row(vec![Cell::new(value), Cell::new(count(*n))]);
    }
    println!(
        "\nTop unmapped spend categories ({} distinct)\n{table}",
        report.unmapped.len()
    );
}
