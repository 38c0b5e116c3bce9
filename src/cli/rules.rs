use std::path::Path;

use comfy_table::{Cell, Table};

use crate::error::Result;

use super::load_workspace;

pub fn run(config: &Path) -> Result<()> {
    let ws = load_workspace(config, None, None)?;
    let counts = ws.registry.counts();

    let mut table = Table::new();
    table.set_header(vec!["Section", "Loaded"]);
    for (section, n) in [
        ("SC code mappings", counts.sc_mappings),
        ("  of which ambiguous", counts.ambiguous_codes),
        ("Keyword rules", counts.keyword_rules),
        ("Supplier rules", counts.supplier_rules),
        ("Context rules", counts.context_rules),
        ("Cost center rules", counts.cost_center_rules),
        ("Supplier override rules", counts.override_rules),
    ] {
        table.add_row(vec![Cell::new(section), Cell::new(n)]);
    }
    table.add_row(vec![Cell::new("Taxonomy entries"), Cell::new(ws.taxonomy.len())]);
    println!("Rules for {}\n{table}", ws.loaded.config.client.name);
    Ok(())
}
