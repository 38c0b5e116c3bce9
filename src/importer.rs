use std::path::Path;

use tracing::debug;

use crate::error::{Result, SpendError};
use crate::models::Transaction;
use crate::settings::Columns;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Lenient numeric parse: strips `$`, `,` and quotes, reads `(x)` as `-x`.
/// Anything unparseable becomes 0.0.
pub fn parse_amount(raw: &str) -> f64 {
    let s = raw.replace(',', "").replace('"', "").replace('$', "");
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('(').and_then(|v| v.strip_suffix(')')) {
        return -inner.trim().parse::<f64>().unwrap_or(0.0);
    }
    s.parse().unwrap_or(0.0)
}

/// Exports are not always UTF-8; bad bytes become U+FFFD instead of failing the row.
fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

// ---------------------------------------------------------------------------
// Dataset
// ---------------------------------------------------------------------------

/// Transactions in file order plus the configured passthrough columns,
/// carried verbatim for the results table.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub transactions: Vec<Transaction>,
    pub passthrough_headers: Vec<String>,
    pub passthrough: Vec<Vec<String>>,
    pub column_count: usize,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

pub fn load_transactions(path: &Path, columns: &Columns) -> Result<Dataset> {
    let file = std::fs::File::open(path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(std::io::BufReader::new(file));
    let headers: Vec<String> = rdr
        .byte_headers()?
        .iter()
        .map(|h| lossy(h).trim().to_string())
        .collect();
    let position = |name: &str| headers.iter().position(|h| h == name.trim());

    let missing: Vec<String> = columns
        .required()
        .iter()
        .filter(|(_, header)| position(header).is_none())
        .map(|(key, header)| format!("'{header}' (from columns.{key})"))
        .collect();
    if !missing.is_empty() {
        return Err(SpendError::Config(format!(
            "Columns not found in input CSV: {}",
            missing.join(", ")
        )));
    }

    let idx = |name: &str| position(name).unwrap_or(usize::MAX);
    let (i_sc, i_sup, i_memo, i_los, i_cc, i_amt) = (
        idx(&columns.spend_category),
        idx(&columns.supplier),
        idx(&columns.line_memo),
        idx(&columns.line_of_service),
        idx(&columns.cost_center),
        idx(&columns.amount),
    );

    let mut passthrough_headers: Vec<String> = Vec::new();
    for name in &columns.passthrough {
        let already_output = name == &columns.supplier || passthrough_headers.contains(name);
        if !already_output {
            passthrough_headers.push(name.clone());
        }
    }
    let passthrough_idx: Vec<Option<usize>> =
        passthrough_headers.iter().map(|h| position(h)).collect();

    let mut dataset = Dataset {
        passthrough_headers,
        column_count: headers.len(),
        ..Default::default()
    };
    for result in rdr.byte_records() {
        let record = result?;
        let field = |i: usize| record.get(i).map(lossy).unwrap_or_default();
        dataset.transactions.push(Transaction {
            spend_category_raw: field(i_sc),
            supplier: field(i_sup),
            line_memo: field(i_memo),
            line_of_service: field(i_los),
            cost_center: field(i_cc),
            amount: parse_amount(&field(i_amt)),
        });
        dataset.passthrough.push(
            passthrough_idx
                .iter()
                .map(|i| i.map(field).unwrap_or_default())
                .collect(),
        );
    }

    if dataset.is_empty() {
        return Err(SpendError::EmptyDataset(path.display().to_string()));
    }
    debug!(path = %path.display(), rows = dataset.len(), "transactions loaded");
    Ok(dataset)
}
