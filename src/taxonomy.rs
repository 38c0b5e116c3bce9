use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use crate::error::{Result, SpendError};
use crate::models::CategoryPath;

const KEY_COLUMN: &str = "Key";
const LEVEL_COLUMNS: [&str; 5] = [
    "CategoryLevel1",
    "CategoryLevel2",
    "CategoryLevel3",
    "CategoryLevel4",
    "CategoryLevel5",
];

/// Read-only lookup from taxonomy key to its category path.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyIndex {
    entries: HashMap<String, CategoryPath>,
}

impl TaxonomyIndex {
    #[cfg(test)]
    pub fn new(entries: impl IntoIterator<Item = (String, CategoryPath)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&CategoryPath> {
        self.entries.get(key)
    }

    /// Category path for `key`, or an all-empty path when the key is unknown.
    pub fn resolve(&self, key: &str) -> CategoryPath {
        self.get(key).cloned().unwrap_or_default()
    }

    pub fn keys(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Build from a header row plus data rows. Level 4/5 columns are optional.
    pub fn from_rows<I>(headers: &[String], rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let key_idx = find(KEY_COLUMN)
            .ok_or_else(|| SpendError::Taxonomy(format!("missing '{KEY_COLUMN}' column")))?;
        let level_idx: Vec<Option<usize>> = LEVEL_COLUMNS.iter().map(|c| find(c)).collect();
        for (i, col) in LEVEL_COLUMNS.iter().take(3).enumerate() {
            if level_idx[i].is_none() {
                return Err(SpendError::Taxonomy(format!("missing '{col}' column")));
            }
        }

        let cell = |row: &[String], idx: Option<usize>| -> String {
            idx.and_then(|i| row.get(i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };

        let mut entries = HashMap::new();
        for row in rows {
            let key = cell(&row, Some(key_idx));
            if key.is_empty() {
                continue;
            }
            let path = CategoryPath {
                l1: cell(&row, level_idx[0]),
                l2: cell(&row, level_idx[1]),
                l3: cell(&row, level_idx[2]),
                l4: cell(&row, level_idx[3]),
                l5: cell(&row, level_idx[4]),
            };
            entries.insert(key, path);
        }
        Ok(Self { entries })
    }
}

/// Load the taxonomy table from an XLSX/XLS workbook (first sheet) or a CSV.
pub fn load_taxonomy(path: &Path) -> Result<TaxonomyIndex> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let index = match ext.as_str() {
        "csv" => load_csv(path)?,
        #[cfg(feature = "xlsx")]
        "xlsx" | "xlsm" | "xls" => load_workbook(path)?,
        other => {
            return Err(SpendError::Taxonomy(format!(
                "unsupported taxonomy file type '{other}': {}",
                path.display()
            )))
        }
    };
    debug!(path = %path.display(), entries = index.len(), "taxonomy loaded");
    Ok(index)
}

fn load_csv(path: &Path) -> Result<TaxonomyIndex> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        rows.push(record?.iter().map(|v| v.to_string()).collect());
    }
    TaxonomyIndex::from_rows(&headers, rows)
}

#[cfg(feature = "xlsx")]
fn load_workbook(path: &Path) -> Result<TaxonomyIndex> {
    use calamine::{Data, Reader};

    let mut workbook = calamine::open_workbook_auto(path)
        .map_err(|e| SpendError::Taxonomy(format!("Failed to open workbook: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| SpendError::Taxonomy(format!("no worksheets in {}", path.display())))?
        .map_err(|e| SpendError::Taxonomy(format!("Failed to read worksheet: {e}")))?;

    let text = |cell: &Data| -> String {
        match cell {
            Data::Empty => String::new(),
            Data::String(s) => s.clone(),
            Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
            other => other.to_string(),
        }
    };

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(text).collect(),
        None => return Err(SpendError::Taxonomy(format!("empty worksheet in {}", path.display()))),
    };
    let data: Vec<Vec<String>> = rows.map(|r| r.iter().map(text).collect()).collect();
    TaxonomyIndex::from_rows(&headers, data)
}
