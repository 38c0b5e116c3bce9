use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::error::Result;
use crate::fmt::{count, count_pct, money};
use crate::importer::Dataset;
use crate::models::{round3, ClassificationResult, Method, ReviewTier};
use crate::rules::{Advisory, RuleCounts};
use crate::settings::{Aggregation, Columns};

// ---------------------------------------------------------------------------
// Results table
// ---------------------------------------------------------------------------

pub const SOURCE_COLUMN: &str = "Spend Category (Source)";
pub const SC_CODE_COLUMN: &str = "SC Code";

/// Flat per-row output, one row per transaction in input order.
#[derive(Debug, Clone)]
pub struct ResultsTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub amounts: Vec<f64>,
}

impl ResultsTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

pub fn results_table(
    dataset: &Dataset,
    results: &[ClassificationResult],
    columns: &Columns,
) -> ResultsTable {
    let mut headers = vec![columns.supplier.clone()];
    headers.extend(dataset.passthrough_headers.iter().cloned());
    headers.extend([
        columns.line_memo.clone(),
        SOURCE_COLUMN.to_string(),
        SC_CODE_COLUMN.to_string(),
        columns.cost_center.clone(),
        columns.line_of_service.clone(),
    ]);
    let amount_in_passthrough = dataset.passthrough_headers.contains(&columns.amount);
    if !amount_in_passthrough {
        headers.push(columns.amount.clone());
    }
    headers.extend(
        [
            "CategoryLevel1",
            "CategoryLevel2",
            "CategoryLevel3",
            "CategoryLevel4",
            "CategoryLevel5",
            "TaxonomyKey",
            "ClassificationMethod",
            "Confidence",
            "ReviewTier",
        ]
        .map(String::from),
    );

    let mut rows = Vec::with_capacity(results.len());
    let mut amounts = Vec::with_capacity(results.len());
    for (i, (txn, result)) in dataset.transactions.iter().zip(results).enumerate() {
        let mut row = vec![txn.supplier.clone()];
        if let Some(extra) = dataset.passthrough.get(i) {
            row.extend(extra.iter().cloned());
        }
        row.extend([
            txn.line_memo.clone(),
            txn.spend_category_raw.trim().to_string(),
            result.sc_code.clone(),
            txn.cost_center.clone(),
            txn.line_of_service.clone(),
        ]);
        if !amount_in_passthrough {
            row.push(format!("{:.2}", txn.amount));
        }
        row.extend(result.category.levels().map(String::from));
        row.extend([
            result.taxonomy_key.clone(),
            result.method.key().to_string(),
            format!("{}", result.rounded_confidence()),
            result.review_tier.label().to_string(),
        ]);
        rows.push(row);
        amounts.push(txn.amount);
    }

    ResultsTable {
        headers,
        rows,
        amounts,
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct L1Spend {
    pub l1: String,
    pub count: usize,
    pub total: f64,
    pub unique_suppliers: usize,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct L2Spend {
    pub l1: String,
    pub l2: String,
    pub count: usize,
    pub total: f64,
    pub unique_suppliers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSpend {
    pub value: String,
    pub count: usize,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregationTable {
    pub name: String,
    pub column: String,
    pub groups: Vec<GroupSpend>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub total_rows: usize,
    pub unique_suppliers: usize,
    pub unique_sc_codes: usize,
    pub method_counts: Vec<(Method, usize)>,
    pub tier_counts: Vec<(ReviewTier, usize)>,
    pub total_amount: f64,
    pub average_amount: f64,
    pub spend_by_l1: Vec<L1Spend>,
    pub spend_by_l2: Vec<L2Spend>,
    pub aggregations: Vec<AggregationTable>,
    /// Raw spend-category values of unmapped rows, most common first.
    pub unmapped: Vec<(String, usize)>,
}

impl Report {
    pub fn method_count(&self, method: Method) -> usize {
        lookup(&self.method_counts, &method)
    }

    pub fn tier_count(&self, tier: ReviewTier) -> usize {
        lookup(&self.tier_counts, &tier)
    }
}

fn lookup<K: PartialEq>(pairs: &[(K, usize)], key: &K) -> usize {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map_or(0, |(_, n)| *n)
}

#[derive(Default)]
struct Group<'a> {
    count: usize,
    total: f64,
    confidence_sum: f64,
    suppliers: HashSet<&'a str>,
}

impl<'a> Group<'a> {
    fn add(&mut self, amount: f64, confidence: f64, supplier: &'a str) {
        self.count += 1;
        self.total += amount;
        self.confidence_sum += confidence;
        self.suppliers.insert(supplier);
    }
}

fn by_total_desc<T>(items: &mut [T], total: impl Fn(&T) -> f64) {
    items.sort_by(|a, b| total(b).total_cmp(&total(a)));
}

pub fn build_report(
    dataset: &Dataset,
    results: &[ClassificationResult],
    table: &ResultsTable,
    aggregations: &[Aggregation],
) -> Report {
    let total_rows = results.len();
    let txns = &dataset.transactions;

    let mut methods: BTreeMap<Method, usize> = BTreeMap::new();
    let mut tiers: BTreeMap<ReviewTier, usize> = BTreeMap::new();
    let mut l1_groups: BTreeMap<&str, Group> = BTreeMap::new();
    let mut l2_groups: BTreeMap<(&str, &str), Group> = BTreeMap::new();
    let mut unmapped_counts: HashMap<String, usize> = HashMap::new();
    let mut unmapped_order: Vec<String> = Vec::new();

    for (txn, r) in txns.iter().zip(results) {
        *methods.entry(r.method).or_insert(0) += 1;
        *tiers.entry(r.review_tier).or_insert(0) += 1;
        let conf = r.rounded_confidence();
        l1_groups
            .entry(r.category.l1.as_str())
            .or_default()
            .add(txn.amount, conf, &txn.supplier);
        l2_groups
            .entry((r.category.l1.as_str(), r.category.l2.as_str()))
            .or_default()
            .add(txn.amount, conf, &txn.supplier);
        if r.method == Method::Unmapped {
            let source = txn.spend_category_raw.trim().to_string();
            let n = unmapped_counts.entry(source.clone()).or_insert(0);
            if *n == 0 {
                unmapped_order.push(source);
            }
            *n += 1;
        }
    }

    let mut spend_by_l1: Vec<L1Spend> = l1_groups
        .into_iter()
        .map(|(l1, g)| L1Spend {
            l1: l1.to_string(),
            count: g.count,
            total: g.total,
            unique_suppliers: g.suppliers.len(),
            avg_confidence: round3(g.confidence_sum / g.count as f64),
        })
        .collect();
    by_total_desc(&mut spend_by_l1, |s| s.total);

    let mut spend_by_l2: Vec<L2Spend> = l2_groups
        .into_iter()
        .map(|((l1, l2), g)| L2Spend {
            l1: l1.to_string(),
            l2: l2.to_string(),
            count: g.count,
            total: g.total,
            unique_suppliers: g.suppliers.len(),
        })
        .collect();
    by_total_desc(&mut spend_by_l2, |s| s.total);

    let mut unmapped: Vec<(String, usize)> = unmapped_order
        .into_iter()
        .map(|v| {
            let n = unmapped_counts[&v];
            (v, n)
        })
        .collect();
    unmapped.sort_by(|a, b| b.1.cmp(&a.1));

    let total_amount: f64 = txns.iter().map(|t| t.amount).sum();
    let average_amount = if total_rows == 0 {
        0.0
    } else {
        total_amount / total_rows as f64
    };

    Report {
        total_rows,
        unique_suppliers: txns.iter().map(|t| t.supplier.as_str()).collect::<HashSet<_>>().len(),
        unique_sc_codes: results.iter().map(|r| r.sc_code.as_str()).collect::<HashSet<_>>().len(),
        method_counts: methods.into_iter().collect(),
        tier_counts: tiers.into_iter().collect(),
        total_amount,
        average_amount,
        spend_by_l1,
        spend_by_l2,
        aggregations: aggregations
            .iter()
            .filter_map(|agg| aggregate(table, agg))
            .collect(),
        unmapped,
    }
}

fn aggregate(table: &ResultsTable, agg: &Aggregation) -> Option<AggregationTable> {
    let Some(idx) = table.column(&agg.column) else {
        warn!(
            column = %agg.column,
            sheet = %agg.name,
            "aggregation column not found, skipping"
        );
        return None;
    };
    let mut groups: BTreeMap<&str, GroupSpend> = BTreeMap::new();
    for (row, amount) in table.rows.iter().zip(&table.amounts) {
        let value = row.get(idx).map(String::as_str).unwrap_or("");
        let g = groups.entry(value).or_insert_with(|| GroupSpend {
            value: value.to_string(),
            count: 0,
            total: 0.0,
        });
        g.count += 1;
        g.total += amount;
    }
    let mut groups: Vec<GroupSpend> = groups.into_values().collect();
    by_total_desc(&mut groups, |g| g.total);
    if let Some(n) = agg.top_n {
        groups.truncate(n);
    }
    Some(AggregationTable {
        name: agg.name.clone(),
        column: agg.column.clone(),
        groups,
    })
}

/// Metric/value rows for the summary sheet.
pub fn summary_rows(report: &Report, columns: &Columns) -> Vec<(String, String)> {
    let total = report.total_rows;
    let mut rows = vec![
        ("Total Transactions".to_string(), count(total)),
        (format!("Unique {}s", columns.supplier), count(report.unique_suppliers)),
        ("Unique SC Codes".to_string(), count(report.unique_sc_codes)),
        ("--- Classification Methods ---".to_string(), String::new()),
    ];
    for method in Method::ALL {
        let n = report.method_count(method);
        if n > 0 {
            rows.push((method.label().to_string(), count_pct(n, total)));
        }
    }
    rows.push(("--- Review Tiers ---".to_string(), String::new()));
    for tier in ReviewTier::ALL {
        rows.push((tier.label().to_string(), count_pct(report.tier_count(tier), total)));
    }
    rows.push(("--- Financial ---".to_string(), String::new()));
    rows.push((format!("Total {}", columns.amount), money(report.total_amount)));
    rows.push((format!("Average {}", columns.amount), money(report.average_amount)));
    rows
}

// ---------------------------------------------------------------------------
// Run manifest + writers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub client: String,
    pub generated_at: String,
    pub input: PathBuf,
    pub rule_counts: RuleCounts,
    pub taxonomy_entries: usize,
    pub total_rows: usize,
    pub overrides_applied: usize,
    pub method_counts: BTreeMap<String, usize>,
    pub review_tiers: BTreeMap<String, usize>,
    pub advisories: Vec<Advisory>,
    pub classify_secs: f64,
}

fn write_csv<I, R>(path: &Path, headers: &[&str], rows: I) -> Result<()>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn write_results_subset(path: &Path, table: &ResultsTable, tier: ReviewTier) -> Result<bool> {
    let Some(idx) = table.column("ReviewTier") else {
        return Ok(false);
    };
    let subset: Vec<&Vec<String>> = table
        .rows
        .iter()
        .filter(|r| r.get(idx).map(String::as_str) == Some(tier.label()))
        .collect();
    if subset.is_empty() {
        return Ok(false);
    }
    let headers: Vec<&str> = table.headers.iter().map(String::as_str).collect();
    write_csv(path, &headers, subset)?;
    Ok(true)
}

/// File-system safe name for an aggregation output file.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let collapsed: Vec<&str> = stem.split('_').filter(|s| !s.is_empty()).collect();
    collapsed.join("_")
}

/// Write every output file into a fresh timestamped directory and return it.
pub fn write_report(
    output_dir: &Path,
    output_prefix: &str,
    table: &ResultsTable,
    report: &Report,
    columns: &Columns,
    manifest: &RunManifest,
) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let dir = output_dir.join(format!("{output_prefix}_{stamp}"));
    std::fs::create_dir_all(&dir)?;

    let headers: Vec<&str> = table.headers.iter().map(String::as_str).collect();
    write_csv(&dir.join("all_results.csv"), &headers, &table.rows)?;
    write_results_subset(&dir.join("manual_review.csv"), table, ReviewTier::ManualReview)?;
    write_results_subset(&dir.join("quick_review.csv"), table, ReviewTier::QuickReview)?;

    write_csv(
        &dir.join("summary.csv"),
        &["Metric", "Value"],
        summary_rows(report, columns).into_iter().map(|(m, v)| [m, v]),
    )?;

    write_csv(
        &dir.join("spend_by_l1.csv"),
        &["CategoryLevel1", "TransactionCount", "TotalSpend", "UniqueSuppliers", "AvgConfidence"],
        report.spend_by_l1.iter().map(|s| {
            [
                s.l1.clone(),
                s.count.to_string(),
                format!("{:.2}", s.total),
                s.unique_suppliers.to_string(),
                format!("{}", s.avg_confidence),
            ]
        }),
    )?;

    write_csv(
        &dir.join("spend_by_l2.csv"),
        &["CategoryLevel1", "CategoryLevel2", "TransactionCount", "TotalSpend", "UniqueSuppliers"],
        report.spend_by_l2.iter().map(|s| {
            [
                s.l1.clone(),
                s.l2.clone(),
                s.count.to_string(),
                format!("{:.2}", s.total),
                s.unique_suppliers.to_string(),
            ]
        }),
    )?;

    let mut used_stems: BTreeSet<String> = BTreeSet::new();
    for agg in &report.aggregations {
        let mut stem = file_stem(&agg.name);
        while !used_stems.insert(stem.clone()) {
            stem.push('_');
        }
        write_csv(
            &dir.join(format!("{stem}.csv")),
            &[agg.column.as_str(), "TransactionCount", "TotalSpend"],
            agg.groups
                .iter()
                .map(|g| [g.value.clone(), g.count.to_string(), format!("{:.2}", g.total)]),
        )?;
    }

    if !report.unmapped.is_empty() {
        write_csv(
            &dir.join("unmapped_sc_codes.csv"),
            &[SC_CODE_COLUMN, "Count"],
            report.unmapped.iter().map(|(v, n)| [v.clone(), n.to_string()]),
        )?;
    }

    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(dir.join("run.json"), format!("{json}\n"))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryPath, Transaction};

    fn columns() -> Columns {
        Columns {
            spend_category: "Spend Category".into(),
            supplier: "Supplier".into(),
            line_memo: "Line Memo".into(),
            line_of_service: "Line of Service".into(),
            cost_center: "Cost Center".into(),
            amount: "Amount".into(),
            passthrough: vec!["Invoice".into()],
        }
    }

    fn result(method: Method, l1: &str, l2: &str, conf: f64, tier: ReviewTier) -> ClassificationResult {
        ClassificationResult {
            sc_code: "SC1".into(),
            taxonomy_key: format!("{l1} > {l2}"),
            method,
            confidence: conf,
            category: CategoryPath {
                l1: l1.into(),
                l2: l2.into(),
                ..Default::default()
            },
            review_tier: tier,
        }
    }

    fn fixture() -> (Dataset, Vec<ClassificationResult>) {
        let t = |sc: &str, supplier: &str, cc: &str, amount: f64| Transaction {
            spend_category_raw: sc.into(),
            supplier: supplier.into(),
            cost_center: cc.into(),
            amount,
            ..Default::default()
        };
        let dataset = Dataset {
            transactions: vec![
                t("SC1", "Grainger", "CC1", 100.0),
                t("SC1", "Uline", "CC1", 300.0),
                t("Misc ", "Nobody", "CC2", 50.0),
                t("Misc", "Other", "CC2", 25.0),
            ],
            passthrough_headers: vec!["Invoice".into()],
            passthrough: vec![
                vec!["I1".into()],
                vec!["I2".into()],
                vec!["I3".into()],
                vec!["I4".into()],
            ],
            column_count: 7,
        };
        let results = vec![
            result(Method::ScCodeMapping, "Facilities", "Supplies", 0.9, ReviewTier::AutoAccept),
            result(Method::SupplierRefinement, "Facilities", "Supplies", 0.8, ReviewTier::QuickReview),
            result(Method::Unmapped, "", "", 0.0, ReviewTier::ManualReview),
            result(Method::Unmapped, "", "", 0.0, ReviewTier::ManualReview),
        ];
        (dataset, results)
    }

    #[test]
    fn test_results_table_layout() {
        let (ds, results) = fixture();
        let table = results_table(&ds, &results, &columns());
        assert_eq!(table.headers[0], "Supplier");
        assert_eq!(table.headers[1], "Invoice");
        assert_eq!(table.column(SOURCE_COLUMN), Some(3));
        assert_eq!(table.headers.last().map(String::as_str), Some("ReviewTier"));
        let method_idx = table.column("ClassificationMethod").unwrap();
        assert_eq!(table.rows[2][method_idx], "unmapped");
        assert_eq!(table.rows[2][3], "Misc");
        assert_eq!(table.rows.len(), 4);
    }

    #[test]
    fn test_results_table_rounds_confidence() {
        let (ds, mut results) = fixture();
        results[1].confidence = 0.91266;
        let table = results_table(&ds, &results, &columns());
        let idx = table.column("Confidence").unwrap();
        assert_eq!(table.rows[1][idx], "0.913");
        assert_eq!(table.rows[0][idx], "0.9");
        assert_eq!(table.rows[2][idx], "0");
        assert_eq!(results[1].confidence, 0.91266);
    }

    #[test]
    fn test_build_report_aggregates() {
        let (ds, results) = fixture();
        let table = results_table(&ds, &results, &columns());
        let aggs = vec![
            Aggregation {
                name: "By Cost Center".into(),
                column: "Cost Center".into(),
                top_n: Some(1),
            },
            Aggregation {
                name: "Missing".into(),
                column: "No Such Column".into(),
                top_n: None,
            },
        ];
        let report = build_report(&ds, &results, &table, &aggs);

        assert_eq!(report.total_rows, 4);
        assert_eq!(report.method_count(Method::Unmapped), 2);
        assert_eq!(report.tier_count(ReviewTier::ManualReview), 2);
        assert_eq!(report.total_amount, 475.0);

        assert_eq!(report.spend_by_l1[0].l1, "Facilities");
        assert_eq!(report.spend_by_l1[0].total, 400.0);
        assert_eq!(report.spend_by_l1[0].unique_suppliers, 2);
        assert_eq!(report.spend_by_l1[0].avg_confidence, 0.85);

        assert_eq!(report.aggregations.len(), 1);
        assert_eq!(report.aggregations[0].groups.len(), 1);
        assert_eq!(report.aggregations[0].groups[0].value, "CC1");

        assert_eq!(report.unmapped, vec![("Misc".to_string(), 2)]);
    }

    #[test]
    fn test_summary_rows() {
        let (ds, results) = fixture();
        let table = results_table(&ds, &results, &columns());
        let report = build_report(&ds, &results, &table, &[]);
        let rows = summary_rows(&report, &columns());
        assert!(rows.contains(&("Unmapped".to_string(), "2 (50.0%)".to_string())));
        assert!(rows.contains(&("Total Amount".to_string(), "$475.00".to_string())));
        assert!(!rows.iter().any(|(m, _)| m == "Keyword Rules"));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("Spend by Cost Center"), "spend_by_cost_center");
        assert_eq!(file_stem("  Top-50 / Suppliers "), "top_50_suppliers");
    }

    #[test]
    fn test_write_report_files() {
        let (ds, results) = fixture();
        let cols = columns();
        let table = results_table(&ds, &results, &cols);
        let report = build_report(&ds, &results, &table, &[]);
        let manifest = RunManifest {
            client: "Test".into(),
            generated_at: "now".into(),
            input: PathBuf::from("in.csv"),
            rule_counts: RuleCounts {
                sc_mappings: 0,
                ambiguous_codes: 0,
                keyword_rules: 0,
                supplier_rules: 0,
                context_rules: 0,
                cost_center_rules: 0,
                override_rules: 0,
            },
            taxonomy_entries: 0,
            total_rows: 4,
            overrides_applied: 0,
            method_counts: BTreeMap::new(),
            review_tiers: BTreeMap::new(),
            advisories: Vec::new(),
            classify_secs: 0.0,
        };
        let tmp = tempfile::tempdir().unwrap();
        let dir = write_report(tmp.path(), "test", &table, &report, &cols, &manifest).unwrap();
        for f in [
            "all_results.csv",
            "manual_review.csv",
            "quick_review.csv",
            "summary.csv",
            "spend_by_l1.csv",
            "spend_by_l2.csv",
            "unmapped_sc_codes.csv",
            "run.json",
        ] {
            assert!(dir.join(f).exists(), "missing {f}");
        }
        let all = std::fs::read_to_string(dir.join("all_results.csv")).unwrap();
        assert_eq!(all.lines().count(), 5);
    }
}
