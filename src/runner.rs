use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::info;

use crate::categorizer::ClassificationEngine;
use crate::error::{Result, SpendError};
use crate::models::{ClassificationResult, Method, Transaction};
use crate::reviewer;
use crate::rules::OverrideRule;

/// Output of pass 1: one provisional result per transaction, in input order.
/// Only `BatchRunner::classify` builds one, and only after every row has been
/// through tiers 1–6, so holding one means pass 2 may start.
#[derive(Debug)]
pub struct ProvisionalBatch {
    results: Vec<ClassificationResult>,
}

impl ProvisionalBatch {
    #[cfg(test)]
    pub fn results(&self) -> &[ClassificationResult] {
        &self.results
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}

/// Final results after both passes.
#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<ClassificationResult>,
    /// Row-level override applications, counting re-overrides.
    pub overrides_applied: usize,
}

impl BatchOutcome {
    pub fn method_counts(&self) -> BTreeMap<Method, usize> {
        count_methods(&self.results)
    }
}

fn count_methods(results: &[ClassificationResult]) -> BTreeMap<Method, usize> {
    let mut counts = BTreeMap::new();
    for r in results {
        *counts.entry(r.method).or_insert(0) += 1;
    }
    counts
}

pub struct BatchRunner<'a> {
    engine: ClassificationEngine<'a>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(engine: ClassificationEngine<'a>) -> Self {
        Self { engine }
    }

    /// Pass 1 then pass 2. An empty batch is a configuration error.
    pub fn run(&self, transactions: &[Transaction]) -> Result<BatchOutcome> {
        if transactions.is_empty() {
            return Err(SpendError::EmptyDataset("empty transaction batch".into()));
        }
        let provisional = self.classify(transactions);
        self.apply_overrides(transactions, provisional)
    }

    /// Pass 1: tiers 1–6 for every row, in parallel. Rows share only the
    /// read-only registry and taxonomy.
    pub fn classify(&self, transactions: &[Transaction]) -> ProvisionalBatch {
        let results: Vec<ClassificationResult> = transactions
            .par_iter()
            .map(|txn| self.engine.classify(txn))
            .collect();

        let counts = count_methods(&results);
        for method in Method::ALL {
            if method == Method::SupplierOverride {
                continue;
            }
            info!(
                method = method.key(),
                rows = counts.get(&method).copied().unwrap_or(0),
                "pass 1"
            );
        }
        ProvisionalBatch { results }
    }

    /// Pass 2 (tier 7): supplier overrides applied rule by rule, each rule a
    /// full scan over the batch before the next one runs. A later rule may
    /// re-override a row an earlier rule already changed.
    pub fn apply_overrides(
        &self,
        transactions: &[Transaction],
        batch: ProvisionalBatch,
    ) -> Result<BatchOutcome> {
        if batch.len() != transactions.len() {
            return Err(SpendError::Validation(format!(
                "override pass needs a provisional result for every row ({} of {})",
                batch.len(),
                transactions.len()
            )));
        }
        let mut results = batch.results;
        let mut overrides_applied = 0;
        for rule in self.engine.registry().override_rules() {
            let hits = self.apply_override_rule(rule, transactions, &mut results);
            info!(rule = rule.ordinal, rows = hits, "supplier override");
            overrides_applied += hits;
        }
        Ok(BatchOutcome {
            results,
            overrides_applied,
        })
    }

    fn apply_override_rule(
        &self,
        rule: &OverrideRule,
        transactions: &[Transaction],
        results: &mut [ClassificationResult],
    ) -> usize {
        let taxonomy = self.engine.taxonomy();
        let thresholds = self.engine.thresholds();
        let category = taxonomy.resolve(&rule.taxonomy_key);
        results
            .par_iter_mut()
            .zip(transactions.par_iter())
            .map(|(result, txn)| {
                if !rule.override_from_l1.contains(&result.category.l1)
                    || !rule.supplier_pattern.is_match(&txn.supplier)
                {
                    return 0;
                }
                result.taxonomy_key = rule.taxonomy_key.clone();
                result.method = Method::SupplierOverride;
                result.confidence = rule.confidence;
                result.category = category.clone();
                result.review_tier = reviewer::assign(result.method, result.confidence, thresholds);
                1
            })
            .sum()
    }
}
