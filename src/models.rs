use std::fmt;

use serde::Serialize;

/// Taxonomy key assigned when no tier matches.
pub const UNCLASSIFIED: &str = "Unclassified";

/// One input row. Identity is its position in the batch.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    pub spend_category_raw: String,
    pub supplier: String,
    pub line_memo: String,
    pub line_of_service: String,
    pub cost_center: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    ScCodeMapping,
    SupplierRefinement,
    Rule,
    ContextRefinement,
    CostCenterRefinement,
    ScCodeMappingAmbiguous,
    SupplierOverride,
    Unmapped,
}

impl Method {
    /// Reporting order: waterfall order, override, then unmapped.
    pub const ALL: [Method; 8] = [
        Method::ScCodeMapping,
        Method::SupplierRefinement,
        Method::Rule,
        Method::ContextRefinement,
        Method::CostCenterRefinement,
        Method::ScCodeMappingAmbiguous,
        Method::SupplierOverride,
        Method::Unmapped,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::ScCodeMapping => "sc_code_mapping",
            Self::SupplierRefinement => "supplier_refinement",
            Self::Rule => "rule",
            Self::ContextRefinement => "context_refinement",
            Self::CostCenterRefinement => "cost_center_refinement",
            Self::ScCodeMappingAmbiguous => "sc_code_mapping_ambiguous",
            Self::SupplierOverride => "supplier_override",
            Self::Unmapped => "unmapped",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::ScCodeMapping => "SC Code Mapping (direct)",
            Self::SupplierRefinement => "Supplier Refinement",
            Self::Rule => "Keyword Rules",
            Self::ContextRefinement => "Context Refinement (LoS)",
            Self::CostCenterRefinement => "Cost Center Refinement",
            Self::ScCodeMappingAmbiguous => "SC Code Mapping (ambiguous fallback)",
            Self::SupplierOverride => "Supplier Override (post-classification)",
            Self::Unmapped => "Unmapped",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ReviewTier {
    #[serde(rename = "Auto-Accept")]
    AutoAccept,
    #[serde(rename = "Quick Review")]
    QuickReview,
    #[serde(rename = "Manual Review")]
    ManualReview,
}

impl ReviewTier {
    pub const ALL: [ReviewTier; 3] = [
        ReviewTier::AutoAccept,
        ReviewTier::QuickReview,
        ReviewTier::ManualReview,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::AutoAccept => "Auto-Accept",
            Self::QuickReview => "Quick Review",
            Self::ManualReview => "Manual Review",
        }
    }
}

impl fmt::Display for ReviewTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Five-level category path. Levels 4 and 5 are often empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategoryPath {
    pub l1: String,
    pub l2: String,
    pub l3: String,
    pub l4: String,
    pub l5: String,
}

impl CategoryPath {
    pub fn levels(&self) -> [&str; 5] {
        [&self.l1, &self.l2, &self.l3, &self.l4, &self.l5]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub sc_code: String,
    pub taxonomy_key: String,
    pub method: Method,
    pub confidence: f64,
    pub category: CategoryPath,
    pub review_tier: ReviewTier,
}

impl ClassificationResult {
    /// Confidence as written to reports.
    pub fn rounded_confidence(&self) -> f64 {
        round3(self.confidence)
    }
}

pub fn round3(val: f64) -> f64 {
    (val * 1000.0).round() / 1000.0
}
