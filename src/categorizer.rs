use regex::Regex;

use crate::error::{Result, SpendError};
use crate::models::{ClassificationResult, Method, Transaction, UNCLASSIFIED};
use crate::reviewer::{self, Thresholds};
use crate::rules::{RuleRegistry, ScopedRule};
use crate::taxonomy::TaxonomyIndex;

// ---------------------------------------------------------------------------
// SC code extraction
// ---------------------------------------------------------------------------

/// Pulls the SC code out of a raw spend-category value such as
/// `"SC0250 Purchased Services"`.
#[derive(Debug, Clone)]
pub struct ScCodeExtractor {
    pattern: Regex,
}

impl ScCodeExtractor {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            SpendError::Config(format!("Invalid classification.sc_code_pattern '{pattern}': {e}"))
        })?;
        Ok(Self { pattern })
    }

    /// First match in the trimmed text, or the trimmed text itself.
    pub fn extract(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match self.pattern.find(trimmed) {
            Some(m) => m.as_str().to_string(),
            None => trimmed.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tiers
// ---------------------------------------------------------------------------

/// Pass-1 tiers in evaluation order. Tier 7 (supplier override) runs
/// separately over the whole batch, see `runner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    ScCodeMapping,
    SupplierRefinement,
    Keyword,
    ContextRefinement,
    CostCenterRefinement,
    AmbiguousFallback,
}

impl Tier {
    pub const WATERFALL: [Tier; 6] = [
        Tier::ScCodeMapping,
        Tier::SupplierRefinement,
        Tier::Keyword,
        Tier::ContextRefinement,
        Tier::CostCenterRefinement,
        Tier::AmbiguousFallback,
    ];

    pub fn method(&self) -> Method {
        match self {
            Self::ScCodeMapping => Method::ScCodeMapping,
            Self::SupplierRefinement => Method::SupplierRefinement,
            Self::Keyword => Method::Rule,
            Self::ContextRefinement => Method::ContextRefinement,
            Self::CostCenterRefinement => Method::CostCenterRefinement,
            Self::AmbiguousFallback => Method::ScCodeMappingAmbiguous,
        }
    }

    pub fn evaluate<'r>(
        &self,
        txn: &Transaction,
        sc_code: &str,
        registry: &'r RuleRegistry,
    ) -> Option<TierMatch<'r>> {
        let method = self.method();
        let hit = |taxonomy_key: &'r str, confidence: f64| TierMatch {
            taxonomy_key,
            confidence,
            method,
        };
        match self {
            Self::ScCodeMapping => registry
                .unambiguous(sc_code)
                .map(|m| hit(m.taxonomy_key.as_str(), m.confidence)),
            Self::SupplierRefinement => first_scoped(registry.supplier_rules(), sc_code, &txn.supplier)
                .map(|r| hit(r.taxonomy_key.as_str(), r.confidence)),
            Self::Keyword => {
                let text = format!("{} {}", txn.supplier, txn.line_memo);
                registry
                    .keyword_rules()
                    .iter()
                    .find(|r| r.pattern.is_match(&text))
                    .map(|r| hit(r.taxonomy_key.as_str(), r.confidence))
            }
            Self::ContextRefinement => {
                first_scoped(registry.context_rules(), sc_code, &txn.line_of_service)
                    .map(|r| hit(r.taxonomy_key.as_str(), r.confidence))
            }
            Self::CostCenterRefinement => {
                first_scoped(registry.cost_center_rules(), sc_code, &txn.cost_center)
                    .map(|r| hit(r.taxonomy_key.as_str(), r.confidence))
            }
            Self::AmbiguousFallback => registry
                .ambiguous(sc_code)
                .map(|m| hit(m.taxonomy_key.as_str(), m.confidence)),
        }
    }
}

/// First rule in configuration order that is scoped to `sc_code` and whose
/// pattern matches `field`.
fn first_scoped<'r>(rules: &'r [ScopedRule], sc_code: &str, field: &str) -> Option<&'r ScopedRule> {
    rules
        .iter()
        .find(|r| r.applies_to(sc_code) && r.pattern.is_match(field))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierMatch<'r> {
    pub taxonomy_key: &'r str,
    pub confidence: f64,
    pub method: Method,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ClassificationEngine<'a> {
    registry: &'a RuleRegistry,
    taxonomy: &'a TaxonomyIndex,
    extractor: ScCodeExtractor,
    thresholds: Thresholds,
}

impl<'a> ClassificationEngine<'a> {
    pub fn new(
        registry: &'a RuleRegistry,
        taxonomy: &'a TaxonomyIndex,
        extractor: ScCodeExtractor,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            registry,
            taxonomy,
            extractor,
            thresholds,
        }
    }

    pub fn registry(&self) -> &'a RuleRegistry {
        self.registry
    }

    pub fn taxonomy(&self) -> &'a TaxonomyIndex {
        self.taxonomy
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn classify(&self, txn: &Transaction) -> ClassificationResult {
        self.classify_observed(txn, |_| {})
    }

    /// Runs tiers 1–6, calling `on_tier` just before each tier is evaluated.
    /// Evaluation stops at the first tier that matches.
    pub fn classify_observed(
        &self,
        txn: &Transaction,
        mut on_tier: impl FnMut(Tier),
    ) -> ClassificationResult {
        let sc_code = self.extractor.extract(&txn.spend_category_raw);
        let hit = Tier::WATERFALL.iter().find_map(|tier| {
            on_tier(*tier);
            tier.evaluate(txn, &sc_code, self.registry)
        });

        let (taxonomy_key, method, confidence) = match hit {
            Some(m) => (m.taxonomy_key, m.method, m.confidence),
            None => (UNCLASSIFIED, Method::Unmapped, 0.0),
        };

        ClassificationResult {
            category: self.taxonomy.resolve(taxonomy_key),
            review_tier: reviewer::assign(method, confidence, self.thresholds),
            taxonomy_key: taxonomy_key.to_string(),
            method,
            confidence,
            sc_code,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{CategoryPath, ReviewTier};
    use crate::rules::{KeywordRuleFile, RefinementFile, ScMappingFile};

    pub const MAPPING: &str = r#"
mappings:
  SC0207:
    name: Operating Supplies
    taxonomy_key: Facilities > Operating Supplies and Equipment
    confidence: 0.9
  SC0250:
    name: Purchased Services
    taxonomy_key: Professional Services
    confidence: 0.6
    ambiguous: true
"#;

    pub const KEYWORDS: &str = r#"
rules:
  - { pattern: "glove", category: "Medical > Gloves" }
  - { pattern: "surgical", category: "Medical > Surgical", confidence: 0.9 }
"#;

    pub const REFINEMENT: &str = r#"
supplier_rules:
  - sc_codes: [SC0250]
    supplier_pattern: "epic systems"
    taxonomy_key: "IT & Telecoms > Software > Application Software"
    confidence: 0.92
  - sc_codes: [SC0250]
    supplier_pattern: "epic"
    taxonomy_key: "Medical > Medical Services"
    confidence: 0.8
context_rules:
  - sc_codes: [SC0250]
    line_of_service_pattern: "laboratory"
    taxonomy_key: "Medical > Medical Services"
    confidence: 0.8
cost_center_rules:
  - sc_codes: [SC0250]
    cost_center_pattern: "^CC9"
    taxonomy_key: "Facilities > Cleaning > Cleaning Services"
    confidence: 0.7
supplier_override_rules:
  - supplier_pattern: "cintas"
    override_from_l1: [Facilities]
    taxonomy_key: "Facilities > Cleaning > Cleaning Services"
    confidence: 0.9
"#;

    pub fn taxonomy() -> TaxonomyIndex {
        let entry = |key: &str, l1: &str, l2: &str, l3: &str, l4: &str| {
            (
                key.to_string(),
                CategoryPath {
                    l1: l1.into(),
                    l2: l2.into(),
                    l3: l3.into(),
                    l4: l4.into(),
                    l5: String::new(),
                },
            )
        };
        TaxonomyIndex::new(vec![
            entry("Facilities > Operating Supplies and Equipment", "Facilities", "Operating Supplies and Equipment", "", ""),
            entry("Facilities > Cleaning > Cleaning Services", "Facilities", "Cleaning", "Cleaning Services", ""),
            entry("IT & Telecoms > Software > Application Software", "IT & Telecoms", "Software", "Application Software", ""),
            entry("Medical > Gloves", "Medical", "Gloves", "", ""),
            entry("Medical > Surgical", "Medical", "Surgical", "", ""),
            entry("Medical > Medical Services", "Medical", "Medical Services", "", ""),
            entry("Professional Services", "Professional Services", "", "", ""),
        ])
    }

    pub fn registry_from(mapping: &str, keywords: &str, refinement: &str) -> RuleRegistry {
        let mapping: ScMappingFile = serde_yaml::from_str(mapping).unwrap();
        let keywords: KeywordRuleFile = serde_yaml::from_str(keywords).unwrap();
        let refinement: RefinementFile = serde_yaml::from_str(refinement).unwrap();
        RuleRegistry::load(&mapping, &keywords, &refinement, &taxonomy().keys()).unwrap()
    }

    pub fn registry() -> RuleRegistry {
        registry_from(MAPPING, KEYWORDS, REFINEMENT)
    }

    pub const THRESHOLDS: Thresholds = Thresholds {
        high: 0.95,
        medium: 0.75,
    };

    pub fn txn(spend_category: &str, supplier: &str, memo: &str) -> Transaction {
        Transaction {
            spend_category_raw: spend_category.into(),
            supplier: supplier.into(),
            line_memo: memo.into(),
            ..Default::default()
        }
    }

    fn engine<'a>(reg: &'a RuleRegistry, tax: &'a TaxonomyIndex) -> ClassificationEngine<'a> {
        ClassificationEngine::new(reg, tax, ScCodeExtractor::new(r"SC\d+").unwrap(), THRESHOLDS)
    }

    #[test]
    fn test_extract_sc_code() {
        let ex = ScCodeExtractor::new(r"SC\d+").unwrap();
        assert_eq!(ex.extract("  SC0250 Purchased Services "), "SC0250");
        assert_eq!(ex.extract("Services (SC0207)"), "SC0207");
        assert_eq!(ex.extract("  Misc Spend  "), "Misc Spend");
        assert_eq!(ex.extract(""), "");
    }

    #[test]
    fn test_invalid_extraction_pattern() {
        assert!(ScCodeExtractor::new("SC(").is_err());
    }

    #[test]
    fn test_direct_mapping() {
        let (reg, tax) = (registry(), taxonomy());
        let r = engine(&reg, &tax).classify(&txn("SC0207 Supplies", "Grainger", "bolts"));
        assert_eq!(r.method, Method::ScCodeMapping);
        assert_eq!(r.confidence, 0.9);
        assert_eq!(r.category.l1, "Facilities");
        assert_eq!(r.review_tier, ReviewTier::AutoAccept);
    }

    #[test]
    fn test_supplier_refinement_scenario() {
        let (reg, tax) = (registry(), taxonomy());
        let r = engine(&reg, &tax).classify(&txn("SC0250 Purchased Services", "Epic Systems Inc", "license"));
        assert_eq!(r.method, Method::SupplierRefinement);
        assert_eq!(r.taxonomy_key, "IT & Telecoms > Software > Application Software");
        assert_eq!(r.category.l3, "Application Software");
        assert_eq!(r.confidence, 0.92);
    }

    #[test]
    fn test_keyword_rule_scenario() {
        let (reg, tax) = (registry(), taxonomy());
        let r = engine(&reg, &tax).classify(&txn("SC7777", "ACME Corp", "surgical gloves"));
        assert_eq!(r.method, Method::Rule);
        // "glove" is listed before "surgical"
        assert_eq!(r.taxonomy_key, "Medical > Gloves");
        assert_eq!(r.confidence, 0.95);
    }

    #[test]
    fn test_keyword_matches_across_supplier_and_memo() {
        let (reg, tax) = (registry(), taxonomy());
        let r = engine(&reg, &tax).classify(&txn("X", "Surgical Direct", ""));
        assert_eq!(r.taxonomy_key, "Medical > Surgical");
    }

    #[test]
    fn test_ambiguous_fallback_scenario() {
        let (reg, tax) = (registry(), taxonomy());
        let r = engine(&reg, &tax).classify(&txn("SC0250", "Unknown Vendor", "misc"));
        assert_eq!(r.method, Method::ScCodeMappingAmbiguous);
        assert_eq!(r.confidence, 0.6);
        assert_eq!(r.taxonomy_key, "Professional Services");
        assert_eq!(r.review_tier, ReviewTier::ManualReview);
    }

    #[test]
    fn test_unmapped_scenario() {
        let (reg, tax) = (registry(), taxonomy());
        let r = engine(&reg, &tax).classify(&txn("Miscellaneous Spend", "Nobody", "nothing"));
        assert_eq!(r.method, Method::Unmapped);
        assert_eq!(r.taxonomy_key, UNCLASSIFIED);
        assert_eq!(r.confidence, 0.0);
        assert_eq!(r.sc_code, "Miscellaneous Spend");
        assert_eq!(r.category, CategoryPath::default());
        assert_eq!(r.review_tier, ReviewTier::ManualReview);
    }

    #[test]
    fn test_context_and_cost_center_tiers() {
        let (reg, tax) = (registry(), taxonomy());
        let eng = engine(&reg, &tax);
        let mut t = txn("SC0250", "Someone", "");
        t.line_of_service = "Clinical Laboratory".into();
        assert_eq!(eng.classify(&t).method, Method::ContextRefinement);

        let mut t = txn("SC0250", "Someone", "");
        t.cost_center = "CC9100 Housekeeping".into();
        let r = eng.classify(&t);
        assert_eq!(r.method, Method::CostCenterRefinement);
        assert_eq!(r.category.l2, "Cleaning");

        // scoping: same cost center under a code the rule does not list
        let mut t = txn("SC0999", "Someone", "");
        t.cost_center = "CC9100".into();
        assert_eq!(eng.classify(&t).method, Method::Unmapped);
    }

    #[test]
    fn test_short_circuit_stops_at_matching_tier() {
        let (reg, tax) = (registry(), taxonomy());
        let eng = engine(&reg, &tax);

        let mut seen = Vec::new();
        eng.classify_observed(&txn("SC0207", "Epic Systems", "gloves"), |t| seen.push(t));
        assert_eq!(seen, vec![Tier::ScCodeMapping]);

        let mut seen = Vec::new();
        eng.classify_observed(&txn("SC0250", "Epic Systems", "gloves"), |t| seen.push(t));
        assert_eq!(seen, vec![Tier::ScCodeMapping, Tier::SupplierRefinement]);

        let mut seen = Vec::new();
        eng.classify_observed(&txn("nothing", "nobody", ""), |t| seen.push(t));
        assert_eq!(seen, Tier::WATERFALL.to_vec());
    }

    #[test]
    fn test_ordinal_tie_break_ignores_specificity() {
        let refinement = r#"
supplier_rules:
  - { sc_codes: [SC0250], supplier_pattern: "epic", taxonomy_key: "Medical > Medical Services", confidence: 0.8 }
  - { sc_codes: [SC0250], supplier_pattern: "epic systems inc", taxonomy_key: "IT & Telecoms > Software > Application Software", confidence: 0.92 }
"#;
        let reg = registry_from(MAPPING, "rules: []", refinement);
        let tax = taxonomy();
        let r = engine(&reg, &tax).classify(&txn("SC0250", "Epic Systems Inc", ""));
        assert_eq!(r.taxonomy_key, "Medical > Medical Services");
    }

    #[test]
    fn test_ambiguous_code_defers_to_supplier_rule() {
        let (reg, tax) = (registry(), taxonomy());
        assert!(reg.ambiguous("SC0250").is_some());
        let r = engine(&reg, &tax).classify(&txn("SC0250", "EPIC SYSTEMS", ""));
        assert_eq!(r.method, Method::SupplierRefinement);
    }

    #[test]
    fn test_unknown_taxonomy_key_keeps_key_with_empty_path() {
        let keywords = r#"
rules:
  - { pattern: "widget", category: "Not > In > Table" }
"#;
        let reg = registry_from(MAPPING, keywords, "{}");
        assert_eq!(reg.advisories().len(), 1);
        let tax = taxonomy();
        let r = engine(&reg, &tax).classify(&txn("", "Widget Co", ""));
        assert_eq!(r.method, Method::Rule);
        assert_eq!(r.taxonomy_key, "Not > In > Table");
        assert_eq!(r.category, CategoryPath::default());
    }

    #[test]
    fn test_empty_fields_never_fail() {
        let (reg, tax) = (registry(), taxonomy());
        let r = engine(&reg, &tax).classify(&Transaction::default());
        assert_eq!(r.method, Method::Unmapped);
        assert!((0.0..=1.0).contains(&r.confidence));
    }
}
