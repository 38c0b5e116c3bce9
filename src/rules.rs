use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::error::{Result, SpendError};

const DEFAULT_MAPPING_CONFIDENCE: f64 = 0.85;
const DEFAULT_KEYWORD_CONFIDENCE: f64 = 0.95;

// ---------------------------------------------------------------------------
// Rule file shapes (as read from YAML, before validation)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScMappingFile {
    #[serde(default)]
    pub mappings: Mapping,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeywordRuleFile {
    #[serde(default)]
    pub rules: Vec<Mapping>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefinementFile {
    #[serde(default)]
    pub supplier_rules: Vec<Mapping>,
    #[serde(default)]
    pub context_rules: Vec<Mapping>,
    #[serde(default)]
    pub cost_center_rules: Vec<Mapping>,
    #[serde(default)]
    pub supplier_override_rules: Vec<Mapping>,
}

fn read_yaml<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    let value: Option<T> = serde_yaml::from_str(&content)
        .map_err(|e| SpendError::Config(format!("Failed to parse {}: {e}", path.display())))?;
    Ok(value.unwrap_or_default())
}

pub fn load_sc_mapping_file(path: &Path) -> Result<ScMappingFile> {
    read_yaml(path)
}

pub fn load_keyword_rules_file(path: &Path) -> Result<KeywordRuleFile> {
    read_yaml(path)
}

pub fn load_refinement_rules_file(path: &Path) -> Result<RefinementFile> {
    read_yaml(path)
}

// ---------------------------------------------------------------------------
// Compiled rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScMapping {
    pub taxonomy_key: String,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct KeywordRule {
    pub ordinal: usize,
    pub pattern: Regex,
    pub taxonomy_key: String,
    pub confidence: f64,
}

/// A refinement rule only considered for rows whose SC code is in `sc_codes`.
#[derive(Debug, Clone)]
pub struct ScopedRule {
    pub ordinal: usize,
    pub sc_codes: HashSet<String>,
    pub pattern: Regex,
    pub taxonomy_key: String,
    pub confidence: f64,
}

impl ScopedRule {
    pub fn applies_to(&self, sc_code: &str) -> bool {
        self.sc_codes.contains(sc_code)
    }
}

#[derive(Debug, Clone)]
pub struct OverrideRule {
    pub ordinal: usize,
    pub supplier_pattern: Regex,
    pub override_from_l1: HashSet<String>,
    pub taxonomy_key: String,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Advisories
// ---------------------------------------------------------------------------

/// Non-fatal reference-data inconsistency, surfaced for operator review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Advisory {
    MissingTaxonomyKey { source: String, key: String },
    UnknownScCode { source: String, code: String },
    DuplicateSupplierPattern {
        first: usize,
        second: usize,
        sc_code: String,
        pattern: String,
    },
    /// A later supplier rule's regex matches one `|` alternative of an
    /// earlier rule sharing an SC code, and the two disagree on the key.
    OverlappingSupplierPattern {
        first: usize,
        second: usize,
        alternative: String,
    },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingTaxonomyKey { source, key } => {
                write!(f, "{source} -> unknown taxonomy key '{key}'")
            }
            Self::UnknownScCode { source, code } => {
                write!(f, "{source} references unmapped SC code '{code}'")
            }
            Self::DuplicateSupplierPattern {
                first,
                second,
                sc_code,
                pattern,
            } => write!(
                f,
                "supplier_rules[{first}] and [{second}] share SC={sc_code}, pattern='{pattern}'"
            ),
            Self::OverlappingSupplierPattern {
                first,
                second,
                alternative,
            } => write!(
                f,
                "supplier_rules[{first}] alternative '{alternative}' is also matched by supplier_rules[{second}] with a different taxonomy key"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Field access with section/index-aware errors
// ---------------------------------------------------------------------------

struct RawRule<'a> {
    section: &'static str,
    index: usize,
    label: String,
    fields: &'a Mapping,
}

impl<'a> RawRule<'a> {
    fn new(section: &'static str, index: usize, fields: &'a Mapping) -> Self {
        Self {
            section,
            index,
            label: format!("{section}[{index}]"),
            fields,
        }
    }

    fn keyed(section: &'static str, index: usize, key: &str, fields: &'a Mapping) -> Self {
        Self {
            section,
            index,
            label: format!("{section}['{key}']"),
            fields,
        }
    }

    fn invalid(&self, msg: String) -> SpendError {
        SpendError::Validation(format!("{} {msg}", self.label))
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    fn require(&self, key: &str) -> Result<&'a Value> {
        self.get(key)
            .ok_or_else(|| self.invalid(format!("missing required key '{key}'")))
    }

    fn text(&self, key: &str) -> Result<String> {
        scalar_text(self.require(key)?)
            .ok_or_else(|| self.invalid(format!("key '{key}' must be text")))
    }

    fn confidence(&self, key: &str, default: Option<f64>) -> Result<f64> {
        let value = match (self.get(key), default) {
            (Some(v), _) => v
                .as_f64()
                .ok_or_else(|| self.invalid(format!("key '{key}' must be a number")))?,
            (None, Some(d)) => d,
            (None, None) => return Err(self.invalid(format!("missing required key '{key}'"))),
        };
        if !(value > 0.0 && value <= 1.0) {
            return Err(self.invalid(format!("confidence {value} out of range (0, 1]")));
        }
        Ok(value)
    }

    /// Only a YAML bool counts; `yes` or `"true"` are rejected rather than
    /// read as false.
    fn flag(&self, key: &str) -> Result<bool> {
        match self.get(key) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(self.invalid(format!("key '{key}' must be true or false"))),
        }
    }

    fn text_set(&self, key: &str) -> Result<HashSet<String>> {
        let value = self.require(key)?;
        let items = match value {
            Value::Sequence(seq) => seq.iter().collect::<Vec<_>>(),
            other => vec![other],
        };
        items
            .into_iter()
            .map(|v| {
                scalar_text(v).ok_or_else(|| self.invalid(format!("key '{key}' must list text values")))
            })
            .collect()
    }

    /// SC codes are compared trimmed, the same way codes extracted from rows are.
    fn code_set(&self, key: &str) -> Result<HashSet<String>> {
        Ok(self
            .text_set(key)?
            .into_iter()
            .map(|c| c.trim().to_string())
            .collect())
    }

    fn pattern(&self, key: &str) -> Result<Regex> {
        let source = self.text(key)?;
        compile_pattern(&source).map_err(|e| SpendError::InvalidPattern {
            section: self.section.to_string(),
            index: self.index,
            pattern: source.clone(),
            source: e,
        })
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Case-insensitive, unanchored.
pub fn compile_pattern(source: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(source).case_insensitive(true).build()
}

// ---------------------------------------------------------------------------
// RuleRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuleCounts {
    pub sc_mappings: usize,
    pub ambiguous_codes: usize,
    pub keyword_rules: usize,
    pub supplier_rules: usize,
    pub context_rules: usize,
    pub cost_center_rules: usize,
    pub override_rules: usize,
}

/// Validated, compiled rule sets. Immutable after `load`.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    unambiguous: HashMap<String, ScMapping>,
    ambiguous: HashMap<String, ScMapping>,
    keyword_rules: Vec<KeywordRule>,
    supplier_rules: Vec<ScopedRule>,
    context_rules: Vec<ScopedRule>,
    cost_center_rules: Vec<ScopedRule>,
    override_rules: Vec<OverrideRule>,
    advisories: Vec<Advisory>,
}

impl RuleRegistry {
    pub fn load(
        mapping: &ScMappingFile,
        keywords: &KeywordRuleFile,
        refinement: &RefinementFile,
        taxonomy_keys: &HashSet<String>,
    ) -> Result<Self> {
        let mut registry = RuleRegistry::default();

        for (i, (code, info)) in mapping.mappings.iter().enumerate() {
            let code = scalar_text(code)
                .map(|c| c.trim().to_string())
                .ok_or_else(|| SpendError::Validation("mappings: SC code keys must be text".into()))?;
            let fields = info.as_mapping().ok_or_else(|| {
                SpendError::Validation(format!("mappings['{code}'] must be a mapping"))
            })?;
            let raw = RawRule::keyed("mappings", i, &code, fields);
            raw.text("name")?;
            let entry = ScMapping {
                taxonomy_key: raw.text("taxonomy_key")?,
                confidence: raw.confidence("confidence", Some(DEFAULT_MAPPING_CONFIDENCE))?,
            };
            let ambiguous = raw.flag("ambiguous")?;
            let target = if ambiguous {
                &mut registry.ambiguous
            } else {
                &mut registry.unambiguous
            };
            if target.insert(code.clone(), entry).is_some() {
                return Err(SpendError::Validation(format!("mappings: duplicate SC code '{code}'")));
            }
        }

        for (i, fields) in keywords.rules.iter().enumerate() {
            let raw = RawRule::new("keyword_rules", i, fields);
            raw.require("pattern")?;
            raw.require("category")?;
            registry.keyword_rules.push(KeywordRule {
                ordinal: i,
                pattern: raw.pattern("pattern")?,
                taxonomy_key: raw.text("category")?,
                confidence: raw.confidence("confidence", Some(DEFAULT_KEYWORD_CONFIDENCE))?,
            });
        }

        registry.supplier_rules =
            compile_scoped("supplier_rules", &refinement.supplier_rules, "supplier_pattern")?;
        registry.context_rules =
            compile_scoped("context_rules", &refinement.context_rules, "line_of_service_pattern")?;
        registry.cost_center_rules =
            compile_scoped("cost_center_rules", &refinement.cost_center_rules, "cost_center_pattern")?;

        for (i, fields) in refinement.supplier_override_rules.iter().enumerate() {
            let raw = RawRule::new("supplier_override_rules", i, fields);
            for key in ["supplier_pattern", "override_from_l1", "taxonomy_key", "confidence"] {
                raw.require(key)?;
            }
            registry.override_rules.push(OverrideRule {
                ordinal: i,
                supplier_pattern: raw.pattern("supplier_pattern")?,
                override_from_l1: raw.text_set("override_from_l1")?,
                taxonomy_key: raw.text("taxonomy_key")?,
                confidence: raw.confidence("confidence", None)?,
            });
        }

        registry.advisories = registry.missing_taxonomy_keys(taxonomy_keys);
        for advisory in &registry.advisories {
            warn!("{advisory}");
        }
        debug!(counts = ?registry.counts(), "rule registry loaded");
        Ok(registry)
    }

    fn missing_taxonomy_keys(&self, taxonomy_keys: &HashSet<String>) -> Vec<Advisory> {
        let mut refs: Vec<(String, &str)> = Vec::new();
        let mut codes: Vec<(&String, &ScMapping)> =
            self.unambiguous.iter().chain(self.ambiguous.iter()).collect();
        codes.sort_by(|a, b| a.0.cmp(b.0));
        for (code, info) in codes {
            refs.push((format!("sc_mapping '{code}'"), &info.taxonomy_key));
        }
        for r in &self.keyword_rules {
            refs.push((format!("keyword_rules[{}]", r.ordinal), &r.taxonomy_key));
        }
        for (section, rules) in self.scoped_sections() {
            for r in rules {
                refs.push((format!("{section}[{}]", r.ordinal), &r.taxonomy_key));
            }
        }
        for r in &self.override_rules {
            refs.push((format!("supplier_override_rules[{}]", r.ordinal), &r.taxonomy_key));
        }

        refs.into_iter()
            .filter(|(_, key)| !taxonomy_keys.contains(*key))
            .map(|(source, key)| Advisory::MissingTaxonomyKey {
                source,
                key: key.to_string(),
            })
            .collect()
    }

    fn scoped_sections(&self) -> [(&'static str, &[ScopedRule]); 3] {
        [
            ("supplier_rules", self.supplier_rules.as_slice()),
            ("context_rules", self.context_rules.as_slice()),
            ("cost_center_rules", self.cost_center_rules.as_slice()),
        ]
    }

    /// Rule-hygiene checks beyond load validation: refinement rules scoped to
    /// codes the mapping does not know, and repeated supplier patterns.
    pub fn lint(&self) -> Vec<Advisory> {
        let mut out = Vec::new();
        for (section, rules) in self.scoped_sections() {
            for r in rules {
                let mut codes: Vec<&String> = r
                    .sc_codes
                    .iter()
                    .filter(|c| !self.unambiguous.contains_key(*c) && !self.ambiguous.contains_key(*c))
                    .collect();
                codes.sort();
                for code in codes {
                    out.push(Advisory::UnknownScCode {
                        source: format!("{section}[{}]", r.ordinal),
                        code: code.clone(),
                    });
                }
            }
        }

        let mut seen: HashMap<(String, String), usize> = HashMap::new();
        for r in &self.supplier_rules {
            let pattern = r.pattern.as_str().to_lowercase();
            let mut codes: Vec<&String> = r.sc_codes.iter().collect();
            codes.sort();
            for code in codes {
                let key = (code.clone(), pattern.clone());
                match seen.get(&key) {
                    Some(&first) => out.push(Advisory::DuplicateSupplierPattern {
                        first,
                        second: r.ordinal,
                        sc_code: code.clone(),
                        pattern: r.pattern.as_str().to_string(),
                    }),
                    None => {
                        seen.insert(key, r.ordinal);
                    }
                }
            }
        }

        out.extend(self.overlapping_supplier_patterns());
        out
    }

    fn overlapping_supplier_patterns(&self) -> Vec<Advisory> {
        let mut out = Vec::new();
        for (i, earlier) in self.supplier_rules.iter().enumerate() {
            for later in &self.supplier_rules[i + 1..] {
                if earlier.taxonomy_key == later.taxonomy_key
                    || earlier.sc_codes.is_disjoint(&later.sc_codes)
                {
                    continue;
                }
                for alternative in earlier.pattern.as_str().split('|') {
                    if later.pattern.is_match(alternative) {
                        out.push(Advisory::OverlappingSupplierPattern {
                            first: earlier.ordinal,
                            second: later.ordinal,
                            alternative: alternative.to_string(),
                        });
                    }
                }
            }
        }
        out
    }

    pub fn unambiguous(&self, sc_code: &str) -> Option<&ScMapping> {
        self.unambiguous.get(sc_code)
    }

    pub fn ambiguous(&self, sc_code: &str) -> Option<&ScMapping> {
        self.ambiguous.get(sc_code)
    }

    pub fn keyword_rules(&self) -> &[KeywordRule] {
        &self.keyword_rules
    }

    pub fn supplier_rules(&self) -> &[ScopedRule] {
        &self.supplier_rules
    }

    pub fn context_rules(&self) -> &[ScopedRule] {
        &self.context_rules
    }

    pub fn cost_center_rules(&self) -> &[ScopedRule] {
        &self.cost_center_rules
    }

    pub fn override_rules(&self) -> &[OverrideRule] {
        &self.override_rules
    }

    pub fn advisories(&self) -> &[Advisory] {
        &self.advisories
    }

    pub fn counts(&self) -> RuleCounts {
        RuleCounts {
            sc_mappings: self.unambiguous.len() + self.ambiguous.len(),
            ambiguous_codes: self.ambiguous.len(),
            keyword_rules: self.keyword_rules.len(),
            supplier_rules: self.supplier_rules.len(),
            context_rules: self.context_rules.len(),
            cost_center_rules: self.cost_center_rules.len(),
            override_rules: self.override_rules.len(),
        }
    }
}

fn compile_scoped(
    section: &'static str,
    rules: &[Mapping],
    pattern_key: &str,
) -> Result<Vec<ScopedRule>> {
    rules
        .iter()
        .enumerate()
        .map(|(i, fields)| {
            let raw = RawRule::new(section, i, fields);
            for key in ["sc_codes", pattern_key, "taxonomy_key", "confidence"] {
                raw.require(key)?;
            }
            Ok(ScopedRule {
                ordinal: i,
                sc_codes: raw.code_set("sc_codes")?,
                pattern: raw.pattern(pattern_key)?,
                taxonomy_key: raw.text("taxonomy_key")?,
                confidence: raw.confidence("confidence", None)?,
            })
        })
        .collect()
}
