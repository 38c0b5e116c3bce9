use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::categorizer::ScCodeExtractor;
use crate::error::{Result, SpendError};
use crate::reviewer::Thresholds;

const REQUIRED_SECTIONS: [&str; 4] = ["client", "paths", "columns", "classification"];
const REQUIRED_PATHS: [&str; 7] = [
    "input",
    "sc_mapping",
    "taxonomy",
    "keyword_rules",
    "refinement_rules",
    "output_dir",
    "output_prefix",
];
const REQUIRED_COLUMNS: [&str; 6] = [
    "spend_category",
    "supplier",
    "line_memo",
    "line_of_service",
    "cost_center",
    "amount",
];
const REQUIRED_CLASSIFICATION: [&str; 3] = ["sc_code_pattern", "confidence_high", "confidence_medium"];

/// Per-client configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub client: Client,
    pub paths: Paths,
    pub columns: Columns,
    pub classification: Classification,
    #[serde(default)]
    pub aggregations: Vec<Aggregation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    #[serde(default = "default_client_name")]
    pub name: String,
}

fn default_client_name() -> String {
    "Client".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paths {
    pub input: String,
    pub sc_mapping: String,
    pub taxonomy: String,
    pub keyword_rules: String,
    pub refinement_rules: String,
    pub output_dir: String,
    pub output_prefix: String,
}

/// Input CSV header names for each transaction field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Columns {
    pub spend_category: String,
    pub supplier: String,
    pub line_memo: String,
    pub line_of_service: String,
    pub cost_center: String,
    pub amount: String,
    #[serde(default)]
    pub passthrough: Vec<String>,
}

impl Columns {
    /// (config key, header) pairs for the six required columns.
    pub fn required(&self) -> [(&'static str, &str); 6] {
        [
            ("spend_category", self.spend_category.as_str()),
            ("supplier", self.supplier.as_str()),
            ("line_memo", self.line_memo.as_str()),
            ("line_of_service", self.line_of_service.as_str()),
            ("cost_center", self.cost_center.as_str()),
            ("amount", self.amount.as_str()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub sc_code_pattern: String,
    pub confidence_high: f64,
    pub confidence_medium: f64,
}

impl Classification {
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            high: self.confidence_high,
            medium: self.confidence_medium,
        }
    }

    pub fn extractor(&self) -> Result<ScCodeExtractor> {
        ScCodeExtractor::new(&self.sc_code_pattern)
    }
}

/// Extra group-by summary over one output column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregation {
    pub name: String,
    pub column: String,
    #[serde(default)]
    pub top_n: Option<usize>,
}

/// Reference-data and output locations after resolving against the config
/// file's directory and applying CLI overrides.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedPaths {
    pub input: PathBuf,
    pub sc_mapping: PathBuf,
    pub taxonomy: PathBuf,
    pub keyword_rules: PathBuf,
    pub refinement_rules: PathBuf,
    pub output_dir: PathBuf,
    pub output_prefix: String,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub paths: ResolvedPaths,
}

pub fn load_config(
    config_path: &Path,
    input_override: Option<&Path>,
    output_dir_override: Option<&Path>,
) -> Result<LoadedConfig> {
    if !config_path.exists() {
        return Err(SpendError::Config(format!(
            "Config file not found: {}",
            config_path.display()
        )));
    }
    let content = std::fs::read_to_string(config_path)?;
    let config = parse_config(&content)?;

    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let resolve = |p: &str| base_dir.join(p);
    let mut paths = ResolvedPaths {
        input: resolve(&config.paths.input),
        sc_mapping: resolve(&config.paths.sc_mapping),
        taxonomy: resolve(&config.paths.taxonomy),
        keyword_rules: resolve(&config.paths.keyword_rules),
        refinement_rules: resolve(&config.paths.refinement_rules),
        output_dir: resolve(&config.paths.output_dir),
        output_prefix: config.paths.output_prefix.clone(),
    };
    if let Some(input) = input_override {
        paths.input = input.to_path_buf();
    }
    if let Some(dir) = output_dir_override {
        paths.output_dir = dir.to_path_buf();
    }

    for (key, path) in [
        ("input", &paths.input),
        ("sc_mapping", &paths.sc_mapping),
        ("taxonomy", &paths.taxonomy),
        ("keyword_rules", &paths.keyword_rules),
        ("refinement_rules", &paths.refinement_rules),
    ] {
        if !path.exists() {
            return Err(SpendError::Config(format!(
                "File not found: {} (from paths.{key})",
                path.display()
            )));
        }
    }

    Ok(LoadedConfig { config, paths })
}

/// Parse and validate config YAML without touching the filesystem.
pub fn parse_config(content: &str) -> Result<Config> {
    let raw: Value = serde_yaml::from_str(content)?;
    check_required(&raw)?;
    let config: Config = serde_yaml::from_value(raw)
        .map_err(|e| SpendError::Config(format!("Invalid config: {e}")))?;

    let c = &config.classification;
    for (key, value) in [
        ("confidence_high", c.confidence_high),
        ("confidence_medium", c.confidence_medium),
    ] {
        if !(value > 0.0 && value <= 1.0) {
            return Err(SpendError::Config(format!(
                "classification.{key} must be in (0, 1], got {value}"
            )));
        }
    }
    c.extractor()?;
    Ok(config)
}

fn check_required(raw: &Value) -> Result<()> {
    for section in REQUIRED_SECTIONS {
        if raw.get(section).map_or(true, Value::is_null) {
            return Err(SpendError::Config(format!(
                "Missing required config section: '{section}'"
            )));
        }
    }
    let missing = |section: &str, keys: &[&str], what: &str| -> Result<()> {
        for key in keys {
            if raw[section].get(*key).is_none() {
                return Err(SpendError::Config(format!(
                    "Missing required {what}: '{section}.{key}'"
                )));
            }
        }
        Ok(())
    };
    missing("paths", &REQUIRED_PATHS, "path")?;
    missing("columns", &REQUIRED_COLUMNS, "column mapping")?;
    missing("classification", &REQUIRED_CLASSIFICATION, "classification param")?;
    Ok(())
}
