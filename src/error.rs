use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("{section}[{index}] invalid regex '{pattern}': {source}")]
    InvalidPattern {
        section: String,
        index: usize,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Taxonomy error: {0}")]
    Taxonomy(String),

    #[error("Input CSV has 0 data rows: {0}")]
    EmptyDataset(String),
}

pub type Result<T> = std::result::Result<T, SpendError>;
