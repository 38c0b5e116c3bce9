pub mod classify;
pub mod rules;
pub mod validate;

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::error::Result;
use crate::rules::{
    load_keyword_rules_file, load_refinement_rules_file, load_sc_mapping_file, RuleRegistry,
};
use crate::settings::{load_config, LoadedConfig};
use crate::taxonomy::{load_taxonomy, TaxonomyIndex};

#[derive(Parser)]
#[command(
    name = "spendcat",
    version,
    about = "Classify procurement spend into a multi-level taxonomy."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full classification pipeline and write reports.
    Classify {
        /// Path to the client config.yaml
        #[arg(long)]
        config: PathBuf,
        /// Override paths.input
        #[arg(long)]
        input: Option<PathBuf>,
        /// Override paths.output_dir
        #[arg(long = "output-dir")]
        output_dir: Option<PathBuf>,
    },
    /// Load config and reference data, then report problems without classifying.
    Validate {
        /// Path to the client config.yaml
        #[arg(long)]
        config: PathBuf,
    },
    /// Show loaded rule counts per section.
    Rules {
        /// Path to the client config.yaml
        #[arg(long)]
        config: PathBuf,
    },
}

/// Config plus compiled reference data, shared by every subcommand.
pub(crate) struct Workspace {
    pub loaded: LoadedConfig,
    pub taxonomy: TaxonomyIndex,
    pub registry: RuleRegistry,
    pub load_secs: f64,
}

pub(crate) fn load_workspace(
    config: &Path,
    input: Option<&Path>,
    output_dir: Option<&Path>,
) -> Result<Workspace> {
    let started = Instant::now();
    let loaded = load_config(config, input, output_dir)?;
    let paths = &loaded.paths;

    let taxonomy = load_taxonomy(&paths.taxonomy)?;
    let registry = RuleRegistry::load(
        &load_sc_mapping_file(&paths.sc_mapping)?,
        &load_keyword_rules_file(&paths.keyword_rules)?,
        &load_refinement_rules_file(&paths.refinement_rules)?,
        &taxonomy.keys(),
    )?;
    info!(
        client = %loaded.config.client.name,
        taxonomy = taxonomy.len(),
        advisories = registry.advisories().len(),
        "reference data loaded"
    );

    Ok(Workspace {
        loaded,
        taxonomy,
        registry,
        load_secs: started.elapsed().as_secs_f64(),
    })
}
