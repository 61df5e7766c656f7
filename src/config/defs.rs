use std::path::PathBuf;
use lazy_static::lazy_static;
use std::collections::HashMap;
use thiserror::Error;

use crate::cli::Arguments;
use crate::config::qc::QcConfig;

// External software
pub const PLINK2_TAG: &str = "plink2";

lazy_static! {
    pub static ref TOOL_VERSIONS: HashMap<&'static str, f32> = {
        let mut m = HashMap::new();
        m.insert(PLINK2_TAG, 2.0);

        m
    };
}

// Genotype dataset companions (pgen trio)
pub const PGEN_EXT: &str = "pgen";
pub const PSAM_EXT: &str = "psam";
pub const PVAR_EXT: &str = "pvar";
pub const GENOTYPE_EXTS: &[&'static str] = &[PGEN_EXT, PSAM_EXT, PVAR_EXT];

// Static Filenames
pub const COMMON_SNPS_FILE: &str = "ref_common_snps.common_snps";
pub const METRICS_TABLE_SUFFIX: &str = "qc_metrics.tsv";
pub const PRUNED_TABLE_SUFFIX: &str = "pruned_samples.tsv";
pub const GWAS_TABLE_SUFFIX: &str = "gwas_metrics.tsv";
pub const RUN_TREE_SUFFIX: &str = "qc_tree.json";

// Static Parameters
pub const DEFAULT_CALLRATE: f64 = 0.02;
pub const DEFAULT_SEX_CUTOFFS: (f64, f64) = (0.25, 0.75);
pub const DEFAULT_HET_CUTOFFS: (f64, f64) = (-0.25, 0.25);
pub const DEFAULT_RELATED_CUTOFF: f64 = 0.0884;
pub const DEFAULT_DUPLICATED_CUTOFF: f64 = 0.354;
pub const DEFAULT_GENO: f64 = 0.05;
pub const DEFAULT_CASE_CONTROL: f64 = 1e-4;
pub const DEFAULT_HAPLOTYPE: f64 = 1e-4;
pub const DEFAULT_HWE: f64 = 1e-4;
pub const DEFAULT_LD: (u32, u32, f64) = (50, 5, 0.5);
pub const DEFAULT_PCA: u32 = 10;
pub const DEFAULT_BUILD: &str = "hg38";

/// Label used for the top level of the reporting tables.
pub const ALL_ANCESTRY_LABEL: &str = "all";


#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Required artifact missing: {}", .path.display())]
    MissingArtifact { path: PathBuf },

    #[error("Step '{step}' reported failure and --warn is off")]
    StepFailed { step: String },

    #[error("Step '{step}' has no usable input: three consecutive upstream datasets are missing (last tried {})", .last_tried.display())]
    ConsecutiveFailures { step: String, last_tried: PathBuf },

    #[error("Adapter for step '{step}' failed: {message}")]
    AdapterFailed { step: String, message: String },

    #[error("{tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("Failed to spawn {tool}: {source}. Is it installed?")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    IOError(String),

    #[error("Up-front checks failed (rerun with --skip-fails to ignore): {}", .0.join("; "))]
    PreflightFailed(Vec<String>),
}

impl PipelineError {
    pub fn adapter(step: impl Into<String>, err: anyhow::Error) -> Self {
        PipelineError::AdapterFailed {
            step: step.into(),
            message: format!("{:#}", err),
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(e: csv::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}


pub struct RunConfig  {
    pub cwd: PathBuf,
    pub out_prefix: PathBuf,
    pub scratch_root: PathBuf,
    pub threads: usize,
    pub memory_mb: Option<u64>,
    pub qc: QcConfig,
    pub args: Arguments,
}
