//! QC step identifiers, the per-call parameter structs handed to adapters, and
//! the registry that maps every step to its adapter category and parameters.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use lazy_static::lazy_static;
use serde::Serialize;

use crate::config::defs::PipelineError;
use crate::config::qc::QcConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Ancestry,
    Callrate,
    Sex,
    Related,
    Het,
    CaseControl,
    Haplotype,
    Hwe,
    Geno,
    Ld,
    Assoc,
}

/// Order in which steps run when they are selected through flags.
pub const PIPELINE_ORDER: [StepKind; 11] = [
    StepKind::Ancestry,
    StepKind::Callrate,
    StepKind::Sex,
    StepKind::Related,
    StepKind::Het,
    StepKind::CaseControl,
    StepKind::Haplotype,
    StepKind::Hwe,
    StepKind::Geno,
    StepKind::Ld,
    StepKind::Assoc,
];

/// QC steps that contribute rows to the metrics table, in reporting order.
pub const QC_STEP_ORDER: [StepKind; 9] = [
    StepKind::Callrate,
    StepKind::Sex,
    StepKind::Related,
    StepKind::Het,
    StepKind::CaseControl,
    StepKind::Haplotype,
    StepKind::Hwe,
    StepKind::Geno,
    StepKind::Ld,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCategory {
    Ancestry,
    Sample,
    Variant,
    Association,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QcLevel {
    Sample,
    Variant,
}

impl fmt::Display for QcLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QcLevel::Sample => write!(f, "sample"),
            QcLevel::Variant => write!(f, "variant"),
        }
    }
}

lazy_static! {
    static ref STEP_KEYS: HashMap<&'static str, StepKind> =
        PIPELINE_ORDER.iter().map(|kind| (kind.key(), *kind)).collect();
}

impl StepKind {
    /// Key used in the run tree, in derived artifact names and on the command line.
    pub fn key(self) -> &'static str {
        match self {
            StepKind::Ancestry => "ancestry",
            StepKind::Callrate => "callrate",
            StepKind::Sex => "sex",
            StepKind::Related => "related",
            StepKind::Het => "het",
            StepKind::CaseControl => "case_control",
            StepKind::Haplotype => "haplotype",
            StepKind::Hwe => "hwe",
            StepKind::Geno => "geno",
            StepKind::Ld => "ld",
            StepKind::Assoc => "assoc",
        }
    }

    pub fn category(self) -> StepCategory {
        match self {
            StepKind::Ancestry => StepCategory::Ancestry,
            StepKind::Callrate | StepKind::Sex | StepKind::Related | StepKind::Het => {
                StepCategory::Sample
            }
            StepKind::CaseControl
            | StepKind::Haplotype
            | StepKind::Hwe
            | StepKind::Geno
            | StepKind::Ld => StepCategory::Variant,
            StepKind::Assoc => StepCategory::Association,
        }
    }

    /// Reporting level, `None` for steps that do not prune (ancestry, association).
    pub fn level(self) -> Option<QcLevel> {
        match self.category() {
            StepCategory::Sample => Some(QcLevel::Sample),
            StepCategory::Variant => Some(QcLevel::Variant),
            StepCategory::Ancestry | StepCategory::Association => None,
        }
    }

    pub fn from_key(key: &str) -> Option<StepKind> {
        STEP_KEYS.get(key).copied()
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for StepKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepKind::from_key(s.trim()).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "Unknown step '{}'; expected one of: {}",
                s,
                PIPELINE_ORDER.iter().map(|k| k.key()).collect::<Vec<_>>().join(", ")
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AncestryParams {
    pub ref_panel: PathBuf,
    pub ref_labels: PathBuf,
    pub model: Option<PathBuf>,
    pub containerized: bool,
    pub singularity: bool,
    pub subset: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelatedParams {
    pub related_cutoff: f64,
    pub duplicated_cutoff: f64,
    pub prune_related: bool,
    pub prune_duplicated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HweParams {
    pub threshold: f64,
    pub filter_controls: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LdParams {
    pub window_size: u32,
    pub step_size: u32,
    pub r2_threshold: f64,
}

impl LdParams {
    /// Parses the `window step r2` triple given on the command line.
    pub fn parse(values: &[String]) -> Result<Self, PipelineError> {
        let [window, step, r2] = values else {
            return Err(PipelineError::InvalidConfig(format!(
                "--ld takes exactly 3 values (window size, step size, r2 threshold), got {}",
                values.len()
            )));
        };
        let bad = |what: &str, value: &str| {
            PipelineError::InvalidConfig(format!("--ld {} '{}' is not valid", what, value))
        };
        Ok(LdParams {
            window_size: window.parse().map_err(|_| bad("window size", window))?,
            step_size: step.parse().map_err(|_| bad("step size", step))?,
            r2_threshold: r2.parse().map_err(|_| bad("r2 threshold", r2))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssocParams {
    /// Number of principal components, `None` disables PCA.
    pub pca: Option<u32>,
    pub build: String,
    pub gwas: bool,
    pub covars: Option<PathBuf>,
    pub covar_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleQc {
    Callrate { threshold: f64 },
    Sex { cutoffs: (f64, f64) },
    Related(RelatedParams),
    Het { cutoffs: (f64, f64) },
}

impl SampleQc {
    pub fn kind(&self) -> StepKind {
        match self {
            SampleQc::Callrate { .. } => StepKind::Callrate,
            SampleQc::Sex { .. } => StepKind::Sex,
            SampleQc::Related(_) => StepKind::Related,
            SampleQc::Het { .. } => StepKind::Het,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariantQc {
    CaseControl { p_threshold: f64 },
    Haplotype { p_threshold: f64 },
    Hwe(HweParams),
    Geno { threshold: f64 },
    Ld(LdParams),
}

impl VariantQc {
    pub fn kind(&self) -> StepKind {
        match self {
            VariantQc::CaseControl { .. } => StepKind::CaseControl,
            VariantQc::Haplotype { .. } => StepKind::Haplotype,
            VariantQc::Hwe(_) => StepKind::Hwe,
            VariantQc::Geno { .. } => StepKind::Geno,
            VariantQc::Ld(_) => StepKind::Ld,
        }
    }
}

/// One adapter invocation: the category to dispatch to and its parameters.
/// Built fresh for every call.
#[derive(Debug, Clone, PartialEq)]
pub enum StepCall {
    Ancestry(AncestryParams),
    Sample(SampleQc),
    Variant(VariantQc),
    Association(AssocParams),
}

impl StepCall {
    /// Extracts the parameters for `kind` from the configuration.
    pub fn for_step(kind: StepKind, config: &QcConfig) -> Result<Self, PipelineError> {
        let missing = || {
            PipelineError::InvalidConfig(format!("Step '{}' requested without parameters", kind))
        };

        let call = match kind {
            StepKind::Ancestry => StepCall::Ancestry(config.ancestry.clone().ok_or_else(missing)?),
            StepKind::Callrate => StepCall::Sample(SampleQc::Callrate {
                threshold: config.callrate.ok_or_else(missing)?,
            }),
            StepKind::Sex => StepCall::Sample(SampleQc::Sex {
                cutoffs: config.sex.ok_or_else(missing)?,
            }),
            StepKind::Related => StepCall::Sample(SampleQc::Related(
                config.related.ok_or_else(missing)?,
            )),
            StepKind::Het => StepCall::Sample(SampleQc::Het {
                cutoffs: config.het.ok_or_else(missing)?,
            }),
            StepKind::CaseControl => StepCall::Variant(VariantQc::CaseControl {
                p_threshold: config.case_control.ok_or_else(missing)?,
            }),
            StepKind::Haplotype => StepCall::Variant(VariantQc::Haplotype {
                p_threshold: config.haplotype.ok_or_else(missing)?,
            }),
            StepKind::Hwe => StepCall::Variant(VariantQc::Hwe(config.hwe.ok_or_else(missing)?)),
            StepKind::Geno => StepCall::Variant(VariantQc::Geno {
                threshold: config.geno.ok_or_else(missing)?,
            }),
            StepKind::Ld => StepCall::Variant(VariantQc::Ld(config.ld.ok_or_else(missing)?)),
            StepKind::Assoc => StepCall::Association(config.assoc.clone().ok_or_else(missing)?),
        };
        Ok(call)
    }

    pub fn kind(&self) -> StepKind {
        match self {
            StepCall::Ancestry(_) => StepKind::Ancestry,
            StepCall::Sample(qc) => qc.kind(),
            StepCall::Variant(qc) => qc.kind(),
            StepCall::Association(_) => StepKind::Assoc,
        }
    }
}
