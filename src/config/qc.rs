//! Typed QC configuration, validated once from the command line.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::cli::Arguments;
use crate::config::defs::{
    PipelineError, DEFAULT_CALLRATE, DEFAULT_CASE_CONTROL, DEFAULT_DUPLICATED_CUTOFF, DEFAULT_GENO,
    DEFAULT_HAPLOTYPE, DEFAULT_HET_CUTOFFS, DEFAULT_HWE, DEFAULT_LD, DEFAULT_PCA,
    DEFAULT_RELATED_CUTOFF, DEFAULT_SEX_CUTOFFS, DEFAULT_BUILD,
};
use crate::pipelines::steps::{
    AncestryParams, AssocParams, HweParams, LdParams, RelatedParams, StepCategory, StepKind,
    PIPELINE_ORDER,
};

/// Where intermediate datasets live for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RetentionPolicy {
    /// Every intermediate is written next to the requested output and kept.
    #[default]
    Full,
    /// Intermediates go to a private scratch area; only the final output survives.
    Minimal,
}

/// Parameters for every step; a step runs when its parameters are present.
#[derive(Debug, Clone, Default)]
pub struct QcConfig {
    pub retention: RetentionPolicy,
    pub warn: bool,
    pub skip_fails: bool,
    /// Explicit step order, overriding the flag-derived order.
    pub order: Option<Vec<StepKind>>,
    pub ancestry: Option<AncestryParams>,
    pub callrate: Option<f64>,
    pub sex: Option<(f64, f64)>,
    pub related: Option<RelatedParams>,
    pub het: Option<(f64, f64)>,
    pub case_control: Option<f64>,
    pub haplotype: Option<f64>,
    pub hwe: Option<HweParams>,
    pub geno: Option<f64>,
    pub ld: Option<LdParams>,
    pub assoc: Option<AssocParams>,
}

impl Default for RelatedParams {
    fn default() -> Self {
        RelatedParams {
            related_cutoff: DEFAULT_RELATED_CUTOFF,
            duplicated_cutoff: DEFAULT_DUPLICATED_CUTOFF,
            prune_related: false,
            prune_duplicated: true,
        }
    }
}

impl QcConfig {
    pub fn is_requested(&self, kind: StepKind) -> bool {
        match kind {
            StepKind::Ancestry => self.ancestry.is_some(),
            StepKind::Callrate => self.callrate.is_some(),
            StepKind::Sex => self.sex.is_some(),
            StepKind::Related => self.related.is_some(),
            StepKind::Het => self.het.is_some(),
            StepKind::CaseControl => self.case_control.is_some(),
            StepKind::Haplotype => self.haplotype.is_some(),
            StepKind::Hwe => self.hwe.is_some(),
            StepKind::Geno => self.geno.is_some(),
            StepKind::Ld => self.ld.is_some(),
            StepKind::Assoc => self.assoc.is_some(),
        }
    }

    /// Steps to run, in execution order.
    pub fn requested_steps(&self) -> Vec<StepKind> {
        match &self.order {
            Some(order) => order.clone(),
            None => PIPELINE_ORDER
                .iter()
                .copied()
                .filter(|kind| self.is_requested(*kind))
                .collect(),
        }
    }

    /// Turns `kind` on with the default parameters unless it is already configured.
    pub fn enable_with_defaults(&mut self, kind: StepKind) -> Result<(), PipelineError> {
        match kind {
            StepKind::Ancestry => {
                if self.ancestry.is_none() {
                    return Err(PipelineError::InvalidConfig(
                        "ancestry needs --ref-panel and --ref-labels".to_string(),
                    ));
                }
            }
            StepKind::Callrate => { self.callrate.get_or_insert(DEFAULT_CALLRATE); }
            StepKind::Sex => { self.sex.get_or_insert(DEFAULT_SEX_CUTOFFS); }
            StepKind::Related => { self.related.get_or_insert_with(RelatedParams::default); }
            StepKind::Het => { self.het.get_or_insert(DEFAULT_HET_CUTOFFS); }
            StepKind::CaseControl => { self.case_control.get_or_insert(DEFAULT_CASE_CONTROL); }
            StepKind::Haplotype => { self.haplotype.get_or_insert(DEFAULT_HAPLOTYPE); }
            StepKind::Hwe => {
                self.hwe.get_or_insert(HweParams { threshold: DEFAULT_HWE, filter_controls: false });
            }
            StepKind::Geno => { self.geno.get_or_insert(DEFAULT_GENO); }
            StepKind::Ld => {
                let (window_size, step_size, r2_threshold) = DEFAULT_LD;
                self.ld.get_or_insert(LdParams { window_size, step_size, r2_threshold });
            }
            StepKind::Assoc => {
                self.assoc.get_or_insert_with(|| AssocParams {
                    pca: Some(DEFAULT_PCA),
                    build: DEFAULT_BUILD.to_string(),
                    gwas: false,
                    covars: None,
                    covar_names: Vec::new(),
                });
            }
        }
        Ok(())
    }

    /// Range and consistency checks on the configured parameters.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        let fractions = [
            ("callrate", self.callrate),
            ("case-control", self.case_control),
            ("haplotype", self.haplotype),
            ("hwe", self.hwe.map(|h| h.threshold)),
            ("geno", self.geno),
            ("ld r2", self.ld.map(|ld| ld.r2_threshold)),
        ];
        for (name, value) in fractions {
            if let Some(v) = value {
                if !(v > 0.0 && v <= 1.0) {
                    return invalid(format!("--{} must be in (0, 1], got {}", name, v));
                }
            }
        }

        for (name, pair) in [("sex", self.sex), ("het", self.het)] {
            if let Some((low, high)) = pair {
                if low >= high {
                    return invalid(format!("--{} cutoffs must be increasing, got {} {}", name, low, high));
                }
            }
        }

        if let Some(ld) = self.ld {
            if ld.window_size == 0 || ld.step_size == 0 {
                return invalid("--ld window and step size must be positive".to_string());
            }
        }

        if let Some(assoc) = &self.assoc {
            if !assoc.covar_names.is_empty() && assoc.covars.is_none() {
                return invalid("--covar-names requires --covars".to_string());
            }
        }

        if let Some(order) = &self.order {
            let mut seen = HashSet::new();
            for kind in order {
                if !seen.insert(*kind) {
                    return invalid(format!("step '{}' listed more than once", kind));
                }
                if !self.is_requested(*kind) {
                    return invalid(format!("step '{}' listed without parameters", kind));
                }
            }
        }

        if self.requested_steps().is_empty() {
            return invalid("no QC steps requested".to_string());
        }
        Ok(())
    }
}

fn cutoff_pair(flag: &str, values: &[f64]) -> Result<(f64, f64), PipelineError> {
    match values {
        [low, high] => Ok((*low, *high)),
        _ => Err(PipelineError::InvalidConfig(format!(
            "--{} takes two cutoffs, got {}",
            flag,
            values.len()
        ))),
    }
}

/// Reference inputs for the ancestry split, naming whichever flag is absent.
fn ancestry_params(args: &Arguments) -> Result<AncestryParams, PipelineError> {
    let missing: Vec<&str> = [("--ref-panel", &args.ref_panel), ("--ref-labels", &args.ref_labels)]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(flag, _)| flag)
        .collect();
    match (&args.ref_panel, &args.ref_labels) {
        (Some(panel), Some(labels)) => Ok(AncestryParams {
            ref_panel: PathBuf::from(panel),
            ref_labels: PathBuf::from(labels),
            model: args.model.as_ref().map(PathBuf::from),
            containerized: args.container,
            singularity: args.singularity,
            subset: args.subset_ancestry.clone().unwrap_or_default(),
        }),
        _ => Err(PipelineError::InvalidConfig(format!(
            "ancestry step requested without {}",
            missing.join(" and ")
        ))),
    }
}

impl TryFrom<&Arguments> for QcConfig {
    type Error = PipelineError;

    fn try_from(args: &Arguments) -> Result<Self, Self::Error> {
        let ancestry = if args.ancestry { Some(ancestry_params(args)?) } else { None };

        let assoc = if args.pca.is_some() || args.gwas {
            Some(AssocParams {
                pca: args.pca,
                build: args.build.clone(),
                gwas: args.gwas,
                covars: args.covars.as_ref().map(PathBuf::from),
                covar_names: args.covar_names.clone().unwrap_or_default(),
            })
        } else {
            None
        };

        let mut config = QcConfig {
            retention: if args.full_output { RetentionPolicy::Full } else { RetentionPolicy::Minimal },
            warn: args.warn,
            skip_fails: args.skip_fails,
            order: None,
            ancestry,
            callrate: args.callrate,
            sex: args.sex.as_deref().map(|v| cutoff_pair("sex", v)).transpose()?,
            related: args.related.then(|| RelatedParams {
                related_cutoff: args.related_cutoff,
                duplicated_cutoff: args.duplicated_cutoff,
                prune_related: args.prune_related,
                prune_duplicated: args.prune_duplicated,
            }),
            het: args.het.as_deref().map(|v| cutoff_pair("het", v)).transpose()?,
            case_control: args.case_control,
            haplotype: args.haplotype,
            hwe: args.hwe.map(|threshold| HweParams {
                threshold,
                filter_controls: args.filter_controls,
            }),
            geno: args.geno,
            ld: args.ld.as_deref().map(LdParams::parse).transpose()?,
            assoc,
        };

        let mut bulk: Vec<StepKind> = Vec::new();
        if args.all_sample {
            bulk.extend(PIPELINE_ORDER.iter().filter(|k| k.category() == StepCategory::Sample));
        }
        if args.all_variant {
            bulk.extend(PIPELINE_ORDER.iter().filter(|k| k.category() == StepCategory::Variant));
        }
        for kind in bulk {
            config.enable_with_defaults(kind)?;
        }

        if let Some(keys) = &args.steps {
            let order = keys
                .iter()
                .map(|key| key.parse::<StepKind>())
                .collect::<Result<Vec<_>, _>>()?;
            for kind in &order {
                if *kind == StepKind::Ancestry && config.ancestry.is_none() {
                    config.ancestry = Some(ancestry_params(args)?);
                }
                config.enable_with_defaults(*kind)?;
            }
            config.order = Some(order);
        }

        config.validate()?;
        Ok(config)
    }
}
