//! The pipeline executor.
//!
//! Runs a requested step sequence over one genotype dataset. Every step reads
//! the dataset written by the step before it; the last step writes to the
//! requested output prefix. Under `--warn`, a step whose predecessor failed is
//! pointed at the newest dataset that still exists (at most two steps back).
//! After an ancestry split, the remaining steps run once per ancestry stratum,
//! depth first, each stratum with its own output prefix `<out>_<label>`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::defs::PipelineError;
use crate::config::qc::QcConfig;
use crate::pipelines::adapter::{StepAdapter, StepIo};
use crate::pipelines::paths::ArtifactPlanner;
use crate::pipelines::results::{AncestryStratum, RunTree};
use crate::pipelines::steps::{StepCall, StepKind};
use crate::utils::file::{append_to_prefix, GenotypeDataset};

pub struct Executor<'a, A: StepAdapter + ?Sized> {
    adapter: &'a A,
    config: &'a QcConfig,
    planner: ArtifactPlanner,
}

impl<'a, A: StepAdapter + ?Sized> Executor<'a, A> {
    pub fn new(adapter: &'a A, config: &'a QcConfig, scratch_dir: &Path) -> Self {
        Executor {
            adapter,
            config,
            planner: ArtifactPlanner::new(config.retention, scratch_dir),
        }
    }

    /// Runs `steps` over `source`, writing the final dataset to `base_output`.
    ///
    /// Every step's parameters are resolved and the source trio is checked
    /// before the first adapter call.
    pub fn run(
        &self,
        steps: &[StepKind],
        source: &GenotypeDataset,
        base_output: &Path,
    ) -> Result<RunTree, PipelineError> {
        if steps.is_empty() {
            return Err(PipelineError::InvalidConfig("no QC steps requested".to_string()));
        }
        for kind in steps {
            StepCall::for_step(*kind, self.config)?;
        }
        if let Some(path) = source.missing_companions().into_iter().next() {
            return Err(PipelineError::MissingArtifact { path });
        }
        self.execute(steps, source, base_output)
    }

    fn execute(
        &self,
        steps: &[StepKind],
        source: &GenotypeDataset,
        base_output: &Path,
    ) -> Result<RunTree, PipelineError> {
        if steps.first() == Some(&StepKind::Ancestry) {
            self.planner.stage_common_variants(base_output)?;
        }

        let mut step_paths = self.planner.initial_paths(base_output)?;
        let mut failed: HashSet<PathBuf> = HashSet::new();
        let mut tree = RunTree::default();

        for (i, &kind) in steps.iter().enumerate() {
            // the ancestry step is terminal here when nothing follows it
            let terminal = i + 1 == steps.len();
            let previous = step_paths[step_paths.len() - 1].clone();

            let mut input = if i == 0 { source.clone() } else { GenotypeDataset::new(&previous) };
            let mut output = if terminal {
                base_output.to_path_buf()
            } else {
                self.planner.intermediate(&previous, kind)
            };

            if i > 0 && !self.usable(&input, &failed) {
                if !self.config.warn {
                    let path = input
                        .missing_companions()
                        .into_iter()
                        .next()
                        .unwrap_or_else(|| input.pgen());
                    return Err(PipelineError::MissingArtifact { path });
                }
                warn!(
                    "{} was not created. Continuing {} from an earlier dataset...",
                    input.pgen().display(),
                    kind
                );
                input = self.fallback_input(kind, &step_paths, source, &failed)?;
                if !terminal {
                    output = self.planner.intermediate(&step_paths[step_paths.len() - 2], kind);
                }
            }

            step_paths.push(output.clone());
            let output_dataset = GenotypeDataset::new(&output);
            info!(
                "Running: {} with input {} and output: {}",
                kind,
                input.prefix().display(),
                output.display()
            );

            let call = StepCall::for_step(kind, self.config)?;
            let io = StepIo { input: &input, output: &output_dataset };
            let report = self
                .adapter
                .dispatch(io, &call)
                .map_err(|e| PipelineError::adapter(kind.key(), e))?;

            let passed = report.pass;
            if !passed {
                if !self.config.warn {
                    return Err(PipelineError::StepFailed { step: kind.key().to_string() });
                }
                warn!("{} reported failure; its output will not be used", kind);
                failed.insert(output.clone());
            }

            let strata = if kind == StepKind::Ancestry && !terminal && passed {
                report.output.strata.clone()
            } else {
                Vec::new()
            };
            tree.insert_step(kind, report);

            if kind == StepKind::Ancestry && !terminal {
                if strata.is_empty() {
                    warn!("Ancestry split produced no strata; {} remaining step(s) not run", steps.len() - i - 1);
                }
                for stratum in &strata {
                    if let Some(branch) = self.execute_stratum(&steps[i + 1..], stratum, base_output)? {
                        tree.insert_stratum(&stratum.label, branch)?;
                    }
                }
            }

            if passed {
                self.planner.release_superseded(&step_paths, base_output, source)?;
            }

            if kind == StepKind::Ancestry {
                // steps after the split ran inside the strata
                break;
            }
        }

        tree.set_paths(step_paths);
        Ok(tree)
    }

    fn execute_stratum(
        &self,
        remaining: &[StepKind],
        stratum: &AncestryStratum,
        base_output: &Path,
    ) -> Result<Option<RunTree>, PipelineError> {
        if let Some(path) = stratum.dataset.missing_companions().into_iter().next() {
            if !self.config.warn {
                return Err(PipelineError::MissingArtifact { path });
            }
            warn!("Skipping ancestry {}: {} does not exist", stratum.label, path.display());
            return Ok(None);
        }

        let stratum_output = append_to_prefix(base_output, "_", &stratum.label);
        info!(
            "Running {} step(s) within ancestry {}",
            remaining.len(),
            stratum.label
        );
        self.execute(remaining, &stratum.dataset, &stratum_output).map(Some)
    }

    fn usable(&self, dataset: &GenotypeDataset, failed: &HashSet<PathBuf>) -> bool {
        if self.config.warn {
            dataset.calls_exist() && !failed.contains(dataset.prefix())
        } else {
            dataset.is_complete()
        }
    }

    /// Second-to-last dataset, then third-to-last. The initial entry of
    /// `step_paths` only seeds names, so reaching it means the source.
    fn fallback_input(
        &self,
        kind: StepKind,
        step_paths: &[PathBuf],
        source: &GenotypeDataset,
        failed: &HashSet<PathBuf>,
    ) -> Result<GenotypeDataset, PipelineError> {
        let mut last_tried = step_paths[step_paths.len() - 1].clone();

        for back in 2..=3 {
            let Some(idx) = step_paths.len().checked_sub(back) else {
                break;
            };
            let candidate = if idx == 0 {
                source.clone()
            } else {
                GenotypeDataset::new(&step_paths[idx])
            };
            if self.usable(&candidate, failed) {
                info!("Rerouting {} to input {}", kind, candidate.prefix().display());
                return Ok(candidate);
            }
            warn!("{} is also unavailable", candidate.pgen().display());
            last_tried = candidate.prefix().to_path_buf();
            if idx == 0 {
                break;
            }
        }

        Err(PipelineError::ConsecutiveFailures {
            step: kind.key().to_string(),
            last_tried,
        })
    }
}
