//! Artifact path planning: where each step reads from and writes to, and when
//! an intermediate dataset can go.

use std::path::{Path, PathBuf};

use log::debug;

use crate::config::defs::{PipelineError, COMMON_SNPS_FILE};
use crate::config::qc::RetentionPolicy;
use crate::pipelines::steps::StepKind;
use crate::utils::file::{append_to_prefix, copy_into_dir, GenotypeDataset};

/// Initial path sequence for one executor invocation.
///
/// `Full` starts from the output prefix itself, `Minimal` from a prefix with
/// the same file name inside the scratch directory.
pub fn plan(
    base_output: &Path,
    retention: RetentionPolicy,
    scratch_dir: &Path,
) -> Result<Vec<PathBuf>, PipelineError> {
    let seed = match retention {
        RetentionPolicy::Full => base_output.to_path_buf(),
        RetentionPolicy::Minimal => {
            let name = base_output.file_name().ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "output prefix {} has no file name",
                    base_output.display()
                ))
            })?;
            scratch_dir.join(name)
        }
    };
    Ok(vec![seed])
}

#[derive(Debug, Clone)]
pub struct ArtifactPlanner {
    retention: RetentionPolicy,
    scratch_dir: PathBuf,
}

impl ArtifactPlanner {
    pub fn new(retention: RetentionPolicy, scratch_dir: impl Into<PathBuf>) -> Self {
        ArtifactPlanner {
            retention,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn initial_paths(&self, base_output: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        plan(base_output, self.retention, &self.scratch_dir)
    }

    /// Name of the dataset `kind` writes when it is not the terminal step.
    pub fn intermediate(&self, previous: &Path, kind: StepKind) -> PathBuf {
        append_to_prefix(previous, "_", kind.key())
    }

    /// Copies the reference common-variants file next to the scratch intermediates.
    /// Only needed under `Minimal`, where the ancestry step reads from scratch.
    pub fn stage_common_variants(&self, base_output: &Path) -> Result<Option<PathBuf>, PipelineError> {
        if self.retention == RetentionPolicy::Full {
            return Ok(None);
        }
        let out_dir = match base_output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let common_snps = out_dir.join(COMMON_SNPS_FILE);
        if !common_snps.is_file() {
            return Err(PipelineError::MissingArtifact { path: common_snps });
        }
        let staged = copy_into_dir(&common_snps, &self.scratch_dir)?;
        debug!("Staged {} to {}", common_snps.display(), staged.display());
        Ok(Some(staged))
    }

    /// Deletes the dataset just before the newest entry of `step_paths`, unless
    /// retention is `Full` or that entry is the requested output or the source.
    /// Returns the removed prefix.
    pub fn release_superseded(
        &self,
        step_paths: &[PathBuf],
        base_output: &Path,
        source: &GenotypeDataset,
    ) -> Result<Option<PathBuf>, PipelineError> {
        if self.retention == RetentionPolicy::Full || step_paths.len() < 2 {
            return Ok(None);
        }
        let previous = &step_paths[step_paths.len() - 2];
        if previous.as_path() == base_output || previous.as_path() == source.prefix() {
            return Ok(None);
        }

        let dataset = GenotypeDataset::new(previous);
        if !dataset.calls_exist() {
            return Ok(None);
        }
        dataset.remove()?;
        debug!("Removed superseded intermediate {}", previous.display());
        Ok(Some(previous.clone()))
    }
}
