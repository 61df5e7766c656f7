use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::{Builder, TempDir};

use crate::config::defs::{PipelineError, RunConfig, PLINK2_TAG, RUN_TREE_SUFFIX};
use crate::pipelines::adapter::StepAdapter;
use crate::pipelines::executor::Executor;
use crate::pipelines::metrics::{aggregate_nested, write_tables, QcTables};
use crate::pipelines::plink2::Plink2Adapter;
use crate::pipelines::results::RunTree;
use crate::utils::command::{check_version, convert_to_pgen, InputFormat};
use crate::utils::file::{append_to_prefix, GenotypeDataset};
use crate::utils::psam::preflight;

/// Everything a finished run leaves behind.
#[derive(Debug)]
pub struct QcRun {
    pub tree: RunTree,
    pub tables: QcTables,
    pub report_files: Vec<PathBuf>,
}

fn resolve(cwd: &Path, path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() { path } else { cwd.join(path) }
}

/// Creates the private scratch area for intermediates and converted inputs.
/// It is deleted when the returned handle drops.
fn make_scratch(config: &RunConfig) -> Result<TempDir, PipelineError> {
    fs::create_dir_all(&config.scratch_root)?;
    let scratch = Builder::new()
        .prefix("genoqc_")
        .tempdir_in(&config.scratch_root)
        .map_err(|e| PipelineError::IOError(format!(
            "cannot create scratch directory in {}: {}",
            config.scratch_root.display(),
            e
        )))?;
    debug!("Scratch directory: {}", scratch.path().display());
    Ok(scratch)
}

/// Finds the PLINK 2 fileset to start from, converting PLINK 1 or VCF input
/// into the scratch area first.
fn resolve_source(config: &RunConfig, scratch: &Path) -> Result<GenotypeDataset, PipelineError> {
    let args = &config.args;
    let (format, input) = match (&args.pfile, &args.bfile, &args.vcf) {
        (Some(pfile), _, _) => {
            let dataset = GenotypeDataset::new(resolve(&config.cwd, pfile));
            if let Some(path) = dataset.missing_companions().into_iter().next() {
                return Err(PipelineError::MissingArtifact { path });
            }
            return Ok(dataset);
        }
        (None, Some(bfile), _) => (InputFormat::Bfile, resolve(&config.cwd, bfile)),
        (None, None, Some(vcf)) => (InputFormat::Vcf, resolve(&config.cwd, vcf)),
        (None, None, None) => {
            return Err(PipelineError::InvalidConfig(
                "one of --pfile, --bfile or --vcf is required".to_string(),
            ))
        }
    };

    let stem = input
        .file_name()
        .map(|n| n.to_string_lossy().trim_end_matches(".gz").trim_end_matches(".vcf").to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "input".to_string());
    let out = scratch.join(format!("{}_source", stem));
    info!("Converting {} to pgen at {}", input.display(), out.display());
    convert_to_pgen(format, &input, &out, config.threads)
}

/// Runs the QC pipeline with `adapter` and writes the report files.
pub fn run_with_adapter<A: StepAdapter + ?Sized>(config: &RunConfig, adapter: &A) -> Result<QcRun, PipelineError> {
    let steps = config.qc.requested_steps();
    config.qc.validate()?;
    info!(
        "Steps: {}",
        steps.iter().map(|s| s.key()).collect::<Vec<_>>().join(" -> ")
    );

    if let Some(parent) = config.out_prefix.parent() {
        fs::create_dir_all(parent)?;
    }
    let scratch = make_scratch(config)?;
    let source = resolve_source(config, scratch.path())?;

    if config.qc.skip_fails {
        debug!("Skipping up-front checks");
    } else {
        let summary = preflight(&source.psam(), &steps, &config.qc)?;
        info!(
            "{} samples: {} with sex, {} cases, {} controls",
            summary.samples, summary.with_sex, summary.cases, summary.controls
        );
    }

    let executor = Executor::new(adapter, &config.qc, scratch.path());
    let tree = executor.run(&steps, &source, &config.out_prefix)?;

    let tables = aggregate_nested(&tree)?;
    let mut report_files = write_tables(&tables, &config.out_prefix)?;

    let tree_path = append_to_prefix(&config.out_prefix, ".", RUN_TREE_SUFFIX);
    serde_json::to_writer_pretty(BufWriter::new(File::create(&tree_path)?), &tree)?;
    report_files.push(tree_path);

    for file in &report_files {
        info!("Wrote {}", file.display());
    }

    Ok(QcRun { tree, tables, report_files })
}

/// Run function for the genotype QC pipeline
///
/// # Arguments
///
/// * `config` - RunConfig struct from main.
///
/// # Returns
/// Result<QcRun, PipelineError>
pub fn run(config: &RunConfig) -> Result<QcRun, PipelineError> {
    println!("\n-------------\n Genotype QC\n-------------\n");

    let version = check_version(PLINK2_TAG).map_err(|e| PipelineError::ToolExecution {
        tool: PLINK2_TAG.to_string(),
        error: e.to_string(),
    })?;
    info!("Using {} {}", PLINK2_TAG, version);

    let adapter = Plink2Adapter::new(config.threads, config.memory_mb, &config.scratch_root)?;
    run_with_adapter(config, &adapter)
}
