//! Step adapter backed by plink2 for the single-tool QC steps.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use log::{debug, info, warn};
use tempfile::{Builder, TempDir};

use crate::config::defs::{PipelineError, PLINK2_TAG};
use crate::pipelines::adapter::{StepAdapter, StepIo};
use crate::pipelines::results::StepReport;
use crate::pipelines::steps::{
    AncestryParams, AssocParams, HweParams, LdParams, RelatedParams, SampleQc, StepKind, VariantQc,
};
use crate::utils::command::{plink2, run_tool};
use crate::utils::file::{append_to_prefix, count_data_lines, GenotypeDataset};

#[derive(Debug)]
pub struct Plink2Adapter {
    threads: usize,
    memory_mb: Option<u64>,
    /// Side outputs (`.het`, `.king.cutoff.*`, `.snplist`, `.prune.*`, removal
    /// lists). Deleted with the adapter.
    work: TempDir,
}

/// Outcome of a plink2 call that writes a dataset. A tool failure is a
/// failed step, not an aborted pipeline.
enum Outcome {
    Written,
    ToolFailed(String),
}

impl Plink2Adapter {
    pub fn new(threads: usize, memory_mb: Option<u64>, scratch_root: &Path) -> Result<Self, PipelineError> {
        fs::create_dir_all(scratch_root)?;
        let work = Builder::new()
            .prefix("genoqc_plink2_")
            .tempdir_in(scratch_root)
            .map_err(|e| PipelineError::IOError(format!(
                "cannot create plink2 work directory in {}: {}",
                scratch_root.display(),
                e
            )))?;
        debug!("plink2 side outputs go to {}", work.path().display());
        Ok(Plink2Adapter { threads: threads.max(1), memory_mb, work })
    }

    pub fn work_dir(&self) -> &Path {
        self.work.path()
    }

    fn base(&self, input: &GenotypeDataset, out: &Path) -> Vec<String> {
        plink2::base_args(input, out, self.threads, self.memory_mb)
    }

    fn run(&self, args: Vec<String>) -> Result<Outcome> {
        match run_tool(PLINK2_TAG, &args) {
            Ok(_) => Ok(Outcome::Written),
            Err(PipelineError::ToolExecution { error, .. }) => Ok(Outcome::ToolFailed(error)),
            Err(e) => Err(e.into()),
        }
    }

    /// Runs a dataset-writing call and turns the result into a report.
    fn finish(&self, kind: StepKind, io: StepIo<'_>, outcome: Outcome) -> StepReport {
        match outcome {
            Outcome::Written if io.output.is_complete() => StepReport::new(kind.key(), true),
            Outcome::Written => {
                warn!("{}: plink2 exited cleanly but {} is incomplete", kind, io.output.prefix().display());
                StepReport::new(kind.key(), false)
            }
            Outcome::ToolFailed(error) => {
                warn!("{}: plink2 {}", kind, error);
                StepReport::new(kind.key(), false)
            }
        }
    }

    /// Prefix for side outputs of `kind` in the work directory
    /// (`<work>/<output name>_<key>`), never next to the step's output.
    fn side_prefix(&self, io: StepIo<'_>, kind: StepKind) -> PathBuf {
        let name = io
            .output
            .prefix()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string());
        self.work.path().join(format!("{}_{}", name, kind.key()))
    }

    fn callrate(&self, io: StepIo<'_>, threshold: f64) -> Result<StepReport> {
        let args = plink2::callrate_args(self.base(io.input, io.output.prefix()), threshold);
        let outcome = self.run(args)?;
        let mut report = self.finish(StepKind::Callrate, io, outcome);

        // plink2 only writes the list when at least one sample is dropped
        let removed = append_to_prefix(io.output.prefix(), ".", "mindrem.id");
        let count = if removed.is_file() { count_data_lines(&removed)? } else { 0 };
        if removed.is_file() {
            report = report.with_pruned_samples(&removed);
        }
        Ok(report.with_metric("callrate_removed_count", count as f64))
    }

    fn het(&self, io: StepIo<'_>, cutoffs: (f64, f64)) -> Result<StepReport> {
        let side = self.side_prefix(io, StepKind::Het);
        if let Outcome::ToolFailed(error) = self.run(plink2::het_args(self.base(io.input, &side)))? {
            warn!("het: plink2 {}", error);
            return Ok(StepReport::new(StepKind::Het.key(), false));
        }

        let het_table = append_to_prefix(&side, ".", "het");
        let outliers = het_outliers(&het_table, cutoffs)
            .with_context(|| format!("reading {}", het_table.display()))?;
        let remove_file = append_to_prefix(&side, ".", "remove");
        write_sample_list(&remove_file, &outliers)?;
        debug!("het: {} sample(s) outside [{}, {}]", outliers.len(), cutoffs.0, cutoffs.1);

        let remove = (!outliers.is_empty()).then_some(remove_file.as_path());
        let outcome = self.run(plink2::remove_args(self.base(io.input, io.output.prefix()), remove))?;
        Ok(self
            .finish(StepKind::Het, io, outcome)
            .with_pruned_samples(&remove_file)
            .with_metric("outlier_count", outliers.len() as f64))
    }

    fn related(&self, io: StepIo<'_>, params: &RelatedParams) -> Result<StepReport> {
        let mut report_metrics = Vec::new();
        let mut remove_list: Option<PathBuf> = None;

        let passes = [
            ("duplicated", params.duplicated_cutoff, params.prune_duplicated),
            ("related", params.related_cutoff, params.prune_related),
        ];
        for (name, cutoff, prune) in passes {
            let side = append_to_prefix(&self.side_prefix(io, StepKind::Related), "_", name);
            if let Outcome::ToolFailed(error) = self.run(plink2::king_cutoff_args(self.base(io.input, &side), cutoff))? {
                warn!("related: plink2 {}", error);
                return Ok(StepReport::new(StepKind::Related.key(), false));
            }
            let out_ids = append_to_prefix(&side, ".", "king.cutoff.out.id");
            let count = if out_ids.is_file() { count_data_lines(&out_ids)? } else { 0 };
            report_metrics.push((format!("{}_count", name), count as f64));
            // the related cutoff is the stricter one and wins when both prune
            if prune && out_ids.is_file() {
                remove_list = Some(out_ids);
            }
        }

        let outcome = self.run(plink2::remove_args(
            self.base(io.input, io.output.prefix()),
            remove_list.as_deref(),
        ))?;
        let mut report = self.finish(StepKind::Related, io, outcome);
        if let Some(list) = remove_list {
            report = report.with_pruned_samples(list);
        }
        for (name, value) in report_metrics {
            report = report.with_metric(name, value);
        }
        Ok(report)
    }

    /// Runs a variant filter and reports how many variants it dropped.
    fn variant_filter(&self, kind: StepKind, io: StepIo<'_>, args: Vec<String>, metric: &str) -> Result<StepReport> {
        let before = io.input.count_variants()?;
        let outcome = self.run(args)?;
        let report = self.finish(kind, io, outcome);
        if !report.pass {
            return Ok(report);
        }
        let after = io.output.count_variants()?;
        info!("{}: kept {} of {} variants", kind, after, before);
        Ok(report.with_metric(metric, before.saturating_sub(after) as f64))
    }

    fn hwe(&self, io: StepIo<'_>, params: &HweParams) -> Result<StepReport> {
        if !params.filter_controls {
            let args = plink2::hwe_args(self.base(io.input, io.output.prefix()), params);
            return self.variant_filter(StepKind::Hwe, io, args, "hwe_removed_count");
        }

        let side = self.side_prefix(io, StepKind::Hwe);
        if let Outcome::ToolFailed(error) = self.run(plink2::hwe_args(self.base(io.input, &side), params))? {
            warn!("hwe: plink2 {}", error);
            return Ok(StepReport::new(StepKind::Hwe.key(), false));
        }
        let snplist = append_to_prefix(&side, ".", "snplist");
        let args = plink2::extract_args(self.base(io.input, io.output.prefix()), &snplist);
        self.variant_filter(StepKind::Hwe, io, args, "hwe_removed_count")
    }

    fn ld(&self, io: StepIo<'_>, params: &LdParams) -> Result<StepReport> {
        let side = self.side_prefix(io, StepKind::Ld);
        if let Outcome::ToolFailed(error) = self.run(plink2::ld_args(self.base(io.input, &side), params))? {
            warn!("ld: plink2 {}", error);
            return Ok(StepReport::new(StepKind::Ld.key(), false));
        }
        let prune_in = append_to_prefix(&side, ".", "prune.in");
        let args = plink2::extract_args(self.base(io.input, io.output.prefix()), &prune_in);
        self.variant_filter(StepKind::Ld, io, args, "ld_removed_count")
    }
}

impl StepAdapter for Plink2Adapter {
    fn ancestry(&self, _io: StepIo<'_>, _params: &AncestryParams) -> Result<StepReport> {
        Err(anyhow!("ancestry classification is not available through plink2"))
    }

    fn sample_qc(&self, io: StepIo<'_>, qc: &SampleQc) -> Result<StepReport> {
        match qc {
            SampleQc::Callrate { threshold } => self.callrate(io, *threshold),
            SampleQc::Het { cutoffs } => self.het(io, *cutoffs),
            SampleQc::Related(params) => self.related(io, params),
            SampleQc::Sex { .. } => Err(anyhow!("sex checks are not available through plink2")),
        }
    }

    fn variant_qc(&self, io: StepIo<'_>, qc: &VariantQc) -> Result<StepReport> {
        match qc {
            VariantQc::Geno { threshold } => {
                let args = plink2::geno_args(self.base(io.input, io.output.prefix()), *threshold);
                self.variant_filter(StepKind::Geno, io, args, "geno_removed_count")
            }
            VariantQc::Hwe(params) => self.hwe(io, params),
            VariantQc::Ld(params) => self.ld(io, params),
            VariantQc::CaseControl { .. } | VariantQc::Haplotype { .. } => Err(anyhow!(
                "{} tests are not available through plink2",
                qc.kind()
            )),
        }
    }

    fn association(&self, _io: StepIo<'_>, _params: &AssocParams) -> Result<StepReport> {
        Err(anyhow!("association testing is not available through plink2"))
    }
}

/// Samples whose inbreeding coefficient F lies outside `cutoffs`, as (FID, IID).
fn het_outliers(het_table: &Path, cutoffs: (f64, f64)) -> Result<Vec<(String, String)>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(het_table)?;
    let headers = reader.headers()?.clone();
    let column = |names: &[&str]| headers.iter().position(|h| names.contains(&h));
    let iid_col = column(&["IID", "#IID"]).ok_or_else(|| anyhow!("no IID column"))?;
    let fid_col = column(&["#FID", "FID"]);
    let f_col = column(&["F"]).ok_or_else(|| anyhow!("no F column"))?;

    let mut outliers = Vec::new();
    for record in reader.records() {
        let record = record?;
        let f: f64 = record
            .get(f_col)
            .and_then(|v| v.trim().parse().ok())
            .ok_or_else(|| anyhow!("unreadable F value in {:?}", record))?;
        if f < cutoffs.0 || f > cutoffs.1 {
            let iid = record.get(iid_col).unwrap_or_default().to_string();
            let fid = fid_col.and_then(|c| record.get(c)).map(str::to_string).unwrap_or_else(|| iid.clone());
            outliers.push((fid, iid));
        }
    }
    Ok(outliers)
}

fn write_sample_list(path: &Path, samples: &[(String, String)]) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "#FID\tIID")?;
    for (fid, iid) in samples {
        writeln!(file, "{}\t{}", fid, iid)?;
    }
    Ok(())
}
