#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use genoqc_pipelines::pipelines::adapter::{StepAdapter, StepIo};
use genoqc_pipelines::pipelines::results::{AncestryStratum, GwasSummary, StepReport};
use genoqc_pipelines::pipelines::steps::{AncestryParams, AssocParams, SampleQc, StepKind, VariantQc};
use genoqc_pipelines::utils::file::{append_to_prefix, GenotypeDataset};
use tempfile::TempDir;

pub const PSAM: &str = "#FID\tIID\tSEX\tPHENO1\nf1\ts1\t1\t1\nf2\ts2\t2\t2\n";

pub fn write_trio(prefix: &Path) {
    let dataset = GenotypeDataset::new(prefix);
    if let Some(parent) = prefix.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(dataset.pgen(), b"pgen").unwrap();
    fs::write(dataset.psam(), PSAM).unwrap();
    fs::write(dataset.pvar(), "#CHROM\tPOS\tID\tREF\tALT\n1\t100\trs1\tA\tG\n").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub step: StepKind,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Records every call and writes a complete trio to the output prefix
/// unless the step is configured to fail. Steps in `partial` fail after
/// writing only the `.pgen`.
pub struct MockAdapter {
    pub calls: RefCell<Vec<Call>>,
    pub failing: HashSet<StepKind>,
    pub partial: HashSet<StepKind>,
    pub strata: Vec<String>,
    pub pruned_count: f64,
    /// Directory whose `.pgen` files are listed at the start of every call.
    pub watch: Option<PathBuf>,
    pub listings: RefCell<Vec<(StepKind, Vec<PathBuf>)>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        MockAdapter {
            calls: RefCell::new(Vec::new()),
            failing: HashSet::new(),
            partial: HashSet::new(),
            strata: Vec::new(),
            pruned_count: 12.0,
            watch: None,
            listings: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(mut self, steps: &[StepKind]) -> Self {
        self.failing.extend(steps.iter().copied());
        self
    }

    pub fn failing_partially(mut self, steps: &[StepKind]) -> Self {
        self.partial.extend(steps.iter().copied());
        self
    }

    pub fn watching(mut self, dir: &Path) -> Self {
        self.watch = Some(dir.to_path_buf());
        self
    }

    pub fn listing_before(&self, step: StepKind) -> Option<Vec<PathBuf>> {
        self.listings.borrow().iter().find(|(s, _)| *s == step).map(|(_, files)| files.clone())
    }

    pub fn with_strata(mut self, labels: &[&str]) -> Self {
        self.strata = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn steps_called(&self) -> Vec<StepKind> {
        self.calls.borrow().iter().map(|c| c.step).collect()
    }

    pub fn call(&self, step: StepKind) -> Option<Call> {
        self.calls.borrow().iter().find(|c| c.step == step).cloned()
    }

    fn record(&self, step: StepKind, io: StepIo<'_>) -> bool {
        if let Some(dir) = &self.watch {
            self.listings.borrow_mut().push((step, Layout::pgen_files(dir)));
        }
        self.calls.borrow_mut().push(Call {
            step,
            input: io.input.prefix().to_path_buf(),
            output: io.output.prefix().to_path_buf(),
        });
        if self.failing.contains(&step) {
            return false;
        }
        if self.partial.contains(&step) {
            fs::write(io.output.pgen(), b"partial").unwrap();
            return false;
        }
        write_trio(io.output.prefix());
        true
    }

    fn qc(&self, step: StepKind, io: StepIo<'_>) -> StepReport {
        let pass = self.record(step, io);
        StepReport::new(step.key(), pass).with_metric(format!("{}_removed_count", step.key()), self.pruned_count)
    }
}

impl StepAdapter for MockAdapter {
    fn ancestry(&self, io: StepIo<'_>, _params: &AncestryParams) -> Result<StepReport> {
        let pass = self.record(StepKind::Ancestry, io);
        let mut strata = Vec::new();
        if pass {
            for label in &self.strata {
                let prefix = append_to_prefix(io.output.prefix(), "_", label);
                write_trio(&prefix);
                strata.push(AncestryStratum { label: label.clone(), dataset: GenotypeDataset::new(prefix) });
            }
        }
        Ok(StepReport::new("ancestry", pass).with_strata(strata))
    }

    fn sample_qc(&self, io: StepIo<'_>, qc: &SampleQc) -> Result<StepReport> {
        let report = self.qc(qc.kind(), io);
        if !report.pass {
            return Ok(report);
        }
        let pruned = append_to_prefix(io.output.prefix(), ".", "removed.id");
        fs::write(&pruned, "#FID\tIID\nf2\ts2\n")?;
        Ok(report.with_pruned_samples(pruned))
    }

    fn variant_qc(&self, io: StepIo<'_>, qc: &VariantQc) -> Result<StepReport> {
        Ok(self.qc(qc.kind(), io))
    }

    fn association(&self, io: StepIo<'_>, _params: &AssocParams) -> Result<StepReport> {
        let pass = self.record(StepKind::Assoc, io);
        let mut gwas = GwasSummary::default();
        gwas.metrics.insert("lambda_gc".to_string(), 1.01);
        Ok(StepReport::new("assoc", pass).with_gwas(gwas))
    }
}

/// Temporary layout: `raw/cohort` source trio, `out/qc` output prefix and a
/// `scratch` directory.
pub struct Layout {
    pub dir: TempDir,
    pub source: GenotypeDataset,
    pub base: PathBuf,
    pub scratch: PathBuf,
}

impl Layout {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = GenotypeDataset::new(dir.path().join("raw").join("cohort"));
        write_trio(source.prefix());
        let base = dir.path().join("out").join("qc");
        fs::create_dir_all(base.parent().unwrap()).unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        Layout { dir, source, base, scratch }
    }

    pub fn out_path(&self, suffix: &str) -> PathBuf {
        append_to_prefix(&self.base, "_", suffix)
    }

    pub fn pgen_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|e| e == "pgen"))
            .collect();
        files.sort();
        files
    }
}
