//! Sample-table inspection for the checks run before any step.

use std::path::Path;

use csv::ReaderBuilder;

use crate::config::defs::PipelineError;
use crate::config::qc::QcConfig;
use crate::pipelines::steps::StepKind;

/// What the `.psam` says about sex and case/control status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleSummary {
    pub samples: usize,
    pub with_sex: usize,
    pub cases: usize,
    pub controls: usize,
}

/// Reads a tab-separated `.psam`. SEX is known when 1 or 2; PHENO1 is a control
/// when 1 and a case when 2. Missing columns count as all-missing.
pub fn summarize(psam: &Path) -> Result<SampleSummary, PipelineError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_path(psam)?;

    let headers = reader.headers()?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim_start_matches('#').eq_ignore_ascii_case(name));
    let sex_col = column("SEX");
    let pheno_col = column("PHENO1");

    let mut summary = SampleSummary::default();
    for record in reader.records() {
        let record = record?;
        summary.samples += 1;
        if let Some(sex) = sex_col.and_then(|c| record.get(c)) {
            if matches!(sex.trim(), "1" | "2") {
                summary.with_sex += 1;
            }
        }
        match pheno_col.and_then(|c| record.get(c)).map(str::trim) {
            Some("1") => summary.controls += 1,
            Some("2") => summary.cases += 1,
            _ => {}
        }
    }
    Ok(summary)
}

/// Problems that would make a requested step fail on this cohort.
pub fn step_problems(summary: &SampleSummary, steps: &[StepKind], config: &QcConfig) -> Vec<String> {
    let mut problems = Vec::new();
    for kind in steps {
        match kind {
            StepKind::Sex if summary.with_sex == 0 => {
                problems.push("sex: no sample has SEX set to 1 or 2".to_string());
            }
            StepKind::CaseControl | StepKind::Haplotype if summary.cases == 0 || summary.controls == 0 => {
                problems.push(format!(
                    "{}: needs cases and controls in PHENO1 (found {} cases, {} controls)",
                    kind, summary.cases, summary.controls
                ));
            }
            StepKind::Hwe if summary.controls == 0 && config.hwe.is_some_and(|h| h.filter_controls) => {
                problems.push("hwe: --filter-controls set but PHENO1 has no controls".to_string());
            }
            _ => {}
        }
    }
    problems
}

pub fn preflight(psam: &Path, steps: &[StepKind], config: &QcConfig) -> Result<SampleSummary, PipelineError> {
    let summary = summarize(psam)?;
    let problems = step_problems(&summary, steps, config);
    if !problems.is_empty() {
        return Err(PipelineError::PreflightFailed(problems));
    }
    Ok(summary)
}
