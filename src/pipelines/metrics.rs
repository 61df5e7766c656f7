//! Flattens run trees into the metrics, pruned-sample and GWAS tables.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};
use serde::{Serialize, Serializer};

use crate::config::defs::{
    PipelineError, ALL_ANCESTRY_LABEL, GWAS_TABLE_SUFFIX, METRICS_TABLE_SUFFIX, PRUNED_TABLE_SUFFIX,
};
use crate::pipelines::results::RunTree;
use crate::pipelines::steps::{QcLevel, StepKind, QC_STEP_ORDER};
use crate::utils::file::append_to_prefix;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub step: String,
    #[serde(serialize_with = "serialize_count")]
    pub pruned_count: f64,
    pub metric: String,
    pub ancestry: String,
    pub level: QcLevel,
    pub pass: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrunedSampleRow {
    #[serde(rename = "#FID")]
    pub fid: String,
    #[serde(rename = "IID")]
    pub iid: String,
    pub step: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GwasRow {
    pub value: f64,
    pub metric: String,
    pub ancestry: String,
}

const METRICS_HEADER: [&str; 6] = ["step", "pruned_count", "metric", "ancestry", "level", "pass"];
const PRUNED_HEADER: [&str; 3] = ["#FID", "IID", "step"];
const GWAS_HEADER: [&str; 3] = ["value", "metric", "ancestry"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QcTables {
    pub metrics: Vec<MetricRow>,
    pub pruned_samples: Vec<PrunedSampleRow>,
    pub gwas: Vec<GwasRow>,
}

impl QcTables {
    pub fn extend(&mut self, other: QcTables) {
        self.metrics.extend(other.metrics);
        self.pruned_samples.extend(other.pruned_samples);
        self.gwas.extend(other.gwas);
    }
}

/// Whole counts are written without a fractional part.
fn serialize_count<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Builds the tables for one level of a run tree, tagging every row with
/// `ancestry`. Nested strata are left to the caller (see [`aggregate_nested`]).
pub fn aggregate(tree: &RunTree, ancestry: &str) -> Result<QcTables, PipelineError> {
    let mut tables = QcTables::default();

    for kind in QC_STEP_ORDER {
        let (Some(report), Some(level)) = (tree.step(kind), kind.level()) else {
            continue;
        };

        if level == QcLevel::Sample {
            if let Some(path) = &report.output.pruned_samples {
                if path.is_file() {
                    tables.pruned_samples.extend(read_pruned_samples(path, kind)?);
                }
            }
        }

        for (metric, value) in &report.metrics {
            tables.metrics.push(MetricRow {
                step: report.step.clone(),
                pruned_count: *value,
                metric: metric.clone(),
                ancestry: ancestry.to_string(),
                level,
                pass: report.pass,
            });
        }
    }

    if let Some(gwas) = tree.step(StepKind::Assoc).and_then(|r| r.gwas.as_ref()) {
        for (metric, value) in &gwas.metrics {
            tables.gwas.push(GwasRow {
                value: *value,
                metric: metric.clone(),
                ancestry: ancestry.to_string(),
            });
        }
    }

    Ok(tables)
}

/// Aggregates the top level under `all`, then every stratum under its label.
pub fn aggregate_nested(tree: &RunTree) -> Result<QcTables, PipelineError> {
    let mut tables = aggregate(tree, ALL_ANCESTRY_LABEL)?;
    collect_strata(tree, &mut tables)?;
    Ok(tables)
}

fn collect_strata(tree: &RunTree, tables: &mut QcTables) -> Result<(), PipelineError> {
    for (label, branch) in tree.strata() {
        tables.extend(aggregate(branch, label)?);
        collect_strata(branch, tables)?;
    }
    Ok(())
}

/// Reads a tab-separated pruned-sample list with a `#FID IID` (or `#IID`) header.
pub fn read_pruned_samples(path: &Path, kind: StepKind) -> Result<Vec<PrunedSampleRow>, PipelineError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Ok(Vec::new());
    }
    let column = |names: &[&str]| headers.iter().position(|h| names.contains(&h));
    let iid_col = column(&["IID", "#IID"]).ok_or_else(|| {
        PipelineError::IOError(format!("{} has no IID column", path.display()))
    })?;
    let fid_col = column(&["#FID", "FID"]);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(iid) = record.get(iid_col) else {
            continue;
        };
        let fid = fid_col.and_then(|c| record.get(c)).unwrap_or(iid);
        rows.push(PrunedSampleRow {
            fid: fid.to_string(),
            iid: iid.to_string(),
            step: kind.key().to_string(),
        });
    }
    Ok(rows)
}

fn write_table<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<(), PipelineError> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(File::create(path)?);
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `<out>.qc_metrics.tsv`, `<out>.pruned_samples.tsv` and
/// `<out>.gwas_metrics.tsv`, returning their paths.
pub fn write_tables(tables: &QcTables, out_prefix: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if let Some(parent) = out_prefix.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let metrics_path = append_to_prefix(out_prefix, ".", METRICS_TABLE_SUFFIX);
    let pruned_path = append_to_prefix(out_prefix, ".", PRUNED_TABLE_SUFFIX);
    let gwas_path = append_to_prefix(out_prefix, ".", GWAS_TABLE_SUFFIX);

    write_table(&metrics_path, &METRICS_HEADER, &tables.metrics)?;
    write_table(&pruned_path, &PRUNED_HEADER, &tables.pruned_samples)?;
    write_table(&gwas_path, &GWAS_HEADER, &tables.gwas)?;

    Ok(vec![metrics_path, pruned_path, gwas_path])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::results::{GwasSummary, StepReport};
    use tempfile::tempdir;

    #[test]
    fn single_callrate_step_yields_one_row() {
        let mut tree = RunTree::default();
        tree.insert_step(StepKind::Callrate, StepReport::new("callrate", true).with_metric("removed", 12.0));

        let tables = aggregate(&tree, "all").unwrap();
        assert_eq!(tables.metrics.len(), 1);
        let row = &tables.metrics[0];
        assert_eq!(row.step, "callrate");
        assert_eq!(row.pruned_count, 12.0);
        assert_eq!(row.level, QcLevel::Sample);
        assert_eq!(row.ancestry, "all");
        assert!(row.pass);
        assert!(tables.pruned_samples.is_empty());
    }

    #[test]
    fn rows_follow_canonical_order_and_skip_non_qc_steps() {
        let mut tree = RunTree::default();
        tree.insert_step(StepKind::Ld, StepReport::new("ld", true).with_metric("ld_removed_count", 40.0));
        tree.insert_step(StepKind::Ancestry, StepReport::new("ancestry", true).with_metric("predicted", 3.0));
        tree.insert_step(StepKind::Sex, StepReport::new("sex", false).with_metric("outlier_count", 2.0));

        let tables = aggregate(&tree, "EUR").unwrap();
        let steps: Vec<&str> = tables.metrics.iter().map(|r| r.step.as_str()).collect();
        assert_eq!(steps, vec!["sex", "ld"]);
        assert!(!tables.metrics[0].pass);
        assert_eq!(tables.metrics[1].level, QcLevel::Variant);
    }

    #[test]
    fn pruned_samples_are_loaded_for_sample_steps() {
        let dir = tempdir().unwrap();
        let with_fid = dir.path().join("het.pruned");
        fs::write(&with_fid, "#FID\tIID\nfam1\ts1\nfam2\ts2\n").unwrap();
        let iid_only = dir.path().join("callrate.mindrem.id");
        fs::write(&iid_only, "#IID\ns9\n").unwrap();

        let mut tree = RunTree::default();
        tree.insert_step(StepKind::Het, StepReport::new("het", true).with_pruned_samples(&with_fid));
        tree.insert_step(StepKind::Callrate, StepReport::new("callrate", true).with_pruned_samples(&iid_only));

        let tables = aggregate(&tree, "all").unwrap();
        assert_eq!(tables.pruned_samples.len(), 3);
        assert_eq!(tables.pruned_samples[0], PrunedSampleRow {
            fid: "s9".to_string(),
            iid: "s9".to_string(),
            step: "callrate".to_string(),
        });
        assert_eq!(tables.pruned_samples[2].fid, "fam2");
        assert_eq!(tables.pruned_samples[2].step, "het");
    }

    #[test]
    fn gwas_metrics_and_written_tables() {
        let dir = tempdir().unwrap();
        let mut gwas = GwasSummary::default();
        gwas.metrics.insert("lambda".to_string(), 1.02);

        let mut tree = RunTree::default();
        tree.insert_step(StepKind::Geno, StepReport::new("geno", true).with_metric("geno_removed_count", 7.0));
        tree.insert_step(StepKind::Assoc, StepReport::new("assoc", true).with_gwas(gwas));

        let tables = aggregate_nested(&tree).unwrap();
        assert_eq!(tables.gwas, vec![GwasRow { value: 1.02, metric: "lambda".to_string(), ancestry: "all".to_string() }]);

        let paths = write_tables(&tables, &dir.path().join("qc")).unwrap();
        let metrics = fs::read_to_string(&paths[0]).unwrap();
        assert_eq!(
            metrics,
            "step\tpruned_count\tmetric\tancestry\tlevel\tpass\ngeno\t7\tgeno_removed_count\tall\tvariant\ttrue\n"
        );
        let pruned = fs::read_to_string(&paths[1]).unwrap();
        assert_eq!(pruned, "#FID\tIID\tstep\n");
    }
}
