//! Step reports and the recursive run tree assembled by the executor.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::config::defs::PipelineError;
use crate::pipelines::steps::StepKind;
use crate::utils::file::GenotypeDataset;

/// One ancestry group produced by the ancestry split.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AncestryStratum {
    pub label: String,
    pub dataset: GenotypeDataset,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepOutput {
    /// Tab-separated `#FID IID` list of samples removed by a sample-level step.
    pub pruned_samples: Option<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub strata: Vec<AncestryStratum>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GwasSummary {
    pub metrics: BTreeMap<String, f64>,
}

/// What every step adapter hands back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub step: String,
    pub pass: bool,
    pub output: StepOutput,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    pub metrics: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gwas: Option<GwasSummary>,
}

impl StepReport {
    pub fn new(step: impl Into<String>, pass: bool) -> Self {
        StepReport {
            step: step.into(),
            pass,
            output: StepOutput::default(),
            data: Value::Null,
            metrics: BTreeMap::new(),
            gwas: None,
        }
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_pruned_samples(mut self, path: impl Into<PathBuf>) -> Self {
        self.output.pruned_samples = Some(path.into());
        self
    }

    pub fn with_strata(mut self, strata: Vec<AncestryStratum>) -> Self {
        let labels: Vec<Value> = strata.iter().map(|s| Value::from(s.label.clone())).collect();
        self.data = serde_json::json!({ "labels_list": labels });
        self.output.strata = strata;
        self
    }

    pub fn with_gwas(mut self, gwas: GwasSummary) -> Self {
        self.gwas = Some(gwas);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunNode {
    Step(StepReport),
    Stratum(RunTree),
}

/// Results of one executor invocation, keyed by step key or, after an
/// ancestry split, by stratum label.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunTree {
    #[serde(flatten)]
    nodes: BTreeMap<String, RunNode>,
    paths: Vec<PathBuf>,
}

impl RunTree {
    pub fn insert_step(&mut self, kind: StepKind, report: StepReport) {
        self.nodes.insert(kind.key().to_string(), RunNode::Step(report));
    }

    pub fn insert_stratum(&mut self, label: &str, tree: RunTree) -> Result<(), PipelineError> {
        if label == "paths" || StepKind::from_key(label).is_some() || self.nodes.contains_key(label) {
            return Err(PipelineError::InvalidConfig(format!(
                "ancestry label '{}' collides with an existing result key",
                label
            )));
        }
        self.nodes.insert(label.to_string(), RunNode::Stratum(tree));
        Ok(())
    }

    pub fn step(&self, kind: StepKind) -> Option<&StepReport> {
        match self.nodes.get(kind.key()) {
            Some(RunNode::Step(report)) => Some(report),
            _ => None,
        }
    }

    pub fn stratum(&self, label: &str) -> Option<&RunTree> {
        match self.nodes.get(label) {
            Some(RunNode::Stratum(tree)) => Some(tree),
            _ => None,
        }
    }

    pub fn strata(&self) -> impl Iterator<Item = (&str, &RunTree)> {
        self.nodes.iter().filter_map(|(label, node)| match node {
            RunNode::Stratum(tree) => Some((label.as_str(), tree)),
            RunNode::Step(_) => None,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub(crate) fn set_paths(&mut self, paths: Vec<PathBuf>) {
        self.paths = paths;
    }

    /// Final dataset prefix of this invocation.
    pub fn final_path(&self) -> Option<&Path> {
        self.paths.last().map(PathBuf::as_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_like_a_nested_mapping() {
        let mut branch = RunTree::default();
        branch.insert_step(StepKind::Geno, StepReport::new("geno", true).with_metric("geno_removed_count", 3.0));
        branch.set_paths(vec![PathBuf::from("out_EUR")]);

        let mut tree = RunTree::default();
        tree.insert_step(StepKind::Ancestry, StepReport::new("ancestry", true));
        tree.insert_stratum("EUR", branch).unwrap();
        tree.set_paths(vec![PathBuf::from("out"), PathBuf::from("out_ancestry")]);

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(json["EUR"]["geno"]["metrics"]["geno_removed_count"], 3.0);
        assert_eq!(json["EUR"]["paths"][0], "out_EUR");
        assert_eq!(json["ancestry"]["pass"], true);
        assert_eq!(json["paths"][1], "out_ancestry");
    }

    #[test]
    fn stratum_labels_cannot_shadow_steps() {
        let mut tree = RunTree::default();
        assert!(tree.insert_stratum("geno", RunTree::default()).is_err());
        assert!(tree.insert_stratum("paths", RunTree::default()).is_err());
        tree.insert_stratum("AFR", RunTree::default()).unwrap();
        assert!(tree.insert_stratum("AFR", RunTree::default()).is_err());
        assert_eq!(tree.strata().count(), 1);
    }

    #[test]
    fn strata_builder_records_labels() {
        let report = StepReport::new("ancestry", true).with_strata(vec![AncestryStratum {
            label: "AMR".to_string(),
            dataset: GenotypeDataset::new("out_AMR"),
        }]);
        assert_eq!(report.data["labels_list"][0], "AMR");
        assert_eq!(report.output.strata.len(), 1);
    }
}
