mod common;

use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use common::{Layout, MockAdapter};
use genoqc_pipelines::config::defs::{PipelineError, COMMON_SNPS_FILE};
use genoqc_pipelines::config::qc::{QcConfig, RetentionPolicy};
use genoqc_pipelines::pipelines::executor::Executor;
use genoqc_pipelines::pipelines::metrics::aggregate_nested;
use genoqc_pipelines::pipelines::steps::{AncestryParams, StepKind};
use genoqc_pipelines::utils::file::GenotypeDataset;

fn config(steps: &[StepKind], retention: RetentionPolicy, warn: bool) -> QcConfig {
    let mut config = QcConfig { retention, warn, ..QcConfig::default() };
    for kind in steps {
        if *kind == StepKind::Ancestry {
            config.ancestry = Some(AncestryParams {
                ref_panel: PathBuf::from("ref/panel"),
                ref_labels: PathBuf::from("ref/labels.txt"),
                model: None,
                containerized: false,
                singularity: false,
                subset: Vec::new(),
            });
        } else {
            config.enable_with_defaults(*kind).unwrap();
        }
    }
    config
}

#[test]
fn paths_have_one_entry_per_step_and_end_at_output() -> Result<()> {
    let layout = Layout::new();
    let steps = [StepKind::Callrate, StepKind::Het, StepKind::Geno];
    let qc = config(&steps, RetentionPolicy::Full, false);
    let adapter = MockAdapter::new();

    let tree = Executor::new(&adapter, &qc, &layout.scratch).run(&steps, &layout.source, &layout.base)?;

    assert_eq!(tree.paths().len(), steps.len() + 1);
    assert_eq!(tree.final_path(), Some(layout.base.as_path()));
    assert_eq!(tree.paths()[1], layout.out_path("callrate"));
    assert_eq!(tree.paths()[2], layout.out_path("callrate_het"));
    assert_eq!(adapter.steps_called(), steps.to_vec());

    let first = adapter.call(StepKind::Callrate).unwrap();
    assert_eq!(first.input, layout.source.prefix());

    // full retention keeps every intermediate
    for prefix in &tree.paths()[1..] {
        assert!(GenotypeDataset::new(prefix).is_complete(), "{} was removed", prefix.display());
    }
    assert!(layout.source.is_complete());
    Ok(())
}

#[test]
fn minimal_retention_leaves_only_the_final_dataset() -> Result<()> {
    let layout = Layout::new();
    let steps = [StepKind::Callrate, StepKind::Het, StepKind::Geno];
    let qc = config(&steps, RetentionPolicy::Minimal, false);
    let adapter = MockAdapter::new();

    let tree = Executor::new(&adapter, &qc, &layout.scratch).run(&steps, &layout.source, &layout.base)?;

    assert_eq!(tree.paths()[0], layout.scratch.join("qc"));
    assert_eq!(tree.paths()[1], layout.scratch.join("qc_callrate"));
    assert!(GenotypeDataset::new(&layout.base).is_complete());
    assert!(Layout::pgen_files(&layout.scratch).is_empty());
    assert_eq!(Layout::pgen_files(layout.base.parent().unwrap()), vec![GenotypeDataset::new(&layout.base).pgen()]);
    assert!(layout.source.is_complete());
    Ok(())
}

#[test]
fn ancestry_split_runs_remaining_steps_per_stratum() -> Result<()> {
    let layout = Layout::new();
    let steps = [StepKind::Ancestry, StepKind::Geno, StepKind::Hwe];
    let qc = config(&steps, RetentionPolicy::Full, false);
    let adapter = MockAdapter::new().with_strata(&["EUR", "AFR"]);

    let tree = Executor::new(&adapter, &qc, &layout.scratch).run(&steps, &layout.source, &layout.base)?;

    let mut keys: Vec<&str> = tree.keys().collect();
    keys.sort();
    assert_eq!(keys, vec!["AFR", "EUR", "ancestry"]);
    assert_eq!(tree.paths(), &[layout.base.clone(), layout.out_path("ancestry")]);

    for label in ["EUR", "AFR"] {
        let branch = tree.stratum(label).expect("stratum present");
        let mut branch_keys: Vec<&str> = branch.keys().collect();
        branch_keys.sort();
        assert_eq!(branch_keys, vec!["geno", "hwe"]);
        let stratum_base = layout.out_path(label);
        assert_eq!(branch.paths().len(), 3);
        assert_eq!(branch.final_path(), Some(stratum_base.as_path()));
        assert!(GenotypeDataset::new(&stratum_base).is_complete());
    }

    assert_eq!(
        adapter.steps_called(),
        vec![StepKind::Ancestry, StepKind::Geno, StepKind::Hwe, StepKind::Geno, StepKind::Hwe]
    );
    let eur_geno = adapter.calls.borrow()[1].clone();
    assert_eq!(eur_geno.input, layout.out_path("ancestry_EUR"));
    assert_eq!(eur_geno.output, layout.out_path("EUR_geno"));

    let json = serde_json::to_value(&tree)?;
    assert!(json["paths"].is_array());
    assert!(json["EUR"]["paths"].is_array());
    assert_eq!(json["ancestry"]["data"]["labels_list"][0], "EUR");
    Ok(())
}

#[test]
fn warn_reroutes_past_a_failed_step() -> Result<()> {
    let layout = Layout::new();
    let steps = [StepKind::Callrate, StepKind::Sex, StepKind::Het, StepKind::Geno];
    let qc = config(&steps, RetentionPolicy::Full, true);
    let adapter = MockAdapter::new().failing(&[StepKind::Sex]);

    let tree = Executor::new(&adapter, &qc, &layout.scratch).run(&steps, &layout.source, &layout.base)?;

    let callrate = adapter.call(StepKind::Callrate).unwrap();
    let het = adapter.call(StepKind::Het).unwrap();
    assert_eq!(het.input, callrate.output);
    assert_eq!(het.output, layout.out_path("callrate_het"));
    assert_eq!(adapter.call(StepKind::Geno).unwrap().input, het.output);

    assert!(!tree.step(StepKind::Sex).unwrap().pass);
    assert_eq!(tree.final_path(), Some(layout.base.as_path()));
    Ok(())
}

#[test]
fn warn_falls_back_two_datasets() -> Result<()> {
    let layout = Layout::new();
    let steps = [StepKind::Callrate, StepKind::Sex, StepKind::Het, StepKind::Geno];
    let qc = config(&steps, RetentionPolicy::Full, true);
    let adapter = MockAdapter::new().failing(&[StepKind::Sex, StepKind::Het]);

    Executor::new(&adapter, &qc, &layout.scratch).run(&steps, &layout.source, &layout.base)?;

    let callrate = adapter.call(StepKind::Callrate).unwrap();
    assert_eq!(adapter.call(StepKind::Geno).unwrap().input, callrate.output);
    assert!(GenotypeDataset::new(&layout.base).is_complete());
    Ok(())
}

#[test]
fn warn_gives_up_after_three_missing_datasets() {
    let layout = Layout::new();
    let steps = [StepKind::Callrate, StepKind::Sex, StepKind::Het, StepKind::Geno, StepKind::Ld];
    let qc = config(&steps, RetentionPolicy::Full, true);
    let adapter = MockAdapter::new().failing(&[StepKind::Sex, StepKind::Het, StepKind::Geno]);

    let err = Executor::new(&adapter, &qc, &layout.scratch)
        .run(&steps, &layout.source, &layout.base)
        .unwrap_err();

    match err {
        PipelineError::ConsecutiveFailures { step, .. } => assert_eq!(step, "ld"),
        other => panic!("expected ConsecutiveFailures, got {:?}", other),
    }
    assert!(!adapter.steps_called().contains(&StepKind::Ld));
}

#[test]
fn failure_without_warn_aborts() {
    let layout = Layout::new();
    let steps = [StepKind::Callrate, StepKind::Geno, StepKind::Hwe];
    let qc = config(&steps, RetentionPolicy::Full, false);
    let adapter = MockAdapter::new().failing(&[StepKind::Geno]);

    let err = Executor::new(&adapter, &qc, &layout.scratch)
        .run(&steps, &layout.source, &layout.base)
        .unwrap_err();

    assert!(matches!(err, PipelineError::StepFailed { ref step } if step == "geno"));
    assert_eq!(adapter.steps_called(), vec![StepKind::Callrate, StepKind::Geno]);
}

#[test]
fn missing_common_variants_fail_before_any_step() {
    let layout = Layout::new();
    let steps = [StepKind::Ancestry, StepKind::Geno];
    let qc = config(&steps, RetentionPolicy::Minimal, false);
    let adapter = MockAdapter::new().with_strata(&["EUR"]);

    let err = Executor::new(&adapter, &qc, &layout.scratch)
        .run(&steps, &layout.source, &layout.base)
        .unwrap_err();

    match err {
        PipelineError::MissingArtifact { path } => {
            assert_eq!(path, layout.base.parent().unwrap().join(COMMON_SNPS_FILE));
        }
        other => panic!("expected MissingArtifact, got {:?}", other),
    }
    assert!(adapter.steps_called().is_empty());
}

#[test]
fn common_variants_are_staged_for_minimal_ancestry_runs() -> Result<()> {
    let layout = Layout::new();
    fs::write(layout.base.parent().unwrap().join(COMMON_SNPS_FILE), "rs1\n")?;
    let steps = [StepKind::Ancestry, StepKind::Geno];
    let qc = config(&steps, RetentionPolicy::Minimal, false);
    let adapter = MockAdapter::new().with_strata(&["EUR"]);

    let tree = Executor::new(&adapter, &qc, &layout.scratch).run(&steps, &layout.source, &layout.base)?;

    assert!(layout.scratch.join(COMMON_SNPS_FILE).is_file());
    assert!(GenotypeDataset::new(layout.out_path("EUR")).is_complete());
    assert!(tree.stratum("EUR").unwrap().step(StepKind::Geno).unwrap().pass);
    Ok(())
}

#[test]
fn missing_source_is_rejected_up_front() {
    let layout = Layout::new();
    fs::remove_file(layout.source.pvar()).unwrap();
    let steps = [StepKind::Geno];
    let qc = config(&steps, RetentionPolicy::Full, false);
    let adapter = MockAdapter::new();

    let err = Executor::new(&adapter, &qc, &layout.scratch)
        .run(&steps, &layout.source, &layout.base)
        .unwrap_err();

    assert!(matches!(err, PipelineError::MissingArtifact { .. }));
    assert!(adapter.steps_called().is_empty());
}

#[test]
fn minimal_warn_keeps_evidence_of_a_failed_step() -> Result<()> {
    let layout = Layout::new();
    let steps = [StepKind::Callrate, StepKind::Sex, StepKind::Het];
    let qc = config(&steps, RetentionPolicy::Minimal, true);
    let adapter = MockAdapter::new()
        .failing_partially(&[StepKind::Sex])
        .watching(&layout.scratch);

    let tree = Executor::new(&adapter, &qc, &layout.scratch).run(&steps, &layout.source, &layout.base)?;

    let callrate_out = layout.scratch.join("qc_callrate");
    let sex_out = layout.scratch.join("qc_callrate_sex");

    // no cleanup after the tolerated failure: both datasets are still there
    assert_eq!(
        adapter.listing_before(StepKind::Het).unwrap(),
        vec![GenotypeDataset::new(&callrate_out).pgen(), GenotypeDataset::new(&sex_out).pgen()]
    );
    let het = adapter.call(StepKind::Het).unwrap();
    assert_eq!(het.input, callrate_out);
    assert_eq!(het.output, layout.base);
    assert!(!tree.step(StepKind::Sex).unwrap().pass);

    // the passing terminal step releases its recorded predecessor (the failed
    // output); the dataset it actually read stays in scratch until the run's
    // scratch area is dropped
    assert_eq!(Layout::pgen_files(&layout.scratch), vec![GenotypeDataset::new(&callrate_out).pgen()]);
    assert!(GenotypeDataset::new(&layout.base).is_complete());
    Ok(())
}

#[test]
fn minimal_rerun_is_byte_identical() -> Result<()> {
    let layout = Layout::new();
    let steps = [StepKind::Callrate, StepKind::Geno, StepKind::Ld];
    let qc = config(&steps, RetentionPolicy::Minimal, false);
    let final_dataset = GenotypeDataset::new(&layout.base);
    let read_trio = || -> Result<Vec<Vec<u8>>> {
        Ok(vec![
            fs::read(final_dataset.pgen())?,
            fs::read(final_dataset.psam())?,
            fs::read(final_dataset.pvar())?,
        ])
    };

    let first = Executor::new(&MockAdapter::new(), &qc, &layout.scratch).run(&steps, &layout.source, &layout.base)?;
    let first_tables = aggregate_nested(&first)?;
    let first_bytes = read_trio()?;

    let second = Executor::new(&MockAdapter::new(), &qc, &layout.scratch).run(&steps, &layout.source, &layout.base)?;
    let second_tables = aggregate_nested(&second)?;

    assert_eq!(first, second);
    assert_eq!(first_tables, second_tables);
    assert_eq!(first_tables.metrics.len(), 3);
    assert_eq!(first_tables.pruned_samples.len(), 1);
    assert_eq!(first_bytes, read_trio()?);
    assert!(Layout::pgen_files(&layout.scratch).is_empty());
    Ok(())
}
