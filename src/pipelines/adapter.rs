//! The contract between the executor and the QC step implementations.

use anyhow::Result;

use crate::pipelines::results::StepReport;
use crate::pipelines::steps::{AncestryParams, AssocParams, SampleQc, StepCall, VariantQc};
use crate::utils::file::GenotypeDataset;

/// Input dataset and the prefix the step should write its dataset to.
#[derive(Debug, Clone, Copy)]
pub struct StepIo<'a> {
    pub input: &'a GenotypeDataset,
    pub output: &'a GenotypeDataset,
}

/// One method per step category. Calls block until the step is done.
///
/// An `Err` means the step could not run at all and aborts the pipeline.
/// A step that ran but produced nothing usable returns `Ok` with `pass = false`.
pub trait StepAdapter {
    /// Splits `io.input` into per-ancestry datasets, reported in `output.strata`.
    fn ancestry(&self, io: StepIo<'_>, params: &AncestryParams) -> Result<StepReport>;

    fn sample_qc(&self, io: StepIo<'_>, qc: &SampleQc) -> Result<StepReport>;

    fn variant_qc(&self, io: StepIo<'_>, qc: &VariantQc) -> Result<StepReport>;

    fn association(&self, io: StepIo<'_>, params: &AssocParams) -> Result<StepReport>;

    fn dispatch(&self, io: StepIo<'_>, call: &StepCall) -> Result<StepReport> {
        match call {
            StepCall::Ancestry(params) => self.ancestry(io, params),
            StepCall::Sample(qc) => self.sample_qc(io, qc),
            StepCall::Variant(qc) => self.variant_qc(io, qc),
            StepCall::Association(params) => self.association(io, params),
        }
    }
}
