pub mod adapter;
pub mod executor;
pub mod genotype_qc;
pub mod metrics;
pub mod paths;
pub mod plink2;
pub mod results;
pub mod steps;
