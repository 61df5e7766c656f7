pub mod defs;
pub mod qc;
