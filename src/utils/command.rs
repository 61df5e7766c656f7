/// Functions and structs for building and running external tool command lines

use std::path::Path;
use std::process::{Command, Output, Stdio};

use anyhow::{anyhow, Result};
use log::debug;

use crate::config::defs::{PipelineError, PLINK2_TAG, TOOL_VERSIONS};
use crate::utils::file::GenotypeDataset;


/// Genotype formats accepted on the command line besides a PLINK 2 fileset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Bfile,
    Vcf,
}

pub mod plink2 {
    use std::path::Path;
    use std::process::{Command, Stdio};

    use anyhow::{anyhow, Result};

    use crate::config::defs::PLINK2_TAG;
    use crate::pipelines::steps::{HweParams, LdParams};
    use crate::utils::command::InputFormat;
    use crate::utils::file::GenotypeDataset;

    pub fn plink2_presence_check() -> Result<String> {
        let output = Command::new(PLINK2_TAG)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| anyhow!("Failed to spawn {}: {}. Is plink2 installed?", PLINK2_TAG, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout
            .lines()
            .next()
            .ok_or_else(|| anyhow!("No output from plink2 --version"))?;
        // "PLINK v2.00a5.10LM 64-bit Intel (5 Jun 2024)"
        let version = first_line
            .split_whitespace()
            .nth(1)
            .map(|v| v.trim_start_matches('v'))
            .ok_or_else(|| anyhow!("Invalid plink2 --version output: {}", first_line))?
            .to_string();
        if version.is_empty() {
            return Err(anyhow!("Empty version number in plink2 --version output: {}", first_line));
        }
        Ok(version)
    }

    /// Input, resources and output shared by every invocation.
    pub fn base_args(input: &GenotypeDataset, out: &Path, threads: usize, memory_mb: Option<u64>) -> Vec<String> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("--pfile".to_string());
        args_vec.push(input.prefix().to_string_lossy().to_string());
        args_vec.push("--threads".to_string());
        args_vec.push(threads.to_string());
        if let Some(memory) = memory_mb {
            args_vec.push("--memory".to_string());
            args_vec.push(memory.to_string());
        }
        args_vec.push("--out".to_string());
        args_vec.push(out.to_string_lossy().to_string());
        args_vec
    }

    pub fn make_pgen(mut args_vec: Vec<String>) -> Vec<String> {
        args_vec.push("--make-pgen".to_string());
        args_vec
    }

    pub fn convert_args(format: InputFormat, input: &Path, out: &Path, threads: usize) -> Vec<String> {
        let flag = match format {
            InputFormat::Bfile => "--bfile",
            InputFormat::Vcf => "--vcf",
        };
        vec![
            flag.to_string(),
            input.to_string_lossy().to_string(),
            "--threads".to_string(),
            threads.to_string(),
            "--make-pgen".to_string(),
            "--out".to_string(),
            out.to_string_lossy().to_string(),
        ]
    }

    pub fn callrate_args(base: Vec<String>, threshold: f64) -> Vec<String> {
        let mut args_vec = make_pgen(base);
        args_vec.push("--mind".to_string());
        args_vec.push(threshold.to_string());
        args_vec
    }

    pub fn het_args(base: Vec<String>) -> Vec<String> {
        let mut args_vec = base;
        args_vec.push("--het".to_string());
        args_vec
    }

    pub fn king_cutoff_args(base: Vec<String>, cutoff: f64) -> Vec<String> {
        let mut args_vec = base;
        args_vec.push("--king-cutoff".to_string());
        args_vec.push(cutoff.to_string());
        args_vec
    }

    /// Writes the dataset without the samples listed in `remove`, if any.
    pub fn remove_args(base: Vec<String>, remove: Option<&Path>) -> Vec<String> {
        let mut args_vec = make_pgen(base);
        if let Some(file) = remove {
            args_vec.push("--remove".to_string());
            args_vec.push(file.to_string_lossy().to_string());
        }
        args_vec
    }

    pub fn extract_args(base: Vec<String>, variants: &Path) -> Vec<String> {
        let mut args_vec = make_pgen(base);
        args_vec.push("--extract".to_string());
        args_vec.push(variants.to_string_lossy().to_string());
        args_vec
    }

    pub fn geno_args(base: Vec<String>, threshold: f64) -> Vec<String> {
        let mut args_vec = make_pgen(base);
        args_vec.push("--geno".to_string());
        args_vec.push(threshold.to_string());
        args_vec
    }

    pub fn hwe_args(base: Vec<String>, params: &HweParams) -> Vec<String> {
        let mut args_vec = base;
        args_vec.push("--hwe".to_string());
        args_vec.push(params.threshold.to_string());
        if params.filter_controls {
            // controls are coded 1 in PHENO1
            args_vec.push("--keep-if".to_string());
            args_vec.push("PHENO1==1".to_string());
            args_vec.push("--write-snplist".to_string());
            args_vec
        } else {
            make_pgen(args_vec)
        }
    }

    pub fn ld_args(base: Vec<String>, params: &LdParams) -> Vec<String> {
        let mut args_vec = base;
        args_vec.push("--indep-pairwise".to_string());
        args_vec.push(params.window_size.to_string());
        args_vec.push(params.step_size.to_string());
        args_vec.push(params.r2_threshold.to_string());
        args_vec
    }
}

pub fn check_version(tool: &str) -> Result<String> {
    let version = match tool {
        PLINK2_TAG => plink2::plink2_presence_check(),
        _ => return Err(anyhow!("Unknown tool: {}", tool)),
    }?;

    if let Some(min) = TOOL_VERSIONS.get(tool) {
        let major_minor: f32 = version
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| anyhow!("Cannot parse {} version '{}'", tool, version))?;
        if major_minor < *min {
            return Err(anyhow!("{} version {} is older than required {}", tool, version, min));
        }
    }
    Ok(version)
}

/// Runs `tool` to completion. A tool that cannot be started is `ToolSpawn`;
/// a non-zero exit is `ToolExecution` carrying the tail of stderr.
pub fn run_tool(tool: &str, args: &[String]) -> Result<Output, PipelineError> {
    debug!("{} {}", tool, args.join(" "));
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| PipelineError::ToolSpawn {
            tool: tool.to_string(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        return Err(PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: format!(
                "exited with {}: {}",
                output.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            ),
        });
    }
    Ok(output)
}

/// Converts a PLINK 1 fileset or VCF into a PLINK 2 fileset at `out`.
pub fn convert_to_pgen(
    format: InputFormat,
    input: &Path,
    out: &Path,
    threads: usize,
) -> Result<GenotypeDataset, PipelineError> {
    let args = plink2::convert_args(format, input, out, threads);
    run_tool(PLINK2_TAG, &args)?;
    let dataset = GenotypeDataset::new(out);
    if let Some(path) = dataset.missing_companions().into_iter().next() {
        return Err(PipelineError::MissingArtifact { path });
    }
    Ok(dataset)
}
