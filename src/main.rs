use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use env_logger::Builder;
use log::{self, debug, error, info, LevelFilter};

use genoqc_pipelines::cli::{parse, Arguments};
use genoqc_pipelines::config::defs::{PipelineError, RunConfig};
use genoqc_pipelines::config::qc::QcConfig;
use genoqc_pipelines::pipelines::genotype_qc;
use genoqc_pipelines::utils::system::{detect_cores_and_load, plink2_memory_mb};


fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n GenoQC\n-------------\n");

    let dir = env::current_dir()?;
    info!("The current directory is {:?}\n", dir);

    let run_config = match build_run_config(args, dir) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid run configuration: {}", e);
            std::process::exit(1);
        }
    };

    match genotype_qc::run(&run_config) {
        Ok(run) => {
            if let Some(final_path) = run.tree.final_path() {
                info!("Final dataset: {}", final_path.display());
            }
        }
        Err(e) => {
            error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
            std::process::exit(1);
        }
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


fn absolute(cwd: &Path, path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        cwd.join(path)
    }
}


/// Validates arguments and sizes resources for the run.
///
/// # Arguments
/// * `args` - The parsed command-line arguments.
/// * `cwd` - The current working directory.
/// # Returns
/// RunConfig for the pipeline
fn build_run_config(args: Arguments, cwd: PathBuf) -> Result<RunConfig, PipelineError> {
    let qc = QcConfig::try_from(&args)?;

    let (threads, cpu_load) = detect_cores_and_load(args.threads)
        .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
    let memory_mb = plink2_memory_mb(args.memory);
    debug!(
        "Using {} threads (CPU load {:.1}%), plink2 memory {:?} MiB",
        threads, cpu_load, memory_mb
    );

    let out_prefix = absolute(&cwd, &args.out);
    let scratch_root = match &args.tmp_dir {
        Some(dir) => absolute(&cwd, dir),
        None => env::temp_dir(),
    };
    debug!("Retention: {:?}; scratch root {}", qc.retention, scratch_root.display());

    Ok(RunConfig {
        cwd,
        out_prefix,
        scratch_root,
        threads,
        memory_mb,
        qc,
        args,
    })
}
