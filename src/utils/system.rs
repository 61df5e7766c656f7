// src/utils/system.rs: System functions

use std::thread::sleep;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::warn;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};


/// Determines number of cores that can be used for plink2
///
/// # Arguments
///
/// * `args_threads` - thread ceiling requested on the command line
///
/// # Returns
///
/// Result<(usize, f32)> usable cores, current cpu usage
pub fn detect_cores_and_load(args_threads: usize) -> Result<(usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(Default::default());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_all();
    let physical_cores = System::physical_core_count().unwrap_or_else(num_cpus::get_physical);
    sleep(Duration::from_millis(100));
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    let cpu_load = system.global_cpu_usage();
    let max_cores = physical_cores.min(args_threads).max(1);
    Ok((max_cores, cpu_load))
}


/// Finds the amount of total and available RAM, keyed to OS
///
/// # Returns
///
/// Result<(u64, u64)> total ram, available ram in bytes
pub fn detect_ram() -> Result<(u64, u64)> {
    let (total_ram, available_ram) = if cfg!(target_os = "macos") {
        let refresh_kind = RefreshKind::nothing().with_memory(Default::default());
        let mut system = System::new_with_specifics(refresh_kind);
        system.refresh_memory_specifics(MemoryRefreshKind::everything());
        let total = system.total_memory();
        let used = system.used_memory();
        (total, total.saturating_sub(used))
    } else {
        let mut system = System::new_with_specifics(RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()));
        system.refresh_memory();
        (system.total_memory(), system.available_memory())
    };

    if total_ram == 0 || available_ram == 0 {
        return Err(anyhow!("Failed to detect valid RAM values"));
    }

    Ok((total_ram, available_ram))
}


/// Working memory to hand plink2, in MiB.
///
/// An explicit request is capped at total RAM. Without one, half of the
/// available RAM is used, or nothing if RAM cannot be read (plink2 then
/// picks its own default).
pub fn plink2_memory_mb(requested_mb: Option<u64>) -> Option<u64> {
    let ram = detect_ram();
    match (requested_mb, ram) {
        (Some(requested), Ok((total, _))) => {
            let total_mb = total / 1_048_576;
            if requested > total_mb {
                warn!("Requested {} MiB but only {} MiB installed; capping", requested, total_mb);
                Some(total_mb)
            } else {
                Some(requested)
            }
        }
        (Some(requested), Err(_)) => Some(requested),
        (None, Ok((_, available))) => Some((available / 1_048_576 / 2).max(1)),
        (None, Err(e)) => {
            warn!("{}; leaving plink2 memory at its default", e);
            None
        }
    }
}
