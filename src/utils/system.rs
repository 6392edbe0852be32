// src/utils/system.rs: System functions

use std::time::Duration;

use anyhow::Result;
use log::debug;
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::time::sleep;


/// Determines number of cores handed to each pipeline process
///
/// # Arguments
///
/// * `requested` - explicit `--cpu_count`, used as-is when set
///
/// # Returns
///
/// Result<(usize, f32)> cores to use, current cpu usage
pub async fn detect_cores_and_load(requested: Option<usize>) -> Result<(usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(Default::default());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_all();
    let physical_cores = System::physical_core_count().unwrap_or(1);
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    sleep(Duration::from_millis(100)).await;
    let cpu_load = system.global_cpu_usage();
    debug!("Detected {} physical cores at {}% load", physical_cores, cpu_load);
    Ok((pick_cores(requested, physical_cores), cpu_load))
}

fn pick_cores(requested: Option<usize>, physical_cores: usize) -> usize {
    match requested {
        Some(n) if n > 0 => n,
        _ => physical_cores.max(1),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_cores() {
        assert_eq!(pick_cores(Some(16), 4), 16);
        assert_eq!(pick_cores(Some(0), 4), 4);
        assert_eq!(pick_cores(None, 0), 1);
    }

    #[tokio::test]
    async fn test_detect_cores_honours_request() -> Result<()> {
        let (cores, _) = detect_cores_and_load(Some(3)).await?;
        assert_eq!(cores, 3);
        Ok(())
    }
}
