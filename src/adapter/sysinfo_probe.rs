use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::BoxFuture;
use sysinfo::{Disks, ProcessesToUpdate, System};
use tracing::warn;

use crate::domain::{DiskUsage, MemoryUsage, ProcessUsage, SystemSample};
use crate::port::SystemProbe;

/// Requested window over which process CPU usage is measured. The effective
/// window is never shorter than `sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`
/// (200 ms on Linux), below which sysinfo reports no CPU delta.
pub const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(100);

/// Reads host metrics with `sysinfo` on the blocking pool.
#[derive(Debug, Clone)]
pub struct SysinfoProbe {
    disk_path: PathBuf,
    cpu_window: Duration,
}

impl SysinfoProbe {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            disk_path: disk_path.into(),
            cpu_window: CPU_SAMPLE_WINDOW,
        }
    }

    fn read_blocking(disk_path: &Path, cpu_window: Duration) -> SystemSample {
        let mut system = System::new();
        system.refresh_memory();
        let memory = MemoryUsage::from_bytes(
            system.total_memory(),
            system.available_memory(),
            system.used_memory(),
        );

        SystemSample {
            memory,
            disk: disk_usage(disk_path),
            process: process_usage(&mut system, cpu_window),
        }
    }
}

impl SystemProbe for SysinfoProbe {
    fn sample(&self) -> BoxFuture<'_, SystemSample> {
        Box::pin(async move {
            let disk_path = self.disk_path.clone();
            let cpu_window = self.cpu_window;
            match tokio::task::spawn_blocking(move || Self::read_blocking(&disk_path, cpu_window))
                .await
            {
                Ok(sample) => sample,
                Err(e) => {
                    warn!("System metrics sampling failed: {e}");
                    SystemSample::default()
                }
            }
        })
    }
}

/// Usage of the filesystem with the longest mount point containing `path`.
fn disk_usage(path: &Path) -> DiskUsage {
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| DiskUsage::from_bytes(disk.total_space(), disk.available_space()))
        .unwrap_or_default()
}

fn effective_cpu_window(requested: Duration) -> Duration {
    requested.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)
}

fn process_usage(system: &mut System, cpu_window: Duration) -> ProcessUsage {
    let pid = match sysinfo::get_current_pid() {
        Ok(pid) => pid,
        Err(e) => {
            warn!("Cannot determine current process id: {e}");
            return ProcessUsage::default();
        }
    };

    // CPU usage is a delta between two refreshes.
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    std::thread::sleep(effective_cpu_window(cpu_window));
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

    system
        .process(pid)
        .map(|process| {
            ProcessUsage::from_bytes(
                process.memory(),
                process.virtual_memory(),
                process.cpu_usage(),
            )
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sample_reads_live_values() {
        let probe = SysinfoProbe::new("/");

        let sample = probe.sample().await;

        assert!(sample.memory.total_mb > 0.0);
        assert!((0.0..=100.0).contains(&sample.memory.percent));
        assert!(sample.process.memory_rss_mb > 0.0);
    }

    #[test]
    fn test_cpu_window_respects_sysinfo_floor() {
        let window = effective_cpu_window(CPU_SAMPLE_WINDOW);
        assert!(window >= CPU_SAMPLE_WINDOW);
        assert!(window >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        assert_eq!(
            effective_cpu_window(Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_unknown_path_falls_back_to_root_or_zero() {
        let usage = disk_usage(Path::new("/definitely/not/mounted/here"));
        assert!(usage.percent >= 0.0);
    }
}
