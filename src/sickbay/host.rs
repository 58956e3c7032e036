//! Host metrics

use super::Metric;
use serde::Serialize;
use std::path::Path;
use sysinfo::{Disks, System};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuUsage {
    /// Utilisation across all cores, 0-100
    pub percent: f64,
    pub cores: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// Host metrics; each one fails on its own
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub cpu: Metric<CpuUsage>,
    pub memory: Metric<MemoryUsage>,
    pub disk: Metric<DiskUsage>,
    pub uptime_secs: Metric<u64>,
    pub load: Metric<LoadAverage>,
}

impl SystemHealth {
    fn unavailable(reason: &str) -> Self {
        Self {
            cpu: Metric::Error(reason.to_string()),
            memory: Metric::Error(reason.to_string()),
            disk: Metric::Error(reason.to_string()),
            uptime_secs: Metric::Error(reason.to_string()),
            load: Metric::Error(reason.to_string()),
        }
    }
}

/// Collect host metrics
///
/// CPU utilisation needs two samples, so this takes at least
/// `sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`. Collection runs on the blocking
/// pool.
pub async fn system_snapshot() -> SystemHealth {
    match tokio::task::spawn_blocking(collect).await {
        Ok(health) => health,
        Err(e) => {
            warn!(error = %e, "host metric collection failed");
            SystemHealth::unavailable("metric collection failed")
        }
    }
}

fn collect() -> SystemHealth {
    let mut sys = System::new();

    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    let cores = sys.cpus().len();
    let cpu = if cores == 0 {
        Metric::Error("no CPU information".into())
    } else {
        Metric::Ok(CpuUsage {
            percent: f64::from(sys.global_cpu_usage()).clamp(0.0, 100.0),
            cores,
        })
    };

    sys.refresh_memory();
    let total = sys.total_memory();
    let memory = match percent(total.saturating_sub(sys.available_memory()), total) {
        Some(used_percent) => Metric::Ok(MemoryUsage {
            total_bytes: total,
            used_bytes: sys.used_memory(),
            free_bytes: sys.free_memory(),
            used_percent,
        }),
        None => Metric::Error("memory size unavailable".into()),
    };

    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == Path::new("/"))
        .and_then(|d| {
            let total = d.total_space();
            let available = d.available_space();
            percent(total.saturating_sub(available), total).map(|used_percent| DiskUsage {
                mount_point: "/".to_string(),
                total_bytes: total,
                available_bytes: available,
                used_percent,
            })
        })
        .map(Metric::Ok)
        .unwrap_or_else(|| Metric::Error("no volume mounted at /".into()));

    let uptime = System::uptime();
    let uptime_secs = if uptime == 0 {
        Metric::Error("uptime unavailable".into())
    } else {
        Metric::Ok(uptime)
    };

    let avg = System::load_average();
    let load = Metric::Ok(LoadAverage {
        one: avg.one,
        five: avg.five,
        fifteen: avg.fifteen,
    });

    SystemHealth {
        cpu,
        memory,
        disk,
        uptime_secs,
        load,
    }
}

/// `used / total` as a percentage; `None` when the total is unknown
pub fn percent(used: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some((used as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), None);
        assert_eq!(percent(50, 200), Some(25.0));
        assert_eq!(percent(300, 200), Some(100.0));
    }

    #[tokio::test]
    async fn test_system_snapshot_is_sane() {
        let health = system_snapshot().await;
        if let Some(cpu) = health.cpu.ok() {
            assert!((0.0..=100.0).contains(&cpu.percent));
            assert!(cpu.cores >= 1);
        }
        if let Some(memory) = health.memory.ok() {
            assert!(memory.total_bytes > 0);
            assert!((0.0..=100.0).contains(&memory.used_percent));
        }
        if let Some(disk) = health.disk.ok() {
            assert_eq!(disk.mount_point, "/");
        }
    }

    #[test]
    fn test_unavailable_marks_every_metric() {
        let health = SystemHealth::unavailable("boom");
        assert_eq!(health.cpu, Metric::Error("boom".into()));
        assert!(health.load.ok().is_none());
    }
}
