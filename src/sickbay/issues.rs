//! Anomaly derivation

use super::HealthReport;
use crate::manifest::HealthThresholds;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

/// One problem found in a health report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub camera: Option<String>,
    pub message: String,
}

impl Issue {
    fn host(kind: &'static str, message: String) -> Self {
        Self {
            severity: Severity::Critical,
            kind,
            camera: None,
            message,
        }
    }

    fn camera(severity: Severity, kind: &'static str, camera: &str, message: String) -> Self {
        Self {
            severity,
            kind,
            camera: Some(camera.to_string()),
            message,
        }
    }
}

/// Derive issues from a report; critical ones first
///
/// Thresholds are exclusive: a value equal to the limit is not an issue.
pub fn anomalies(report: &HealthReport, limits: &HealthThresholds) -> Vec<Issue> {
    let mut issues = Vec::new();
    let system = &report.system;

    if let Some(cpu) = system.cpu.ok().filter(|c| c.percent > limits.cpu_percent) {
        issues.push(Issue::host(
            "cpu",
            format!("CPU usage at {:.1}%", cpu.percent),
        ));
    }
    if let Some(memory) = system
        .memory
        .ok()
        .filter(|m| m.used_percent > limits.memory_percent)
    {
        issues.push(Issue::host(
            "memory",
            format!("memory usage at {:.1}%", memory.used_percent),
        ));
    }
    if let Some(disk) = system.disk.ok().filter(|d| d.used_percent > limits.disk_percent) {
        issues.push(Issue::host(
            "disk",
            format!("disk {} at {:.1}%", disk.mount_point, disk.used_percent),
        ));
    }

    for camera in &report.cameras {
        if camera.is_desynced() {
            issues.push(Issue::camera(
                Severity::Critical,
                "desync",
                &camera.name,
                format!(
                    "camera {} is believed running but no relay process was found",
                    camera.name
                ),
            ));
        }
        if !camera.reachability.is_reachable() {
            issues.push(Issue::camera(
                Severity::Warning,
                "offline",
                &camera.name,
                format!("camera {} ({}) is unreachable", camera.name, camera.address),
            ));
        }
        if camera.log_size > limits.log_size_limit {
            issues.push(Issue::camera(
                Severity::Warning,
                "log_size",
                &camera.name,
                format!(
                    "log of camera {} is {:.1} MiB",
                    camera.name,
                    camera.log_size as f64 / (1024.0 * 1024.0)
                ),
            ));
        }
    }

    issues.sort_by_key(|issue| issue.severity);
    issues
}
