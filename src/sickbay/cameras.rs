//! Per-camera health

use crate::camera::CameraIdentity;
use crate::controller::{CameraStatus, ProcessController};
use crate::logbook;
use crate::probe::Reachability;
use crate::procs::ProcessInfo;
use crate::unit;
use serde::Serialize;
use std::path::Path;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Snapshot of one camera
#[derive(Debug, Clone, Serialize)]
pub struct CameraHealth {
    pub name: String,
    pub address: String,
    pub reachability: Reachability,
    /// What the controller believes
    pub status: CameraStatus,
    pub log_size: u64,
    /// Relay processes observed after the probe
    pub processes: Vec<ProcessInfo>,
}

impl CameraHealth {
    /// Believed running, but nothing in the process table backs it
    pub fn is_desynced(&self) -> bool {
        self.status.running && self.processes.is_empty()
    }
}

/// Snapshot every camera concurrently
///
/// Cameras whose unit cannot be read are skipped.
pub async fn fleet_snapshot(controller: &ProcessController, base_dir: &Path) -> Vec<CameraHealth> {
    let mut tasks = JoinSet::new();

    for name in unit::list(base_dir) {
        let identity = match unit::read(base_dir, &name) {
            Ok(Some(unit)) => unit.identity,
            Ok(None) => continue,
            Err(e) => {
                warn!(camera = %name, error = %e, "skipping camera with unreadable unit");
                continue;
            }
        };

        let controller = controller.clone();
        let log = logbook::log_path(base_dir, &name);
        tasks.spawn(async move { camera_snapshot(&controller, identity, &log).await });
    }

    let mut cameras = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(health) => cameras.push(health),
            Err(e) => warn!(error = %e, "camera snapshot task failed"),
        }
    }

    cameras.sort_by(|a, b| a.name.cmp(&b.name));
    cameras
}

async fn camera_snapshot(
    controller: &ProcessController,
    identity: CameraIdentity,
    log: &Path,
) -> CameraHealth {
    let status = controller.status(&identity).await;
    let reachability = controller.probe().probe(&identity.address).await;

    let listing = controller.lister().list().await;
    let processes: Vec<ProcessInfo> = controller
        .relay_processes(&identity, &listing)
        .into_iter()
        .cloned()
        .collect();

    debug!(
        camera = %identity.name,
        %reachability,
        running = status.running,
        processes = processes.len(),
        "camera snapshot"
    );

    CameraHealth {
        name: identity.name,
        address: identity.address,
        reachability,
        status,
        log_size: logbook::size(log),
        processes,
    }
}

#[cfg(test)]
pub(crate) fn sample_health(name: &str, running: bool, reachable: bool) -> CameraHealth {
    CameraHealth {
        name: name.to_string(),
        address: "10.0.0.5".to_string(),
        reachability: if reachable {
            Reachability::Reachable {
                latency_ms: Some(1.0),
            }
        } else {
            Reachability::Unreachable
        },
        status: if running {
            CameraStatus::running(None)
        } else {
            CameraStatus::stopped(None)
        },
        log_size: 0,
        processes: Vec::new(),
    }
}
