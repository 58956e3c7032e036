//! Health reporting
//!
//! Provides:
//! - Host metrics (CPU, memory, root volume, uptime, load)
//! - Per-camera snapshots cross-checking believed state against the OS
//! - Anomaly derivation with configurable thresholds

pub mod cameras;
pub mod host;
pub mod issues;

pub use cameras::CameraHealth;
pub use host::SystemHealth;
pub use issues::{Issue, Severity};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One independently collected value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Metric<T> {
    Ok(T),
    Error(String),
}

impl<T> Metric<T> {
    pub fn ok(&self) -> Option<&T> {
        match self {
            Metric::Ok(value) => Some(value),
            Metric::Error(_) => None,
        }
    }
}

/// Host and fleet, taken together
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub system: SystemHealth,
    pub cameras: Vec<CameraHealth>,
}
