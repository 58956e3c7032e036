//! Fleet facade
//!
//! Ties the control units, schedule, process controller, log follower and
//! health reporting together behind one camera-oriented API. Unknown cameras
//! are reported as `None` or `false`, never as errors.

use crate::camera::{CameraIdentity, CameraUpdate};
use crate::controller::{Action, CameraStatus, ProcessController};
use crate::error::{Error, Result};
use crate::follower::{LogEvent, LogFollower};
use crate::logbook;
use crate::manifest::LookoutConfig;
use crate::probe::Reachability;
use crate::schedule::{CronBackend, CronStatus, ScheduleEntry, ScheduleRegistry};
use crate::sickbay::{self, CameraHealth, HealthReport, Issue, SystemHealth};
use crate::unit::{self, UnitTemplate};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Result of one control cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub camera: String,
    #[serde(flatten)]
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

/// Every camera managed on this host
pub struct Fleet {
    config: LookoutConfig,
    template: UnitTemplate,
    controller: ProcessController,
    schedule: ScheduleRegistry,
    follower: LogFollower,
}

impl Fleet {
    pub fn new(config: LookoutConfig) -> Self {
        let base_dir = config.lookout.base_dir.clone();
        let backend = match &config.lookout.crontab_file {
            Some(path) => CronBackend::File(path.clone()),
            None => CronBackend::user(),
        };

        Self {
            template: UnitTemplate::from_config(&config),
            controller: ProcessController::new(&config),
            schedule: ScheduleRegistry::new(backend, base_dir.clone()),
            follower: LogFollower::new(base_dir, config.logs.tail_program.clone()),
            config,
        }
    }

    pub fn config(&self) -> &LookoutConfig {
        &self.config
    }

    pub fn follower(&self) -> &LogFollower {
        &self.follower
    }

    fn base_dir(&self) -> &Path {
        &self.config.lookout.base_dir
    }

    fn identity(&self, name: &str) -> Result<Option<CameraIdentity>> {
        Ok(unit::read(self.base_dir(), name)?.map(|unit| unit.identity))
    }

    fn exists(&self, name: &str) -> bool {
        crate::camera::validate_name(name).is_ok()
            && unit::unit_path(self.base_dir(), name).exists()
    }

    // --- Cameras ---

    pub fn list_cameras(&self) -> Vec<String> {
        unit::list(self.base_dir())
    }

    pub fn get_camera_details(&self, name: &str) -> Result<Option<CameraIdentity>> {
        self.identity(name)
    }

    /// Rewrite a camera's unit with updated fields
    pub fn update_camera_details(&self, name: &str, update: &CameraUpdate) -> Result<bool> {
        let Some(current) = self.identity(name)? else {
            return Ok(false);
        };

        let updated = update.apply(&current);
        unit::write(self.base_dir(), &updated, &self.template)?;
        info!(camera = name, "camera updated");
        Ok(true)
    }

    /// Register a camera: write its unit and schedule it with the default rule
    pub async fn create_camera_script(&self, identity: &CameraIdentity) -> Result<PathBuf> {
        identity.validate()?;
        if self.exists(&identity.name) {
            return Err(Error::CameraExists(identity.name.clone()));
        }

        let path = unit::write(self.base_dir(), identity, &self.template)?;
        let registered = async {
            logbook::ensure(&logbook::log_path(self.base_dir(), &identity.name))?;
            self.schedule
                .upsert(&identity.name, &path, &self.config.schedule.default_rule)
                .await
        };
        if let Err(e) = registered.await {
            // An unscheduled unit would block the next attempt with CameraExists
            if let Err(cleanup) = unit::remove(self.base_dir(), &identity.name) {
                warn!(camera = %identity.name, error = %cleanup, "failed to roll back unit");
            }
            return Err(e);
        }

        info!(camera = %identity.name, address = %identity.address, "camera created");
        Ok(path)
    }

    /// Stop, unschedule and delete a camera; its log is kept
    pub async fn remove_camera(&self, name: &str) -> Result<bool> {
        let Some(identity) = self.identity(name)? else {
            return Ok(false);
        };

        self.controller.stop(&identity).await;
        self.follower.stop_camera(name).await;
        self.schedule.remove(name).await?;
        unit::remove(self.base_dir(), name)?;

        info!(camera = name, "camera removed");
        Ok(true)
    }

    // --- Streams ---

    /// One control cycle, as cron would run it
    pub async fn run_cycle(&self, name: &str) -> Result<Option<CycleReport>> {
        let Some(unit) = unit::read(self.base_dir(), name)? else {
            return Ok(None);
        };

        let controller = self.controller.for_unit(&unit);
        let identity = unit.identity;
        let action = controller.decide(&identity).await;
        let pid = controller.start(&identity, &action).await?;
        Ok(Some(CycleReport {
            camera: identity.name,
            action,
            pid,
        }))
    }

    /// Run a cycle now instead of waiting for the schedule
    pub async fn start_stream(&self, name: &str) -> Result<Option<CycleReport>> {
        let report = self.run_cycle(name).await?;
        if let Some(report) = &report {
            info!(camera = name, pid = ?report.pid, "stream started on demand");
        }
        Ok(report)
    }

    pub async fn stop_stream(&self, name: &str) -> Result<bool> {
        let Some(identity) = self.identity(name)? else {
            return Ok(false);
        };
        self.controller.stop(&identity).await;
        Ok(true)
    }

    pub async fn ping_camera(&self, address: &str) -> Reachability {
        self.controller.probe().probe(address).await
    }

    pub async fn get_camera_status(&self, name: &str) -> Result<Option<CameraStatus>> {
        match self.identity(name)? {
            Some(identity) => Ok(Some(self.controller.status(&identity).await)),
            None => Ok(None),
        }
    }

    // --- Logs ---

    fn log_of(&self, name: &str) -> Option<PathBuf> {
        if crate::camera::validate_name(name).is_err() {
            return None;
        }
        let path = logbook::log_path(self.base_dir(), name);
        (self.exists(name) || path.exists()).then_some(path)
    }

    /// Last lines of a camera's log
    pub fn tail_log(&self, name: &str, lines: usize) -> Result<Option<Vec<String>>> {
        match self.log_of(name) {
            Some(path) => Ok(Some(logbook::tail_lines(&path, lines)?)),
            None => Ok(None),
        }
    }

    /// Follow a camera's log; `backlog` defaults to the configured line count
    pub async fn follow_log(
        &self,
        subscriber: &str,
        name: &str,
        backlog: Option<usize>,
    ) -> Result<Option<mpsc::Receiver<LogEvent>>> {
        let Some(identity) = self.identity(name)? else {
            return Ok(None);
        };

        let status = self.controller.status(&identity).await;
        let backlog = backlog.unwrap_or(self.config.logs.backlog_lines);
        let rx = self.follower.restart(subscriber, name, &status, backlog).await?;
        Ok(Some(rx))
    }

    pub fn clear_log(&self, name: &str) -> Result<bool> {
        match self.log_of(name) {
            Some(path) => {
                logbook::clear(&path)?;
                info!(camera = name, "log cleared");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // --- Schedule ---

    /// Schedule a camera; `rule` defaults to the configured rule
    pub async fn add_cron_job(&self, name: &str, rule: Option<&str>) -> Result<bool> {
        if !self.exists(name) {
            return Ok(false);
        }
        let rule = rule.unwrap_or(self.config.schedule.default_rule.as_str());
        let invocation = unit::unit_path(self.base_dir(), name);
        self.schedule.upsert(name, &invocation, rule).await?;
        Ok(true)
    }

    pub async fn remove_cron_job(&self, name: &str) -> Result<()> {
        self.schedule.remove(name).await
    }

    pub async fn update_cron_interval(&self, name: &str, rule: &str) -> Result<bool> {
        self.add_cron_job(name, Some(rule)).await
    }

    pub async fn get_cron_status(&self, name: &str) -> CronStatus {
        self.schedule.status(name).await
    }

    pub async fn list_all_cron_jobs(&self) -> Vec<ScheduleEntry> {
        self.schedule.list_all().await
    }

    // --- Health ---

    pub async fn collect_system_health(&self) -> SystemHealth {
        sickbay::host::system_snapshot().await
    }

    pub async fn collect_cameras_health(&self) -> Vec<CameraHealth> {
        sickbay::cameras::fleet_snapshot(&self.controller, self.base_dir()).await
    }

    pub async fn get_full_health_report(&self) -> HealthReport {
        let (system, cameras) =
            tokio::join!(self.collect_system_health(), self.collect_cameras_health());
        HealthReport {
            timestamp: Utc::now(),
            system,
            cameras,
        }
    }

    pub async fn check_for_critical_issues(&self) -> Vec<Issue> {
        let report = self.get_full_health_report().await;
        sickbay::issues::anomalies(&report, &self.config.health)
    }
}
