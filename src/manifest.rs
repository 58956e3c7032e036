//! Configuration file parsing for Lookout
//!
//! Parses `lookout.toml` using serde. Every section is optional; a missing
//! file yields the built-in defaults so a fresh host can run `lookout add`
//! before anything is configured.

use crate::camera::Transport;
use crate::error::{Error, Result};
use crate::schedule;
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lookout/lookout.toml";

/// Load configuration from a file
///
/// A missing file is not an error: defaults apply. Any other read failure is.
pub fn load(path: &Path) -> Result<LookoutConfig> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(Error::ConfigRead {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let mut config: LookoutConfig = toml::from_str(&content)?;
    config.source = path.to_path_buf();
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LookoutConfig {
    /// Global settings
    #[serde(default)]
    pub lookout: GlobalConfig,

    /// Relay and maintenance program settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// Reachability probe settings
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Schedule defaults
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Health thresholds
    #[serde(default)]
    pub health: HealthThresholds,

    /// Log follower settings
    #[serde(default)]
    pub logs: LogConfig,

    /// Defaults applied to new cameras
    #[serde(default)]
    pub camera: CameraDefaults,

    /// Path this configuration was loaded from
    #[serde(skip)]
    pub source: PathBuf,
}

impl LookoutConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.lookout.base_dir.is_absolute() {
            return Err(Error::ConfigValidation(format!(
                "base_dir must be absolute, got '{}'",
                self.lookout.base_dir.display()
            )));
        }

        // Crontab lines are whitespace separated
        if self
            .lookout
            .base_dir
            .to_string_lossy()
            .chars()
            .any(char::is_whitespace)
        {
            return Err(Error::ConfigValidation(
                "base_dir must not contain whitespace".into(),
            ));
        }

        if self.relay.destination_url.trim().is_empty() {
            return Err(Error::ConfigValidation(
                "relay.destination_url must not be empty".into(),
            ));
        }

        if self.probe.count == 0 {
            return Err(Error::ConfigValidation("probe.count must be at least 1".into()));
        }

        if self.probe.timeout_secs == 0 {
            return Err(Error::ConfigValidation(
                "probe.timeout_secs must be at least 1".into(),
            ));
        }

        for (name, value) in [
            ("cpu_percent", self.health.cpu_percent),
            ("memory_percent", self.health.memory_percent),
            ("disk_percent", self.health.disk_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(Error::ConfigValidation(format!(
                    "health.{} must be between 0 and 100, got {}",
                    name, value
                )));
            }
        }

        schedule::validate_rule(&self.schedule.default_rule).map_err(|_| {
            Error::ConfigValidation(format!(
                "schedule.default_rule '{}' is not a valid cron rule",
                self.schedule.default_rule
            ))
        })?;

        Ok(())
    }

    /// Path of the binary the control units exec
    ///
    /// Falls back to the running executable, then to `lookout` on PATH.
    pub fn supervisor_bin(&self) -> PathBuf {
        self.lookout
            .supervisor_bin
            .clone()
            .or_else(|| std::env::current_exe().ok())
            .unwrap_or_else(|| PathBuf::from("lookout"))
    }

    /// Path the control units pass back via `--config`
    pub fn config_path(&self) -> PathBuf {
        if self.source.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_CONFIG_PATH)
        } else {
            self.source.clone()
        }
    }
}

/// Global settings
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Directory holding one control unit and one log per camera
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Binary the control units exec (defaults to the running executable)
    pub supervisor_bin: Option<PathBuf>,

    /// Manage this flat file instead of the user's crontab
    pub crontab_file: Option<PathBuf>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            supervisor_bin: None,
            crontab_file: None,
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/etc/lookout/cameras")
}

/// Which processes `stop` sweeps after the address-bound ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StopSweep {
    /// Every process running the relay program, fleet-wide
    #[default]
    Program,
    /// Only relay program processes bound to the camera's stream key
    StreamKey,
}

/// Relay and maintenance program settings
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Relay program (also used for the maintenance feed)
    #[serde(default = "default_relay_program")]
    pub program: PathBuf,

    /// Streaming endpoint; the stream key is appended as the last segment
    #[serde(default = "default_destination_url")]
    pub destination_url: String,

    /// Path and query of the camera's RTSP stream
    #[serde(default = "default_source_path")]
    pub source_path: String,

    /// Image burned into the live feed
    #[serde(default = "default_overlay_asset")]
    pub overlay_asset: PathBuf,

    /// Video looped while a camera is unreachable
    #[serde(default = "default_maintenance_asset")]
    pub maintenance_asset: PathBuf,

    /// Second pass performed by `stop`
    #[serde(default)]
    pub stop_sweep: StopSweep,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            program: default_relay_program(),
            destination_url: default_destination_url(),
            source_path: default_source_path(),
            overlay_asset: default_overlay_asset(),
            maintenance_asset: default_maintenance_asset(),
            stop_sweep: StopSweep::default(),
        }
    }
}

fn default_relay_program() -> PathBuf {
    PathBuf::from("/usr/bin/ffmpeg")
}

fn default_destination_url() -> String {
    "rtmps://a.rtmp.youtube.com/live2".into()
}

fn default_source_path() -> String {
    "/cam/realmonitor?channel=1&subtype=0".into()
}

fn default_overlay_asset() -> PathBuf {
    PathBuf::from("/etc/lookout/logo.png")
}

fn default_maintenance_asset() -> PathBuf {
    PathBuf::from("/etc/lookout/maintenance.mp4")
}

/// Reachability probe settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Probe program
    #[serde(default = "default_probe_program")]
    pub program: PathBuf,

    /// Echo requests per probe
    #[serde(default = "default_probe_count")]
    pub count: u32,

    /// Seconds to wait for a reply before declaring the camera unreachable
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            program: default_probe_program(),
            count: default_probe_count(),
            timeout_secs: default_probe_timeout(),
        }
    }
}

fn default_probe_program() -> PathBuf {
    PathBuf::from("ping")
}

fn default_probe_count() -> u32 {
    2
}

fn default_probe_timeout() -> u64 {
    2
}

/// Schedule defaults
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Rule used when a camera is added without an explicit one
    #[serde(default = "default_rule")]
    pub default_rule: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            default_rule: default_rule(),
        }
    }
}

fn default_rule() -> String {
    "*/20 * * * *".into()
}

/// Thresholds above which the health report raises issues
#[derive(Debug, Clone, Deserialize)]
pub struct HealthThresholds {
    #[serde(default = "default_percent_limit")]
    pub cpu_percent: f64,

    #[serde(default = "default_percent_limit")]
    pub memory_percent: f64,

    #[serde(default = "default_percent_limit")]
    pub disk_percent: f64,

    /// Log size in bytes above which a warning is raised
    #[serde(default = "default_log_size_limit")]
    pub log_size_limit: u64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: default_percent_limit(),
            memory_percent: default_percent_limit(),
            disk_percent: default_percent_limit(),
            log_size_limit: default_log_size_limit(),
        }
    }
}

fn default_percent_limit() -> f64 {
    90.0
}

fn default_log_size_limit() -> u64 {
    10 * 1024 * 1024
}

/// Log follower settings
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Historical lines replayed to a new subscriber
    #[serde(default = "default_backlog_lines")]
    pub backlog_lines: usize,

    /// Program used to follow log files
    #[serde(default = "default_tail_program")]
    pub tail_program: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            backlog_lines: default_backlog_lines(),
            tail_program: default_tail_program(),
        }
    }
}

fn default_backlog_lines() -> usize {
    50
}

fn default_tail_program() -> PathBuf {
    PathBuf::from("tail")
}

/// Defaults applied to new cameras
#[derive(Debug, Clone, Deserialize)]
pub struct CameraDefaults {
    #[serde(default = "default_camera_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: Transport,
}

impl Default for CameraDefaults {
    fn default() -> Self {
        Self {
            port: default_camera_port(),
            transport: Transport::default(),
        }
    }
}

fn default_camera_port() -> u16 {
    554
}
