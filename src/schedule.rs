//! Schedule registry
//!
//! Keeps one crontab line per camera pointing at its control unit:
//!
//! ```text
//! */20 * * * * /etc/lookout/cameras/gate01.sh >> /etc/lookout/cameras/gate01.log 2>&1
//! ```
//!
//! The table is shared with whoever else edits it and has no lock. Every
//! write reads the whole table, transforms it and writes it back whole, so
//! the last writer wins. Updates are remove-then-add so a camera never ends
//! up with two lines.

use crate::camera::validate_name;
use crate::error::{Error, Result};
use crate::logbook;
use crate::unit::{self, UNIT_SUFFIX};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Shorthand rules understood by cron
const RULE_KEYWORDS: &[&str] = &[
    "@reboot",
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

/// A camera's line in the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleEntry {
    pub camera: String,
    pub rule: String,
    pub command: String,
}

/// Schedule state of one camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CronStatus {
    pub enabled: bool,
    pub interval: Option<String>,
}

impl CronStatus {
    fn disabled() -> Self {
        Self {
            enabled: false,
            interval: None,
        }
    }
}

/// Where the table lives
#[derive(Debug, Clone)]
pub enum CronBackend {
    /// The invoking user's crontab, through the `crontab` program
    User { program: PathBuf },
    /// A flat file in user crontab format, installed by other means
    File(PathBuf),
}

impl CronBackend {
    /// The user's crontab
    pub fn user() -> Self {
        CronBackend::User {
            program: PathBuf::from("crontab"),
        }
    }

    /// Read the whole table; an uninitialized table is empty
    pub async fn load(&self) -> Result<String> {
        match self {
            CronBackend::User { program } => {
                let output = Command::new(program)
                    .arg("-l")
                    .stdin(Stdio::null())
                    .output()
                    .await
                    .map_err(|e| Error::CommandFailed {
                        command: format!("{} -l", program.display()),
                        message: e.to_string(),
                    })?;

                if output.status.success() {
                    return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
                }

                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.contains("no crontab") {
                    debug!("no crontab installed yet, starting from an empty table");
                    Ok(String::new())
                } else {
                    Err(Error::CommandFailed {
                        command: format!("{} -l", program.display()),
                        message: stderr.trim().to_string(),
                    })
                }
            }
            CronBackend::File(path) => match fs::read_to_string(path) {
                Ok(content) => Ok(content),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
                Err(e) => Err(Error::Io(e)),
            },
        }
    }

    /// Replace the whole table
    pub async fn store(&self, table: &str) -> Result<()> {
        match self {
            CronBackend::User { program } => {
                let command = format!("{} -", program.display());
                let failed = |message: String| Error::CommandFailed {
                    command: command.clone(),
                    message,
                };

                let mut child = Command::new(program)
                    .arg("-")
                    .stdin(Stdio::piped())
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .spawn()
                    .map_err(|e| failed(e.to_string()))?;

                if let Some(mut stdin) = child.stdin.take() {
                    stdin
                        .write_all(table.as_bytes())
                        .await
                        .map_err(|e| failed(e.to_string()))?;
                }

                let output = child
                    .wait_with_output()
                    .await
                    .map_err(|e| failed(e.to_string()))?;
                if output.status.success() {
                    Ok(())
                } else {
                    Err(failed(
                        String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    ))
                }
            }
            CronBackend::File(path) => {
                let tmp = path.with_extension("lookout.tmp");
                fs::write(&tmp, table)?;
                fs::rename(&tmp, path)?;
                Ok(())
            }
        }
    }
}

/// Camera → recurrence rule, persisted in the crontab
#[derive(Debug, Clone)]
pub struct ScheduleRegistry {
    backend: CronBackend,
    base_dir: PathBuf,
}

impl ScheduleRegistry {
    pub fn new(backend: CronBackend, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            base_dir: base_dir.into(),
        }
    }

    /// Install or replace the camera's line
    pub async fn upsert(&self, camera: &str, invocation: &Path, rule: &str) -> Result<()> {
        validate_name(camera)?;
        validate_rule(rule)?;

        let table = self.backend.load().await?;
        let log = logbook::log_path(&self.base_dir, camera);
        let line = entry_line(rule, invocation, &log);
        let updated = with_line(&without_path(&table, invocation), &line);
        self.backend.store(&updated).await?;

        info!(camera, rule, "schedule installed");
        Ok(())
    }

    /// Drop the camera's line; succeeds when there is none
    pub async fn remove(&self, camera: &str) -> Result<()> {
        let invocation = unit::unit_path(&self.base_dir, camera);
        let table = self.backend.load().await?;
        if find_rule(&table, &invocation).is_none() {
            return Ok(());
        }

        self.backend.store(&without_path(&table, &invocation)).await?;
        info!(camera, "schedule removed");
        Ok(())
    }

    /// The camera's rule, if scheduled
    ///
    /// An unreadable table reads as "not scheduled".
    pub async fn status(&self, camera: &str) -> CronStatus {
        let invocation = unit::unit_path(&self.base_dir, camera);
        match self.backend.load().await {
            Ok(table) => match find_rule(&table, &invocation) {
                Some(rule) => CronStatus {
                    enabled: true,
                    interval: Some(rule),
                },
                None => CronStatus::disabled(),
            },
            Err(e) => {
                warn!(camera, error = %e, "could not read schedule table");
                CronStatus::disabled()
            }
        }
    }

    /// Every camera line under the managed base directory
    pub async fn list_all(&self) -> Vec<ScheduleEntry> {
        match self.backend.load().await {
            Ok(table) => decode_entries(&table, &self.base_dir),
            Err(e) => {
                warn!(error = %e, "could not read schedule table");
                Vec::new()
            }
        }
    }
}

/// Validate a recurrence rule
///
/// Accepts five cron fields or a single `@keyword`.
pub fn validate_rule(rule: &str) -> Result<()> {
    let invalid = || Error::InvalidSchedule(rule.to_string());
    let rule = rule.trim();

    if rule.starts_with('@') {
        return if RULE_KEYWORDS.contains(&rule) {
            Ok(())
        } else {
            Err(invalid())
        };
    }

    let fields: Vec<&str> = rule.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(invalid());
    }
    let valid_field = |field: &&str| {
        field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '/' | ',' | '-'))
    };
    if fields.iter().all(valid_field) {
        Ok(())
    } else {
        Err(invalid())
    }
}

/// Format one table line
pub fn entry_line(rule: &str, invocation: &Path, log: &Path) -> String {
    format!(
        "{} {} >> {} 2>&1",
        rule.trim(),
        invocation.display(),
        log.display()
    )
}

/// Rule of the line referencing `invocation`
fn find_rule(table: &str, invocation: &Path) -> Option<String> {
    let needle = invocation.to_string_lossy();
    table.lines().find_map(|line| {
        let (rule, _) = line.split_once(needle.as_ref())?;
        Some(rule.trim().to_string())
    })
}

/// Table without any line referencing `invocation`
fn without_path(table: &str, invocation: &Path) -> String {
    let needle = invocation.to_string_lossy();
    let kept: Vec<&str> = table
        .lines()
        .filter(|line| !line.contains(needle.as_ref()))
        .collect();
    if kept.is_empty() {
        String::new()
    } else {
        format!("{}\n", kept.join("\n"))
    }
}

/// Table with `line` appended
fn with_line(table: &str, line: &str) -> String {
    let table = table.trim_end();
    if table.is_empty() {
        format!("{}\n", line)
    } else {
        format!("{}\n{}\n", table, line)
    }
}

/// Decode every line whose unit lives directly under `base_dir`
fn decode_entries(table: &str, base_dir: &Path) -> Vec<ScheduleEntry> {
    let mut prefix = base_dir.to_string_lossy().into_owned();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }

    table
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| {
            let start = line.find(&prefix)?;
            let token = line[start + prefix.len()..].split_whitespace().next()?;
            let camera = token.strip_suffix(UNIT_SUFFIX)?;
            validate_name(camera).ok()?;
            Some(ScheduleEntry {
                camera: camera.to_string(),
                rule: line[..start].trim().to_string(),
                command: line.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "/etc/lookout/cameras";

    fn registry(dir: &Path) -> ScheduleRegistry {
        ScheduleRegistry::new(CronBackend::File(dir.join("crontab")), BASE)
    }

    fn unit(camera: &str) -> PathBuf {
        unit::unit_path(Path::new(BASE), camera)
    }

    #[test]
    fn test_validate_rule() {
        assert!(validate_rule("*/20 * * * *").is_ok());
        assert!(validate_rule("0 6-18 * jan-jun mon,fri").is_ok());
        assert!(validate_rule("@hourly").is_ok());
        assert!(validate_rule("@sometimes").is_err());
        assert!(validate_rule("* * * *").is_err());
        assert!(validate_rule("* * * * * *").is_err());
        assert!(validate_rule("* * * * ; reboot").is_err());
        assert!(validate_rule("").is_err());
    }

    #[test]
    fn test_entry_line_format() {
        let line = entry_line(
            "*/20 * * * *",
            &unit("gate01"),
            Path::new("/etc/lookout/cameras/gate01.log"),
        );
        assert_eq!(
            line,
            "*/20 * * * * /etc/lookout/cameras/gate01.sh >> /etc/lookout/cameras/gate01.log 2>&1"
        );
    }

    #[test]
    fn test_without_path_keeps_foreign_lines() {
        let table = "\
MAILTO=ops@example.net
0 3 * * * /usr/local/bin/backup
*/20 * * * * /etc/lookout/cameras/gate01.sh >> /etc/lookout/cameras/gate01.log 2>&1
";
        let filtered = without_path(table, &unit("gate01"));
        assert_eq!(
            filtered,
            "MAILTO=ops@example.net\n0 3 * * * /usr/local/bin/backup\n"
        );
    }

    #[test]
    fn test_decode_entries_skips_unmanaged() {
        let table = "\
0 3 * * * /usr/local/bin/backup
*/20 * * * * /etc/lookout/cameras/gate01.sh >> /etc/lookout/cameras/gate01.log 2>&1
# */5 * * * * /etc/lookout/cameras/old.sh
@hourly /etc/lookout/cameras/dock-2.sh >> /etc/lookout/cameras/dock-2.log 2>&1
* * * * * /etc/lookout/cameras/sub/x.sh
";
        let entries = decode_entries(table, Path::new(BASE));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].camera, "gate01");
        assert_eq!(entries[0].rule, "*/20 * * * *");
        assert_eq!(entries[1].camera, "dock-2");
        assert_eq!(entries[1].rule, "@hourly");
    }

    #[tokio::test]
    async fn test_upsert_then_status() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());

        reg.upsert("gate01", &unit("gate01"), "*/5 * * * *").await.unwrap();
        let status = reg.status("gate01").await;
        assert!(status.enabled);
        assert_eq!(status.interval.as_deref(), Some("*/5 * * * *"));
    }

    #[tokio::test]
    async fn test_upsert_twice_keeps_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());

        reg.upsert("gate01", &unit("gate01"), "*/5 * * * *").await.unwrap();
        reg.upsert("gate01", &unit("gate01"), "*/10 * * * *").await.unwrap();

        let table = fs::read_to_string(dir.path().join("crontab")).unwrap();
        assert_eq!(table.matches("gate01.sh").count(), 1);
        assert_eq!(
            reg.status("gate01").await.interval.as_deref(),
            Some("*/10 * * * *")
        );
    }

    #[tokio::test]
    async fn test_upsert_rejects_bad_rule_without_touching_table() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());

        assert!(reg.upsert("gate01", &unit("gate01"), "soon").await.is_err());
        assert!(!dir.path().join("crontab").exists());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());

        reg.remove("ghost").await.unwrap();
        reg.upsert("gate01", &unit("gate01"), "*/5 * * * *").await.unwrap();
        reg.remove("gate01").await.unwrap();
        reg.remove("gate01").await.unwrap();
        assert_eq!(reg.status("gate01").await, CronStatus::disabled());
    }

    #[tokio::test]
    async fn test_list_all_counts_distinct_cameras() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("crontab"), "0 3 * * * /usr/local/bin/backup\n").unwrap();
        let reg = registry(dir.path());

        for name in ["gate01", "gate02", "dock"] {
            reg.upsert(name, &unit(name), "*/20 * * * *").await.unwrap();
        }
        reg.upsert("gate02", &unit("gate02"), "@hourly").await.unwrap();

        let entries = reg.list_all().await;
        assert_eq!(entries.len(), 3);
        let table = fs::read_to_string(dir.path().join("crontab")).unwrap();
        assert!(table.starts_with("0 3 * * * /usr/local/bin/backup\n"));
    }

    #[tokio::test]
    async fn test_missing_table_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path());
        assert!(reg.list_all().await.is_empty());
        assert!(!reg.status("gate01").await.enabled);
    }
}
