//! Per-camera log files
//!
//! Each camera has one append-only log next to its control unit. Relay
//! output, cron output and the supervisor's own cycle markers all land here.

use crate::error::{Error, Result};
use chrono::{DateTime, Local, Utc};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// File suffix of camera logs
pub const LOG_SUFFIX: &str = ".log";

/// Path of a camera's log
pub fn log_path(base_dir: &Path, name: &str) -> PathBuf {
    base_dir.join(format!("{}{}", name, LOG_SUFFIX))
}

fn log_error(path: &Path, source: io::Error) -> Error {
    Error::LogFile {
        path: path.to_path_buf(),
        source,
    }
}

/// Create the log if it does not exist yet
pub fn ensure(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| log_error(path, e))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map(|_| ())
        .map_err(|e| log_error(path, e))
}

/// Open the log for appending, creating it if needed
pub fn open_append(path: &Path) -> Result<File> {
    ensure(path)?;
    OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| log_error(path, e))
}

/// Last `count` lines, oldest first, blank lines included
pub fn tail_lines(path: &Path, count: usize) -> Result<Vec<String>> {
    if count == 0 {
        return Ok(Vec::new());
    }

    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(log_error(path, e)),
    };

    let mut reader = BufReader::new(file);
    let mut window = VecDeque::with_capacity(count);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| log_error(path, e))?;
        if read == 0 {
            break;
        }
        // Relay output is not guaranteed to be UTF-8
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        if window.len() == count {
            window.pop_front();
        }
        window.push_back(line.to_string());
    }

    Ok(window.into())
}

/// Truncate the log, leaving a single header line
pub fn clear(path: &Path) -> Result<()> {
    let header = format!("=== Log cleared at {} ===\n", Utc::now().to_rfc3339());
    fs::write(path, header).map_err(|e| log_error(path, e))
}

/// Append one dated supervisor line
pub fn append_marker(path: &Path, message: &str) -> Result<()> {
    let mut file = open_append(path)?;
    writeln!(file, "{} - {}", Local::now().format("DATE: %d/%m/%Y %T"), message)
        .map_err(|e| log_error(path, e))
}

/// Size in bytes; a missing log is empty
pub fn size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Last modification time, formatted for display
pub fn modified(path: &Path) -> Option<String> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    let local: DateTime<Local> = modified.into();
    Some(local.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path() {
        assert_eq!(
            log_path(Path::new("/etc/lookout/cameras"), "gate01"),
            PathBuf::from("/etc/lookout/cameras/gate01.log")
        );
    }

    #[test]
    fn test_tail_lines_returns_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate01.log");
        fs::write(&path, "one\n\ntwo\nthree\r\n\nfour\nfive").unwrap();

        assert_eq!(tail_lines(&path, 3).unwrap(), vec!["", "four", "five"]);
        assert_eq!(tail_lines(&path, 4).unwrap(), vec!["three", "", "four", "five"]);
        assert_eq!(tail_lines(&path, 10).unwrap().len(), 7);
        assert!(tail_lines(&path, 0).unwrap().is_empty());
    }

    #[test]
    fn test_tail_lines_tolerates_binary_noise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate01.log");
        fs::write(&path, b"frame=1 \xff\xfe\nok\n").unwrap();
        let lines = tail_lines(&path, 5).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "ok");
    }

    #[test]
    fn test_missing_log() {
        let path = Path::new("/nonexistent/lookout/gate01.log");
        assert!(tail_lines(path, 5).unwrap().is_empty());
        assert_eq!(size(path), 0);
        assert!(modified(path).is_none());
    }

    #[test]
    fn test_ensure_then_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gate01.log");

        ensure(&path).unwrap();
        assert_eq!(size(&path), 0);
        assert!(modified(&path).is_some());

        append_marker(&path, "camera gate01 started").unwrap();
        assert!(size(&path) > 0);

        clear(&path).unwrap();
        let lines = tail_lines(&path, 10).unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("=== Log cleared at "));
    }

    #[test]
    fn test_marker_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gate01.log");
        append_marker(&path, "hello").unwrap();
        let line = &tail_lines(&path, 1).unwrap()[0];
        assert!(line.starts_with("DATE: "));
        assert!(line.ends_with(" - hello"));
    }
}
