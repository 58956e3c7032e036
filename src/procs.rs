//! OS process listing and termination
//!
//! No process identifiers are persisted: which relay belongs to which camera
//! is inferred from command lines, by address or by stream key. A relay is
//! recognised by the host of its input URL; anything else by whole tokens, so
//! that `10.0.0.5` never claims the relay of `10.0.0.50`.

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use serde::Serialize;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};
use url::{Host, Url};

/// One row of the process table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Start time as printed by `ps -o lstart`
    pub started: String,
    /// Full command line
    pub command: String,
}

impl ProcessInfo {
    /// Whether the command line references this camera address
    pub fn mentions_address(&self, address: &str) -> bool {
        contains_token(&self.command, address)
    }

    /// Whether one of the `-i` inputs is a URL whose host is this address
    ///
    /// Only the authority counts: a camera called `cam` does not pull from
    /// `rtsp://10.0.0.7:554/cam/realmonitor`.
    pub fn pulls_from(&self, address: &str) -> bool {
        let args: Vec<&str> = self.command.split_whitespace().collect();
        args.windows(2)
            .filter(|pair| pair[0] == "-i")
            .filter_map(|pair| Url::parse(pair[1]).ok())
            .any(|url| host_is(&url, address))
    }

    /// Whether the command line references this stream key
    pub fn mentions_stream_key(&self, key: &str) -> bool {
        contains_token(&self.command, key)
    }

    /// Whether this process runs the given program
    pub fn runs_program(&self, program: &Path) -> bool {
        let Some(wanted) = program.file_name() else {
            return false;
        };
        self.command
            .split_whitespace()
            .next()
            .and_then(|argv0| Path::new(argv0).file_name())
            .is_some_and(|name| name == wanted)
    }
}

/// Process lister backed by `ps`
#[derive(Debug, Clone)]
pub struct ProcessLister {
    program: PathBuf,
}

impl Default for ProcessLister {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ps"),
        }
    }
}

impl ProcessLister {
    pub fn new() -> Self {
        Self::default()
    }

    /// List every process on the host
    ///
    /// A failing `ps` yields an empty table: callers treat that as "nothing
    /// running", which at worst starts a duplicate relay that the next cycle
    /// reconciles.
    pub async fn list(&self) -> Vec<ProcessInfo> {
        let output = Command::new(&self.program)
            .args(["-ww", "-eo", "pid=,lstart=,args="])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let own_pid = std::process::id();
                parse_ps_output(&String::from_utf8_lossy(&output.stdout))
                    .into_iter()
                    .filter(|p| p.pid != own_pid)
                    .collect()
            }
            Ok(output) => {
                warn!(
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "process listing failed"
                );
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "process lister could not run");
                Vec::new()
            }
        }
    }
}

/// Parse `ps -eo pid=,lstart=,args=` output
///
/// `lstart` is always five fields (`Fri Oct 17 12:00:00 2026`).
pub fn parse_ps_output(output: &str) -> Vec<ProcessInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut rest = line.trim_start();
            let mut fields = Vec::with_capacity(6);
            for _ in 0..6 {
                let end = rest.find(char::is_whitespace)?;
                fields.push(&rest[..end]);
                rest = rest[end..].trim_start();
            }
            let pid = fields[0].parse().ok()?;
            let command = rest.trim_end();
            if command.is_empty() {
                return None;
            }
            Some(ProcessInfo {
                pid,
                started: fields[1..].join(" "),
                command: command.to_string(),
            })
        })
        .collect()
}

/// Send SIGKILL to every pid, returning how many were signalled
///
/// Processes that already exited are not an error. The calling process is
/// never signalled.
pub fn kill_all(pids: &[u32]) -> usize {
    let own_pid = std::process::id();
    let mut killed = 0;

    for &pid in pids {
        if pid == own_pid || pid == 0 {
            continue;
        }
        let Ok(raw) = i32::try_from(pid) else {
            continue;
        };
        match kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => {
                debug!(pid, "sent SIGKILL");
                killed += 1;
            }
            Err(Errno::ESRCH) => debug!(pid, "process already gone"),
            Err(e) => warn!(pid, error = %e, "failed to signal process"),
        }
    }

    killed
}

fn host_is(url: &Url, address: &str) -> bool {
    let bare = address.trim_start_matches('[').trim_end_matches(']');
    match (url.host(), bare.parse::<Ipv6Addr>()) {
        (Some(Host::Ipv6(host)), Ok(wanted)) => host == wanted,
        (Some(Host::Ipv6(_)), Err(_)) => false,
        (Some(_), _) => url.host_str().is_some_and(|host| host.eq_ignore_ascii_case(bare)),
        (None, _) => false,
    }
}

/// Substring match that refuses to start or end inside a larger token
fn contains_token(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    let is_word = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_');

    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}
