//! Reachability probe
//!
//! Wraps the system `ping` utility. A camera that does not answer within the
//! probe timeout is unreachable; the probe itself never fails, a broken or
//! missing `ping` degrades to "unreachable" and is logged.

use crate::camera::is_usable_address;
use crate::manifest::ProbeConfig;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Label shown for cameras that do not answer
pub const UNREACHABLE_LABEL: &str = "Sem Comunicação";

/// Extra time granted to `ping` beyond its own deadline before it is killed
const HARD_DEADLINE_SLACK: Duration = Duration::from_secs(3);

/// Outcome of one probe
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Reachability {
    /// At least one reply; average round trip when `ping` reported it
    Reachable { latency_ms: Option<f64> },
    /// No reply within the timeout
    Unreachable,
}

impl Reachability {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Reachability::Reachable { .. })
    }
}

impl fmt::Display for Reachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reachability::Reachable {
                latency_ms: Some(ms),
            } => write!(f, "{:.2} ms", ms),
            Reachability::Reachable { latency_ms: None } => write!(f, "reachable"),
            Reachability::Unreachable => f.write_str(UNREACHABLE_LABEL),
        }
    }
}

/// Probe backed by the `ping` utility
#[derive(Debug, Clone)]
pub struct PingProbe {
    program: PathBuf,
    count: u32,
    timeout: Duration,
}

impl PingProbe {
    /// Create a probe from configuration
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            program: config.program.clone(),
            count: config.count,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Probe one address
    pub async fn probe(&self, address: &str) -> Reachability {
        if !is_usable_address(address) {
            warn!(address, "refusing to probe malformed address");
            return Reachability::Unreachable;
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("-n")
            .arg("-c")
            .arg(self.count.to_string())
            .arg("-W")
            .arg(reply_wait(self.timeout))
            .arg(address)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // ping waits up to `timeout` per echo request
        let deadline = self.timeout * self.count + HARD_DEADLINE_SLACK;

        match tokio::time::timeout(deadline, cmd.output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let result = parse_ping_output(&stdout);
                debug!(address, %result, "probe finished");
                result
            }
            Ok(Err(e)) => {
                warn!(
                    address,
                    program = %self.program.display(),
                    error = %e,
                    "probe program could not run"
                );
                Reachability::Unreachable
            }
            Err(_) => {
                warn!(address, ?deadline, "probe exceeded its deadline");
                Reachability::Unreachable
            }
        }
    }
}

/// Value of `ping -W`: seconds on Linux, milliseconds on the BSDs and macOS
#[cfg(any(target_os = "linux", target_os = "android"))]
fn reply_wait(timeout: Duration) -> String {
    timeout.as_secs().max(1).to_string()
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn reply_wait(timeout: Duration) -> String {
    timeout.as_millis().max(1).to_string()
}

/// Interpret the summary printed by `ping`
///
/// Understands both the Linux (`2 received`, `rtt min/avg/max/mdev`) and the
/// BSD (`2 packets received`, `round-trip min/avg/max/stddev`) layouts.
pub fn parse_ping_output(output: &str) -> Reachability {
    let received = output.lines().find_map(parse_received);

    match received {
        Some(n) if n > 0 => Reachability::Reachable {
            latency_ms: parse_average(output),
        },
        _ => Reachability::Unreachable,
    }
}

fn parse_received(line: &str) -> Option<u32> {
    if !line.contains("transmitted") {
        return None;
    }
    line.split(',').find_map(|part| {
        let part = part.trim();
        if part.ends_with("received") {
            part.split_whitespace().next()?.parse().ok()
        } else {
            None
        }
    })
}

fn parse_average(output: &str) -> Option<f64> {
    // "rtt min/avg/max/mdev = 0.041/0.052/0.063/0.011 ms"
    let summary = output.lines().find_map(|line| {
        let (label, values) = line.split_once('=')?;
        if label.contains("min/avg/max") {
            values.trim().split('/').nth(1)?.trim().parse::<f64>().ok()
        } else {
            None
        }
    });
    if summary.is_some() {
        return summary;
    }

    // No summary line: average the per-reply "time=" fields
    let times: Vec<f64> = output
        .split_whitespace()
        .filter_map(|token| token.strip_prefix("time="))
        .filter_map(|value| value.parse().ok())
        .collect();
    if times.is_empty() {
        None
    } else {
        Some(times.iter().sum::<f64>() / times.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINUX_OK: &str = "\
PING 10.0.0.5 (10.0.0.5) 56(84) bytes of data.
64 bytes from 10.0.0.5: icmp_seq=1 ttl=64 time=0.412 ms
64 bytes from 10.0.0.5: icmp_seq=2 ttl=64 time=0.388 ms

--- 10.0.0.5 ping statistics ---
2 packets transmitted, 2 received, 0% packet loss, time 1001ms
rtt min/avg/max/mdev = 0.388/0.400/0.412/0.012 ms
";

    const LINUX_DOWN: &str = "\
PING 10.0.0.5 (10.0.0.5) 56(84) bytes of data.

--- 10.0.0.5 ping statistics ---
2 packets transmitted, 0 received, 100% packet loss, time 1020ms
";

    const BSD_OK: &str = "\
PING 10.0.0.5 (10.0.0.5): 56 data bytes
64 bytes from 10.0.0.5: icmp_seq=0 ttl=64 time=1.250 ms

--- 10.0.0.5 ping statistics ---
2 packets transmitted, 1 packets received, 50.0% packet loss
round-trip min/avg/max/stddev = 1.250/1.250/1.250/0.000 ms
";

    #[test]
    fn test_parse_linux_reachable() {
        assert_eq!(
            parse_ping_output(LINUX_OK),
            Reachability::Reachable {
                latency_ms: Some(0.4)
            }
        );
    }

    #[test]
    fn test_parse_linux_unreachable() {
        assert_eq!(parse_ping_output(LINUX_DOWN), Reachability::Unreachable);
    }

    #[test]
    fn test_parse_bsd_reachable() {
        assert_eq!(
            parse_ping_output(BSD_OK),
            Reachability::Reachable {
                latency_ms: Some(1.25)
            }
        );
    }

    #[test]
    fn test_parse_without_summary_averages_replies() {
        let output = "\
64 bytes from 10.0.0.5: icmp_seq=1 ttl=64 time=1.0 ms
64 bytes from 10.0.0.5: icmp_seq=2 ttl=64 time=3.0 ms
2 packets transmitted, 2 received, 0% packet loss
";
        assert_eq!(
            parse_ping_output(output),
            Reachability::Reachable {
                latency_ms: Some(2.0)
            }
        );
    }

    #[test]
    fn test_parse_garbage_is_unreachable() {
        assert_eq!(parse_ping_output(""), Reachability::Unreachable);
        assert_eq!(
            parse_ping_output("ping: unknown host"),
            Reachability::Unreachable
        );
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn test_reply_wait_in_seconds() {
        assert_eq!(reply_wait(Duration::from_secs(2)), "2");
        assert_eq!(reply_wait(Duration::from_millis(300)), "1");
    }

    #[test]
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn test_reply_wait_in_milliseconds() {
        assert_eq!(reply_wait(Duration::from_secs(2)), "2000");
    }

    #[test]
    fn test_display_labels() {
        assert_eq!(
            Reachability::Reachable {
                latency_ms: Some(12.3456)
            }
            .to_string(),
            "12.35 ms"
        );
        assert_eq!(Reachability::Unreachable.to_string(), "Sem Comunicação");
    }

    #[tokio::test]
    async fn test_malformed_address_is_unreachable_without_probing() {
        let probe = PingProbe::from_config(&ProbeConfig {
            program: PathBuf::from("/nonexistent/ping"),
            count: 1,
            timeout_secs: 1,
        });
        assert_eq!(probe.probe("").await, Reachability::Unreachable);
        assert_eq!(probe.probe("-c1").await, Reachability::Unreachable);
    }

    #[tokio::test]
    async fn test_missing_program_degrades_to_unreachable() {
        let probe = PingProbe::from_config(&ProbeConfig {
            program: PathBuf::from("/nonexistent/ping"),
            count: 1,
            timeout_secs: 1,
        });
        assert_eq!(probe.probe("10.0.0.5").await, Reachability::Unreachable);
    }
}
