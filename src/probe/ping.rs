//! ICMP liveness probe via the system ping command.
//!
//! One echo request per check, parsed out of the tool's human-readable
//! output. Output formats differ per platform, so several patterns are
//! tried in order.

use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tokio::process::Command;

use crate::db::TargetStatus;

use super::{ProbeError, DOWN_LATENCY_SENTINEL_MS, LIVENESS_TIMEOUT};

/// Outcome of one ping liveness check.
#[derive(Debug, Clone, Serialize)]
pub struct PingProbeResult {
    pub status: TargetStatus,
    pub latency_ms: f64,
    pub packet_loss: f64,
    pub error: Option<String>,
}

/// Ping an IP address once.
///
/// A single echo with a 5 second deadline; no retry loop. Failure reports
/// down with the sentinel latency and 100% loss.
pub async fn check_ip(address: &str) -> PingProbeResult {
    match run_ping(address, LIVENESS_TIMEOUT).await {
        Ok(stats) => PingProbeResult {
            status: TargetStatus::Up,
            latency_ms: stats.rtt_ms,
            packet_loss: stats.packet_loss,
            error: None,
        },
        Err(error) => PingProbeResult {
            status: TargetStatus::Down,
            latency_ms: DOWN_LATENCY_SENTINEL_MS,
            packet_loss: 100.0,
            error: Some(error.to_string()),
        },
    }
}

#[derive(Debug, PartialEq)]
struct PingStats {
    rtt_ms: f64,
    packet_loss: f64,
}

async fn run_ping_command(address: &str, timeout: Duration) -> Result<String, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1).to_string();
    let timeout_millis = timeout.as_millis().to_string();

    let mut command = Command::new("ping");
    if cfg!(windows) {
        command.args(["-n", "1", "-w", &timeout_millis, address]);
    } else {
        command.args(["-c", "1", "-W", &timeout_secs, address]);
    }

    // The command gets a grace second beyond its own -W deadline
    let output = tokio::time::timeout(
        timeout + Duration::from_secs(1),
        command.stdout(Stdio::piped()).stderr(Stdio::piped()).output(),
    )
    .await
    .map_err(|_| ProbeError::Timeout(timeout))?
    .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);

    if !output.status.success() {
        if stdout.contains("100% packet loss") || stdout.contains("100.0% packet loss") {
            return Err(ProbeError::Timeout(timeout));
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
        return Err(ProbeError::Command(format!("ping failed: {}", detail)));
    }

    Ok(stdout.into_owned())
}

async fn run_ping(address: &str, timeout: Duration) -> Result<PingStats, ProbeError> {
    let stdout = run_ping_command(address, timeout).await?;
    parse_ping_output(&stdout).ok_or_else(|| {
        ProbeError::Command(format!("failed to parse ping output: {}", stdout.trim()))
    })
}

/// Parse latency and packet loss out of ping output.
fn parse_ping_output(output: &str) -> Option<PingStats> {
    let rtt_ms = parse_rtt(output)?;
    let packet_loss = parse_packet_loss(output).unwrap_or(0.0);
    Some(PingStats { rtt_ms, packet_loss })
}

fn parse_rtt(output: &str) -> Option<f64> {
    // Per-packet response "time=12.3 ms" (Linux) or "time<1ms" (Windows)
    static RE_TIME: OnceLock<Regex> = OnceLock::new();
    let re_time = RE_TIME.get_or_init(|| Regex::new(r"time[=<](?P<val>[0-9.]+)\s*ms").unwrap());
    if let Some(caps) = re_time.captures(output) {
        if let Ok(ms) = caps["val"].parse::<f64>() {
            return Some(ms);
        }
    }

    // Summary line "rtt min/avg/max/mdev = a/b/c/d ms" (Linux) or
    // "round-trip min/avg/max/stddev = a/b/c/d ms" (macOS); use the average
    static RE_SUMMARY: OnceLock<Regex> = OnceLock::new();
    let re_summary = RE_SUMMARY.get_or_init(|| {
        Regex::new(r"(?:rtt|round-trip)\s+min/avg/max/\S+\s*=\s*([0-9.]+)/([0-9.]+)/([0-9.]+)")
            .unwrap()
    });
    if let Some(caps) = re_summary.captures(output) {
        if let Ok(ms) = caps[2].parse::<f64>() {
            return Some(ms);
        }
    }

    None
}

fn parse_packet_loss(output: &str) -> Option<f64> {
    static RE_LOSS: OnceLock<Regex> = OnceLock::new();
    let re_loss = RE_LOSS
        .get_or_init(|| Regex::new(r"(?P<val>[0-9.]+)%\s*(?:packet\s+)?loss").unwrap());
    re_loss
        .captures(output)
        .and_then(|caps| caps["val"].parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_linux_per_packet() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=42 ms";
        let stats = parse_ping_output(output).unwrap();
        assert_eq!(stats.rtt_ms, 42.0);
        assert_eq!(stats.packet_loss, 0.0);
    }

    #[test]
    fn test_parse_linux_full_output() {
        let output = r#"PING 8.8.8.8 (8.8.8.8) 56(84) bytes of data.
64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.3 ms

--- 8.8.8.8 ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 12.300/12.300/12.300/0.000 ms"#;
        let stats = parse_ping_output(output).unwrap();
        assert_eq!(stats.rtt_ms, 12.3);
        assert_eq!(stats.packet_loss, 0.0);
    }

    #[test]
    fn test_parse_macos_summary_only() {
        let output = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        let stats = parse_ping_output(output).unwrap();
        assert_eq!(stats.rtt_ms, 17.906);
        assert_eq!(stats.packet_loss, 0.0);
    }

    #[test]
    fn test_parse_partial_loss() {
        let output = r#"--- 10.0.0.1 ping statistics ---
4 packets transmitted, 2 received, 50% packet loss, time 3004ms
rtt min/avg/max/mdev = 8.1/9.2/10.3/1.1 ms"#;
        let stats = parse_ping_output(output).unwrap();
        assert_eq!(stats.rtt_ms, 9.2);
        assert_eq!(stats.packet_loss, 50.0);
    }

    #[test]
    fn test_unparseable_output() {
        assert!(parse_ping_output("garbage").is_none());
    }
}
