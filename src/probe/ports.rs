//! On-demand TCP port scanning.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use super::ProbeError;

/// Ports scanned when the caller does not supply a list.
pub const DEFAULT_PORTS: [u16; 7] = [80, 443, 22, 21, 25, 3306, 5432];

/// Per-port connect budget.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    Open,
    Closed,
    Timeout,
    Error,
}

/// Result of probing one port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortCheck {
    pub status: PortState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one scan over a port list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortScan {
    pub ip: String,
    pub ports: BTreeMap<u16, PortCheck>,
    pub last_check: DateTime<Utc>,
}

/// Scan `ports` on `host` with one TCP connect per port, concurrently.
pub async fn scan_ports(host: &str, ports: &[u16]) -> Result<PortScan, ProbeError> {
    if ports.is_empty() {
        return Err(ProbeError::Config("port list is empty".to_string()));
    }
    if ports.contains(&0) {
        return Err(ProbeError::Config("port 0 is not scannable".to_string()));
    }

    let checks = join_all(ports.iter().map(|&port| check_port(host, port))).await;

    Ok(PortScan {
        ip: host.to_string(),
        ports: ports.iter().copied().zip(checks).collect(),
        last_check: Utc::now(),
    })
}

async fn check_port(host: &str, port: u16) -> PortCheck {
    let start = Instant::now();

    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => PortCheck {
            status: PortState::Open,
            latency_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
            error: None,
        },
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => PortCheck {
            status: PortState::Closed,
            latency_ms: Some(start.elapsed().as_secs_f64() * 1000.0),
            error: None,
        },
        Ok(Err(e)) => PortCheck {
            status: PortState::Error,
            latency_ms: None,
            error: Some(e.to_string()),
        },
        Err(_) => PortCheck {
            status: PortState::Timeout,
            latency_ms: None,
            error: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_port_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let scan = scan_ports("127.0.0.1", &[port]).await.unwrap();
        let check = &scan.ports[&port];
        assert_eq!(check.status, PortState::Open);
        assert!(check.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_closed_port_detected() {
        // Bind to grab a free port, then release it before scanning
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let scan = scan_ports("127.0.0.1", &[port]).await.unwrap();
        assert_eq!(scan.ports[&port].status, PortState::Closed);
    }

    #[tokio::test]
    async fn test_empty_port_list_rejected() {
        let err = scan_ports("127.0.0.1", &[]).await.unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }

    #[tokio::test]
    async fn test_port_zero_rejected() {
        let err = scan_ports("127.0.0.1", &[80, 0]).await.unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }

    #[test]
    fn test_default_port_list() {
        assert_eq!(DEFAULT_PORTS.len(), 7);
        assert!(DEFAULT_PORTS.contains(&80));
        assert!(DEFAULT_PORTS.contains(&443));
        assert!(DEFAULT_PORTS.contains(&5432));
    }
}
