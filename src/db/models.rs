//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::probe::{DnsInfo, DomainInfo, IpInfo, TlsInfo};

/// Health state of a monitored target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Up,
    Down,
    Unknown,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetStatus::Up => "up",
            TargetStatus::Down => "down",
            TargetStatus::Unknown => "unknown",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "up" => TargetStatus::Up,
            "down" => TargetStatus::Down,
            _ => TargetStatus::Unknown,
        }
    }
}

/// What a target address is: a web endpoint or a raw IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Url,
    Ip,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Url => "url",
            TargetKind::Ip => "ip",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "ip" => TargetKind::Ip,
            _ => TargetKind::Url,
        }
    }
}

/// Kind-specific enrichment attached to a target, discriminated by the
/// target kind: web endpoints carry certificate/registration/DNS details,
/// raw IPs carry geolocation. Blobs are None when the last lookup failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Enrichment {
    Url {
        #[serde(default)]
        tls: Option<TlsInfo>,
        #[serde(default)]
        domain: Option<DomainInfo>,
        #[serde(default)]
        dns: Option<DnsInfo>,
    },
    Ip {
        #[serde(default)]
        info: Option<IpInfo>,
    },
}

impl Enrichment {
    /// The empty enrichment for a kind.
    pub fn empty(kind: TargetKind) -> Self {
        match kind {
            TargetKind::Url => Enrichment::Url {
                tls: None,
                domain: None,
                dns: None,
            },
            TargetKind::Ip => Enrichment::Ip { info: None },
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            Enrichment::Url { .. } => TargetKind::Url,
            Enrichment::Ip { .. } => TargetKind::Ip,
        }
    }
}

/// Per-target alert routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyPrefs {
    #[serde(default)]
    pub email: String,
    #[serde(default = "default_true")]
    pub downtime: bool,
    #[serde(default = "default_true")]
    pub tls_expiry: bool,
    #[serde(default = "default_true")]
    pub domain_expiry: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NotifyPrefs {
    fn default() -> Self {
        Self {
            email: String::new(),
            downtime: true,
            tls_expiry: true,
            domain_expiry: true,
        }
    }
}

/// A monitored target.
///
/// Everything except `id`, `address` and the kind tag may be overwritten
/// by the prober after each check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub address: String,
    pub category: String,
    pub anomaly_threshold_ms: f64,
    pub notifications: NotifyPrefs,
    pub status: TargetStatus,
    pub latency_ms: Option<f64>,
    pub last_check: Option<DateTime<Utc>>,
    pub avg_latency_ms: Option<f64>,
    pub stddev_latency_ms: Option<f64>,
    pub last_error: Option<String>,
    pub last_status_code: Option<u16>,
    #[serde(flatten)]
    pub enrichment: Enrichment,
}

impl Target {
    pub fn kind(&self) -> TargetKind {
        self.enrichment.kind()
    }
}

impl Default for Target {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            address: String::new(),
            category: "website".to_string(),
            anomaly_threshold_ms: 1000.0,
            notifications: NotifyPrefs::default(),
            status: TargetStatus::Unknown,
            latency_ms: None,
            last_check: None,
            avg_latency_ms: None,
            stddev_latency_ms: None,
            last_error: None,
            last_status_code: None,
            enrichment: Enrichment::empty(TargetKind::Url),
        }
    }
}

/// One immutable snapshot of a single check. Written once per completed
/// probe, failures included; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: i64,
    pub target_id: i64,
    pub status: TargetStatus,
    pub latency_ms: Option<f64>,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The mutable field set a completed probe writes back to its target.
#[derive(Debug, Clone)]
pub struct ProbeUpdate {
    pub status: TargetStatus,
    pub latency_ms: Option<f64>,
    pub last_check: DateTime<Utc>,
    pub avg_latency_ms: Option<f64>,
    pub stddev_latency_ms: Option<f64>,
    pub last_error: Option<String>,
    pub last_status_code: Option<u16>,
    /// None leaves the stored enrichment blobs untouched.
    pub enrichment: Option<Enrichment>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [TargetStatus::Up, TargetStatus::Down, TargetStatus::Unknown] {
            assert_eq!(TargetStatus::parse(status.as_str()), status);
        }
        assert_eq!(TargetStatus::parse("bogus"), TargetStatus::Unknown);
    }

    #[test]
    fn test_enrichment_kind_tag_serializes() {
        let enrichment = Enrichment::empty(TargetKind::Ip);
        let json = serde_json::to_value(&enrichment).unwrap();
        assert_eq!(json["kind"], "ip");
    }

    #[test]
    fn test_target_json_flattens_kind() {
        let target = Target {
            name: "gateway".to_string(),
            address: "192.0.2.1".to_string(),
            category: "ip".to_string(),
            enrichment: Enrichment::empty(TargetKind::Ip),
            ..Default::default()
        };
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["kind"], "ip");
        assert_eq!(json["status"], "unknown");
        assert!(json["info"].is_null());
    }
}
