//! Target probing pipeline.
//!
//! Orchestrates the probe primitives for one target: liveness, downtime
//! transitions, statistics, the unconditional history row, kind-specific
//! enrichment, persistence, and the enriched report handed to observers.

mod downtime;
mod notify;
mod stats;

pub use downtime::{DowntimeEvent, DowntimeTracker};
pub use notify::Notifier;
pub use stats::{compute_stats, is_anomalous, LatencyStats};

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use crate::db::{
    DbError, Enrichment, HistoryRecord, ProbeUpdate, Store, Target, TargetKind, TargetStatus,
};
use crate::probe;

/// Days-remaining threshold at or below which expiry alerts fire.
const EXPIRY_ALERT_DAYS: i64 = 30;

/// Status reported for one completed check. `Error` marks a probe that
/// failed unexpectedly rather than a target observed down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Up,
    Down,
    Error,
}

impl From<TargetStatus> for ReportStatus {
    fn from(status: TargetStatus) -> Self {
        match status {
            TargetStatus::Up => ReportStatus::Up,
            _ => ReportStatus::Down,
        }
    }
}

/// The enriched result of one probe, broadcast to observers and returned
/// from manual checks.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub target_id: i64,
    pub name: String,
    pub address: String,
    pub category: String,
    pub kind: TargetKind,
    pub status: ReportStatus,
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_loss: Option<f64>,
    pub error: Option<String>,
    pub last_check: DateTime<Utc>,
    pub avg_latency_ms: Option<f64>,
    pub stddev_latency_ms: Option<f64>,
    pub is_anomalous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<Enrichment>,
}

/// Runs full checks of single targets.
pub struct Prober {
    store: Arc<Store>,
    notifier: Arc<Notifier>,
    downtime: DowntimeTracker,
}

impl Prober {
    pub fn new(store: Arc<Store>, notifier: Arc<Notifier>) -> Self {
        Self {
            store,
            notifier,
            downtime: DowntimeTracker::new(),
        }
    }

    /// Run one full check of one target.
    ///
    /// Never propagates an error: an unexpected failure at any stage
    /// degrades to a `status: error` report so a sweep cannot abort on a
    /// single target.
    pub async fn check_target(&self, target: &Target) -> ProbeReport {
        match self.try_check(target).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(target = %target.name, error = %e, "probe failed unexpectedly");
                ProbeReport {
                    target_id: target.id,
                    name: target.name.clone(),
                    address: target.address.clone(),
                    category: target.category.clone(),
                    kind: target.kind(),
                    status: ReportStatus::Error,
                    latency_ms: None,
                    status_code: None,
                    packet_loss: None,
                    error: Some(e.to_string()),
                    last_check: Utc::now(),
                    avg_latency_ms: None,
                    stddev_latency_ms: None,
                    is_anomalous: false,
                    enrichment: None,
                }
            }
        }
    }

    async fn try_check(&self, target: &Target) -> Result<ProbeReport, DbError> {
        let now = Utc::now();
        tracing::debug!(target = %target.name, kind = target.kind().as_str(), "probing");

        // Liveness, dispatched by kind
        let (status, latency_ms, status_code, packet_loss, error) = match target.kind() {
            TargetKind::Url => {
                let result = probe::check_url(&target.address).await;
                (
                    result.status,
                    Some(result.latency_ms),
                    result.status_code,
                    None,
                    result.error,
                )
            }
            TargetKind::Ip => {
                let result = probe::check_ip(&target.address).await;
                (
                    result.status,
                    Some(result.latency_ms),
                    None,
                    Some(result.packet_loss),
                    result.error,
                )
            }
        };

        // Downtime transition
        if let Some(event) = self.downtime.transition(target.id, target.status, status, now) {
            self.notify_transition(target, event).await;
        }

        // Statistics over the trailing 24 hours, excluding this sample
        let since = now - ChronoDuration::hours(24);
        let history = self.store.get_history_since(target.id, since)?;
        let samples: Vec<f64> = history.iter().filter_map(|h| h.latency_ms).collect();
        let latency_stats = compute_stats(&samples);
        let anomalous = latency_ms
            .map(|l| is_anomalous(l, latency_stats, target.anomaly_threshold_ms))
            .unwrap_or(false);

        // History row, recorded even when the check failed. Attempted
        // before the target update so a later persistence failure cannot
        // lose the snapshot.
        self.store.add_history(&HistoryRecord {
            id: 0,
            target_id: target.id,
            status,
            latency_ms,
            status_code,
            error: error.clone(),
            timestamp: now,
        })?;

        // Kind-specific enrichment
        let enrichment = self.enrich(target).await;

        // Persist field updates; a failure here is logged, the report is
        // still produced
        let update = ProbeUpdate {
            status,
            latency_ms,
            last_check: now,
            avg_latency_ms: latency_stats.mean,
            stddev_latency_ms: latency_stats.stddev,
            last_error: error.clone(),
            last_status_code: status_code,
            enrichment: Some(enrichment.clone()),
        };
        if let Err(e) = self.store.apply_probe_update(target.id, &update) {
            tracing::error!(target = %target.name, error = %e, "failed to persist probe result");
        }

        tracing::info!(
            target = %target.name,
            status = status.as_str(),
            latency_ms = latency_ms.unwrap_or(-1.0),
            anomalous,
            "check complete"
        );

        Ok(ProbeReport {
            target_id: target.id,
            name: target.name.clone(),
            address: target.address.clone(),
            category: target.category.clone(),
            kind: target.kind(),
            status: status.into(),
            latency_ms,
            status_code,
            packet_loss,
            error,
            last_check: now,
            avg_latency_ms: latency_stats.mean,
            stddev_latency_ms: latency_stats.stddev,
            is_anomalous: anomalous,
            enrichment: Some(enrichment),
        })
    }

    /// Gather kind-specific enrichment. URL targets run certificate,
    /// registration and DNS lookups concurrently; a failure in one nulls
    /// only its own blob.
    async fn enrich(&self, target: &Target) -> Enrichment {
        match target.kind() {
            TargetKind::Ip => Enrichment::Ip {
                info: Some(probe::enrich_ip(&target.address).await),
            },
            TargetKind::Url => {
                let Some(host) = host_of(&target.address) else {
                    tracing::warn!(target = %target.name, address = %target.address,
                        "address has no hostname, skipping enrichment");
                    return Enrichment::empty(TargetKind::Url);
                };

                let (tls, domain, dns) = tokio::join!(
                    probe::inspect_certificate(&host),
                    probe::lookup_domain(strip_www(&host)),
                    probe::resolve_records(&host),
                );

                self.notify_expiry(target, tls.as_ref().map(|t| t.days_remaining), domain.as_ref().and_then(|d| d.days_remaining))
                    .await;

                Enrichment::Url {
                    tls,
                    domain,
                    dns: Some(dns),
                }
            }
        }
    }

    async fn notify_transition(&self, target: &Target, event: DowntimeEvent) {
        let prefs = &target.notifications;
        if !prefs.downtime || prefs.email.is_empty() {
            return;
        }

        let (subject, body) = match event {
            DowntimeEvent::WentDown => notify::down_alert(&target.name, &target.address),
            DowntimeEvent::Recovered { minutes } => {
                notify::recovered_alert(&target.name, &target.address, minutes)
            }
        };
        self.notifier.send(&prefs.email, &subject, &body).await;
    }

    async fn notify_expiry(
        &self,
        target: &Target,
        tls_days: Option<i64>,
        domain_days: Option<i64>,
    ) {
        let prefs = &target.notifications;
        if prefs.email.is_empty() {
            return;
        }

        if prefs.tls_expiry {
            if let Some(days) = tls_days {
                if days <= EXPIRY_ALERT_DAYS {
                    let (subject, body) = notify::tls_expiry_alert(&target.name, days);
                    self.notifier.send(&prefs.email, &subject, &body).await;
                }
            }
        }

        if prefs.domain_expiry {
            if let Some(days) = domain_days {
                if days <= EXPIRY_ALERT_DAYS {
                    let (subject, body) = notify::domain_expiry_alert(&target.name, days);
                    self.notifier.send(&prefs.email, &subject, &body).await;
                }
            }
        }
    }

    /// Drop prober-held state for a deleted target.
    pub fn forget_target(&self, target_id: i64) {
        self.downtime.forget(target_id);
    }

    /// Number of targets currently inside an open downtime session.
    pub fn open_downtime_sessions(&self) -> usize {
        self.downtime.open_sessions()
    }
}

/// Hostname of a URL-kind address.
fn host_of(address: &str) -> Option<String> {
    reqwest::Url::parse(address)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.to_string()))
}

/// Registration lookups go by the bare domain.
fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}
