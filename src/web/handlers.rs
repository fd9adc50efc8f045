//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, Enrichment, NotifyPrefs, Target, TargetKind};
use crate::live::{LiveChannel, OBSERVER_BUFFER};
use crate::probe::{self, IpInfo, ProbeError, DEFAULT_PORTS};

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{Duration as ChronoDuration, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

const CATEGORIES: [&str; 7] = [
    "website",
    "application",
    "domain",
    "api",
    "server",
    "ip",
    "other",
];

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_targets() {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_get_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_target(id) {
        Ok(target) => Json(target).into_response(),
        Err(DbError::NotFound) => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub name: String,
    pub address: String,
    #[serde(default = "default_kind")]
    pub kind: TargetKind,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub anomaly_threshold_ms: Option<f64>,
    #[serde(default)]
    pub notifications: Option<NotifyPrefs>,
}

fn default_kind() -> TargetKind {
    TargetKind::Url
}

/// Validate an address for its kind: a parseable http(s) URL, or a
/// literal IP address.
fn validate_address(kind: TargetKind, address: &str) -> Result<(), &'static str> {
    match kind {
        TargetKind::Url => match reqwest::Url::parse(address) {
            Ok(url) if url.host_str().is_some() => Ok(()),
            _ => Err("Invalid URL"),
        },
        TargetKind::Ip => address
            .parse::<IpAddr>()
            .map(|_| ())
            .map_err(|_| "Invalid IP address"),
    }
}

fn validate_category(category: &str) -> Result<(), &'static str> {
    if CATEGORIES.contains(&category) {
        Ok(())
    } else {
        Err("Invalid category")
    }
}

fn default_category(kind: TargetKind) -> &'static str {
    match kind {
        TargetKind::Url => "website",
        TargetKind::Ip => "ip",
    }
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    if req.name.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Name is required").into_response();
    }
    if let Err(e) = validate_address(req.kind, &req.address) {
        return (StatusCode::BAD_REQUEST, e).into_response();
    }

    let category = req
        .category
        .unwrap_or_else(|| default_category(req.kind).to_string());
    if let Err(e) = validate_category(&category) {
        return (StatusCode::BAD_REQUEST, e).into_response();
    }

    let mut target = Target {
        name: req.name,
        address: req.address,
        category,
        anomaly_threshold_ms: req.anomaly_threshold_ms.unwrap_or(1000.0),
        notifications: req.notifications.unwrap_or_default(),
        enrichment: Enrichment::empty(req.kind),
        ..Default::default()
    };

    match state.store.add_target(&mut target) {
        Ok(id) => {
            // First check runs in the background so creation returns fast
            let scheduler = state.scheduler.clone();
            tokio::spawn(async move {
                let _ = scheduler.check_now(id).await;
            });
            Json(target).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    let existing = match state.store.get_target(id) {
        Ok(target) => target,
        Err(DbError::NotFound) => {
            return (StatusCode::NOT_FOUND, "Target not found").into_response()
        }
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    if let Err(e) = validate_address(req.kind, &req.address) {
        return (StatusCode::BAD_REQUEST, e).into_response();
    }
    let category = req
        .category
        .unwrap_or_else(|| existing.category.clone());
    if let Err(e) = validate_category(&category) {
        return (StatusCode::BAD_REQUEST, e).into_response();
    }

    let mut updated = existing.clone();
    updated.name = req.name;
    updated.address = req.address;
    updated.category = category;
    if let Some(threshold) = req.anomaly_threshold_ms {
        updated.anomaly_threshold_ms = threshold;
    }
    if let Some(notifications) = req.notifications {
        updated.notifications = notifications;
    }
    // A kind change resets the enrichment to the new variant
    if req.kind != existing.kind() {
        updated.enrichment = Enrichment::empty(req.kind);
    }

    match state.store.update_target(&updated) {
        Ok(()) => Json(updated).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    state.scheduler.remove_target(id);

    match state.store.delete_target(id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(DbError::NotFound) => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationsRequest {
    pub downtime: bool,
    pub tls_expiry: bool,
    pub domain_expiry: bool,
    #[serde(default)]
    pub email: Option<String>,
}

pub async fn handle_update_notifications(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<NotificationsRequest>,
) -> impl IntoResponse {
    let mut target = match state.store.get_target(id) {
        Ok(target) => target,
        Err(DbError::NotFound) => {
            return (StatusCode::NOT_FOUND, "Target not found").into_response()
        }
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    target.notifications = NotifyPrefs {
        // Absent email keeps the configured recipient
        email: req.email.unwrap_or(target.notifications.email),
        downtime: req.downtime,
        tls_expiry: req.tls_expiry,
        domain_expiry: req.domain_expiry,
    };

    match state.store.update_target(&target) {
        Ok(()) => Json(target).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Monitoring operations
// ============================================================================

pub async fn handle_check_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.scheduler.check_now(id).await {
        Ok(report) => Json(report).into_response(),
        Err(DbError::NotFound) => (StatusCode::NOT_FOUND, "Target not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ScanPortsRequest {
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
}

pub async fn handle_scan_ports(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<ScanPortsRequest>>,
) -> impl IntoResponse {
    let target = match state.store.get_target(id) {
        Ok(target) => target,
        Err(DbError::NotFound) => {
            return (StatusCode::NOT_FOUND, "Target not found").into_response()
        }
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    if target.kind() != TargetKind::Ip {
        return (
            StatusCode::BAD_REQUEST,
            "Port scanning is only valid for IP targets",
        )
            .into_response();
    }

    let ports = body
        .and_then(|Json(req)| req.ports)
        .unwrap_or_else(|| DEFAULT_PORTS.to_vec());

    let scan = match probe::scan_ports(&target.address, &ports).await {
        Ok(scan) => scan,
        Err(ProbeError::Config(msg)) => return (StatusCode::BAD_REQUEST, msg).into_response(),
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    // Fold the scan into the stored IP enrichment
    let mut info = match target.enrichment {
        Enrichment::Ip { info: Some(info) } => info,
        _ => IpInfo::bare(&target.address),
    };
    info.ports = Some(scan.ports.clone());
    info.last_check = scan.last_check;
    if let Err(e) = state
        .store
        .update_enrichment(id, &Enrichment::Ip { info: Some(info) })
    {
        tracing::error!(target_id = id, error = %e, "failed to persist port scan");
    }

    Json(scan).into_response()
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub target_id: i64,
    #[serde(default)]
    pub hours: Option<i64>,
}

pub async fn handle_get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    // Make sure the target exists so an empty history is distinguishable
    // from a bad id
    if let Err(DbError::NotFound) = state.store.get_target(query.target_id) {
        return (StatusCode::NOT_FOUND, "Target not found").into_response();
    }

    let hours = query.hours.unwrap_or(24).clamp(1, 24 * 365);
    let since = Utc::now() - ChronoDuration::hours(hours);

    match state.store.get_history_since(query.target_id, since) {
        Ok(records) => Json(records).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// Live updates
// ============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    // The websocket key doubles as the connection identifier; reconnects
    // that reuse it displace the previous observer
    let client_id = headers
        .get("sec-websocket-key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| format!("anon-{:016x}", rand::random::<u64>()));

    ws.on_upgrade(move |socket| observer_loop(state.live.clone(), client_id, socket))
}

async fn observer_loop(live: Arc<LiveChannel>, client_id: String, socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<String>(OBSERVER_BUFFER);
    live.register(client_id.clone(), tx.clone()).await;

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            update = rx.recv() => {
                match update {
                    Some(payload) => {
                        if sink.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    // Queue closed: a newer connection took this id
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Inbound frames carry nothing we act on
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    live.unregister(&client_id, &tx).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address_by_kind() {
        assert!(validate_address(TargetKind::Url, "https://example.com").is_ok());
        assert!(validate_address(TargetKind::Url, "not a url").is_err());
        assert!(validate_address(TargetKind::Url, "192.0.2.1").is_err());

        assert!(validate_address(TargetKind::Ip, "192.0.2.1").is_ok());
        assert!(validate_address(TargetKind::Ip, "2001:db8::1").is_ok());
        assert!(validate_address(TargetKind::Ip, "example.com").is_err());
    }

    #[test]
    fn test_validate_category() {
        assert!(validate_category("website").is_ok());
        assert!(validate_category("ip").is_ok());
        assert!(validate_category("mainframe").is_err());
    }

    #[test]
    fn test_default_category_follows_kind() {
        assert_eq!(default_category(TargetKind::Url), "website");
        assert_eq!(default_category(TargetKind::Ip), "ip");
    }
}
