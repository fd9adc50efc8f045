//! HTTP liveness probe.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::db::TargetStatus;

use super::{DOWN_LATENCY_SENTINEL_MS, LIVENESS_TIMEOUT};

/// Total attempts before a target is considered down.
const MAX_ATTEMPTS: u32 = 3;

/// Pause between attempts.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Browser-like user agent; some sites reject obvious bots.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Outcome of one HTTP liveness check.
#[derive(Debug, Clone, Serialize)]
pub struct HttpProbeResult {
    pub status: TargetStatus,
    pub latency_ms: f64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

/// Check whether a URL answers over HTTP.
///
/// Issues a GET with a 5 second timeout, following redirects. Any HTTP
/// response counts as up; its status code is recorded for the caller to
/// judge. Retries up to three attempts with a one second pause, then
/// reports down with the sentinel latency.
pub async fn check_url(address: &str) -> HttpProbeResult {
    let client = match reqwest::Client::builder()
        .timeout(LIVENESS_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
    {
        Ok(client) => client,
        Err(e) => return down_result(e.to_string()),
    };

    let mut last_error = String::new();
    for attempt in 1..=MAX_ATTEMPTS {
        let start = Instant::now();
        match client.get(address).send().await {
            Ok(response) => {
                return HttpProbeResult {
                    status: TargetStatus::Up,
                    latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                    status_code: Some(response.status().as_u16()),
                    error: None,
                };
            }
            Err(e) => {
                last_error = if e.is_timeout() {
                    format!("request timed out after {:?}", LIVENESS_TIMEOUT)
                } else {
                    e.to_string()
                };
                tracing::debug!(address, attempt, error = %last_error, "fetch attempt failed");
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
            }
        }
    }

    down_result(last_error)
}

fn down_result(error: String) -> HttpProbeResult {
    HttpProbeResult {
        status: TargetStatus::Down,
        latency_ms: DOWN_LATENCY_SENTINEL_MS,
        status_code: None,
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_down_after_exhausting_attempts() {
        // Nothing listens on port 1; every attempt fails fast with a
        // connection error, leaving the inter-attempt pauses dominant.
        let start = Instant::now();
        let result = check_url("http://127.0.0.1:1").await;

        assert_eq!(result.status, TargetStatus::Down);
        assert_eq!(result.latency_ms, DOWN_LATENCY_SENTINEL_MS);
        assert!(result.status_code.is_none());
        assert!(result.error.is_some());
        // Three attempts separated by two one-second pauses
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_invalid_url_reports_down() {
        let result = check_url("http://definitely-not-a-real-host.invalid").await;
        assert_eq!(result.status, TargetStatus::Down);
        assert!(result.error.is_some());
    }
}
