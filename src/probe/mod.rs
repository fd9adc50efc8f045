//! Probe primitives for target checks.
//!
//! Each primitive performs one kind of external check (liveness, TLS,
//! WHOIS, DNS, geolocation, port reachability) and returns a result or a
//! degraded/absent value on failure. None of them panic or leak errors
//! across the boundary; every network call carries an explicit timeout.

mod dns;
mod http;
mod ipinfo;
mod ping;
mod ports;
mod tls;
mod whois;

pub use dns::*;
pub use http::*;
pub use ipinfo::*;
pub use ping::*;
pub use ports::*;
pub use tls::*;
pub use whois::*;

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Latency recorded for a check that found the target down.
///
/// Keeps down periods visible in latency statistics and graphs without a
/// null; it equals the liveness timeout, not a measurement.
pub const DOWN_LATENCY_SENTINEL_MS: f64 = 5000.0;

/// Timeout applied to liveness checks.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Whole days until `expiry`, rounded up. Negative once expired.
pub(crate) fn days_until(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    ((expiry - now).num_seconds() as f64 / 86_400.0).ceil() as i64
}
