//! TLS certificate inspection.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use x509_parser::prelude::FromDer;
use x509_parser::certificate::X509Certificate;

use super::days_until;

/// Connect + handshake budget.
const TLS_TIMEOUT: Duration = Duration::from_secs(10);

const HTTPS_PORT: u16 = 443;

/// Certificate details for a hostname.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsInfo {
    pub issuer: String,
    pub valid_to: DateTime<Utc>,
    pub days_remaining: i64,
}

/// Inspect the certificate served for `host`.
///
/// Returns None when the connection, handshake or certificate parsing
/// fails; an unavailable certificate is not a liveness signal.
pub async fn inspect_certificate(host: &str) -> Option<TlsInfo> {
    match tokio::time::timeout(TLS_TIMEOUT, fetch_leaf_certificate(host)).await {
        Ok(Ok(info)) => Some(info),
        Ok(Err(e)) => {
            tracing::debug!(host, error = %e, "certificate inspection failed");
            None
        }
        Err(_) => {
            tracing::debug!(host, "certificate inspection timed out");
            None
        }
    }
}

async fn fetch_leaf_certificate(
    host: &str,
) -> Result<TlsInfo, Box<dyn std::error::Error + Send + Sync>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from(host.to_string())?;
    let tcp = TcpStream::connect((host, HTTPS_PORT)).await?;
    let tls = connector.connect(server_name, tcp).await?;

    let (_, session) = tls.get_ref();
    let certs = session.peer_certificates().ok_or("no peer certificate")?;
    let leaf = certs.first().ok_or("empty certificate chain")?;

    parse_leaf(leaf.as_ref())
}

fn parse_leaf(der: &[u8]) -> Result<TlsInfo, Box<dyn std::error::Error + Send + Sync>> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| format!("certificate parse: {}", e))?;

    let issuer = cert.issuer().to_string();
    let not_after = cert.validity().not_after.timestamp();
    let valid_to = Utc
        .timestamp_opt(not_after, 0)
        .single()
        .ok_or("certificate expiry out of range")?;

    Ok(TlsInfo {
        issuer,
        days_remaining: days_until(valid_to, Utc::now()),
        valid_to,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_info_serializes_round_trip() {
        let info = TlsInfo {
            issuer: "CN=R11, O=Let's Encrypt, C=US".to_string(),
            valid_to: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            days_remaining: 120,
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: TlsInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_none() {
        assert!(inspect_certificate("definitely-not-a-real-host.invalid").await.is_none());
    }
}
