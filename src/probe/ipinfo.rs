//! IP geolocation and reverse-DNS enrichment.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};

use super::ports::PortCheck;

const GEO_TIMEOUT: Duration = Duration::from_secs(10);
const GEO_ENDPOINT: &str = "http://ip-api.com/json";

/// Geolocation and naming details for an IP address.
///
/// Always carries the raw IP; `error` is set when the geolocation call
/// itself failed and the lookup fields are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpInfo {
    pub ip: String,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub region_name: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub timezone: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    pub asn: Option<String>,
    pub reverse_dns: Option<String>,
    /// Populated by on-demand port scans, not by the periodic sweep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<BTreeMap<u16, PortCheck>>,
    pub error: Option<String>,
    pub last_check: DateTime<Utc>,
}

impl IpInfo {
    /// An info record carrying only the raw IP.
    pub fn bare(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            country: None,
            country_code: None,
            region: None,
            region_name: None,
            city: None,
            zip: None,
            lat: None,
            lon: None,
            timezone: None,
            isp: None,
            org: None,
            asn: None,
            reverse_dns: None,
            ports: None,
            error: None,
            last_check: Utc::now(),
        }
    }
}

/// Response shape of the ip-api.com JSON endpoint.
#[derive(Debug, Deserialize)]
struct GeoResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default, rename = "countryCode")]
    country_code: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default, rename = "regionName")]
    region_name: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    zip: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default, rename = "as")]
    asn: Option<String>,
}

/// Enrich an IP address with geolocation and a best-effort reverse lookup.
pub async fn enrich_ip(ip: &str) -> IpInfo {
    let (geo, reverse_dns) = tokio::join!(fetch_geolocation(ip), reverse_lookup(ip));

    let mut info = IpInfo::bare(ip);
    info.reverse_dns = reverse_dns;

    match geo {
        Ok(geo) => {
            info.country = geo.country;
            info.country_code = geo.country_code;
            info.region = geo.region;
            info.region_name = geo.region_name;
            info.city = geo.city;
            info.zip = geo.zip;
            info.lat = geo.lat;
            info.lon = geo.lon;
            info.timezone = geo.timezone;
            info.isp = geo.isp;
            info.org = geo.org;
            info.asn = geo.asn;
        }
        Err(error) => {
            tracing::debug!(ip, error = %error, "geolocation lookup failed");
            info.error = Some(error);
        }
    }

    info
}

async fn fetch_geolocation(ip: &str) -> Result<GeoResponse, String> {
    let client = reqwest::Client::builder()
        .timeout(GEO_TIMEOUT)
        .build()
        .map_err(|e| e.to_string())?;

    let geo: GeoResponse = client
        .get(format!("{}/{}", GEO_ENDPOINT, ip))
        .send()
        .await
        .map_err(|e| e.to_string())?
        .json()
        .await
        .map_err(|e| e.to_string())?;

    if geo.status == "fail" {
        return Err(geo
            .message
            .unwrap_or_else(|| "geolocation lookup failed".to_string()));
    }

    Ok(geo)
}

async fn reverse_lookup(ip: &str) -> Option<String> {
    let addr: IpAddr = ip.parse().ok()?;
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    let response = resolver.reverse_lookup(addr).await.ok()?;
    response
        .iter()
        .next()
        .map(|ptr| ptr.0.to_string().trim_end_matches('.').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_response_deserializes() {
        let json = r#"{
            "status": "success",
            "country": "United States",
            "countryCode": "US",
            "region": "VA",
            "regionName": "Virginia",
            "city": "Ashburn",
            "zip": "20149",
            "lat": 39.03,
            "lon": -77.5,
            "timezone": "America/New_York",
            "isp": "Google LLC",
            "org": "Google Public DNS",
            "as": "AS15169 Google LLC",
            "query": "8.8.8.8"
        }"#;
        let geo: GeoResponse = serde_json::from_str(json).unwrap();
        assert_eq!(geo.status, "success");
        assert_eq!(geo.country_code.as_deref(), Some("US"));
        assert_eq!(geo.asn.as_deref(), Some("AS15169 Google LLC"));
    }

    #[test]
    fn test_geo_failure_payload() {
        let json = r#"{"status":"fail","message":"private range","query":"10.0.0.1"}"#;
        let geo: GeoResponse = serde_json::from_str(json).unwrap();
        assert_eq!(geo.status, "fail");
        assert_eq!(geo.message.as_deref(), Some("private range"));
    }

    #[test]
    fn test_bare_info_keeps_ip() {
        let info = IpInfo::bare("203.0.113.9");
        assert_eq!(info.ip, "203.0.113.9");
        assert!(info.country.is_none());
        assert!(info.error.is_none());
    }
}
