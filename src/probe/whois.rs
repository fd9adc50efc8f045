//! Domain registration lookup over the WHOIS port-43 protocol.
//!
//! Queries the IANA root to find the responsible registry, follows one
//! referral, and extracts registration fields from the key/value response.
//! Registry output is wildly inconsistent, so each logical field is probed
//! through an ordered candidate-key list and the first present value wins.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::{days_until, ProbeError};

/// Whole-conversation budget for one lookup (root + referral).
const WHOIS_TIMEOUT: Duration = Duration::from_secs(20);

const WHOIS_PORT: u16 = 43;
const IANA_WHOIS: &str = "whois.iana.org";

/// Placeholder for registry fields the response did not carry.
pub const FIELD_UNAVAILABLE: &str = "unavailable";

/// Registration details for a domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub registrar: String,
    pub owner: String,
    pub email: String,
    pub creation_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub updated_date: Option<DateTime<Utc>>,
    pub nameservers: Vec<String>,
    pub days_remaining: Option<i64>,
}

/// Ordered candidate keys per logical field, matched case-insensitively.
///
/// Registry formats differ per TLD; these lists are best-effort
/// configuration, not a guarantee of coverage. Deployments can supply
/// their own via [`lookup_domain_with`].
#[derive(Debug, Clone)]
pub struct FieldCandidates {
    pub registrar: Vec<&'static str>,
    pub owner: Vec<&'static str>,
    pub email: Vec<&'static str>,
    pub creation_date: Vec<&'static str>,
    pub expiry_date: Vec<&'static str>,
    pub updated_date: Vec<&'static str>,
    pub nameservers: Vec<&'static str>,
}

impl Default for FieldCandidates {
    fn default() -> Self {
        Self {
            registrar: vec![
                "registrar",
                "registrar name",
                "sponsoring registrar",
                "registrant organization",
            ],
            owner: vec![
                "registrant name",
                "registrant",
                "owner",
                "person",
                "organization",
            ],
            email: vec![
                "registrant email",
                "e-mail",
                "email",
                "admin email",
            ],
            creation_date: vec![
                "creation date",
                "created",
                "created on",
                "domain registration date",
                "registered on",
            ],
            expiry_date: vec![
                "registry expiry date",
                "expiration date",
                "registrar registration expiration date",
                "expiry date",
                "expires on",
                "expires",
                "paid-till",
            ],
            updated_date: vec![
                "updated date",
                "last updated",
                "last modified",
                "changed",
            ],
            nameservers: vec!["name server", "nserver", "nameservers"],
        }
    }
}

/// Look up registration details with the default candidate lists.
pub async fn lookup_domain(domain: &str) -> Option<DomainInfo> {
    lookup_domain_with(domain, &FieldCandidates::default()).await
}

/// Look up registration details for `domain`.
///
/// Returns None when the WHOIS conversation itself fails; a response that
/// merely lacks fields still produces a result with sentinel values.
pub async fn lookup_domain_with(
    domain: &str,
    candidates: &FieldCandidates,
) -> Option<DomainInfo> {
    match tokio::time::timeout(WHOIS_TIMEOUT, fetch_whois(domain)).await {
        Ok(Ok(response)) => Some(parse_whois_response(&response, candidates)),
        Ok(Err(e)) => {
            tracing::debug!(domain, error = %e, "whois lookup failed");
            None
        }
        Err(_) => {
            tracing::debug!(domain, "whois lookup timed out");
            None
        }
    }
}

async fn fetch_whois(domain: &str) -> Result<String, ProbeError> {
    let root = query_server(IANA_WHOIS, domain)
        .await
        .map_err(|e| ProbeError::Network(e.to_string()))?;

    if let Some(referral) = find_referral(&root) {
        if referral != IANA_WHOIS {
            match query_server(&referral, domain).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::debug!(domain, server = %referral, error = %e,
                        "referral query failed, keeping root response");
                }
            }
        }
    }

    Ok(root)
}

async fn query_server(server: &str, domain: &str) -> Result<String, std::io::Error> {
    let mut stream = TcpStream::connect((server, WHOIS_PORT)).await?;
    stream.write_all(domain.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    Ok(String::from_utf8_lossy(&response).into_owned())
}

/// Extract the registry server from an IANA root response.
fn find_referral(response: &str) -> Option<String> {
    response.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim().to_ascii_lowercase();
        if key == "refer" || key == "whois" {
            let value = value.trim();
            (!value.is_empty()).then(|| value.to_string())
        } else {
            None
        }
    })
}

/// Parse a raw response into a lowercase-keyed multimap. Comment lines and
/// the legal-disclaimer tail markers are skipped.
fn parse_fields(response: &str) -> HashMap<String, Vec<String>> {
    let mut fields: HashMap<String, Vec<String>> = HashMap::new();

    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('%') || line.starts_with('#') || line.starts_with(">>>") {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            fields
                .entry(key.trim().to_ascii_lowercase())
                .or_default()
                .push(value.to_string());
        }
    }

    fields
}

fn parse_whois_response(response: &str, candidates: &FieldCandidates) -> DomainInfo {
    let fields = parse_fields(response);

    let first = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|key| fields.get(*key).and_then(|values| values.first()).cloned())
    };
    let first_or_unavailable =
        |keys: &[&str]| first(keys).unwrap_or_else(|| FIELD_UNAVAILABLE.to_string());

    let expiry_date = first(&candidates.expiry_date).and_then(|v| parse_registry_date(&v));

    let nameservers = candidates
        .nameservers
        .iter()
        .find_map(|key| fields.get(*key))
        .map(|values| {
            values
                .iter()
                // registro.br appends the IPv4 glue after the name
                .filter_map(|v| v.split_whitespace().next())
                .map(|v| v.to_ascii_lowercase())
                .collect()
        })
        .unwrap_or_default();

    DomainInfo {
        registrar: first_or_unavailable(&candidates.registrar),
        owner: first_or_unavailable(&candidates.owner),
        email: first_or_unavailable(&candidates.email),
        creation_date: first(&candidates.creation_date).and_then(|v| parse_registry_date(&v)),
        expiry_date,
        updated_date: first(&candidates.updated_date).and_then(|v| parse_registry_date(&v)),
        nameservers,
        days_remaining: expiry_date.map(|expiry| days_until(expiry, Utc::now())),
    }
}

/// Parse a registry date value.
///
/// Compact `YYYYMMDD` values (registro.br and similar ccTLD registries)
/// get a dedicated branch and normalize to UTC midnight. Everything else
/// runs through RFC 3339 and the layouts registries actually emit.
pub(crate) fn parse_registry_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    static RE_COMPACT: OnceLock<Regex> = OnceLock::new();
    let re_compact = RE_COMPACT.get_or_init(|| Regex::new(r"^(\d{4})(\d{2})(\d{2})\b").unwrap());
    if let Some(caps) = re_compact.captures(raw) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return Some(NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?.and_utc());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc());
        }
    }

    for fmt in ["%Y-%m-%d", "%d-%b-%Y", "%Y.%m.%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }

    None
}
