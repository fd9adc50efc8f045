//! DNS record resolution and propagation checks.
//!
//! Every record type resolves independently and defaults to empty on
//! failure; a missing AAAA must not hide a perfectly good MX set.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};

/// Well-known public resolvers probed for propagation.
pub const PROPAGATION_SERVERS: [&str; 3] = [
    "8.8.8.8",        // Google
    "1.1.1.1",        // Cloudflare
    "208.67.222.222", // OpenDNS
];

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MxRecord {
    pub priority: u16,
    pub exchange: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoaRecord {
    pub mname: String,
    pub rname: String,
    pub serial: u32,
    pub refresh: i32,
    pub retry: i32,
    pub expire: i32,
    pub minimum: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationCheck {
    pub server: String,
    pub propagated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Resolved record sets for a hostname.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnsInfo {
    pub a: Vec<String>,
    pub aaaa: Vec<String>,
    pub mx: Vec<MxRecord>,
    pub txt: Vec<String>,
    pub ns: Vec<String>,
    pub cname: Vec<String>,
    pub soa: Option<SoaRecord>,
    pub propagation: Vec<PropagationCheck>,
    pub last_check: DateTime<Utc>,
}

/// Resolve the full record set for `host` and check propagation against
/// the public resolvers. Individual record failures resolve to empty.
pub async fn resolve_records(host: &str) -> DnsInfo {
    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), resolver_opts());

    let (a, aaaa, mx, txt, ns, cname, soa) = tokio::join!(
        lookup_a(&resolver, host),
        lookup_aaaa(&resolver, host),
        lookup_mx(&resolver, host),
        lookup_txt(&resolver, host),
        lookup_ns(&resolver, host),
        lookup_cname(&resolver, host),
        lookup_soa(&resolver, host),
    );

    let propagation = check_propagation(host).await;

    DnsInfo {
        a,
        aaaa,
        mx,
        txt,
        ns,
        cname,
        soa,
        propagation,
        last_check: Utc::now(),
    }
}

fn resolver_opts() -> ResolverOpts {
    let mut opts = ResolverOpts::default();
    opts.timeout = LOOKUP_TIMEOUT;
    opts.attempts = 1;
    opts
}

async fn lookup_a(resolver: &TokioAsyncResolver, host: &str) -> Vec<String> {
    match resolver.ipv4_lookup(host).await {
        Ok(lookup) => lookup.iter().map(|a| a.to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

async fn lookup_aaaa(resolver: &TokioAsyncResolver, host: &str) -> Vec<String> {
    match resolver.ipv6_lookup(host).await {
        Ok(lookup) => lookup.iter().map(|aaaa| aaaa.to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

async fn lookup_mx(resolver: &TokioAsyncResolver, host: &str) -> Vec<MxRecord> {
    match resolver.mx_lookup(host).await {
        Ok(lookup) => lookup
            .iter()
            .map(|mx| MxRecord {
                priority: mx.preference(),
                exchange: trim_root_dot(&mx.exchange().to_string()),
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

async fn lookup_txt(resolver: &TokioAsyncResolver, host: &str) -> Vec<String> {
    match resolver.txt_lookup(host).await {
        Ok(lookup) => lookup.iter().map(|txt| txt.to_string()).collect(),
        Err(_) => Vec::new(),
    }
}

async fn lookup_ns(resolver: &TokioAsyncResolver, host: &str) -> Vec<String> {
    match resolver.ns_lookup(host).await {
        Ok(lookup) => lookup
            .iter()
            .map(|ns| trim_root_dot(&ns.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

async fn lookup_cname(resolver: &TokioAsyncResolver, host: &str) -> Vec<String> {
    match resolver.lookup(host, RecordType::CNAME).await {
        Ok(lookup) => lookup
            .iter()
            .filter_map(|rdata| match rdata {
                RData::CNAME(cname) => Some(trim_root_dot(&cname.0.to_string())),
                _ => None,
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

async fn lookup_soa(resolver: &TokioAsyncResolver, host: &str) -> Option<SoaRecord> {
    match resolver.soa_lookup(host).await {
        Ok(lookup) => lookup.iter().next().map(|soa| SoaRecord {
            mname: trim_root_dot(&soa.mname().to_string()),
            rname: trim_root_dot(&soa.rname().to_string()),
            serial: soa.serial(),
            refresh: soa.refresh(),
            retry: soa.retry(),
            expire: soa.expire(),
            minimum: soa.minimum(),
        }),
        Err(_) => None,
    }
}

fn trim_root_dot(name: &str) -> String {
    name.trim_end_matches('.').to_string()
}

/// Ask each well-known public resolver whether it can answer for `host`.
async fn check_propagation(host: &str) -> Vec<PropagationCheck> {
    join_all(
        PROPAGATION_SERVERS
            .iter()
            .map(|server| check_one_resolver(host, server)),
    )
    .await
}

async fn check_one_resolver(host: &str, server: &str) -> PropagationCheck {
    let ip: IpAddr = match server.parse() {
        Ok(ip) => ip,
        Err(e) => {
            return PropagationCheck {
                server: server.to_string(),
                propagated: false,
                error: Some(e.to_string()),
            }
        }
    };

    let mut config = ResolverConfig::new();
    config.add_name_server(NameServerConfig::new(
        SocketAddr::new(ip, 53),
        Protocol::Udp,
    ));
    let resolver = TokioAsyncResolver::tokio(config, resolver_opts());

    match resolver.lookup_ip(host).await {
        Ok(_) => PropagationCheck {
            server: server.to_string(),
            propagated: true,
            error: None,
        },
        Err(e) => PropagationCheck {
            server: server.to_string(),
            propagated: false,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_propagation_servers_are_addresses() {
        for server in PROPAGATION_SERVERS {
            assert!(server.parse::<IpAddr>().is_ok(), "bad server {}", server);
        }
    }

    #[test]
    fn test_trim_root_dot() {
        assert_eq!(trim_root_dot("mx1.example.com."), "mx1.example.com");
        assert_eq!(trim_root_dot("mx1.example.com"), "mx1.example.com");
    }

    #[test]
    fn test_dns_info_serializes_round_trip() {
        let info = DnsInfo {
            a: vec!["93.184.215.14".to_string()],
            aaaa: vec![],
            mx: vec![MxRecord { priority: 10, exchange: "mail.example.com".to_string() }],
            txt: vec!["v=spf1 -all".to_string()],
            ns: vec!["a.iana-servers.net".to_string()],
            cname: vec![],
            soa: None,
            propagation: vec![PropagationCheck {
                server: "8.8.8.8".to_string(),
                propagated: true,
                error: None,
            }],
            last_check: Utc::now(),
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: DnsInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
