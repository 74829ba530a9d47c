//! IP extraction utilities for rate limiting
//!
//! The client IP is the rate-limit identity. Proxy headers are only believed
//! when the direct peer is a proxy we were told to trust, otherwise any
//! client could pick its own bucket.

use log::{debug, warn};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use warp::http::HeaderMap;

use crate::config::ServerConfig;

/// Configuration for IP extraction behavior
#[derive(Debug, Clone, Default)]
pub struct IpExtractionConfig {
    /// Whether to trust proxy headers (X-Forwarded-For, X-Real-IP)
    pub trust_proxy_headers: bool,
    /// Peers whose proxy headers are believed
    pub trusted_proxies: Vec<IpAddr>,
}

impl IpExtractionConfig {
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self {
            trust_proxy_headers: config.trust_proxy_headers,
            trusted_proxies: config.trusted_proxies.clone(),
        }
    }
}

/// Extract the real client IP address from headers and connection info
pub fn extract_client_ip(
    headers: &HeaderMap,
    remote_addr: Option<SocketAddr>,
    config: &IpExtractionConfig,
) -> IpAddr {
    let direct_ip = remote_addr.map(|addr| addr.ip());

    let behind_trusted_proxy = config.trust_proxy_headers
        && direct_ip.map_or(false, |ip| config.trusted_proxies.contains(&ip));

    if behind_trusted_proxy {
        // X-Forwarded-For can contain multiple IPs: "client, proxy1, proxy2"
        // We want the leftmost (original client) IP
        if let Some(ip) = header_ip(headers, "x-forwarded-for", |value| {
            value.split(',').next().unwrap_or("").trim()
        }) {
            debug!("Extracted IP from X-Forwarded-For: {}", ip);
            return ip;
        }

        if let Some(ip) = header_ip(headers, "x-real-ip", str::trim) {
            debug!("Extracted IP from X-Real-IP: {}", ip);
            return ip;
        }

        warn!("Could not extract valid client IP from proxy headers, using proxy IP");
    }

    match direct_ip {
        Some(ip) => ip,
        None => {
            // Ultimate fallback, all unknown peers share one bucket
            warn!("No remote address available, using localhost fallback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

fn header_ip(headers: &HeaderMap, name: &str, pick: impl Fn(&str) -> &str) -> Option<IpAddr> {
    let raw = headers.get(name)?.to_str().ok()?;
    match pick(raw).parse::<IpAddr>() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!("Invalid IP format in {} header: {}", name, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warp::http::HeaderValue;

    #[test]
    fn test_ip_extraction_no_proxy() {
        let config = IpExtractionConfig::default();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.7"));
        let remote_addr = Some("203.0.113.1:12345".parse().unwrap());

        let result = extract_client_ip(&headers, remote_addr, &config);
        assert_eq!(result, "203.0.113.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_ip_extraction_with_trusted_proxy() {
        let config = IpExtractionConfig {
            trust_proxy_headers: true,
            trusted_proxies: vec!["203.0.113.100".parse().unwrap()],
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 10.0.0.2"),
        );
        let remote_addr = Some("203.0.113.100:12345".parse().unwrap());

        let result = extract_client_ip(&headers, remote_addr, &config);
        assert_eq!(result, "203.0.113.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_untrusted_peer_cannot_spoof() {
        let config = IpExtractionConfig {
            trust_proxy_headers: true,
            trusted_proxies: vec!["203.0.113.100".parse().unwrap()],
        };

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        let remote_addr = Some("192.0.2.50:4000".parse().unwrap());

        let result = extract_client_ip(&headers, remote_addr, &config);
        assert_eq!(result, "192.0.2.50".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_garbage_header_falls_back_to_peer() {
        let config = IpExtractionConfig {
            trust_proxy_headers: true,
            trusted_proxies: vec!["127.0.0.1".parse().unwrap()],
        };

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        let remote_addr = Some("127.0.0.1:9000".parse().unwrap());

        let result = extract_client_ip(&headers, remote_addr, &config);
        assert_eq!(result, "127.0.0.1".parse::<IpAddr>().unwrap());
    }
}
