//! Client IP resolution behind a single trusted reverse proxy.
//!
//! # Responsibilities
//! - Parse the trusted proxy network (CIDR notation)
//! - Resolve the client IP from proxy headers when the peer is trusted
//!
//! # Design Decisions
//! - Exactly one trusted network; anything else is treated as the client
//! - Untrusted peers can never spoof their address through headers
//! - Proxy-specific headers win over `X-Forwarded-For`

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use axum::http::HeaderMap;

use crate::http::headers::{CLIENT_IP_SOURCES, X_FORWARDED_FOR};

/// Error returned when a network string is not valid CIDR notation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid network `{input}`: {reason}")]
pub struct NetworkParseError {
    input: String,
    reason: &'static str,
}

/// An IP network in CIDR notation (`10.0.0.0/8`, `::1/128`).
///
/// A bare address is accepted and treated as a single-host network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// True if `ip` belongs to this network. Address families never mix.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn mask_u32(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p)),
    }
}

fn mask_u128(prefix: u8) -> u128 {
    match prefix {
        0 => 0,
        p => u128::MAX << (128 - u32::from(p)),
    }
}

impl FromStr for IpNetwork {
    type Err = NetworkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| NetworkParseError {
            input: s.to_string(),
            reason,
        };

        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let addr: IpAddr = addr.trim().parse().map_err(|_| err("bad address"))?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.trim().parse::<u8>().map_err(|_| err("bad prefix length"))?,
            None => max,
        };
        if prefix > max {
            return Err(err("prefix length out of range"));
        }
        Ok(Self { addr, prefix })
    }
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// The reverse proxy whose forwarding headers are believed.
#[derive(Debug, Clone)]
pub struct TrustedProxy {
    network: IpNetwork,
}

impl TrustedProxy {
    pub fn new(network: IpNetwork) -> Self {
        Self { network }
    }

    pub fn network(&self) -> IpNetwork {
        self.network
    }

    /// Resolve the client IP for a request received from `peer`.
    ///
    /// Returns an empty string when the peer address is unknown.
    pub fn client_ip(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        let Some(peer) = peer else {
            return String::new();
        };
        if !self.network.contains(peer.ip()) {
            return peer.ip().to_string();
        }

        for name in &CLIENT_IP_SOURCES {
            if let Some(ip) = header_ip(headers, name.as_str()) {
                return ip.to_string();
            }
        }

        self.forwarded_for(headers)
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| peer.ip().to_string())
    }

    /// Walk `X-Forwarded-For` right to left, skipping hops inside the trusted
    /// network. Falls back to the left-most entry if every hop is trusted.
    fn forwarded_for(&self, headers: &HeaderMap) -> Option<IpAddr> {
        let chain: Vec<IpAddr> = headers
            .get_all(&X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|hop| hop.trim().parse().ok())
            .collect();

        chain
            .iter()
            .rev()
            .find(|ip| !self.network.contains(**ip))
            .or_else(|| chain.first())
            .copied()
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn proxy(net: &str) -> TrustedProxy {
        TrustedProxy::new(net.parse().unwrap())
    }

    #[test]
    fn test_network_parse_and_contains() {
        let net: IpNetwork = "10.1.0.0/16".parse().unwrap();
        assert!(net.contains("10.1.200.3".parse().unwrap()));
        assert!(!net.contains("10.2.0.1".parse().unwrap()));
        assert!(!net.contains("::1".parse().unwrap()));

        let host: IpNetwork = "127.0.0.1".parse().unwrap();
        assert_eq!(host.prefix(), 32);
        assert_eq!(host.to_string(), "127.0.0.1/32");

        let v6: IpNetwork = "2400:cb00::/32".parse().unwrap();
        assert!(v6.contains("2400:cb00:1::5".parse().unwrap()));

        let any: IpNetwork = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_network_parse_errors() {
        assert!("10.0.0.0/33".parse::<IpNetwork>().is_err());
        assert!("nope/8".parse::<IpNetwork>().is_err());
        assert!("10.0.0.0/x".parse::<IpNetwork>().is_err());
    }

    #[test]
    fn test_untrusted_peer_ignores_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("1.2.3.4"));
        let peer: SocketAddr = "203.0.113.9:5555".parse().unwrap();

        assert_eq!(proxy("127.0.0.0/8").client_ip(&headers, Some(peer)), "203.0.113.9");
    }

    #[test]
    fn test_trusted_peer_uses_connecting_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("1.2.3.4"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("9.9.9.9"));
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();

        assert_eq!(proxy("127.0.0.0/8").client_ip(&headers, Some(peer)), "1.2.3.4");
    }

    #[test]
    fn test_trusted_peer_walks_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("5.6.7.8, 198.51.100.7, 127.0.0.2"),
        );
        let peer: SocketAddr = "127.0.0.1:5555".parse().unwrap();

        assert_eq!(
            proxy("127.0.0.0/8").client_ip(&headers, Some(peer)),
            "198.51.100.7"
        );
    }

    #[test]
    fn test_unknown_peer() {
        assert_eq!(proxy("127.0.0.0/8").client_ip(&HeaderMap::new(), None), "");
    }
}
