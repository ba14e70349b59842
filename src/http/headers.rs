//! Header names set by the fronting reverse proxy (Cloudflare).

use axum::http::HeaderName;

pub const CF_RAY: HeaderName = HeaderName::from_static("cf-ray");
pub const CF_CONNECTING_IP: HeaderName = HeaderName::from_static("cf-connecting-ip");
pub const CF_CONNECTING_IPV6: HeaderName = HeaderName::from_static("cf-connecting-ipv6");
pub const CF_EW_VIA: HeaderName = HeaderName::from_static("cf-ew-via");
pub const CF_PSEUDO_IPV4: HeaderName = HeaderName::from_static("cf-pseudo-ipv4");
/// Enterprise plans only.
pub const TRUE_CLIENT_IP: HeaderName = HeaderName::from_static("true-client-ip");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const CF_IP_COUNTRY: HeaderName = HeaderName::from_static("cf-ipcountry");
pub const CF_VISITOR: HeaderName = HeaderName::from_static("cf-visitor");
pub const CDN_LOOP: HeaderName = HeaderName::from_static("cdn-loop");
pub const CF_WORKER: HeaderName = HeaderName::from_static("cf-worker");
pub const CONNECTION: HeaderName = HeaderName::from_static("connection");
pub const ACCEPT_ENCODING: HeaderName = HeaderName::from_static("accept-encoding");

/// Every proxy header the harness recognizes.
pub const RECOGNIZED: [HeaderName; 14] = [
    CF_RAY,
    CF_CONNECTING_IP,
    CF_CONNECTING_IPV6,
    CF_EW_VIA,
    CF_PSEUDO_IPV4,
    TRUE_CLIENT_IP,
    X_FORWARDED_FOR,
    X_FORWARDED_PROTO,
    CF_IP_COUNTRY,
    CF_VISITOR,
    CDN_LOOP,
    CF_WORKER,
    CONNECTION,
    ACCEPT_ENCODING,
];

/// Headers consulted, in order, for the client IP when the peer is trusted.
/// `X-Forwarded-For` is handled separately since it carries a chain.
pub(crate) const CLIENT_IP_SOURCES: [HeaderName; 3] =
    [CF_CONNECTING_IP, CF_CONNECTING_IPV6, TRUE_CLIENT_IP];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_recognized_names_are_distinct() {
        let recognized = RECOGNIZED;
        let names: HashSet<&str> = recognized.iter().map(HeaderName::as_str).collect();
        assert_eq!(names.len(), recognized.len());
        for source in &CLIENT_IP_SOURCES {
            assert!(names.contains(source.as_str()));
        }
    }
}
