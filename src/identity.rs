//! Rate-limit identities derived from client addresses.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

/// Identity shared by every request without a usable address.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// The principal a quota is tracked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_IDENTITY.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_IDENTITY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The parts of an inbound request identity resolution looks at.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    /// Transport-level peer address.
    pub peer: Option<IpAddr>,
    /// Raw `X-Forwarded-For` header value.
    pub forwarded_for: Option<String>,
}

impl RequestMeta {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, peer: IpAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }
}

/// Turns request metadata into an [`Identity`].
///
/// Forwarding headers are only read when `trust_proxy_hops > 0`; otherwise a
/// client could pick its own identity. IPv6 clients are aggregated to
/// `ipv6_prefix_len` bits so rotating addresses inside one allocation share a
/// quota.
#[derive(Debug, Clone, Copy)]
pub struct IdentityResolver {
    trust_proxy_hops: usize,
    ipv6_prefix_len: u8,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(0, 64)
    }
}

impl IdentityResolver {
    pub fn new(trust_proxy_hops: usize, ipv6_prefix_len: u8) -> Self {
        Self {
            trust_proxy_hops,
            ipv6_prefix_len: ipv6_prefix_len.min(128),
        }
    }

    pub fn resolve(&self, meta: &RequestMeta) -> Identity {
        self.client_ip(meta)
            .map(|ip| self.identity_for(ip))
            .unwrap_or_else(Identity::unknown)
    }

    /// The client address, walking `trust_proxy_hops` entries back from the
    /// peer through `X-Forwarded-For`.
    pub fn client_ip(&self, meta: &RequestMeta) -> Option<IpAddr> {
        let peer = meta.peer?;
        if self.trust_proxy_hops == 0 {
            return Some(peer);
        }

        let hops: Vec<&str> = meta
            .forwarded_for
            .as_deref()
            .map(|value| value.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let back = self.trust_proxy_hops.min(hops.len());
        if back == 0 {
            return Some(peer);
        }

        parse_forwarded_ip(hops[hops.len() - back]).or(Some(peer))
    }

    pub fn identity_for(&self, ip: IpAddr) -> Identity {
        match ip {
            IpAddr::V4(v4) => Identity::new(v4.to_string()),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => Identity::new(v4.to_string()),
                None => Identity::new(self.mask_v6(v6)),
            },
        }
    }

    fn mask_v6(&self, addr: Ipv6Addr) -> String {
        let prefix = self.ipv6_prefix_len;
        if prefix >= 128 {
            return addr.to_string();
        }
        let mask = if prefix == 0 { 0 } else { !0u128 << (128 - prefix) };
        format!("{}/{}", Ipv6Addr::from(u128::from(addr) & mask), prefix)
    }
}

/// Parse one `X-Forwarded-For` entry, tolerating a port or brackets.
fn parse_forwarded_ip(entry: &str) -> Option<IpAddr> {
    entry
        .parse::<IpAddr>()
        .ok()
        .or_else(|| entry.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
        .or_else(|| {
            entry
                .strip_prefix('[')
                .and_then(|rest| rest.strip_suffix(']'))
                .and_then(|inner| inner.parse().ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_peer_address_used_without_trusted_proxy() {
        let resolver = IdentityResolver::default();
        let meta = RequestMeta::new("GET", "/")
            .with_peer(ip("203.0.113.7"))
            .with_forwarded_for("1.1.1.1");
        assert_eq!(resolver.resolve(&meta).as_str(), "203.0.113.7");
    }

    #[test]
    fn test_single_trusted_hop_uses_rightmost_forwarded_entry() {
        let resolver = IdentityResolver::new(1, 64);
        let meta = RequestMeta::new("GET", "/")
            .with_peer(ip("10.0.0.2"))
            .with_forwarded_for("6.6.6.6, 198.51.100.4");
        // The leftmost entry is client-controlled and ignored.
        assert_eq!(resolver.resolve(&meta).as_str(), "198.51.100.4");
    }

    #[test]
    fn test_two_trusted_hops() {
        let resolver = IdentityResolver::new(2, 64);
        let meta = RequestMeta::new("GET", "/")
            .with_peer(ip("10.0.0.2"))
            .with_forwarded_for("198.51.100.4, 10.0.0.1");
        assert_eq!(resolver.resolve(&meta).as_str(), "198.51.100.4");
    }

    #[test]
    fn test_hops_beyond_chain_clamp_to_leftmost() {
        let resolver = IdentityResolver::new(5, 64);
        let meta = RequestMeta::new("GET", "/")
            .with_peer(ip("10.0.0.2"))
            .with_forwarded_for("198.51.100.4");
        assert_eq!(resolver.resolve(&meta).as_str(), "198.51.100.4");
    }

    #[test]
    fn test_trusted_hop_without_header_uses_peer() {
        let resolver = IdentityResolver::new(1, 64);
        let meta = RequestMeta::new("GET", "/").with_peer(ip("10.0.0.2"));
        assert_eq!(resolver.resolve(&meta).as_str(), "10.0.0.2");
    }

    #[test]
    fn test_garbage_forwarded_entry_falls_back_to_peer() {
        let resolver = IdentityResolver::new(1, 64);
        let meta = RequestMeta::new("GET", "/")
            .with_peer(ip("10.0.0.2"))
            .with_forwarded_for("not-an-ip");
        assert_eq!(resolver.resolve(&meta).as_str(), "10.0.0.2");
    }

    #[test]
    fn test_forwarded_entry_with_port() {
        let resolver = IdentityResolver::new(1, 64);
        let meta = RequestMeta::new("GET", "/")
            .with_peer(ip("10.0.0.2"))
            .with_forwarded_for("198.51.100.4:5123");
        assert_eq!(resolver.resolve(&meta).as_str(), "198.51.100.4");

        let meta = RequestMeta::new("GET", "/")
            .with_peer(ip("10.0.0.2"))
            .with_forwarded_for("[2001:db8::1]");
        assert_eq!(resolver.resolve(&meta).as_str(), "2001:db8::/64");
    }

    #[test]
    fn test_ipv6_rotation_shares_identity() {
        let resolver = IdentityResolver::default();
        let a = resolver.identity_for(ip("2001:db8:85a3::8a2e:370:7334"));
        let b = resolver.identity_for(ip("2001:db8:85a3:0:ffff:ffff:ffff:1"));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "2001:db8:85a3::/64");

        let other = resolver.identity_for(ip("2001:db8:85a3:1::1"));
        assert_ne!(a, other);
    }

    #[test]
    fn test_ipv6_prefix_edges() {
        let full = IdentityResolver::new(0, 128);
        assert_eq!(full.identity_for(ip("2001:db8::1")).as_str(), "2001:db8::1");

        let none = IdentityResolver::new(0, 0);
        assert_eq!(none.identity_for(ip("2001:db8::1")).as_str(), "::/0");
    }

    #[test]
    fn test_ipv4_mapped_ipv6_is_unwrapped() {
        let resolver = IdentityResolver::default();
        assert_eq!(resolver.identity_for(ip("::ffff:192.0.2.1")).as_str(), "192.0.2.1");
    }

    #[test]
    fn test_missing_peer_is_unknown() {
        let resolver = IdentityResolver::new(1, 64);
        let meta = RequestMeta::new("GET", "/").with_forwarded_for("198.51.100.4");
        assert!(resolver.resolve(&meta).is_unknown());
    }
}
