use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

pub const FNV_OFFSET_BASIS: u64 = 14695981039346656037;
pub const FNV_PRIME: u64 = 1099511628211;

pub const REAL_IP_HEADER: &str = "x-real-ip";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// 64-bit FNV-1a over the ASCII-lowercased bytes of `key`.
///
/// Keys are compared case-insensitively everywhere in this crate, so two
/// keys that compare equal must also hash equal.
pub(crate) fn fnv1a_folded(key: &str) -> u64 {
    key.bytes().fold(FNV_OFFSET_BASIS, |h, b| {
        (h ^ u64::from(b.to_ascii_lowercase())).wrapping_mul(FNV_PRIME)
    })
}

/// [RequestMetadata] is the raw view of a request an adapter hands to
/// [client_ip]: header values and the connection's remote address.
pub trait RequestMetadata {
    /// The value of header `name` (case-insensitive), if present and valid text.
    fn header(&self, name: &str) -> Option<&str>;

    /// The network-layer peer address, usually `ip:port`.
    fn remote_addr(&self) -> Option<String>;
}

/// A plain [RequestMetadata] for adapters that are not built on `actix-web`.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    headers: HashMap<String, String>,
    remote_addr: Option<String>,
}

impl RawRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

impl RequestMetadata for RawRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }
}

/// Find the client's IP.
///
/// Proxy-set headers win over the connection address: first `X-Real-IP`,
/// then the first entry of `X-Forwarded-For` that is an IP literal, then the
/// remote address with its port stripped. Headers are client-controlled
/// unless a trusted proxy overwrites them.
pub fn client_ip<R: RequestMetadata + ?Sized>(req: &R) -> Option<IpAddr> {
    if let Some(ip) = req.header(REAL_IP_HEADER).and_then(parse_ip) {
        return Some(ip);
    }

    if let Some(ip) = req
        .header(FORWARDED_FOR_HEADER)
        .and_then(|ips| ips.split(',').find_map(parse_ip))
    {
        return Some(ip);
    }

    req.remote_addr().as_deref().and_then(strip_port)
}

fn parse_ip(s: &str) -> Option<IpAddr> {
    s.trim().parse().ok()
}

fn strip_port(addr: &str) -> Option<IpAddr> {
    let addr = addr.trim();
    addr.parse::<SocketAddr>()
        .map(|sock| sock.ip())
        .ok()
        .or_else(|| parse_ip(addr))
}
