//! Node addressing and per-peer bookkeeping.

use std::net::Ipv4Addr;

/// An IPv4 address and TCP port, used as the key into the node manager's
/// `known` and `connected` maps. Equality is bitwise on both fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeAddr {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        NodeAddr { ip, port }
    }

    /// `true` for 192.168.0.0/16 only — the reference servent's notion of
    /// "private", not the full RFC 1918 set. Preserved exactly: this is a
    /// wire-compatibility concern, since the rest of the live network
    /// makes the same distinction.
    pub fn is_private(&self) -> bool {
        let o = self.ip.octets();
        o[0] == 192 && o[1] == 168
    }
}

impl std::fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Bookkeeping for a known peer. Created on discovery, mutated on
/// handshake completion, deleted on quota eviction or candidate selection.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub proto_version: u32,
    pub cert: String,
    pub ddns: Option<String>,
    pub bbs_port: u16,
    pub speed: u32,
    pub clusters: [String; 3],
    pub is_bbs: bool,
}

impl Default for NodeInfo {
    fn default() -> Self {
        NodeInfo {
            proto_version: 0,
            cert: String::new(),
            ddns: None,
            bbs_port: 0,
            speed: 0,
            clusters: [String::new(), String::new(), String::new()],
            is_bbs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_192_168_is_private() {
        assert!(NodeAddr::new(Ipv4Addr::new(192, 168, 0, 2), 1).is_private());
        assert!(!NodeAddr::new(Ipv4Addr::new(10, 0, 0, 1), 1).is_private());
        assert!(!NodeAddr::new(Ipv4Addr::new(172, 16, 0, 1), 1).is_private());
        assert!(!NodeAddr::new(Ipv4Addr::new(127, 0, 0, 1), 1).is_private());
    }

    #[test]
    fn display_is_ip_colon_port() {
        let a = NodeAddr::new(Ipv4Addr::new(1, 2, 3, 4), 80);
        assert_eq!(a.to_string(), "1.2.3.4:80");
    }
}
