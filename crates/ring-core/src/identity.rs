//! NodeId: the network address that identifies a ring member.
//!
//! A node is known by the `host:port` it listens on. The same value doubles as
//! the election key: ids are totally ordered by [`NodeKey`], which is derived
//! from the host and port so that two distinct addresses never compare equal.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeIdError {
    #[error("Invalid node address {0:?}: expected host:port")]
    MissingPort(String),
    #[error("Invalid node address {0:?}: empty host")]
    EmptyHost(String),
    #[error("Invalid port in {input:?}: {source}")]
    InvalidPort {
        input: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Identity of a ring member.
///
/// Serializes as `{"ipAddress": "10.0.0.1", "port": 3000}`. The string form
/// `"10.0.0.1:3000"` is produced by `Display` and accepted everywhere an id is
/// deserialized.
#[derive(Debug, Clone)]
pub struct NodeId {
    ip_address: String,
    port: u16,
    key: NodeKey,
}

/// Orderable election key derived from a node's address.
///
/// IP hosts compare numerically (IPv4 mapped into the IPv6 space so both
/// families share one order); named hosts sort after every IP host,
/// lexicographically. Ties on the host are broken by port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    host: HostKey,
    port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum HostKey {
    Ip(u128),
    Name(String),
}

impl HostKey {
    fn from_host(host: &str) -> Self {
        match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => HostKey::Ip(u128::from(v4.to_ipv6_mapped())),
            Ok(IpAddr::V6(v6)) => HostKey::Ip(u128::from(v6)),
            Err(_) => HostKey::Name(host.to_ascii_lowercase()),
        }
    }
}

impl NodeId {
    pub fn new(ip_address: impl Into<String>, port: u16) -> Self {
        let ip_address = ip_address.into();
        let key = NodeKey {
            host: HostKey::from_host(&ip_address),
            port,
        };
        Self {
            ip_address,
            port,
            key,
        }
    }

    pub fn ip_address(&self) -> &str {
        &self.ip_address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The election key for this node.
    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    /// WebSocket URL of this node's ring endpoint.
    pub fn ring_url(&self) -> String {
        format!("ws://{}/ring", self.authority())
    }

    /// HTTP base URL of this node's control surface.
    pub fn http_url(&self) -> String {
        format!("http://{}", self.authority())
    }

    /// `host:port`, bracketing IPv6 literals so the result is URL-safe.
    fn authority(&self) -> String {
        if self.ip_address.contains(':') {
            format!("[{}]:{}", self.ip_address, self.port)
        } else {
            format!("{}:{}", self.ip_address, self.port)
        }
    }
}

impl PartialEq for NodeId {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for NodeId {}

impl Hash for NodeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_address, self.port)
    }
}

impl FromStr for NodeId {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Split on the last ':' so bare IPv6 literals keep their colons.
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| NodeIdError::MissingPort(s.to_string()))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(NodeIdError::EmptyHost(s.to_string()));
        }
        let port = port.parse::<u16>().map_err(|source| NodeIdError::InvalidPort {
            input: s.to_string(),
            source,
        })?;
        Ok(Self::new(host, port))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeIdObject {
    ip_address: String,
    port: u16,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NodeIdRepr {
    Text(String),
    Object(NodeIdObject),
}

impl Serialize for NodeId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        NodeIdObject {
            ip_address: self.ip_address.clone(),
            port: self.port,
        }
        .serialize(s)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        match NodeIdRepr::deserialize(d)? {
            NodeIdRepr::Text(text) => text.parse().map_err(serde::de::Error::custom),
            NodeIdRepr::Object(obj) => Ok(NodeId::new(obj.ip_address, obj.port)),
        }
    }
}

/// Serde adapter writing a [`NodeId`] in its `"ip:port"` string form.
///
/// Use with `#[serde(with = "crate::identity::as_string")]`. Deserialization
/// accepts both forms.
pub mod as_string {
    use super::NodeId;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &NodeId, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(id)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NodeId, D::Error> {
        NodeId::deserialize(d)
    }
}

/// Like [`as_string`], for optional ids.
pub mod as_opt_string {
    use super::NodeId;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &Option<NodeId>, s: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => s.collect_str(id),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NodeId>, D::Error> {
        Option::<NodeId>::deserialize(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let id = NodeId::new("127.0.0.1", 3001);
        assert_eq!(id.to_string(), "127.0.0.1:3001");

        let parsed: NodeId = "127.0.0.1:3001".parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.ip_address(), "127.0.0.1");
        assert_eq!(parsed.port(), 3001);
    }

    #[test]
    fn test_parse_ipv6() {
        let bare: NodeId = "::1:4000".parse().unwrap();
        assert_eq!(bare.ip_address(), "::1");
        assert_eq!(bare.port(), 4000);

        let bracketed: NodeId = "[::1]:4000".parse().unwrap();
        assert_eq!(bracketed, bare);
        assert_eq!(bracketed.ring_url(), "ws://[::1]:4000/ring");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "127.0.0.1".parse::<NodeId>(),
            Err(NodeIdError::MissingPort(_))
        ));
        assert!(matches!(
            ":3000".parse::<NodeId>(),
            Err(NodeIdError::EmptyHost(_))
        ));
        assert!(matches!(
            "127.0.0.1:70000".parse::<NodeId>(),
            Err(NodeIdError::InvalidPort { .. })
        ));
        assert!(matches!(
            "127.0.0.1:abc".parse::<NodeId>(),
            Err(NodeIdError::InvalidPort { .. })
        ));
    }

    #[test]
    fn test_key_orders_by_address_then_port() {
        let low = NodeId::new("10.0.0.1", 9000);
        let high_port = NodeId::new("10.0.0.1", 9001);
        let high_ip = NodeId::new("10.0.0.2", 1);

        assert!(low < high_port);
        assert!(high_port < high_ip);
        assert!(low.key() < high_ip.key());
    }

    #[test]
    fn test_key_is_numeric_not_lexicographic() {
        // "10.0.0.9" > "10.0.0.10" as strings, but not as addresses.
        let nine = NodeId::new("10.0.0.9", 3000);
        let ten = NodeId::new("10.0.0.10", 3000);
        assert!(nine < ten);
    }

    #[test]
    fn test_key_has_no_concatenation_collisions() {
        // Gluing the integer address and the port together as digits would
        // map both of these to "123".
        let a = NodeId::new("0.0.0.1", 23);
        let b = NodeId::new("0.0.0.12", 3);
        assert_ne!(a, b);
        assert_ne!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_named_hosts_sort_after_ips() {
        let ip = NodeId::new("255.255.255.255", 65535);
        let named = NodeId::new("alpha", 1);
        assert!(ip < named);
        assert_eq!(NodeId::new("Alpha", 1), named);
    }

    #[test]
    fn test_serialize_object_form() {
        let id = NodeId::new("127.0.0.1", 3000);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#"{"ipAddress":"127.0.0.1","port":3000}"#);
    }

    #[test]
    fn test_deserialize_both_forms() {
        let from_obj: NodeId =
            serde_json::from_str(r#"{"ipAddress":"127.0.0.1","port":3000}"#).unwrap();
        let from_str: NodeId = serde_json::from_str(r#""127.0.0.1:3000""#).unwrap();
        assert_eq!(from_obj, from_str);
    }

    #[test]
    fn test_deserialize_rejects_garbage() {
        assert!(serde_json::from_str::<NodeId>("42").is_err());
        assert!(serde_json::from_str::<NodeId>(r#""no-port""#).is_err());
        assert!(serde_json::from_str::<NodeId>(r#"{"ipAddress":"x"}"#).is_err());
    }

    #[test]
    fn test_as_string_adapter() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            #[serde(with = "as_string")]
            id: NodeId,
        }

        let json = serde_json::to_string(&Wrapper {
            id: NodeId::new("10.1.2.3", 80),
        })
        .unwrap();
        assert_eq!(json, r#"{"id":"10.1.2.3:80"}"#);

        let back: Wrapper = serde_json::from_str(r#"{"id":{"ipAddress":"10.1.2.3","port":80}}"#).unwrap();
        assert_eq!(back.id, NodeId::new("10.1.2.3", 80));
    }
}
