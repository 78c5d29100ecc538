//! Serializable peer addresses.
//!
//! A peer address names a node id and one or more direct socket addresses
//! it can be reached at, written multiaddr style:
//!
//! ```text
//! /ip4/127.0.0.1/udp/4433/p2p/<node-id>
//! /ip4/192.168.1.7/udp/4433/ip6/::1/udp/4434/p2p/<node-id>
//! ```
//!
//! An address is only useful while the peer that printed it keeps its
//! endpoint bound.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

use iroh::{NodeAddr, NodeId};

use crate::error::{ChatError, ChatResult};

/// Node id plus the direct addresses it listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    /// Public key of the peer.
    pub node_id: NodeId,
    /// Reachable UDP socket addresses, in preference order.
    pub direct_addresses: Vec<SocketAddr>,
}

impl PeerAddress {
    /// Creates a new peer address.
    pub fn new(node_id: NodeId, direct_addresses: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            node_id,
            direct_addresses: direct_addresses.into_iter().collect(),
        }
    }

    /// Converts to the iroh address type used for dialing.
    pub fn to_node_addr(&self) -> NodeAddr {
        NodeAddr::from_parts(self.node_id, None, self.direct_addresses.iter().copied())
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for addr in &self.direct_addresses {
            match addr.ip() {
                IpAddr::V4(ip) => write!(f, "/ip4/{}/udp/{}", ip, addr.port())?,
                IpAddr::V6(ip) => write!(f, "/ip6/{}/udp/{}", ip, addr.port())?,
            }
        }
        write!(f, "/p2p/{}", self.node_id)
    }
}

impl FromStr for PeerAddress {
    type Err = ChatError;

    fn from_str(input: &str) -> ChatResult<Self> {
        let rest = input
            .trim()
            .strip_prefix('/')
            .ok_or_else(|| ChatError::address(input, "address must start with '/'"))?;

        let mut parts = rest.split('/');
        let mut direct_addresses = Vec::new();
        let mut node_id: Option<NodeId> = None;

        while let Some(component) = parts.next() {
            if node_id.is_some() {
                return Err(ChatError::address(
                    input,
                    format!("unexpected component after /p2p: {:?}", component),
                ));
            }

            match component {
                "ip4" => {
                    let ip: Ipv4Addr = next_value(input, &mut parts, "ip4")?
                        .parse()
                        .map_err(|e| ChatError::address(input, format!("bad ip4 value: {}", e)))?;
                    let port = udp_port(input, &mut parts)?;
                    direct_addresses.push(SocketAddr::new(IpAddr::V4(ip), port));
                }
                "ip6" => {
                    let ip: Ipv6Addr = next_value(input, &mut parts, "ip6")?
                        .parse()
                        .map_err(|e| ChatError::address(input, format!("bad ip6 value: {}", e)))?;
                    let port = udp_port(input, &mut parts)?;
                    direct_addresses.push(SocketAddr::new(IpAddr::V6(ip), port));
                }
                "p2p" => {
                    let id = next_value(input, &mut parts, "p2p")?
                        .parse::<NodeId>()
                        .map_err(|e| ChatError::address(input, format!("bad node id: {}", e)))?;
                    node_id = Some(id);
                }
                "" => return Err(ChatError::address(input, "empty address component")),
                other => {
                    return Err(ChatError::address(
                        input,
                        format!("unsupported component {:?}", other),
                    ))
                }
            }
        }

        let node_id = node_id.ok_or_else(|| ChatError::address(input, "missing /p2p/<node-id>"))?;
        if direct_addresses.is_empty() {
            return Err(ChatError::address(input, "no /ip4 or /ip6 address given"));
        }

        Ok(Self {
            node_id,
            direct_addresses,
        })
    }
}

fn next_value<'a>(
    input: &str,
    parts: &mut impl Iterator<Item = &'a str>,
    component: &str,
) -> ChatResult<&'a str> {
    match parts.next() {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ChatError::address(
            input,
            format!("/{} needs a value", component),
        )),
    }
}

fn udp_port<'a>(input: &str, parts: &mut impl Iterator<Item = &'a str>) -> ChatResult<u16> {
    match parts.next() {
        Some("udp") => {}
        Some(other) => {
            return Err(ChatError::address(
                input,
                format!("expected /udp after ip, got {:?}", other),
            ))
        }
        None => return Err(ChatError::address(input, "missing /udp/<port>")),
    }

    let port = next_value(input, parts, "udp")?;
    port.parse()
        .map_err(|e| ChatError::address(input, format!("bad udp port {:?}: {}", port, e)))
}
