//! Core SOCKS5 type definitions
//!
//! Defines the command, address and request types shared by the parser, the
//! policy pipeline and the command handlers.

use crate::consts::*;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// SOCKS5 command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// TCP CONNECT - establish a TCP connection to the target
    Connect,
    /// TCP BIND - wait for an incoming connection on behalf of the client
    Bind,
    /// UDP ASSOCIATE - establish a UDP relay
    UdpAssociate,
}

impl SocksCommand {
    /// Parse a command byte into a [`SocksCommand`].
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_CMD_TCP_CONNECT => Some(SocksCommand::Connect),
            SOCKS5_CMD_TCP_BIND => Some(SocksCommand::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(SocksCommand::UdpAssociate),
            _ => None,
        }
    }

    /// Convert the command to its wire byte.
    pub fn to_byte(self) -> u8 {
        match self {
            SocksCommand::Connect => SOCKS5_CMD_TCP_CONNECT,
            SocksCommand::Bind => SOCKS5_CMD_TCP_BIND,
            SocksCommand::UdpAssociate => SOCKS5_CMD_UDP_ASSOCIATE,
        }
    }
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::Connect => write!(f, "CONNECT"),
            SocksCommand::Bind => write!(f, "BIND"),
            SocksCommand::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Destination address carried by a SOCKS5 request or reply.
///
/// Can be an IP address (v4 or v6) or a not-yet-resolved domain name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    /// IP address with port
    Ip(SocketAddr),
    /// Domain name with port
    Domain(String, u16),
}

impl TargetAddr {
    /// Create a new TargetAddr from an IPv4 address and port.
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(ip), port))
    }

    /// Create a new TargetAddr from an IPv6 address and port.
    pub fn ipv6(ip: Ipv6Addr, port: u16) -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V6(ip), port))
    }

    /// Create a new TargetAddr from a domain name and port.
    pub fn domain(domain: String, port: u16) -> Self {
        TargetAddr::Domain(domain, port)
    }

    /// Get the port number.
    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }

    /// Get the SOCKS5 address-type byte for this address.
    pub fn addr_type(&self) -> u8 {
        match self {
            TargetAddr::Ip(SocketAddr::V4(_)) => SOCKS5_ADDR_TYPE_IPV4,
            TargetAddr::Ip(SocketAddr::V6(_)) => SOCKS5_ADDR_TYPE_IPV6,
            TargetAddr::Domain(_, _) => SOCKS5_ADDR_TYPE_DOMAIN,
        }
    }

    /// Serialize the address to its wire form: ATYP, address bytes, port.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        match self {
            TargetAddr::Ip(SocketAddr::V4(addr)) => {
                bytes.push(SOCKS5_ADDR_TYPE_IPV4);
                bytes.extend_from_slice(&addr.ip().octets());
                bytes.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Ip(SocketAddr::V6(addr)) => {
                bytes.push(SOCKS5_ADDR_TYPE_IPV6);
                bytes.extend_from_slice(&addr.ip().octets());
                bytes.extend_from_slice(&addr.port().to_be_bytes());
            }
            TargetAddr::Domain(domain, port) => {
                bytes.push(SOCKS5_ADDR_TYPE_DOMAIN);
                bytes.push(domain.len() as u8);
                bytes.extend_from_slice(domain.as_bytes());
                bytes.extend_from_slice(&port.to_be_bytes());
            }
        }

        bytes
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl From<SocketAddr> for TargetAddr {
    fn from(addr: SocketAddr) -> Self {
        TargetAddr::Ip(addr)
    }
}

impl Default for TargetAddr {
    fn default() -> Self {
        TargetAddr::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 0))
    }
}

/// Authentication state produced by a successful method handshake.
///
/// The payload is an ordered list of key/value pairs whose keys depend on the
/// method; user/password authentication records `("Username", <user>)`.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// The method code used during negotiation.
    pub method: u8,
    /// Method-specific key/value payload, in insertion order.
    pub payload: Vec<(String, String)>,
}

impl AuthContext {
    /// Create a context for a method that carries no payload.
    pub fn new(method: u8) -> Self {
        AuthContext {
            method,
            payload: Vec::new(),
        }
    }

    /// Look up a payload value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.payload
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed SOCKS5 request, ready for the policy pipeline and dispatch.
#[derive(Debug, Clone)]
pub struct Request {
    /// The requested command.
    pub command: SocksCommand,
    /// The destination as sent by the client, possibly an unresolved FQDN.
    pub dest: TargetAddr,
    /// IP a FQDN destination was resolved to by the policy pipeline.
    pub resolved: Option<IpAddr>,
    /// TCP peer address of the control connection.
    pub remote_addr: Option<SocketAddr>,
    /// Authentication state from the method handshake.
    pub auth: AuthContext,
}

impl Request {
    /// The effective destination after rewriting and resolution.
    ///
    /// For FQDN destinations this substitutes the resolved IP; for IP
    /// destinations it is the destination itself.
    pub fn effective_dest(&self) -> TargetAddr {
        match (&self.dest, self.resolved) {
            (dest, Some(ip)) => TargetAddr::Ip(SocketAddr::new(ip, dest.port())),
            (dest, None) => dest.clone(),
        }
    }
}
