//! Error types for socksd
//!
//! This module defines the error taxonomy used throughout the server and the
//! mapping from errors to SOCKS5 reply codes.

use std::io;
use std::net::IpAddr;
use thiserror::Error;

/// Convenience alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for socksd operations.
///
/// Variants are grouped by the protocol phase they originate from so the
/// connection driver can decide whether a SOCKS5 reply is still owed to the
/// client before closing.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Unsupported SOCKS version in the initial handshake or request
    #[error("Unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    /// Client offered no method the server has registered
    #[error("No acceptable authentication method")]
    NoAcceptableMethod,

    /// Unsupported user/password sub-negotiation version
    #[error("Unsupported auth sub-negotiation version: {0}")]
    UnsupportedAuthVersion(u8),

    /// Credentials rejected by the credential store
    #[error("Authentication failed")]
    AuthFailed,

    /// Malformed authentication sub-negotiation
    #[error("Malformed auth sub-negotiation: {0}")]
    MalformedAuth(&'static str),

    /// Request carried a command byte the server does not implement
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),

    /// Request or datagram carried an unknown address type
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),

    /// Connection denied by the rule set
    #[error("Connection not allowed by ruleset")]
    NotAllowed,

    /// Connection from a source address outside the allowlist
    #[error("Connection from disallowed source address: {0}")]
    SourceNotAllowed(IpAddr),

    /// Name resolution failed for an FQDN destination
    #[error("Failed to resolve domain {0}: {1}")]
    Resolve(String, String),

    /// Malformed UDP datagram
    #[error("Malformed datagram: {0}")]
    Datagram(&'static str),

    /// Invalid domain name in a request or datagram
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),

    /// Server configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Reply codes for the SOCKS5 protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    /// Command succeeded
    Succeeded = 0x00,
    /// General SOCKS server failure
    GeneralFailure = 0x01,
    /// Connection not allowed by ruleset
    ConnectionNotAllowed = 0x02,
    /// Network unreachable
    NetworkUnreachable = 0x03,
    /// Host unreachable
    HostUnreachable = 0x04,
    /// Connection refused
    ConnectionRefused = 0x05,
    /// TTL expired
    TtlExpired = 0x06,
    /// Command not supported
    CommandNotSupported = 0x07,
    /// Address type not supported
    AddressTypeNotSupported = 0x08,
}

impl From<ReplyCode> for u8 {
    fn from(code: ReplyCode) -> Self {
        code as u8
    }
}

impl ReplyCode {
    /// Map a dial error to the reply code the client should see.
    ///
    /// Not every platform surfaces a dedicated [`io::ErrorKind`] for
    /// unreachable networks and hosts, so the raw error text is consulted as
    /// a fallback.
    pub fn from_dial_error(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
            io::ErrorKind::TimedOut => ReplyCode::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => ReplyCode::HostUnreachable,
            io::ErrorKind::PermissionDenied => ReplyCode::ConnectionNotAllowed,
            _ => {
                let msg = err.to_string().to_lowercase();
                if msg.contains("network is unreachable") {
                    ReplyCode::NetworkUnreachable
                } else if msg.contains("no route to host") || msg.contains("host is unreachable") {
                    ReplyCode::HostUnreachable
                } else if msg.contains("refused") {
                    ReplyCode::ConnectionRefused
                } else {
                    ReplyCode::GeneralFailure
                }
            }
        }
    }
}

impl Error {
    /// The reply code owed to the client for this error, if one is owed at
    /// all.
    ///
    /// Errors that occur before a reply can be correlated with a request
    /// (garbage framing, allowlist rejection) return `None`; the driver then
    /// closes the stream silently.
    pub fn reply_code(&self) -> Option<ReplyCode> {
        match self {
            Error::CommandNotSupported(_) => Some(ReplyCode::CommandNotSupported),
            Error::AddressTypeNotSupported(_) => Some(ReplyCode::AddressTypeNotSupported),
            Error::NotAllowed => Some(ReplyCode::ConnectionNotAllowed),
            Error::Resolve(_, _) => Some(ReplyCode::HostUnreachable),
            _ => None,
        }
    }
}
