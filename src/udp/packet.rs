//! SOCKS5 UDP datagram codec
//!
//! Encapsulation format for UDP packets relayed through an association:
//!
//! ```text
//! +-----+------+------+----------+----------+----------+
//! | RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
//! +-----+------+------+----------+----------+----------+
//! |  2  |  1   |  1   | Variable |    2     | Variable |
//! +-----+------+------+----------+----------+----------+
//! ```

use crate::consts::*;
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};

/// A parsed SOCKS5 UDP datagram.
///
/// All fields are owned copies; the receive buffer the datagram was parsed
/// from can be reused immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Fragment identifier; only 0x00 (complete packet) is accepted.
    pub frag: u8,
    /// Address type of the destination field.
    pub atyp: u8,
    /// Raw destination address bytes. For FQDN this is the domain without
    /// its length prefix; the prefix is re-added on encode.
    pub dst_addr: Bytes,
    /// Destination port in network byte order.
    pub dst_port: [u8; 2],
    /// Packet payload.
    pub data: Bytes,
}

impl Datagram {
    /// Build a datagram for the client-bound direction.
    ///
    /// `dst_addr` carries the raw address bytes (FQDN without its length
    /// prefix), exactly as stored when the flow was created.
    pub fn new(atyp: u8, dst_addr: &[u8], dst_port: [u8; 2], data: &[u8]) -> Self {
        Datagram {
            frag: 0x00,
            atyp,
            dst_addr: Bytes::copy_from_slice(dst_addr),
            dst_port,
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Parse a datagram from a received buffer.
    ///
    /// Rejects fragments, unknown address types, zero-length FQDNs, a zero
    /// destination port, and empty payloads. The RSV bytes are ignored on
    /// receive.
    pub fn parse(bs: &[u8]) -> Result<Datagram> {
        if bs.len() < 4 {
            return Err(Error::Datagram("datagram too short"));
        }

        let frag = bs[2];
        if frag != 0x00 {
            return Err(Error::Datagram("fragmented datagrams not supported"));
        }

        let atyp = bs[3];
        let mut need = 4usize;
        let dst_addr = match atyp {
            SOCKS5_ADDR_TYPE_IPV4 => {
                need += 4;
                if bs.len() < need {
                    return Err(Error::Datagram("truncated IPv4 address"));
                }
                &bs[need - 4..need]
            }
            SOCKS5_ADDR_TYPE_IPV6 => {
                need += 16;
                if bs.len() < need {
                    return Err(Error::Datagram("truncated IPv6 address"));
                }
                &bs[need - 16..need]
            }
            SOCKS5_ADDR_TYPE_DOMAIN => {
                need += 1;
                if bs.len() < need {
                    return Err(Error::Datagram("truncated domain length"));
                }
                let domain_len = bs[need - 1] as usize;
                if domain_len == 0 {
                    return Err(Error::Datagram("zero-length domain"));
                }
                need += domain_len;
                if bs.len() < need {
                    return Err(Error::Datagram("truncated domain name"));
                }
                &bs[need - domain_len..need]
            }
            _ => return Err(Error::AddressTypeNotSupported(atyp)),
        };

        need += 2;
        if bs.len() < need {
            return Err(Error::Datagram("truncated destination port"));
        }
        let dst_port = [bs[need - 2], bs[need - 1]];
        if dst_port == [0, 0] {
            return Err(Error::Datagram("zero destination port"));
        }

        let data = &bs[need..];
        if data.is_empty() {
            return Err(Error::Datagram("datagram has no data"));
        }

        Ok(Datagram {
            frag,
            atyp,
            dst_addr: Bytes::copy_from_slice(dst_addr),
            dst_port,
            data: Bytes::copy_from_slice(data),
        })
    }

    /// The destination as a dialable `host:port` string.
    pub fn address(&self) -> String {
        let port = u16::from_be_bytes(self.dst_port);
        match self.atyp {
            SOCKS5_ADDR_TYPE_IPV6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.dst_addr);
                format!("[{}]:{}", Ipv6Addr::from(octets), port)
            }
            SOCKS5_ADDR_TYPE_DOMAIN => {
                format!("{}:{}", String::from_utf8_lossy(&self.dst_addr), port)
            }
            _ => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.dst_addr);
                format!("{}:{}", Ipv4Addr::from(octets), port)
            }
        }
    }

    /// Total size of the datagram on the wire.
    pub fn wire_len(&self) -> usize {
        let addr_len = if self.atyp == SOCKS5_ADDR_TYPE_DOMAIN {
            1 + self.dst_addr.len()
        } else {
            self.dst_addr.len()
        };
        2 + 1 + 1 + addr_len + 2 + self.data.len()
    }

    /// Serialize into `buf`, returning the number of bytes written, or
    /// `None` if the buffer is too small.
    pub fn encode_into(&self, buf: &mut [u8]) -> Option<usize> {
        let total = self.wire_len();
        if total > buf.len() {
            return None;
        }

        buf[0] = 0x00;
        buf[1] = 0x00;
        buf[2] = self.frag;
        buf[3] = self.atyp;
        let mut idx = 4;
        if self.atyp == SOCKS5_ADDR_TYPE_DOMAIN {
            buf[idx] = self.dst_addr.len() as u8;
            idx += 1;
        }
        buf[idx..idx + self.dst_addr.len()].copy_from_slice(&self.dst_addr);
        idx += self.dst_addr.len();
        buf[idx..idx + 2].copy_from_slice(&self.dst_port);
        idx += 2;
        buf[idx..idx + self.data.len()].copy_from_slice(&self.data);

        Some(total)
    }

    /// Serialize to a freshly allocated buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u16(0);
        buf.put_u8(self.frag);
        buf.put_u8(self.atyp);
        if self.atyp == SOCKS5_ADDR_TYPE_DOMAIN {
            buf.put_u8(self.dst_addr.len() as u8);
        }
        buf.extend_from_slice(&self.dst_addr);
        buf.extend_from_slice(&self.dst_port);
        buf.extend_from_slice(&self.data);
        buf.to_vec()
    }
}
