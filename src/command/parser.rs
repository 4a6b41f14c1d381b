//! SOCKS5 request parser
//!
//! Reads the fixed request header and the variable-length destination
//! address from the client stream.

use crate::consts::*;
use crate::error::{Error, Result};
use crate::types::{AuthContext, Request, SocksCommand, TargetAddr};
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Parse a SOCKS5 request from the stream.
///
/// # Request Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// An unknown ATYP yields [`Error::AddressTypeNotSupported`], which the
/// driver reports with reply code 0x08. An unknown CMD byte still consumes
/// the address bytes and then yields [`Error::CommandNotSupported`], so the
/// stream is positioned consistently when the 0x07 reply is sent.
pub async fn parse_request<S>(stream: &mut S) -> Result<Request>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    let version = header[0];
    let cmd_byte = header[1];
    let addr_type = header[3];

    if version != SOCKS5_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let dest = parse_address(stream, addr_type).await?;

    let command =
        SocksCommand::from_byte(cmd_byte).ok_or(Error::CommandNotSupported(cmd_byte))?;

    debug!("parsed request: {} {}", command, dest);

    Ok(Request {
        command,
        dest,
        resolved: None,
        remote_addr: None,
        auth: AuthContext::default(),
    })
}

/// Parse the address portion of a request by ATYP.
async fn parse_address<S>(stream: &mut S, addr_type: u8) -> Result<TargetAddr>
where
    S: AsyncRead + Unpin,
{
    match addr_type {
        SOCKS5_ADDR_TYPE_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            let port = stream.read_u16().await?;
            Ok(TargetAddr::ipv4(Ipv4Addr::from(addr), port))
        }

        SOCKS5_ADDR_TYPE_DOMAIN => {
            let domain_len = stream.read_u8().await? as usize;
            if domain_len == 0 {
                return Err(Error::InvalidDomain("zero-length domain".to_string()));
            }

            let mut domain_buf = vec![0u8; domain_len];
            stream.read_exact(&mut domain_buf).await?;
            let domain = String::from_utf8(domain_buf)
                .map_err(|e| Error::InvalidDomain(e.to_string()))?;

            let port = stream.read_u16().await?;
            Ok(TargetAddr::domain(domain, port))
        }

        SOCKS5_ADDR_TYPE_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            let port = stream.read_u16().await?;
            Ok(TargetAddr::ipv6(Ipv6Addr::from(addr), port))
        }

        _ => Err(Error::AddressTypeNotSupported(addr_type)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn request_bytes(cmd: u8, atyp: u8, addr: &[u8], port: u16) -> Vec<u8> {
        let mut request = vec![SOCKS5_VERSION, cmd, SOCKS5_RESERVED, atyp];
        request.extend_from_slice(addr);
        request.extend_from_slice(&port.to_be_bytes());
        request
    }

    #[tokio::test]
    async fn test_parse_connect_ipv4() {
        let bytes = request_bytes(SOCKS5_CMD_TCP_CONNECT, SOCKS5_ADDR_TYPE_IPV4, &[127, 0, 0, 1], 80);
        let mut cursor = Cursor::new(bytes);

        let req = parse_request(&mut cursor).await.unwrap();
        assert_eq!(req.command, SocksCommand::Connect);
        assert_eq!(req.dest, TargetAddr::ipv4(Ipv4Addr::new(127, 0, 0, 1), 80));
    }

    #[tokio::test]
    async fn test_parse_connect_domain() {
        let mut addr = vec![11u8];
        addr.extend_from_slice(b"example.com");
        let bytes = request_bytes(SOCKS5_CMD_TCP_CONNECT, SOCKS5_ADDR_TYPE_DOMAIN, &addr, 443);
        let mut cursor = Cursor::new(bytes);

        let req = parse_request(&mut cursor).await.unwrap();
        assert_eq!(req.command, SocksCommand::Connect);
        assert_eq!(
            req.dest,
            TargetAddr::domain("example.com".to_string(), 443)
        );
    }

    #[tokio::test]
    async fn test_parse_bind_ipv6() {
        let ip = [0u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let bytes = request_bytes(SOCKS5_CMD_TCP_BIND, SOCKS5_ADDR_TYPE_IPV6, &ip, 8080);
        let mut cursor = Cursor::new(bytes);

        let req = parse_request(&mut cursor).await.unwrap();
        assert_eq!(req.command, SocksCommand::Bind);
        assert_eq!(req.dest, TargetAddr::ipv6(Ipv6Addr::from(ip), 8080));
    }

    #[tokio::test]
    async fn test_parse_associate() {
        let bytes = request_bytes(SOCKS5_CMD_UDP_ASSOCIATE, SOCKS5_ADDR_TYPE_IPV4, &[0, 0, 0, 0], 0);
        let mut cursor = Cursor::new(bytes);

        let req = parse_request(&mut cursor).await.unwrap();
        assert_eq!(req.command, SocksCommand::UdpAssociate);
    }

    #[tokio::test]
    async fn test_parse_invalid_version() {
        let mut bytes = request_bytes(SOCKS5_CMD_TCP_CONNECT, SOCKS5_ADDR_TYPE_IPV4, &[127, 0, 0, 1], 80);
        bytes[0] = 4;
        let mut cursor = Cursor::new(bytes);

        let result = parse_request(&mut cursor).await;
        assert!(matches!(result, Err(Error::UnsupportedVersion(4))));
    }

    #[tokio::test]
    async fn test_parse_unsupported_address_type() {
        let bytes = vec![SOCKS5_VERSION, SOCKS5_CMD_TCP_CONNECT, SOCKS5_RESERVED, 0x05];
        let mut cursor = Cursor::new(bytes);

        let result = parse_request(&mut cursor).await;
        assert!(matches!(result, Err(Error::AddressTypeNotSupported(5))));
    }

    #[tokio::test]
    async fn test_parse_unknown_command_consumes_address() {
        let bytes = request_bytes(0x09, SOCKS5_ADDR_TYPE_IPV4, &[10, 0, 0, 1], 80);
        let len = bytes.len() as u64;
        let mut cursor = Cursor::new(bytes);

        let result = parse_request(&mut cursor).await;
        assert!(matches!(result, Err(Error::CommandNotSupported(9))));
        // The whole request frame was consumed despite the bad command.
        assert_eq!(cursor.position(), len);
    }

    #[tokio::test]
    async fn test_parse_zero_length_domain() {
        let bytes = request_bytes(SOCKS5_CMD_TCP_CONNECT, SOCKS5_ADDR_TYPE_DOMAIN, &[0], 80);
        let mut cursor = Cursor::new(bytes);

        let result = parse_request(&mut cursor).await;
        assert!(matches!(result, Err(Error::InvalidDomain(_))));
    }

    #[tokio::test]
    async fn test_parse_truncated_request() {
        let bytes = vec![SOCKS5_VERSION, SOCKS5_CMD_TCP_CONNECT, SOCKS5_RESERVED];
        let mut cursor = Cursor::new(bytes);

        let result = parse_request(&mut cursor).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
