//! SOCKS5 reply encoding

use crate::consts::*;
use crate::error::{ReplyCode, Result};
use crate::types::TargetAddr;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Build and send a SOCKS5 reply.
///
/// # Reply Format
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' |  1   | Variable |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
///
/// When no bound address applies (error replies), the reply carries
/// ATYP=IPv4 with a zero address and zero port.
pub async fn send_reply<W>(
    writer: &mut W,
    code: ReplyCode,
    bind_addr: Option<&TargetAddr>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut reply = vec![SOCKS5_VERSION, code.into(), SOCKS5_RESERVED];

    match bind_addr {
        Some(addr) => reply.extend_from_slice(&addr.to_bytes()),
        None => {
            reply.push(SOCKS5_ADDR_TYPE_IPV4);
            reply.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
        }
    }

    writer.write_all(&reply).await?;
    writer.flush().await?;

    Ok(())
}
