//! TCP BIND handler
//!
//! Opens an ephemeral listener on behalf of the client, reports the bound
//! address, waits for exactly one inbound connection, reports its peer
//! address in a second reply, then relays.

use crate::command::send_reply;
use crate::error::{Error, ReplyCode, Result};
use crate::server::ServerOptions;
use crate::tcp_relay::relay_streams;
use crate::types::{Request, TargetAddr};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle the BIND command.
///
/// The inbound peer is not matched against the request destination unless a
/// `bind_accept` predicate is configured; without one, the first connection
/// to arrive is used.
pub(crate) async fn handle_bind<R, W>(
    client_rd: R,
    mut client_wr: W,
    _req: &Request,
    opts: &ServerOptions,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let listener = match TcpListener::bind("0.0.0.0:0").await {
        Ok(listener) => listener,
        Err(e) => {
            send_reply(&mut client_wr, ReplyCode::GeneralFailure, None).await?;
            return Err(Error::Io(e));
        }
    };
    let local_addr = listener.local_addr()?;
    info!("BIND listening on {}", local_addr);

    if let Some(observer) = &opts.bind_observer {
        observer(local_addr);
    }

    let bound = TargetAddr::from(SocketAddr::new(opts.bind_ip, local_addr.port()));
    send_reply(&mut client_wr, ReplyCode::Succeeded, Some(&bound)).await?;

    let (inbound, peer) = loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Some(accept) = &opts.bind_accept {
                        if !accept(peer) {
                            debug!("BIND rejecting inbound connection from {}", peer);
                            continue;
                        }
                    }
                    info!("BIND accepted connection from {}", peer);
                    break (stream, peer);
                }
                Err(e) => {
                    send_reply(&mut client_wr, ReplyCode::GeneralFailure, None).await?;
                    return Err(Error::Io(e));
                }
            },
            _ = cancel.cancelled() => {
                debug!("BIND cancelled while waiting for an inbound connection");
                return Ok(());
            }
        }
    };
    drop(listener);

    send_reply(
        &mut client_wr,
        ReplyCode::Succeeded,
        Some(&TargetAddr::from(peer)),
    )
    .await?;

    let (remote_rd, remote_wr) = inbound.into_split();
    relay_streams(client_rd, client_wr, remote_rd, remote_wr)
        .await
        .map_err(Error::Io)
}
