//! TCP CONNECT handler and the bidirectional relay
//!
//! The relay primitive is shared with the BIND handler: two copy tasks, one
//! per direction, joined through a bounded error channel of capacity 2. The
//! first error tears both directions down.

use crate::command::send_reply;
use crate::error::{Error, ReplyCode, Result};
use crate::server::ServerOptions;
use crate::types::{Request, TargetAddr};
use std::io;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Handle the CONNECT command.
///
/// Dials the effective destination through the configured dialer, reports
/// the dial outcome to the client, then relays until either side closes.
pub(crate) async fn handle_connect<R, W>(
    client_rd: R,
    mut client_wr: W,
    req: &Request,
    opts: &ServerOptions,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let dest = req.effective_dest();
    let target = match opts.dialer.connect_tcp(cancel, &dest.to_string()).await {
        Ok(stream) => stream,
        Err(e) => {
            let code = ReplyCode::from_dial_error(&e);
            debug!("connect to {} failed: {}", dest, e);
            send_reply(&mut client_wr, code, None).await?;
            return Err(Error::Io(e));
        }
    };

    let local_addr = target.local_addr()?;
    send_reply(
        &mut client_wr,
        ReplyCode::Succeeded,
        Some(&TargetAddr::from(local_addr)),
    )
    .await?;

    info!("CONNECT established to {}", dest);

    let (target_rd, target_wr) = target.into_split();
    relay_streams(client_rd, client_wr, target_rd, target_wr)
        .await
        .map_err(Error::Io)
}

/// Relay bytes in both directions between a client and a remote stream.
///
/// Each direction runs in its own task; both report into a channel of
/// capacity 2. A clean EOF on one direction lets the other keep draining; any
/// error aborts both tasks, which closes both underlying streams.
pub(crate) async fn relay_streams<CR, CW, RR, RW>(
    client_rd: CR,
    client_wr: CW,
    remote_rd: RR,
    remote_wr: RW,
) -> io::Result<()>
where
    CR: AsyncRead + Unpin + Send + 'static,
    CW: AsyncWrite + Unpin + Send + 'static,
    RR: AsyncRead + Unpin + Send + 'static,
    RW: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<io::Result<u64>>(2);
    let tx2 = tx.clone();

    let forward = tokio::spawn(async move {
        let _ = tx.send(pipe(client_rd, remote_wr).await).await;
    });
    let backward = tokio::spawn(async move {
        let _ = tx2.send(pipe(remote_rd, client_wr).await).await;
    });

    let mut first_err = None;
    for _ in 0..2 {
        match rx.recv().await {
            Some(Ok(n)) => debug!("relay direction finished: {} bytes", n),
            Some(Err(e)) => {
                debug!("relay direction failed: {}", e);
                first_err = Some(e);
                break;
            }
            None => break,
        }
    }

    forward.abort();
    backward.abort();

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Copy until EOF, then propagate the close to the write side.
async fn pipe<R, W>(mut reader: R, mut writer: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let n = tokio::io::copy(&mut reader, &mut writer).await?;
    writer.shutdown().await?;
    Ok(n)
}
