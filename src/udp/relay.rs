//! UDP ASSOCIATE handler
//!
//! Multiplexes an arbitrary number of client-to-remote UDP flows over a
//! single ephemeral server socket. Each distinct (client source, remote
//! destination) pair gets its own outbound connected socket and a
//! reverse-path task; the whole association lives exactly as long as the TCP
//! control connection.

use crate::command::send_reply;
use crate::consts::MAX_UDP_DATAGRAM;
use crate::error::{Error, ReplyCode, Result};
use crate::mem::BufferPool;
use crate::server::ServerOptions;
use crate::types::{Request, TargetAddr};
use crate::udp::Datagram;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One client-to-remote UDP flow inside an association.
///
/// The flow owns its outbound socket and reverse-path task. The original
/// destination bytes are copied out of the datagram they arrived in and
/// handed to the reverse task, which reproduces them in every reply
/// datagram.
struct UdpFlow {
    remote: Arc<UdpSocket>,
    /// Seconds since the association started, shared with the reverse task.
    last_activity: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl UdpFlow {
    fn touch(&self, anchor: Instant) {
        self.last_activity
            .store(anchor.elapsed().as_secs(), Ordering::Relaxed);
    }

    fn idle(&self, anchor: Instant) -> Duration {
        let last = self.last_activity.load(Ordering::Relaxed);
        Duration::from_secs(anchor.elapsed().as_secs().saturating_sub(last))
    }

    /// Stop the reverse task; dropping its socket handle closes the flow.
    fn close(&self) {
        self.task.abort();
    }
}

/// Handle the UDP ASSOCIATE command.
///
/// Binds an ephemeral UDP socket, reports it to the client, then relays
/// datagrams until the TCP control connection closes, the socket fails, or a
/// malformed datagram arrives.
pub(crate) async fn handle_associate<R, W>(
    control_rd: R,
    mut control_wr: W,
    _req: &Request,
    opts: &ServerOptions,
    cancel: &CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            send_reply(&mut control_wr, ReplyCode::GeneralFailure, None).await?;
            return Err(Error::Io(e));
        }
    };
    let local_addr = socket.local_addr()?;
    info!("UDP ASSOCIATE relay on port {}", local_addr.port());

    let pool = opts.mem.create(cancel);

    // The association lives as long as the control connection; anything the
    // client writes on it is discarded.
    let mut drain = tokio::spawn(drain_control(control_rd));

    let bound = TargetAddr::from(SocketAddr::new(opts.bind_ip, local_addr.port()));
    send_reply(&mut control_wr, ReplyCode::Succeeded, Some(&bound)).await?;

    let anchor = Instant::now();
    let mut flows: HashMap<String, UdpFlow> = HashMap::new();
    let mut recv_buf = pool.alloc(MAX_UDP_DATAGRAM);

    let result = loop {
        tokio::select! {
            _ = &mut drain => {
                debug!("control connection closed, tearing down association");
                break Ok(());
            }
            _ = cancel.cancelled() => {
                debug!("association cancelled");
                break Ok(());
            }
            received = socket.recv_from(&mut recv_buf) => {
                let (n, from) = match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        debug!("relay socket recv failed: {}", e);
                        break Err(Error::Io(e));
                    }
                };

                let datagram = match Datagram::parse(&recv_buf[..n]) {
                    Ok(datagram) => datagram,
                    Err(e) => {
                        warn!("malformed datagram from {}: {}", from, e);
                        break Err(e);
                    }
                };

                if let Err(e) = forward_datagram(
                    opts,
                    cancel,
                    &socket,
                    &pool,
                    anchor,
                    &mut flows,
                    from,
                    datagram,
                )
                .await
                {
                    debug!("dropping datagram from {}: {}", from, e);
                }

                if let Some(ttl) = opts.udp_flow_ttl {
                    evict_idle(&mut flows, anchor, ttl);
                }
            }
        }
    };

    drain.abort();
    for flow in flows.values() {
        flow.close();
    }
    pool.free(recv_buf);

    result
}

/// Discard everything the client writes on the control connection and
/// return on EOF or error.
async fn drain_control<R>(mut control_rd: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 512];
    loop {
        match control_rd.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }
}

/// Route one client datagram to its flow, creating the flow on first sight
/// of the (source, destination) pair.
#[allow(clippy::too_many_arguments)]
async fn forward_datagram(
    opts: &ServerOptions,
    cancel: &CancellationToken,
    socket: &Arc<UdpSocket>,
    pool: &Arc<dyn BufferPool>,
    anchor: Instant,
    flows: &mut HashMap<String, UdpFlow>,
    from: SocketAddr,
    datagram: Datagram,
) -> Result<()> {
    let dest = datagram.address();
    let key = format!("{}-{}", from, dest);

    if !flows.contains_key(&key) {
        let remote = match opts.dialer.connect_udp(cancel, &dest).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                return Err(Error::Io(e));
            }
        };
        debug!("new UDP flow {} via {}", key, remote.local_addr()?);

        let last_activity = Arc::new(AtomicU64::new(anchor.elapsed().as_secs()));
        let task = tokio::spawn(reverse_path(
            Arc::clone(socket),
            Arc::clone(&remote),
            from,
            datagram.atyp,
            datagram.dst_addr.clone(),
            datagram.dst_port,
            Arc::clone(pool),
            Arc::clone(&last_activity),
            anchor,
        ));

        flows.insert(
            key.clone(),
            UdpFlow {
                remote,
                last_activity,
                task,
            },
        );
    }

    // The entry is guaranteed present here; a lookup failure would mean the
    // insert above was skipped on a dial error, which already returned.
    if let Some(flow) = flows.get(&key) {
        match flow.remote.send(&datagram.data).await {
            Ok(_) => flow.touch(anchor),
            Err(e) => {
                warn!("UDP flow {} write failed: {}", key, e);
                if let Some(flow) = flows.remove(&key) {
                    flow.close();
                }
                return Err(Error::Io(e));
            }
        }
    }

    Ok(())
}

/// Remove and close flows that have been idle longer than the TTL.
fn evict_idle(flows: &mut HashMap<String, UdpFlow>, anchor: Instant, ttl: Duration) {
    flows.retain(|key, flow| {
        if flow.idle(anchor) > ttl {
            debug!("evicting idle UDP flow {}", key);
            flow.close();
            false
        } else {
            true
        }
    });
}

/// Per-flow reverse path: remote socket to client, re-wrapped with the
/// flow's original destination bytes.
#[allow(clippy::too_many_arguments)]
async fn reverse_path(
    server: Arc<UdpSocket>,
    remote: Arc<UdpSocket>,
    client: SocketAddr,
    atyp: u8,
    dst_addr: Bytes,
    dst_port: [u8; 2],
    pool: Arc<dyn BufferPool>,
    last_activity: Arc<AtomicU64>,
    anchor: Instant,
) {
    let mut recv_buf = pool.alloc(MAX_UDP_DATAGRAM);
    let mut send_buf = pool.alloc(MAX_UDP_DATAGRAM);

    loop {
        let n = match remote.recv(&mut recv_buf).await {
            Ok(n) => n,
            Err(e) => {
                debug!("UDP flow to {} closed: {}", client, e);
                break;
            }
        };

        let datagram = Datagram::new(atyp, &dst_addr, dst_port, &recv_buf[..n]);
        let len = match datagram.encode_into(&mut send_buf) {
            Some(len) => len,
            None => {
                warn!("reply datagram for {} exceeds the maximum size", client);
                break;
            }
        };

        if let Err(e) = server.send_to(&send_buf[..len], client).await {
            debug!("UDP reply to {} failed: {}", client, e);
            break;
        }

        last_activity.store(anchor.elapsed().as_secs(), Ordering::Relaxed);
    }

    pool.free(recv_buf);
    pool.free(send_buf);
}
