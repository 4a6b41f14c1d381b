//! SOCKS5 server and per-connection driver
//!
//! The [`Server`] owns the shared, read-mostly capabilities (authenticators,
//! policy hooks, dialer, buffer pool) and drives each accepted connection
//! through the protocol state machine: allowlist check, version check,
//! authentication, request parsing, policy, command dispatch.

use crate::auth::{
    build_registry, AuthRegistry, Authenticator, CredentialStore, NoAuthAuthenticator,
    UserPassAuthenticator,
};
use crate::command::{parse_request, send_reply};
use crate::config::ServerConfig;
use crate::consts::SOCKS5_VERSION;
use crate::dialer::{Dialer, SystemDialer};
use crate::error::{Error, Result};
use crate::mem::{HeapPool, PoolProvider};
use crate::policy::{self, AddressRewriter, DnsResolver, NameResolver, NoRewrite, PermitCommand, RuleSet};
use crate::types::SocksCommand;
use crate::{bind, tcp_relay, udp};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Predicate deciding whether a client IP may connect at all.
pub type IpAllowlist = Arc<dyn Fn(IpAddr) -> bool + Send + Sync>;
/// Hook invoked with a BIND listener's address before the first reply.
pub type BindObserver = Arc<dyn Fn(SocketAddr) + Send + Sync>;
/// Predicate deciding whether an inbound BIND connection is accepted.
pub type BindAccept = Arc<dyn Fn(SocketAddr) -> bool + Send + Sync>;

/// Shared server state, read-mostly after construction.
pub(crate) struct ServerOptions {
    pub(crate) authenticators: AuthRegistry,
    pub(crate) resolver: Arc<dyn NameResolver>,
    pub(crate) rules: Arc<dyn RuleSet>,
    pub(crate) rewriter: Arc<dyn AddressRewriter>,
    pub(crate) dialer: Arc<dyn Dialer>,
    pub(crate) mem: Arc<dyn PoolProvider>,
    pub(crate) bind_ip: IpAddr,
    pub(crate) ip_allowed: IpAllowlist,
    pub(crate) bind_observer: Option<BindObserver>,
    pub(crate) bind_accept: Option<BindAccept>,
    pub(crate) udp_flow_ttl: Option<Duration>,
}

/// Builder for [`Server`].
///
/// All capabilities default to the built-in implementations: system DNS,
/// permit-all rules, identity rewriter, system dialer, non-pooling
/// allocator, allow-all IP predicate.
pub struct ServerBuilder {
    authenticators: Vec<Arc<dyn Authenticator>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    resolver: Arc<dyn NameResolver>,
    rules: Arc<dyn RuleSet>,
    rewriter: Arc<dyn AddressRewriter>,
    dialer: Arc<dyn Dialer>,
    mem: Arc<dyn PoolProvider>,
    bind_ip: IpAddr,
    ip_allowed: IpAllowlist,
    bind_observer: Option<BindObserver>,
    bind_accept: Option<BindAccept>,
    udp_flow_ttl: Option<Duration>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        ServerBuilder {
            authenticators: Vec::new(),
            credentials: None,
            resolver: Arc::new(DnsResolver),
            rules: Arc::new(PermitCommand::permit_all()),
            rewriter: Arc::new(NoRewrite),
            dialer: Arc::new(SystemDialer),
            mem: Arc::new(HeapPool),
            bind_ip: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            ip_allowed: Arc::new(|_| true),
            bind_observer: None,
            bind_accept: None,
            udp_flow_ttl: None,
        }
    }
}

impl ServerBuilder {
    /// Create a builder with default capabilities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticator. Can be called multiple times; the client's
    /// offered order decides which one runs.
    pub fn auth_method(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }

    /// Set the credential store. If no authenticators are registered, this
    /// enables username/password authentication.
    pub fn credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set a custom name resolver.
    pub fn resolver(mut self, resolver: Arc<dyn NameResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set a custom rule set.
    pub fn rules(mut self, rules: Arc<dyn RuleSet>) -> Self {
        self.rules = rules;
        self
    }

    /// Set a custom address rewriter.
    pub fn rewriter(mut self, rewriter: Arc<dyn AddressRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    /// Set a custom outbound dialer.
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    /// Set the buffer pool provider for the UDP path.
    pub fn buffer_pool(mut self, mem: Arc<dyn PoolProvider>) -> Self {
        self.mem = mem;
        self
    }

    /// Set the IP advertised in BIND and UDP ASSOCIATE replies.
    pub fn bind_ip(mut self, bind_ip: IpAddr) -> Self {
        self.bind_ip = bind_ip;
        self
    }

    /// Install an arbitrary client-IP allowlist predicate.
    pub fn ip_allowlist(mut self, allowed: IpAllowlist) -> Self {
        self.ip_allowed = allowed;
        self
    }

    /// Restrict clients to a fixed list of IPs.
    pub fn allowed_ips(self, ips: Vec<IpAddr>) -> Self {
        self.ip_allowlist(Arc::new(move |ip| ips.contains(&ip)))
    }

    /// Install a hook observing every BIND listener address.
    pub fn bind_observer(mut self, observer: BindObserver) -> Self {
        self.bind_observer = Some(observer);
        self
    }

    /// Install a predicate gating inbound BIND connections by peer address.
    pub fn bind_accept(mut self, accept: BindAccept) -> Self {
        self.bind_accept = Some(accept);
        self
    }

    /// Evict UDP flows idle longer than this duration. Unset means flows
    /// live until the association ends.
    pub fn udp_flow_ttl(mut self, ttl: Duration) -> Self {
        self.udp_flow_ttl = Some(ttl);
        self
    }

    /// Build the server, applying the default authenticator rule: with no
    /// explicit methods, user/password when credentials are configured,
    /// otherwise no-auth.
    pub fn build(mut self) -> Server {
        if self.authenticators.is_empty() {
            match &self.credentials {
                Some(credentials) => {
                    self.authenticators
                        .push(Arc::new(UserPassAuthenticator::new(Arc::clone(credentials))));
                }
                None => {
                    self.authenticators.push(Arc::new(NoAuthAuthenticator));
                }
            }
        }

        Server {
            opts: Arc::new(ServerOptions {
                authenticators: build_registry(&self.authenticators),
                resolver: self.resolver,
                rules: self.rules,
                rewriter: self.rewriter,
                dialer: self.dialer,
                mem: self.mem,
                bind_ip: self.bind_ip,
                ip_allowed: self.ip_allowed,
                bind_observer: self.bind_observer,
                bind_accept: self.bind_accept,
                udp_flow_ttl: self.udp_flow_ttl,
            }),
            cancel: CancellationToken::new(),
        }
    }
}

/// A SOCKS5 proxy server.
///
/// Cloning is cheap; clones share the capabilities and the shutdown token.
#[derive(Clone)]
pub struct Server {
    opts: Arc<ServerOptions>,
    cancel: CancellationToken,
}

impl Server {
    /// Start building a server.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Build a server from a file configuration.
    pub fn from_config(config: &ServerConfig) -> Result<Server> {
        config.validate().map_err(Error::Config)?;

        let mut builder = Server::builder().bind_ip(config.bind_ip);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Arc::new(
                crate::auth::StaticCredentials::single(username, password),
            ));
        }
        if let Some(ips) = &config.allowed_ips {
            builder = builder.allowed_ips(ips.clone());
        }
        if let Some(secs) = config.udp_flow_ttl {
            builder = builder.udp_flow_ttl(Duration::from_secs(secs));
        }

        Ok(builder.build())
    }

    /// Bind a TCP listener on `addr` and serve until shutdown.
    pub async fn listen_and_serve(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections from the listener, spawning one task per
    /// connection. Returns when the listener fails or the server is shut
    /// down.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.serve_conn(stream, peer).await {
                            debug!("connection from {} ended with error: {}", peer, e);
                        }
                    });
                }
                _ = self.cancel.cancelled() => {
                    info!("server shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Signal shutdown: the accept loop stops and in-flight collaborator
    /// calls observe the cancellation.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Drive a single connection through the SOCKS5 state machine.
    ///
    /// Errors after a reply could be correlated with the request have
    /// already produced that reply; earlier errors close the stream without
    /// writing anything.
    pub async fn serve_conn<S>(&self, stream: S, peer: SocketAddr) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let opts = &self.opts;

        if !(opts.ip_allowed)(peer.ip()) {
            warn!("connection from disallowed IP address {}", peer.ip());
            return Err(Error::SourceNotAllowed(peer.ip()));
        }
        debug!("connection accepted from {}", peer);

        let cancel = self.cancel.child_token();
        let (rd, mut wr) = tokio::io::split(stream);
        let mut rd = BufReader::new(rd);

        let version = rd.read_u8().await?;
        if version != SOCKS5_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let auth = crate::auth::negotiate(&mut rd, &mut wr, &opts.authenticators).await?;

        let mut request = match parse_request(&mut rd).await {
            Ok(request) => request,
            Err(e) => {
                if let Some(code) = e.reply_code() {
                    send_reply(&mut wr, code, None).await?;
                }
                return Err(e);
            }
        };
        request.auth = auth;
        request.remote_addr = Some(peer);

        info!("{} request from {} to {}", request.command, peer, request.dest);

        if let Err(e) = policy::apply(
            &cancel,
            opts.rewriter.as_ref(),
            opts.resolver.as_ref(),
            opts.rules.as_ref(),
            &mut request,
        )
        .await
        {
            if let Some(code) = e.reply_code() {
                send_reply(&mut wr, code, None).await?;
            }
            return Err(e);
        }

        match request.command {
            SocksCommand::Connect => {
                tcp_relay::handle_connect(rd, wr, &request, opts, &cancel).await
            }
            SocksCommand::Bind => bind::handle_bind(rd, wr, &request, opts, &cancel).await,
            SocksCommand::UdpAssociate => {
                udp::handle_associate(rd, wr, &request, opts, &cancel).await
            }
        }
    }
}
