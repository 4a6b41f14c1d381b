//! Request policy pipeline
//!
//! Every parsed request passes through three pluggable stages before it is
//! dispatched: the address rewriter, the name resolver (for FQDN
//! destinations), and the rule set. Each stage receives the connection's
//! cancellation token so long-running collaborators can abort with the
//! connection.

use crate::error::{Error, Result};
use crate::types::{Request, SocksCommand, TargetAddr};
use async_trait::async_trait;
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Custom name resolution for FQDN destinations.
#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolve `name` to an IP address.
    async fn resolve(&self, cancel: &CancellationToken, name: &str) -> anyhow::Result<IpAddr>;
}

/// System DNS resolver backed by `tokio::net::lookup_host`.
#[derive(Debug, Default)]
pub struct DnsResolver;

#[async_trait]
impl NameResolver for DnsResolver {
    async fn resolve(&self, cancel: &CancellationToken, name: &str) -> anyhow::Result<IpAddr> {
        let lookup = async {
            // lookup_host needs a port; it is discarded with the socket addr.
            let mut addrs = tokio::net::lookup_host((name, 0)).await?;
            addrs
                .next()
                .map(|addr| addr.ip())
                .ok_or_else(|| anyhow::anyhow!("no addresses found for {}", name))
        };
        tokio::select! {
            res = lookup => res,
            _ = cancel.cancelled() => anyhow::bail!("resolution cancelled"),
        }
    }
}

/// Rule set deciding whether a request may proceed.
#[async_trait]
pub trait RuleSet: Send + Sync {
    /// Return `true` if the request is allowed.
    async fn allow(&self, cancel: &CancellationToken, req: &Request) -> bool;
}

/// Per-command allow/deny rule set.
#[derive(Debug, Clone, Copy)]
pub struct PermitCommand {
    /// Whether the CONNECT command is allowed.
    pub enable_connect: bool,
    /// Whether the BIND command is allowed.
    pub enable_bind: bool,
    /// Whether the UDP ASSOCIATE command is allowed.
    pub enable_associate: bool,
}

impl PermitCommand {
    /// A rule set which allows all commands.
    pub fn permit_all() -> Self {
        PermitCommand {
            enable_connect: true,
            enable_bind: true,
            enable_associate: true,
        }
    }

    /// A rule set which denies all commands.
    pub fn permit_none() -> Self {
        PermitCommand {
            enable_connect: false,
            enable_bind: false,
            enable_associate: false,
        }
    }
}

#[async_trait]
impl RuleSet for PermitCommand {
    async fn allow(&self, _cancel: &CancellationToken, req: &Request) -> bool {
        match req.command {
            SocksCommand::Connect => self.enable_connect,
            SocksCommand::Bind => self.enable_bind,
            SocksCommand::UdpAssociate => self.enable_associate,
        }
    }
}

/// Transparent destination rewriting, applied before resolution and rules.
#[async_trait]
pub trait AddressRewriter: Send + Sync {
    /// Return the destination the request should actually target.
    async fn rewrite(&self, cancel: &CancellationToken, req: &Request) -> TargetAddr;
}

/// The identity rewriter: requests keep the destination the client sent.
#[derive(Debug, Default)]
pub struct NoRewrite;

#[async_trait]
impl AddressRewriter for NoRewrite {
    async fn rewrite(&self, _cancel: &CancellationToken, req: &Request) -> TargetAddr {
        req.dest.clone()
    }
}

/// Run the rewriter, resolver, rule-set pipeline over a request.
///
/// On success the request's destination has been rewritten and, for FQDN
/// destinations, `resolved` carries the IP to dial. Errors map to the reply
/// codes the driver owes the client: resolution failure to host-unreachable,
/// rule denial to rule-failure.
pub async fn apply(
    cancel: &CancellationToken,
    rewriter: &dyn AddressRewriter,
    resolver: &dyn NameResolver,
    rules: &dyn RuleSet,
    req: &mut Request,
) -> Result<()> {
    let rewritten = rewriter.rewrite(cancel, req).await;
    req.dest = rewritten;

    let fqdn = match &req.dest {
        TargetAddr::Domain(name, _) => Some(name.clone()),
        _ => None,
    };
    if let Some(name) = fqdn {
        match resolver.resolve(cancel, &name).await {
            Ok(ip) => {
                debug!("resolved {} to {}", name, ip);
                req.resolved = Some(ip);
            }
            Err(e) => return Err(Error::Resolve(name, e.to_string())),
        }
    }

    if !rules.allow(cancel, req).await {
        return Err(Error::NotAllowed);
    }

    Ok(())
}
