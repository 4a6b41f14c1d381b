//! SOCKS5 authentication
//!
//! The server holds one [`Authenticator`] per method code. Negotiation reads
//! the client's offered methods and hands the connection to the first
//! registered one, in the order the client listed them.

mod none;
mod password;

pub use none::NoAuthAuthenticator;
pub use password::{CredentialStore, StaticCredentials, UserPassAuthenticator};

use crate::consts::*;
use crate::error::{Error, Result};
use crate::types::AuthContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reader type handed to authenticators during the method handshake.
pub type AuthReader = dyn AsyncRead + Unpin + Send;
/// Writer type handed to authenticators during the method handshake.
pub type AuthWriter = dyn AsyncWrite + Unpin + Send;

/// A single authentication method implementation.
///
/// An authenticator owns the complete sub-negotiation for its method,
/// including the method-selection reply that announces it.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// The SOCKS5 method code this authenticator implements.
    fn method(&self) -> u8;

    /// Run the method handshake on the connection.
    ///
    /// Implementations write the `[VER, METHOD]` selection reply, perform any
    /// sub-negotiation, and produce the connection's [`AuthContext`].
    async fn handshake(
        &self,
        reader: &mut AuthReader,
        writer: &mut AuthWriter,
    ) -> Result<AuthContext>;
}

/// Registry mapping method codes to authenticator instances.
pub type AuthRegistry = HashMap<u8, Arc<dyn Authenticator>>;

/// Build a registry from an ordered authenticator list.
///
/// Later entries win on duplicate method codes.
pub fn build_registry(authenticators: &[Arc<dyn Authenticator>]) -> AuthRegistry {
    let mut registry = AuthRegistry::new();
    for authenticator in authenticators {
        registry.insert(authenticator.method(), Arc::clone(authenticator));
    }
    registry
}

/// Negotiate an authentication method and run its handshake.
///
/// Expects the version byte to have been consumed already. Reads `NMETHODS`
/// and the method list, then picks the first client-offered method that is
/// registered. If none match, the `0xFF` selection reply is written and the
/// connection fails with [`Error::NoAcceptableMethod`].
pub async fn negotiate<R, W>(
    reader: &mut R,
    writer: &mut W,
    registry: &AuthRegistry,
) -> Result<AuthContext>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let num_methods = reader.read_u8().await?;
    let mut methods = vec![0u8; num_methods as usize];
    reader.read_exact(&mut methods).await?;

    for method in methods {
        if let Some(authenticator) = registry.get(&method) {
            return authenticator.handshake(&mut *reader, &mut *writer).await;
        }
    }

    writer
        .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE])
        .await?;
    writer.flush().await?;
    Err(Error::NoAcceptableMethod)
}
