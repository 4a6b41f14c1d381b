//! "No authentication" method handler

use super::{AuthReader, AuthWriter, Authenticator};
use crate::consts::*;
use crate::error::Result;
use crate::types::AuthContext;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

/// Authenticator for the "no authentication required" method (0x00).
///
/// Announces the method and succeeds immediately with an empty payload.
#[derive(Debug, Default)]
pub struct NoAuthAuthenticator;

#[async_trait]
impl Authenticator for NoAuthAuthenticator {
    fn method(&self) -> u8 {
        SOCKS5_AUTH_METHOD_NONE
    }

    async fn handshake(
        &self,
        _reader: &mut AuthReader,
        writer: &mut AuthWriter,
    ) -> Result<AuthContext> {
        writer
            .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE])
            .await?;
        writer.flush().await?;
        Ok(AuthContext::new(SOCKS5_AUTH_METHOD_NONE))
    }
}
