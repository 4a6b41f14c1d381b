//! Username/password authentication (RFC 1929)

use super::{AuthReader, AuthWriter, Authenticator};
use crate::consts::*;
use crate::error::{Error, Result};
use crate::types::AuthContext;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Validates username/password pairs.
pub trait CredentialStore: Send + Sync {
    /// Check whether the given user and password combination is valid.
    fn valid(&self, user: &str, password: &str) -> bool;
}

/// Map-backed credential store.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    credentials: HashMap<String, String>,
}

impl StaticCredentials {
    /// Create a store from a user-to-password map.
    pub fn new(credentials: HashMap<String, String>) -> Self {
        StaticCredentials { credentials }
    }

    /// Create a store holding a single user.
    pub fn single(user: &str, password: &str) -> Self {
        let mut credentials = HashMap::new();
        credentials.insert(user.to_string(), password.to_string());
        StaticCredentials { credentials }
    }
}

impl CredentialStore for StaticCredentials {
    fn valid(&self, user: &str, password: &str) -> bool {
        match self.credentials.get(user) {
            Some(expected) => expected
                .as_bytes()
                .ct_eq(password.as_bytes())
                .into(),
            None => false,
        }
    }
}

/// Authenticator for the username/password method (0x02).
///
/// # Sub-negotiation
///
/// Client sends:
/// ```text
/// +----+------+----------+------+----------+
/// |VER | ULEN |  UNAME   | PLEN |  PASSWD  |
/// +----+------+----------+------+----------+
/// | 1  |  1   | 1 to 255 |  1   | 1 to 255 |
/// +----+------+----------+------+----------+
/// ```
///
/// Server responds `[VER, STATUS]` with STATUS 0x00 on success and 0x01 on
/// failure. A failed sub-negotiation fails the whole connection.
pub struct UserPassAuthenticator {
    credentials: Arc<dyn CredentialStore>,
}

impl UserPassAuthenticator {
    /// Create an authenticator backed by the given credential store.
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        UserPassAuthenticator { credentials }
    }
}

#[async_trait]
impl Authenticator for UserPassAuthenticator {
    fn method(&self) -> u8 {
        SOCKS5_AUTH_METHOD_PASSWORD
    }

    async fn handshake(
        &self,
        reader: &mut AuthReader,
        writer: &mut AuthWriter,
    ) -> Result<AuthContext> {
        writer
            .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_PASSWORD])
            .await?;
        writer.flush().await?;

        let mut header = [0u8; 2];
        reader.read_exact(&mut header).await?;

        let version = header[0];
        if version != SOCKS5_AUTH_VERSION {
            return Err(Error::UnsupportedAuthVersion(version));
        }

        let username_len = header[1] as usize;
        if username_len == 0 {
            send_status(writer, SOCKS5_AUTH_FAILURE).await?;
            return Err(Error::MalformedAuth("zero-length username"));
        }

        let mut username = vec![0u8; username_len];
        reader.read_exact(&mut username).await?;
        let username = String::from_utf8(username)
            .map_err(|_| Error::MalformedAuth("username is not valid UTF-8"))?;

        let password_len = reader.read_u8().await? as usize;
        if password_len == 0 {
            send_status(writer, SOCKS5_AUTH_FAILURE).await?;
            return Err(Error::MalformedAuth("zero-length password"));
        }

        let mut password = vec![0u8; password_len];
        reader.read_exact(&mut password).await?;
        let password = String::from_utf8(password)
            .map_err(|_| Error::MalformedAuth("password is not valid UTF-8"))?;

        if self.credentials.valid(&username, &password) {
            send_status(writer, SOCKS5_AUTH_SUCCESS).await?;
            debug!("authentication succeeded for user {}", username);
            Ok(AuthContext {
                method: SOCKS5_AUTH_METHOD_PASSWORD,
                payload: vec![("Username".to_string(), username)],
            })
        } else {
            send_status(writer, SOCKS5_AUTH_FAILURE).await?;
            Err(Error::AuthFailed)
        }
    }
}

async fn send_status(writer: &mut AuthWriter, status: u8) -> Result<()> {
    writer.write_all(&[SOCKS5_AUTH_VERSION, status]).await?;
    writer.flush().await?;
    Ok(())
}
