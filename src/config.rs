//! Configuration for the socksd daemon
//!
//! Covers the serializable surface of the server: listen address, advertised
//! bind IP, static credentials, the IP allowlist and the UDP flow TTL.
//! Programmatic capabilities (resolver, rules, rewriter, dialer, buffer
//! pool, bind hooks) are configured through [`ServerBuilder`](crate::server::ServerBuilder).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

/// Top-level configuration file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Server settings loaded from the `[server]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the TCP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// IP advertised in BIND and UDP ASSOCIATE replies. Must be an address
    /// clients can reach this host on.
    #[serde(default = "default_bind_ip")]
    pub bind_ip: IpAddr,

    /// Username for static user/password authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for static user/password authentication.
    #[serde(default)]
    pub password: Option<String>,

    /// Client IPs allowed to connect. Unset allows all.
    #[serde(default)]
    pub allowed_ips: Option<Vec<IpAddr>>,

    /// Seconds of inactivity after which a UDP flow is evicted. Unset keeps
    /// flows until the association closes.
    #[serde(default)]
    pub udp_flow_ttl: Option<u64>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:1080".to_string()
}

fn default_bind_ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0))
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: default_listen_addr(),
            bind_ip: default_bind_ip(),
            username: None,
            password: None,
            allowed_ips: None,
            udp_flow_ttl: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Validate cross-field constraints.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match (&self.username, &self.password) {
            (Some(_), None) => Err("username is set but password is missing".to_string()),
            (None, Some(_)) => Err("password is set but username is missing".to_string()),
            _ => Ok(()),
        }
    }
}

/// Load configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse configuration")
}
