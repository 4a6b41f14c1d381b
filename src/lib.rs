//! # socksd - SOCKS5 Proxy Server
//!
//! socksd is a SOCKS5 proxy server library with a thin daemon binary. It
//! implements the full RFC 1928 command set - CONNECT, BIND and UDP
//! ASSOCIATE - plus RFC 1929 username/password authentication.
//!
//! ## Features
//!
//! - **CONNECT**: bidirectional TCP relaying to a dialed destination
//! - **BIND**: two-stage reply with a passively accepted inbound connection
//! - **UDP ASSOCIATE**: multiplexes any number of client-to-remote UDP flows
//!   over one ephemeral server socket, bound to the lifetime of the TCP
//!   control connection
//! - **Pluggable capabilities**: authenticators, name resolver, rule set,
//!   address rewriter, outbound dialer, buffer pool and IP allowlist are all
//!   trait objects with sensible defaults
//!
//! ## Usage
//!
//! ```rust,ignore
//! use socksd::Server;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = Server::builder().build();
//!     server.listen_and_serve("0.0.0.0:1080").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! Each accepted connection runs in its own task and is driven through the
//! protocol state machine:
//!
//! ```text
//! accept -> allowlist -> version -> authenticate -> parse request
//!        -> rewrite -> resolve -> rules -> CONNECT | BIND | ASSOCIATE
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod auth;
pub mod command;
pub mod config;
pub mod consts;
pub mod dialer;
pub mod error;
pub mod mem;
pub mod policy;
pub mod server;
pub mod types;
pub mod udp;

mod bind;
mod tcp_relay;

// Re-export commonly used items
pub use config::{load_config, Config, ServerConfig};
pub use error::{Error, ReplyCode, Result};
pub use server::{Server, ServerBuilder};
pub use types::{AuthContext, Request, SocksCommand, TargetAddr};

/// Version of the socksd library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
