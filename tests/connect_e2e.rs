//! End-to-end tests for the CONNECT command and the pre-dispatch protocol
//! phases.

mod common;

use common::*;
use socksd::auth::StaticCredentials;
use socksd::consts::*;
use socksd::policy::PermitCommand;
use socksd::Server;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn connect_no_auth_relays_both_directions() {
    let echo = start_tcp_echo().await;
    let proxy = start_server(Server::builder().build()).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    handshake_no_auth(&mut client).await;

    let octets = match echo {
        std::net::SocketAddr::V4(v4) => v4.ip().octets(),
        _ => unreachable!(),
    };
    client
        .write_all(&request_ipv4(SOCKS5_CMD_TCP_CONNECT, octets, echo.port()))
        .await
        .unwrap();

    let (rep, bound) = read_reply_ipv4(&mut client).await;
    assert_eq!(rep, SOCKS5_REPLY_SUCCEEDED);
    // The reply carries the outbound socket's local address.
    assert_ne!(bound.port(), 0);

    client.write_all(b"hello through the proxy").await.unwrap();
    let mut buf = [0u8; 23];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello through the proxy");

    client.write_all(b"second round").await.unwrap();
    let mut buf = [0u8; 12];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"second round");
}

#[tokio::test]
async fn connect_with_user_pass_auth() {
    let echo = start_tcp_echo().await;
    let proxy = start_server(
        Server::builder()
            .credentials(Arc::new(StaticCredentials::single("foo", "bar")))
            .build(),
    )
    .await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    handshake_user_pass(&mut client, "foo", "bar").await;

    let octets = match echo {
        std::net::SocketAddr::V4(v4) => v4.ip().octets(),
        _ => unreachable!(),
    };
    client
        .write_all(&request_ipv4(SOCKS5_CMD_TCP_CONNECT, octets, echo.port()))
        .await
        .unwrap();

    let (rep, _) = read_reply_ipv4(&mut client).await;
    assert_eq!(rep, SOCKS5_REPLY_SUCCEEDED);

    client.write_all(b"authenticated").await.unwrap();
    let mut buf = [0u8; 13];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"authenticated");
}

#[tokio::test]
async fn bad_credentials_get_failure_status() {
    let proxy = start_server(
        Server::builder()
            .credentials(Arc::new(StaticCredentials::single("foo", "bar")))
            .build(),
    )
    .await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_PASSWORD])
        .await
        .unwrap();
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_PASSWORD]);

    let mut sub = vec![SOCKS5_AUTH_VERSION, 3];
    sub.extend_from_slice(b"foo");
    sub.push(5);
    sub.extend_from_slice(b"wrong");
    client.write_all(&sub).await.unwrap();

    let mut status = [0u8; 2];
    client.read_exact(&mut status).await.unwrap();
    assert_eq!(status, [SOCKS5_AUTH_VERSION, SOCKS5_AUTH_FAILURE]);

    // The server closes the connection after a failed sub-negotiation.
    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn no_acceptable_method_gets_ff() {
    let proxy = start_server(
        Server::builder()
            .credentials(Arc::new(StaticCredentials::single("foo", "bar")))
            .build(),
    )
    .await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE])
        .await
        .unwrap();

    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE]);
}

#[tokio::test]
async fn rule_denial_replies_connection_not_allowed() {
    let proxy = start_server(
        Server::builder()
            .rules(Arc::new(PermitCommand::permit_none()))
            .build(),
    )
    .await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    handshake_no_auth(&mut client).await;

    client
        .write_all(&request_domain(SOCKS5_CMD_TCP_CONNECT, "example.com", 80))
        .await
        .unwrap();

    let (rep, bound) = read_reply_ipv4(&mut client).await;
    assert_eq!(rep, SOCKS5_REPLY_CONNECTION_NOT_ALLOWED);
    assert_eq!(bound, "0.0.0.0:0".parse().unwrap());
}

#[tokio::test]
async fn unsupported_address_type_replies_0x08() {
    let proxy = start_server(Server::builder().build()).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    handshake_no_auth(&mut client).await;

    client
        .write_all(&[
            SOCKS5_VERSION,
            SOCKS5_CMD_TCP_CONNECT,
            SOCKS5_RESERVED,
            0x05,
            0,
            0,
            0,
            0,
            0,
            0,
        ])
        .await
        .unwrap();

    let (rep, _) = read_reply_ipv4(&mut client).await;
    assert_eq!(rep, SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED);
}

#[tokio::test]
async fn connection_refused_maps_to_0x05() {
    // Bind a listener to reserve a port, then drop it so connects are
    // refused.
    let reserved = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = reserved.local_addr().unwrap();
    drop(reserved);

    let proxy = start_server(Server::builder().build()).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    handshake_no_auth(&mut client).await;

    client
        .write_all(&request_ipv4(
            SOCKS5_CMD_TCP_CONNECT,
            [127, 0, 0, 1],
            dead.port(),
        ))
        .await
        .unwrap();

    let (rep, _) = read_reply_ipv4(&mut client).await;
    assert_eq!(rep, SOCKS5_REPLY_CONNECTION_REFUSED);
}

#[tokio::test]
async fn allowlisted_client_is_dropped_without_reply() {
    let proxy = start_server(
        Server::builder()
            .allowed_ips(vec!["203.0.113.7".parse().unwrap()])
            .build(),
    )
    .await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    let _ = client
        .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE])
        .await;

    // No reply byte arrives; the connection just closes (or resets, if the
    // write raced the close).
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), client.read(&mut buf))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn connect_to_domain_destination() {
    struct LoopbackResolver;

    #[async_trait::async_trait]
    impl socksd::policy::NameResolver for LoopbackResolver {
        async fn resolve(
            &self,
            _cancel: &tokio_util::sync::CancellationToken,
            name: &str,
        ) -> anyhow::Result<std::net::IpAddr> {
            assert_eq!(name, "echo.internal");
            Ok("127.0.0.1".parse().unwrap())
        }
    }

    let echo = start_tcp_echo().await;
    let proxy = start_server(
        Server::builder()
            .resolver(Arc::new(LoopbackResolver))
            .build(),
    )
    .await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    handshake_no_auth(&mut client).await;

    // The FQDN destination resolves through the policy pipeline.
    client
        .write_all(&request_domain(
            SOCKS5_CMD_TCP_CONNECT,
            "echo.internal",
            echo.port(),
        ))
        .await
        .unwrap();

    let (rep, _) = read_reply_ipv4(&mut client).await;
    assert_eq!(rep, SOCKS5_REPLY_SUCCEEDED);

    client.write_all(b"via fqdn").await.unwrap();
    let mut buf = [0u8; 8];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"via fqdn");
}
