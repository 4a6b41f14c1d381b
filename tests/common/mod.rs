//! Shared fixtures for socksd integration tests

#![allow(dead_code)]

use socksd::consts::*;
use socksd::Server;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

/// Start the server on an ephemeral port and return its address.
pub async fn start_server(server: Server) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

/// Start a TCP echo server on an ephemeral port.
pub async fn start_tcp_echo() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Start a UDP echo server on an ephemeral port.
pub async fn start_udp_echo() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 65536];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, from)) => {
                    let _ = socket.send_to(&buf[..n], from).await;
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Complete the no-auth method selection on a client stream.
pub async fn handshake_no_auth(stream: &mut TcpStream) {
    stream
        .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_NONE])
        .await
        .unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE]);
}

/// Complete user/password authentication on a client stream.
pub async fn handshake_user_pass(stream: &mut TcpStream, user: &str, pass: &str) {
    stream
        .write_all(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_METHOD_PASSWORD])
        .await
        .unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [SOCKS5_VERSION, SOCKS5_AUTH_METHOD_PASSWORD]);

    let mut sub = vec![SOCKS5_AUTH_VERSION, user.len() as u8];
    sub.extend_from_slice(user.as_bytes());
    sub.push(pass.len() as u8);
    sub.extend_from_slice(pass.as_bytes());
    stream.write_all(&sub).await.unwrap();

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await.unwrap();
    assert_eq!(status, [SOCKS5_AUTH_VERSION, SOCKS5_AUTH_SUCCESS]);
}

/// Build a request frame for an IPv4 destination.
pub fn request_ipv4(cmd: u8, ip: [u8; 4], port: u16) -> Vec<u8> {
    let mut request = vec![SOCKS5_VERSION, cmd, SOCKS5_RESERVED, SOCKS5_ADDR_TYPE_IPV4];
    request.extend_from_slice(&ip);
    request.extend_from_slice(&port.to_be_bytes());
    request
}

/// Build a request frame for a domain destination.
pub fn request_domain(cmd: u8, domain: &str, port: u16) -> Vec<u8> {
    let mut request = vec![
        SOCKS5_VERSION,
        cmd,
        SOCKS5_RESERVED,
        SOCKS5_ADDR_TYPE_DOMAIN,
        domain.len() as u8,
    ];
    request.extend_from_slice(domain.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    request
}

/// Read a reply frame with an IPv4 bound address, returning (rep, addr).
pub async fn read_reply_ipv4(stream: &mut TcpStream) -> (u8, SocketAddr) {
    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], SOCKS5_VERSION);
    assert_eq!(reply[2], SOCKS5_RESERVED);
    assert_eq!(reply[3], SOCKS5_ADDR_TYPE_IPV4);
    let ip = std::net::Ipv4Addr::new(reply[4], reply[5], reply[6], reply[7]);
    let port = u16::from_be_bytes([reply[8], reply[9]]);
    (reply[1], SocketAddr::new(ip.into(), port))
}

/// Build an encapsulated UDP datagram for an IPv4 destination.
pub fn udp_datagram_ipv4(ip: [u8; 4], port: u16, data: &[u8]) -> Vec<u8> {
    let mut packet = vec![0, 0, 0, SOCKS5_ADDR_TYPE_IPV4];
    packet.extend_from_slice(&ip);
    packet.extend_from_slice(&port.to_be_bytes());
    packet.extend_from_slice(data);
    packet
}
