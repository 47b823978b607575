//! Accept loop and session dispatch.
//!
//! `Server` owns the listening socket, assigns session ids, and spawns one
//! task per accepted client. Accept errors are logged and the listener is
//! re-armed; a failing client never takes the server down.

mod metrics;
mod session;

pub use metrics::{MetricsSnapshot, ServerMetrics};

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::error::Result;
use session::Session;

/// The proxy server.
pub struct Server {
    config: Config,
    metrics: Arc<ServerMetrics>,
}

impl Server {
    /// Create a server with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            metrics: Arc::new(ServerMetrics::new()),
            config,
        }
    }

    /// Get a handle to the server's metrics.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Bind `0.0.0.0:<port>` and serve until the process exits.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.port)).await?;
        tracing::info!("accepting connections on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept clients on an already-bound listener.
    ///
    /// Session ids increment on every successful accept; the 64-bit counter
    /// makes rollover a non-issue for any realistic process lifetime.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let mut next_session_id: u64 = 0;

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let id = next_session_id;
                    next_session_id += 1;
                    tracing::debug!("session {}: accepted connection from {}", id, peer);

                    let session =
                        Session::new(id, stream, self.config.buffer_size, Arc::clone(&self.metrics));
                    tokio::spawn(session.run());
                }
                Err(e) => tracing::error!("accept error: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::SocketAddr;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// Spawn a proxy on an ephemeral loopback port.
    async fn start_proxy(buffer_size: usize) -> (SocketAddr, Arc<ServerMetrics>) {
        let config = Config {
            port: 0,
            buffer_size,
            log_level: "off".into(),
        };
        let server = Server::new(config);
        let metrics = server.metrics();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));

        (addr, metrics)
    }

    /// Spawn an upstream that echoes everything back.
    async fn start_echo_upstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
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

    async fn handshake_no_auth(stream: &mut TcpStream) {
        stream.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut resp = [0u8; 2];
        stream.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp, [0x05, 0x00]);
    }

    async fn connect_ipv4(stream: &mut TcpStream, ip: [u8; 4], port: u16) -> [u8; 10] {
        let mut req = vec![0x05, 0x01, 0x00, 0x01];
        req.extend_from_slice(&ip);
        req.extend_from_slice(&port.to_be_bytes());
        stream.write_all(&req).await.unwrap();

        let mut resp = [0u8; 10];
        stream.read_exact(&mut resp).await.unwrap();
        resp
    }

    /// Read until EOF, asserting no further payload arrives.
    async fn assert_closed(stream: &mut TcpStream) {
        let mut buf = [0u8; 32];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejects_non_socks5_greeting() {
        let (proxy, metrics) = start_proxy(8192).await;
        let mut client = TcpStream::connect(proxy).await.unwrap();

        client.write_all(&[0x03, 0x01, 0x00]).await.unwrap();
        assert_closed(&mut client).await;
        assert_eq!(metrics.snapshot().protocol_errors, 1);
    }

    #[tokio::test]
    async fn test_no_acceptable_method() {
        let (proxy, _) = start_proxy(8192).await;
        let mut client = TcpStream::connect(proxy).await.unwrap();

        client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp, [0x05, 0xFF]);
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_greeting_selects_no_auth_among_many() {
        let (proxy, _) = start_proxy(8192).await;
        let mut client = TcpStream::connect(proxy).await.unwrap();

        client.write_all(&[0x05, 0x02, 0x00, 0x02]).await.unwrap();
        let mut resp = [0u8; 2];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp, [0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_connect_ipv4_reply_reports_upstream_peer() {
        let (proxy, _) = start_proxy(8192).await;
        let upstream = start_echo_upstream().await;

        let mut client = TcpStream::connect(proxy).await.unwrap();
        handshake_no_auth(&mut client).await;

        let resp = connect_ipv4(&mut client, [127, 0, 0, 1], upstream.port()).await;
        let mut expected = vec![0x05, 0x00, 0x00, 0x01, 127, 0, 0, 1];
        expected.extend_from_slice(&upstream.port().to_be_bytes());
        assert_eq!(&resp[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_relay_roundtrip() {
        let (proxy, metrics) = start_proxy(8192).await;
        let upstream = start_echo_upstream().await;

        let mut client = TcpStream::connect(proxy).await.unwrap();
        handshake_no_auth(&mut client).await;
        let resp = connect_ipv4(&mut client, [127, 0, 0, 1], upstream.port()).await;
        assert_eq!(resp[1], 0x00);

        let payload = b"GET / HTTP/1.1\r\n\r\n";
        client.write_all(payload).await.unwrap();
        let mut echoed = vec![0u8; payload.len()];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, payload);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.bytes_to_upstream, payload.len() as u64);
        assert_eq!(snapshot.bytes_to_client, payload.len() as u64);
    }

    #[tokio::test]
    async fn test_relay_large_transfer() {
        let (proxy, _) = start_proxy(8192).await;
        let upstream = start_echo_upstream().await;

        let mut client = TcpStream::connect(proxy).await.unwrap();
        handshake_no_auth(&mut client).await;
        connect_ipv4(&mut client, [127, 0, 0, 1], upstream.port()).await;

        let data: Vec<u8> = (0..65536u32).map(|i| (i % 251) as u8).collect();
        let outbound = data.clone();

        let (mut rd, mut wr) = client.into_split();
        let write_task = tokio::spawn(async move {
            wr.write_all(&outbound).await.unwrap();
        });

        let mut received = vec![0u8; data.len()];
        rd.read_exact(&mut received).await.unwrap();
        write_task.await.unwrap();

        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn test_relay_with_single_byte_buffers() {
        let (proxy, _) = start_proxy(1).await;
        let upstream = start_echo_upstream().await;

        let mut client = TcpStream::connect(proxy).await.unwrap();
        handshake_no_auth(&mut client).await;
        let resp = connect_ipv4(&mut client, [127, 0, 0, 1], upstream.port()).await;
        assert_eq!(resp[1], 0x00);

        client.write_all(b"one byte at a time").await.unwrap();
        let mut echoed = [0u8; 18];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"one byte at a time");
    }

    #[tokio::test]
    async fn test_connect_domain_localhost() {
        let (proxy, _) = start_proxy(8192).await;
        let upstream = start_echo_upstream().await;

        let mut client = TcpStream::connect(proxy).await.unwrap();
        handshake_no_auth(&mut client).await;

        let mut req = vec![0x05, 0x01, 0x00, 0x03, 9];
        req.extend_from_slice(b"localhost");
        req.extend_from_slice(&upstream.port().to_be_bytes());
        client.write_all(&req).await.unwrap();

        let mut resp = [0u8; 4];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(resp[0], 0x05);
        assert_eq!(resp[1], 0x00);
        // consume the rest of the reply: 6 more bytes for IPv4, 18 for IPv6
        let rest = if resp[3] == 0x01 { 6 } else { 18 };
        let mut addr = vec![0u8; rest];
        client.read_exact(&mut addr).await.unwrap();

        client.write_all(b"via domain").await.unwrap();
        let mut echoed = [0u8; 10];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"via domain");
    }

    #[tokio::test]
    async fn test_resolve_failure_closes_without_reply() {
        let (proxy, metrics) = start_proxy(8192).await;
        let mut client = TcpStream::connect(proxy).await.unwrap();
        handshake_no_auth(&mut client).await;

        let mut req = vec![0x05, 0x01, 0x00, 0x03, 20];
        req.extend_from_slice(b"no-such-host.invalid");
        req.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&req).await.unwrap();

        assert_closed(&mut client).await;
        assert_eq!(metrics.snapshot().resolve_failures, 1);
    }

    #[tokio::test]
    async fn test_connect_failure_closes_without_reply() {
        let (proxy, metrics) = start_proxy(8192).await;

        // bind then drop a listener so the port is free but refusing
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_port = dead.local_addr().unwrap().port();
        drop(dead);

        let mut client = TcpStream::connect(proxy).await.unwrap();
        handshake_no_auth(&mut client).await;

        let mut req = vec![0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1];
        req.extend_from_slice(&dead_port.to_be_bytes());
        client.write_all(&req).await.unwrap();

        assert_closed(&mut client).await;
        assert_eq!(metrics.snapshot().connect_failures, 1);
    }

    #[tokio::test]
    async fn test_bind_command_rejected() {
        let (proxy, metrics) = start_proxy(8192).await;
        let mut client = TcpStream::connect(proxy).await.unwrap();
        handshake_no_auth(&mut client).await;

        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
            .await
            .unwrap();
        assert_closed(&mut client).await;
        assert_eq!(metrics.snapshot().protocol_errors, 1);
    }

    #[tokio::test]
    async fn test_upstream_close_propagates_to_client() {
        let (proxy, _) = start_proxy(8192).await;

        // upstream sends a parting message and closes
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                stream.write_all(b"bye").await.unwrap();
            }
        });

        let mut client = TcpStream::connect(proxy).await.unwrap();
        handshake_no_auth(&mut client).await;
        let resp = connect_ipv4(&mut client, [127, 0, 0, 1], upstream.port()).await;
        assert_eq!(resp[1], 0x00);

        let mut parting = [0u8; 3];
        client.read_exact(&mut parting).await.unwrap();
        assert_eq!(&parting, b"bye");
        assert_closed(&mut client).await;
    }

    #[tokio::test]
    async fn test_accept_loop_survives_failed_sessions() {
        let (proxy, metrics) = start_proxy(8192).await;

        // a client that violates the protocol...
        let mut bad = TcpStream::connect(proxy).await.unwrap();
        bad.write_all(&[0x00, 0x00, 0x00]).await.unwrap();
        assert_closed(&mut bad).await;

        // ...must not affect the next one
        let upstream = start_echo_upstream().await;
        let mut good = TcpStream::connect(proxy).await.unwrap();
        handshake_no_auth(&mut good).await;
        let resp = connect_ipv4(&mut good, [127, 0, 0, 1], upstream.port()).await;
        assert_eq!(resp[1], 0x00);

        assert_eq!(metrics.snapshot().total_sessions, 2);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        let (proxy, _) = start_proxy(8192).await;
        let upstream = start_echo_upstream().await;

        let mut tasks = Vec::new();
        for i in 0..5u8 {
            let upstream_port = upstream.port();
            tasks.push(tokio::spawn(async move {
                let mut client = TcpStream::connect(proxy).await.unwrap();
                handshake_no_auth(&mut client).await;
                let resp = connect_ipv4(&mut client, [127, 0, 0, 1], upstream_port).await;
                assert_eq!(resp[1], 0x00);

                let msg = [i; 100];
                client.write_all(&msg).await.unwrap();
                let mut echoed = [0u8; 100];
                client.read_exact(&mut echoed).await.unwrap();
                assert_eq!(echoed, msg);
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
    }
}
