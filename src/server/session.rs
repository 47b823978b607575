//! Per-client SOCKS5 session.
//!
//! One accepted connection maps to one `Session`, which maps to one spawned
//! task. The task walks the protocol phases in order — method negotiation,
//! request, resolution, upstream connect, reply — and then relays bytes in
//! both directions until either peer closes or fails. Any error at any
//! phase ends the session; no failure reply is sent, the client connection
//! is simply closed.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{self, TcpStream};

use crate::error::{Error, Result};
use crate::server::metrics::ServerMetrics;
use crate::socks5::{self, TargetAddr};

/// One relay direction.
#[derive(Clone, Copy)]
enum Direction {
    ClientToUpstream,
    UpstreamToClient,
}

impl Direction {
    fn arrow(self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "-->",
            Direction::UpstreamToClient => "<--",
        }
    }

    /// The peer being read from in this direction.
    fn source(self) -> &'static str {
        match self {
            Direction::ClientToUpstream => "client",
            Direction::UpstreamToClient => "upstream",
        }
    }

    fn record(self, metrics: &ServerMetrics, bytes: u64) {
        match self {
            Direction::ClientToUpstream => metrics.add_bytes_to_upstream(bytes),
            Direction::UpstreamToClient => metrics.add_bytes_to_client(bytes),
        }
    }
}

/// State for one proxied client connection.
pub(crate) struct Session {
    id: u64,
    client: TcpStream,
    /// Relay buffer for client → upstream payload
    client_buf: Vec<u8>,
    /// Relay buffer for upstream → client payload
    upstream_buf: Vec<u8>,
    metrics: Arc<ServerMetrics>,
}

impl Session {
    pub(crate) fn new(
        id: u64,
        client: TcpStream,
        buffer_size: usize,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            id,
            client,
            client_buf: vec![0; buffer_size],
            upstream_buf: vec![0; buffer_size],
            metrics,
        }
    }

    /// Run the session to completion. Never panics; all failure modes end
    /// in both sockets closed and a log line explaining why.
    pub(crate) async fn run(mut self) {
        self.metrics.session_opened();

        if let Err(e) = self.drive().await {
            if e.is_protocol_violation() {
                self.metrics.record_protocol_error();
            } else if matches!(e, Error::Resolve { .. }) {
                self.metrics.record_resolve_failure();
            } else if matches!(e, Error::Connect { .. }) {
                self.metrics.record_connect_failure();
            }
            tracing::error!("session {}: {}", self.id, e);
        }

        self.metrics.session_closed();
    }

    async fn drive(&mut self) -> Result<()> {
        // Dedicated scratch space for the pre-relay phases, sized for the
        // largest possible request. The configured buffer_size governs
        // relay chunking only, so tiny relay buffers stay usable.
        let mut scratch = [0u8; socks5::MAX_HANDSHAKE_LEN];

        if !self.negotiate(&mut scratch).await? {
            return Ok(()); // no acceptable method; 0x05 0xFF already sent
        }

        let target = self.read_request(&mut scratch).await?;
        let endpoints = self.resolve(&target).await?;
        let upstream = self.connect(&target, endpoints).await?;
        tracing::info!("session {}: connected to {}", self.id, target);

        self.write_reply(&upstream).await?;
        self.relay(upstream).await;
        Ok(())
    }

    /// READ_GREETING + WRITE_GREETING: select an authentication method and
    /// echo the choice. Returns false if no offered method was acceptable,
    /// in which case the session ends after the reply.
    async fn negotiate(&mut self, scratch: &mut [u8]) -> Result<bool> {
        let n = self.client.read(scratch).await?;
        let method = socks5::select_method(&scratch[..n])?;
        self.client.write_all(&[socks5::VERSION, method]).await?;
        Ok(method == socks5::METHOD_NO_AUTH)
    }

    async fn read_request(&mut self, scratch: &mut [u8]) -> Result<TargetAddr> {
        let n = self.client.read(scratch).await?;
        socks5::parse_request(&scratch[..n])
    }

    /// IP literals resolve without touching DNS; domain names go through
    /// the system resolver.
    async fn resolve(&self, target: &TargetAddr) -> Result<Vec<SocketAddr>> {
        let endpoints = net::lookup_host((target.host.as_str(), target.port))
            .await
            .map_err(|e| Error::Resolve {
                host: target.host.clone(),
                port: target.port,
                source: e,
            })?
            .collect();
        Ok(endpoints)
    }

    /// Try each resolved endpoint in order, keeping the first that accepts.
    async fn connect(&self, target: &TargetAddr, endpoints: Vec<SocketAddr>) -> Result<TcpStream> {
        let mut last_err = None;
        for endpoint in endpoints {
            match TcpStream::connect(endpoint).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        Err(Error::Connect {
            host: target.host.clone(),
            port: target.port,
            source: last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "resolver returned no addresses")
            }),
        })
    }

    /// Send the success reply. BND.ADDR/BND.PORT carry the upstream peer's
    /// endpoint rather than the server's bound address; existing clients
    /// depend on this.
    async fn write_reply(&mut self, upstream: &TcpStream) -> Result<()> {
        let bound = upstream.peer_addr()?;
        let mut reply = [0u8; socks5::REPLY_LEN_V6];
        let len = socks5::encode_reply(bound, &mut reply);
        self.client.write_all(&reply[..len]).await?;
        Ok(())
    }

    /// RELAY: run both pumps until either finishes. Returning drops both
    /// streams, which closes both sockets and cancels the losing pump at
    /// its current suspension point.
    async fn relay(&mut self, mut upstream: TcpStream) {
        let id = self.id;
        let (mut client_rd, mut client_wr) = self.client.split();
        let (mut upstream_rd, mut upstream_wr) = upstream.split();

        tokio::select! {
            res = pump(
                id,
                Direction::ClientToUpstream,
                &mut self.client_buf,
                &mut client_rd,
                &mut upstream_wr,
                &self.metrics,
            ) => report(id, Direction::ClientToUpstream, res),
            res = pump(
                id,
                Direction::UpstreamToClient,
                &mut self.upstream_buf,
                &mut upstream_rd,
                &mut client_wr,
                &self.metrics,
            ) => report(id, Direction::UpstreamToClient, res),
        }
    }
}

/// One directional relay loop: read from `rd`, write everything read to
/// `wr`, repeat. At most one read and one write are ever outstanding.
/// Returns the total number of bytes relayed when the source reaches EOF.
async fn pump<R, W>(
    id: u64,
    dir: Direction,
    buf: &mut [u8],
    rd: &mut R,
    wr: &mut W,
    metrics: &ServerMetrics,
) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut total = 0u64;
    loop {
        let n = rd.read(buf).await?;
        if n == 0 {
            return Ok(total);
        }
        wr.write_all(&buf[..n]).await?;

        dir.record(metrics, n as u64);
        total += n as u64;
        tracing::debug!("session {}: {} {} bytes", id, dir.arrow(), n);
    }
}

fn report(id: u64, dir: Direction, res: io::Result<u64>) {
    match res {
        Ok(total) => tracing::info!(
            "session {}: {} closed the connection after {} bytes",
            id,
            dir.source(),
            total
        ),
        Err(e) => tracing::warn!("session {}: {} relay error: {}", id, dir.source(), e),
    }
}
