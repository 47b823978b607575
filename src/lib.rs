//! # socks5d
//!
//! A small SOCKS5 proxy server implementing the RFC 1928 subset that covers
//! the vast majority of real-world clients: the `NO AUTHENTICATION REQUIRED`
//! method and the `CONNECT` command, with IPv4, domain-name, and IPv6
//! destination addresses.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                  Server (accept loop)                  │
//! │   one task; assigns session ids; spawns sessions       │
//! ├───────────────────────────────────────────────────────┤
//! │                 Session (one per client)               │
//! │   greeting → request → resolve → connect → reply       │
//! │   then two relay pumps racing to completion            │
//! ├───────────────────────────────────────────────────────┤
//! │        socks5 wire codec (pure parse/encode)           │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on a single-threaded tokio executor. Each session owns
//! its sockets and relay buffers outright; the only cross-session state is
//! the aggregate [`server::ServerMetrics`] counters.
//!
//! ## Behavior notes
//!
//! Two deliberate departures from a strict RFC 1928 reading, preserved for
//! compatibility with the deployments this server replaces:
//!
//! 1. Failed sessions close the client connection without sending an error
//!    reply (`REP != 0x00` is never emitted).
//! 2. The success reply's `BND.ADDR`/`BND.PORT` carry the remote endpoint
//!    of the upstream connection, not the server's bound address.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod server;
pub mod socks5;

pub use error::{Error, Result};
