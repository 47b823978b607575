//! SOCKS5 wire codec.
//!
//! Pure parse/encode functions over byte slices; all socket I/O lives in
//! the session. Framing follows RFC 1928, restricted to the subset this
//! server speaks: NO AUTH, CONNECT, and the three standard address types.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{Error, Result};

/// Protocol version byte.
pub const VERSION: u8 = 0x05;

/// Method: no authentication required.
pub const METHOD_NO_AUTH: u8 = 0x00;
/// Method: no acceptable methods offered.
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

/// Command: CONNECT.
pub const CMD_CONNECT: u8 = 0x01;

/// Address type: IPv4.
pub const ATYP_IPV4: u8 = 0x01;
/// Address type: domain name.
pub const ATYP_DOMAIN: u8 = 0x03;
/// Address type: IPv6.
pub const ATYP_IPV6: u8 = 0x04;

/// Reply code: succeeded.
pub const REP_SUCCEEDED: u8 = 0x00;

/// Largest message a client can send before the relay phase:
/// request header (4) + domain length byte (1) + domain (255) + port (2).
pub const MAX_HANDSHAKE_LEN: usize = 262;

/// Reply length for an IPv4 bound address.
pub const REPLY_LEN_V4: usize = 10;
/// Reply length for an IPv6 bound address.
pub const REPLY_LEN_V6: usize = 22;

/// Destination requested by a CONNECT command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddr {
    /// Hostname or IP address literal in text form
    pub host: String,
    /// Destination port
    pub port: u16,
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Select an authentication method from a client greeting.
///
/// `buf` is the bytes of one received method-selection message:
/// `VER NMETHODS METHODS...`. The method scan is bounded by the received
/// length, so a client lying in NMETHODS cannot read past the message.
///
/// Returns [`METHOD_NO_AUTH`] if offered, [`METHOD_NO_ACCEPTABLE`]
/// otherwise.
pub fn select_method(buf: &[u8]) -> Result<u8> {
    if buf.len() < 3 || buf[0] != VERSION {
        return Err(Error::InvalidHandshake);
    }

    let nmethods = buf[1] as usize;
    let methods = &buf[2..buf.len().min(2 + nmethods)];

    if methods.contains(&METHOD_NO_AUTH) {
        Ok(METHOD_NO_AUTH)
    } else {
        Ok(METHOD_NO_ACCEPTABLE)
    }
}

/// Parse a CONNECT request: `VER CMD RSV ATYP DST.ADDR DST.PORT`.
///
/// The message must arrive whole: for each recognized address type the
/// received length has to match exactly what that type requires.
pub fn parse_request(buf: &[u8]) -> Result<TargetAddr> {
    if buf.len() < 5 || buf[0] != VERSION || buf[1] != CMD_CONNECT {
        return Err(Error::InvalidRequest);
    }

    match buf[3] {
        ATYP_IPV4 => {
            if buf.len() != 10 {
                return Err(Error::LengthMismatch(ATYP_IPV4));
            }
            let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);
            Ok(TargetAddr {
                host: ip.to_string(),
                port: u16::from_be_bytes([buf[8], buf[9]]),
            })
        }
        ATYP_DOMAIN => {
            let host_len = buf[4] as usize;
            if buf.len() != 5 + host_len + 2 {
                return Err(Error::LengthMismatch(ATYP_DOMAIN));
            }
            let host = String::from_utf8_lossy(&buf[5..5 + host_len]).into_owned();
            Ok(TargetAddr {
                host,
                port: u16::from_be_bytes([buf[5 + host_len], buf[6 + host_len]]),
            })
        }
        ATYP_IPV6 => {
            if buf.len() != 22 {
                return Err(Error::LengthMismatch(ATYP_IPV6));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[4..20]);
            let ip = Ipv6Addr::from(octets);
            Ok(TargetAddr {
                host: ip.to_string(),
                port: u16::from_be_bytes([buf[20], buf[21]]),
            })
        }
        atyp => Err(Error::UnsupportedAddressType(atyp)),
    }
}

/// Encode a success reply announcing `bound` as BND.ADDR/BND.PORT.
///
/// Returns the number of reply bytes written: [`REPLY_LEN_V4`] or
/// [`REPLY_LEN_V6`]. `buf` must hold at least [`REPLY_LEN_V6`] bytes.
pub fn encode_reply(bound: SocketAddr, buf: &mut [u8]) -> usize {
    buf[0] = VERSION;
    buf[1] = REP_SUCCEEDED;
    buf[2] = 0x00;

    match bound {
        SocketAddr::V4(addr) => {
            buf[3] = ATYP_IPV4;
            buf[4..8].copy_from_slice(&addr.ip().octets());
            buf[8..10].copy_from_slice(&addr.port().to_be_bytes());
            REPLY_LEN_V4
        }
        SocketAddr::V6(addr) => {
            buf[3] = ATYP_IPV6;
            buf[4..20].copy_from_slice(&addr.ip().octets());
            buf[20..22].copy_from_slice(&addr.port().to_be_bytes());
            REPLY_LEN_V6
        }
    }
}
