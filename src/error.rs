//! Error types for the proxy.

use thiserror::Error;

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving a SOCKS5 session.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or non-SOCKS5 method-selection message
    #[error("invalid SOCKS5 handshake")]
    InvalidHandshake,

    /// Malformed request header, or a command other than CONNECT
    #[error("invalid SOCKS5 request")]
    InvalidRequest,

    /// Request length does not match what the address type requires
    #[error("request length mismatch for address type 0x{0:02x}")]
    LengthMismatch(u8),

    /// Address type outside IPv4/domain/IPv6
    #[error("unsupported address type 0x{0:02x}")]
    UnsupportedAddressType(u8),

    /// Name/service resolution failed
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        /// Requested destination host
        host: String,
        /// Requested destination port
        port: u16,
        /// Underlying resolver error
        source: std::io::Error,
    },

    /// Every resolved endpoint refused or was unreachable
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        /// Requested destination host
        host: String,
        /// Requested destination port
        port: u16,
        /// Error from the last endpoint attempted
        source: std::io::Error,
    },

    /// Network I/O error outside the relay phase
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Configuration file error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Check if this error is a client protocol violation.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::InvalidHandshake
                | Error::InvalidRequest
                | Error::LengthMismatch(_)
                | Error::UnsupportedAddressType(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidHandshake;
        assert_eq!(err.to_string(), "invalid SOCKS5 handshake");

        let err = Error::UnsupportedAddressType(0x05);
        assert_eq!(err.to_string(), "unsupported address type 0x05");

        let err = Error::Resolve {
            host: "example.test".into(),
            port: 80,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "nxdomain"),
        };
        assert_eq!(err.to_string(), "failed to resolve example.test:80: nxdomain");
    }

    #[test]
    fn test_error_protocol_violation() {
        assert!(Error::InvalidHandshake.is_protocol_violation());
        assert!(Error::LengthMismatch(0x01).is_protocol_violation());
        assert!(Error::UnsupportedAddressType(0x7f).is_protocol_violation());
        assert!(!Error::Config("x".into()).is_protocol_violation());
        assert!(!Error::Connect {
            host: "h".into(),
            port: 1,
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        }
        .is_protocol_violation());
    }
}
