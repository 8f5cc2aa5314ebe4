//! Error types for the tunnel core, one enum per module boundary.

use thiserror::Error;

/// Errors from encoding/decoding the wire frame format.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame too short: {0} bytes, minimum 13")]
    TooShort(usize),
    #[error("unknown flag byte {0:#04x}")]
    UnknownFlag(u8),
    #[error("tag verification failed")]
    BadTag,
}

/// Errors from the hand-rolled WebSocket handshake and framing.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http request too large")]
    RequestTooLarge,
    #[error("not a websocket upgrade request")]
    NotUpgrade,
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    #[error("upgrade rejected: {0}")]
    Rejected(String),
    #[error("invalid Sec-WebSocket-Accept")]
    BadAccept,
    #[error("frame exceeds maximum size")]
    FrameTooLarge,
    #[error("connection closed by peer")]
    Closed,
}

/// Errors surfaced while a transport is alive.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Ws(#[from] WsError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("transport is closed")]
    Closed,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from the upgrade/authentication path on the server.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("unknown hash algorithm {0:?}")]
    UnknownHash(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error(transparent)]
    Ws(#[from] WsError),
}

/// Errors from the SOCKS5 handshake collaborator.
#[derive(Debug, Error)]
pub enum Socks5Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a SOCKS5 client greeting")]
    BadVersion,
    #[error("command not supported")]
    CommandNotSupported,
    #[error("address type not supported")]
    AddressNotSupported,
}

/// Errors from self-signed certificate generation.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("failed to generate key pair: {0}")]
    KeyGeneration(String),
    #[error("failed to generate certificate: {0}")]
    CertGeneration(String),
    #[error("invalid host name: {0}")]
    InvalidHost(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
