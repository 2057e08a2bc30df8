use std::time::Duration;

use thiserror::Error;

/// Failure of the underlying tunnel connection.
///
/// Any of these marks the connection as dead: the relay prunes it from the
/// registry, the host drops the session and redials.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to encode frame: {0}")]
    Encode(serde_json::Error),

    #[error("failed to decode frame: {0}")]
    Decode(serde_json::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A peer sent something the protocol does not allow at this point.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("got wrong type/domain: {kind}/{domain}")]
    BadRegistration { kind: String, domain: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("domain {0} not found")]
    DomainNotFound(String),

    #[error("could not find {domain}/{id} to dump")]
    ConnectionNotFound { domain: String, id: u64 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("missing data: scheme")]
    MissingScheme,

    #[error("missing comma separator")]
    MissingSeparator,

    #[error("invalid base64 payload: {0}")]
    Base64(String),
}

/// Terminal outcome of serving one public request through the tunnel.
#[derive(Error, Debug)]
pub enum RouteError {
    #[error("no connections available for domain {0}")]
    NoConnections(String),

    #[error("invalid response")]
    InvalidResponse,

    /// The host answered but reported failure; the text is its own.
    #[error("{0}")]
    HostReported(String),

    #[error("problem decoding payload: {0}")]
    Decode(#[from] CodecError),
}

/// Why a `/ws` connection was turned away before registration.
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
