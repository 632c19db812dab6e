use std::path::PathBuf;

/// Top-level error for everything the core can fail with.
///
/// Protocol problems on inbound frames are not in here: they are reported
/// through [`crate::session::Inbound::Discarded`] and the session carries on.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Malformed configuration. Never retried.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid server endpoint `{token}`: {reason}")]
    InvalidEndpoint { token: String, reason: String },

    #[error("TLS endpoints need a certificate trust store")]
    MissingTrustStore,

    #[error("host `{0}` cannot be used as a certificate pin name")]
    InvalidPinHost(String),
}

/// Socket-level failures, reported to the owning layer as-is.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {server}: {source}")]
    Dial {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS handshake with {server} failed: {source}")]
    Tls {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection is closed")]
    Closed,

    #[error("no frame received within {0:?}")]
    ReadTimeout(std::time::Duration),
}

/// Certificate pinning failures. A trust failure never falls back to
/// unpinned trust.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("certificate presented by {host} does not match the pinned certificate")]
    PinMismatch { host: String },

    #[error("no certificate pinned for {host} and first-use pinning is disabled")]
    NotPinned { host: String },

    #[error("{host} did not present a certificate")]
    NoPeerCertificate { host: String },

    #[error("pinned certificate at {} is not valid PEM: {reason}", path.display())]
    InvalidPem { path: PathBuf, reason: String },

    #[error("trust store I/O at {}: {source}", path.display())]
    TrustStoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

/// An inbound frame that could not be used. The offending frame is dropped
/// and the session continues.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("frame is not a JSON object: {0}")]
    NotAnObject(serde_json::Value),

    #[error("frame id is not an unsigned integer: {0}")]
    InvalidId(serde_json::Value),

    #[error("frame exceeds {max_bytes} bytes")]
    FrameTooLarge { max_bytes: usize },

    #[error("response for unknown wire id {0}")]
    UnknownWireId(u64),
}

/// Error returned by the server inside a response payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    #[error("server error {code}: {message}")]
    ServerError { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("wire id {0} is already in flight")]
    DuplicateWireId(u64),
}
