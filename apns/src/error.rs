//! Error types for the core client (C1-C6) and its configuration boundary.
//!
//! Every fallible operation at a component boundary returns one of these
//! enums rather than a boxed `dyn Error` or a bare string, so callers can
//! match on the failure kind described in the component design.

use thiserror::Error;

/// Errors surfaced while building a [`crate::config::ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Both a TLS certificate/key pair and a signing key were supplied.
    #[error("credentials must be exactly one of {{certificate}} or {{signing key}}, not both")]
    MixedCredentials,

    /// Neither credential variant was supplied.
    #[error("no credentials configured: provide a TLS certificate or a signing key")]
    MissingCredentials,

    /// `server_address` could not be resolved to a host/port pair.
    #[error("invalid server address {0:?}")]
    InvalidServerAddress(String),

    /// The signing key PEM could not be parsed into an ES256 encoding key.
    #[error("invalid EC signing key: {0}")]
    InvalidSigningKey(#[from] jsonwebtoken::errors::Error),

    /// The TLS certificate chain or private key PEM could not be parsed.
    #[error("invalid TLS credential material: {0}")]
    InvalidTlsMaterial(String),

    /// `concurrent_connections` was zero.
    #[error("concurrent_connections must be at least 1")]
    ZeroPoolSize,
}

/// Errors surfaced by the core notification-sending path (C1-C5).
#[derive(Debug, Error)]
pub enum ApnsError {
    /// The stream-id space on a connection was exhausted before this
    /// request's write was accepted; the connection is being recycled.
    #[error("stream-id space exhausted on this connection")]
    StreamsExhausted,

    /// The connection carrying this request was lost before a reply arrived.
    /// Safe to retry on a fresh connection.
    #[error("connection closed before a reply was received")]
    StreamClosedBeforeReply,

    /// A local write (HEADERS/DATA frame) failed.
    #[error("failed to write request frames: {0}")]
    WriteFailure(#[source] h2::Error),

    /// The pool's bounded waiter queue was full.
    #[error("connection pool acquisition queue is full (limit {limit})")]
    RejectedAcquisition {
        /// The configured queue bound that was exceeded.
        limit: usize,
    },

    /// `send` was called after the client was closed.
    #[error("client is closed")]
    ClientClosed,

    /// The connect attempt could not establish a TLS+HTTP/2 connection.
    #[error("failed to establish connection: {0}")]
    ConnectFailed(String),

    /// Building the client configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors surfaced by the Live-Activity channel-management client (C6).
///
/// Unlike [`ApnsError`], a non-accepting HTTP status is not folded into a
/// successful response object here: channel-management callers expect a
/// typed error on any non-2xx/204 outcome.
#[derive(Debug, Error)]
#[error("channel management request failed with status {status}{}", apns_request_id.as_deref().map(|id| format!(" (apns-request-id: {id})")).unwrap_or_default())]
pub struct ChannelManagementError {
    /// The HTTP status code returned by the server.
    pub status: u16,
    /// The `apns-request-id` response header, when present.
    pub apns_request_id: Option<String>,
    /// The underlying cause, when the failure originated locally (transport,
    /// JSON parsing) rather than from the server's status code.
    #[source]
    pub cause: Option<ApnsError>,
}
