//! Types shared between the connection handler and its callers: the request
//! shape C3 writes to the wire, and the raw response it hands back before
//! C5/C6 interpret status codes into typed outcomes.

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method};
use tokio::sync::oneshot;

use crate::error::ApnsError;

/// One request accepted by a connection handler.
///
/// Interpretation of the response (accepted/rejected, typed channel-mgmt
/// outcomes) happens one layer up in C5/C6; the handler only needs enough
/// information to write the frames and to drive the two transparent
/// retries described in the component design.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    /// Headers beyond `:method`/`:scheme`/`:authority`/`:path` and
    /// `authorization`, which the handler attaches itself.
    pub headers: Vec<(HeaderName, HeaderValue)>,
    pub body: Bytes,
    /// Notifications retry transparently on `ExpiredProviderToken`;
    /// channel-management requests do not (channel endpoints use the same
    /// bearer token but a stale one there is surfaced to the caller as an
    /// ordinary non-2xx status, not specially retried).
    pub retry_on_expired_token: bool,
}

/// The server's reply, before any status-code interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

pub type Waiter = oneshot::Sender<Result<RawResponse, ApnsError>>;

/// Minimal shape of an APNs rejection body, used only to detect
/// `ExpiredProviderToken` for the transparent-retry path; full parsing into
/// [`crate::notification::RejectionReason`] happens in the client facade.
#[derive(Debug, serde::Deserialize)]
pub(crate) struct RejectionPeek {
    pub reason: String,
}
