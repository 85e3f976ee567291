//! C3 — the per-connection stream multiplexer.
//!
//! `h2` already multiplexes streams over one connection (stream-id
//! allocation, `MAX_CONCURRENT_STREAMS` backpressure via `poll_ready`); this
//! module adds the APNs-specific behavior layered on top of it: request
//! intake, idle-ping keep-alive, `REFUSED_STREAM` and `ExpiredProviderToken`
//! transparent retry, and connection teardown on `GOAWAY`/idle-ping timeout.
//!
//! One task owns the `h2::client::Connection` drive loop and is the single
//! place that observes the connection's liveness; per-request work (write,
//! await response, the two retries) runs in lightweight tasks that share a
//! clone of the `h2::client::SendRequest` handle, mirroring how the `h2`
//! crate's own client examples structure concurrent request handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use h2::client::SendRequest;
use http::{Request, Version};
use tokio::sync::mpsc;

use crate::auth::TokenProvider;
use crate::error::ApnsError;
use crate::metrics::{FrameEvent, FrameLogger, MetricsListener};

use super::stream::{RawResponse, RejectionPeek, RequestSpec, Waiter};

pub(crate) struct HandlerConfig {
    pub server_authority: String,
    pub token_provider: Option<Arc<TokenProvider>>,
    pub idle_ping_interval: Option<Duration>,
    /// When set, an idle tick closes the connection outright instead of
    /// sending a keep-alive ping; the pool opens a fresh connection on the
    /// next `acquire()` rather than paying for a ping round-trip on a
    /// connection nobody is currently using.
    pub close_after_idle: bool,
    pub metrics: Arc<dyn MetricsListener>,
    pub frame_logger: Arc<dyn FrameLogger>,
}

/// A live connection's intake side, held by the pool.
pub struct ConnectionHandle {
    submit: mpsc::Sender<(RequestSpec, Waiter)>,
    closed: Arc<AtomicBool>,
    pub(crate) id: u64,
}

impl ConnectionHandle {
    /// Submits a request and awaits its reply. Fails with
    /// [`ApnsError::StreamClosedBeforeReply`] if the connection has already
    /// gone away before intake could accept the request.
    pub async fn write(&self, req: RequestSpec) -> Result<RawResponse, ApnsError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self.submit.send((req, tx)).await.is_err() {
            return Err(ApnsError::StreamClosedBeforeReply);
        }
        rx.await.unwrap_or(Err(ApnsError::StreamClosedBeforeReply))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the connection unusable: it will never again be handed out by
    /// the pool. The intake task drains and fails any submissions already
    /// queued; the underlying socket is reclaimed once both task handles
    /// and their `h2` resources are dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Spawns the connection-owning task and returns the handle the pool stores.
///
/// `ready` resolves once the handshake (and, with it, the initial `SETTINGS`
/// exchange `h2` performs as part of completing the handshake) has
/// succeeded; the caller (the factory) is responsible for awaiting it before
/// handing the connection to the pool.
pub(crate) fn spawn(
    send_request: SendRequest<Bytes>,
    ping_pong: Option<h2::PingPong>,
    connection_driver: impl std::future::Future<Output = Result<(), h2::Error>> + Send + 'static,
    cfg: HandlerConfig,
    id: u64,
) -> ConnectionHandle {
    let closed = Arc::new(AtomicBool::new(false));
    let (submit_tx, submit_rx) = mpsc::channel(256);

    tokio::spawn(drive_connection(connection_driver, Arc::clone(&closed), id));
    tokio::spawn(run_intake(send_request, ping_pong, submit_rx, cfg, Arc::clone(&closed), id));

    ConnectionHandle { submit: submit_tx, closed, id }
}

async fn drive_connection(
    connection_driver: impl std::future::Future<Output = Result<(), h2::Error>>,
    closed: Arc<AtomicBool>,
    id: u64,
) {
    match connection_driver.await {
        Ok(()) => tracing::debug!(connection_id = id, "connection closed cleanly"),
        Err(err) => tracing::debug!(connection_id = id, error = %err, "connection closed with error"),
    }
    closed.store(true, Ordering::Release);
}

async fn run_intake(
    mut send_request: SendRequest<Bytes>,
    mut ping_pong: Option<h2::PingPong>,
    mut submit_rx: mpsc::Receiver<(RequestSpec, Waiter)>,
    cfg: HandlerConfig,
    closed: Arc<AtomicBool>,
    id: u64,
) {
    let cfg = Arc::new(cfg);
    // `interval_at` rather than `interval`: the latter's first `tick()`
    // fires immediately, which would send the idle ping (or, with
    // `close_after_idle`, tear the connection down) the instant it is
    // created rather than after a genuine `idle_ping_interval` of silence.
    let mut idle_ticker = cfg
        .idle_ping_interval
        .map(|period| tokio::time::interval_at(tokio::time::Instant::now() + period, period));

    loop {
        let idle_tick = async {
            match idle_ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                    true
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            maybe_req = submit_rx.recv() => {
                let Some((req, waiter)) = maybe_req else { break };
                if closed.load(Ordering::Acquire) {
                    let _ = waiter.send(Err(ApnsError::StreamClosedBeforeReply));
                    continue;
                }
                match send_request.ready().await {
                    Ok(()) => {
                        let handle = send_request.clone();
                        let cfg = Arc::clone(&cfg);
                        tokio::spawn(async move {
                            serve_request(handle, cfg, req, waiter).await;
                        });
                    }
                    Err(_) => {
                        let _ = waiter.send(Err(ApnsError::StreamsExhausted));
                        closed.store(true, Ordering::Release);
                        break;
                    }
                }
            }

            fired = idle_tick => {
                if fired {
                    if cfg.close_after_idle {
                        tracing::debug!(connection_id = id, "idle with close_after_idle set, closing connection");
                        closed.store(true, Ordering::Release);
                        break;
                    }
                    if let Err(err) = send_idle_ping(&mut ping_pong, &cfg, id).await {
                        tracing::debug!(connection_id = id, error = %err, "idle ping failed, closing connection");
                        closed.store(true, Ordering::Release);
                        break;
                    }
                }
            }
        }

        if closed.load(Ordering::Acquire) {
            break;
        }
    }

    // Drain remaining submissions so no caller hangs forever on a channel
    // whose other end stopped listening.
    submit_rx.close();
    while let Ok((_, waiter)) = submit_rx.try_recv() {
        let _ = waiter.send(Err(ApnsError::StreamClosedBeforeReply));
    }
}

async fn send_idle_ping(
    ping_pong: &mut Option<h2::PingPong>,
    cfg: &HandlerConfig,
    id: u64,
) -> Result<(), h2::Error> {
    let Some(pp) = ping_pong.as_mut() else {
        // No `PingPong` handle (already taken, or the connection never
        // exposed one); nothing to do until the next idle tick.
        return Ok(());
    };
    cfg.frame_logger.on_frame(&FrameEvent::Ping { ack: false });
    let payload = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64)
        .to_be_bytes();
    let deadline = cfg
        .idle_ping_interval
        .map(|d| d / 2)
        .unwrap_or(Duration::from_secs(5));
    match tokio::time::timeout(deadline, pp.ping(payload)).await {
        Ok(Ok(())) => {
            tracing::trace!(connection_id = id, "idle ping acknowledged");
            Ok(())
        }
        Ok(Err(err)) => Err(err),
        Err(_elapsed) => Err(h2::Error::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "ping ack not received within idle_ping_interval/2",
        ))),
    }
}

async fn serve_request(
    mut send_request: SendRequest<Bytes>,
    cfg: Arc<HandlerConfig>,
    mut req: RequestSpec,
    waiter: Waiter,
) {
    let mut refused_stream_retried = false;
    let mut expired_token_retried = false;

    loop {
        let bearer_token = cfg.token_provider.as_deref().map(TokenProvider::current_token);
        let http_req = match build_http_request(&req, bearer_token.as_deref(), &cfg.server_authority) {
            Ok(r) => r,
            Err(err) => {
                let _ = waiter.send(Err(err));
                return;
            }
        };

        cfg.frame_logger.on_frame(&FrameEvent::Headers { stream_id: 0, end_stream: false });
        let (response_fut, mut send_stream) = match send_request.send_request(http_req, false) {
            Ok(pair) => pair,
            Err(err) => {
                // `write_failure` is the facade's job (§4.5): it fires once,
                // in `Client::send`, on the `Err(WriteFailure)` this returns.
                let _ = waiter.send(Err(ApnsError::WriteFailure(err)));
                return;
            }
        };

        cfg.frame_logger.on_frame(&FrameEvent::Data { stream_id: 0, len: req.body.len(), end_stream: true });
        if let Err(err) = send_stream.send_data(req.body.clone(), true) {
            let _ = waiter.send(Err(ApnsError::WriteFailure(err)));
            return;
        }
        cfg.metrics.notification_sent(req_topic(&req));

        let response = match response_fut.await {
            Ok(r) => r,
            Err(err) => {
                if err.reason() == Some(h2::Reason::REFUSED_STREAM) && !refused_stream_retried {
                    refused_stream_retried = true;
                    cfg.frame_logger.on_frame(&FrameEvent::RstStream { stream_id: 0, reason: "REFUSED_STREAM" });
                    tracing::debug!("stream refused, retrying on a fresh stream");
                    continue;
                }
                let _ = waiter.send(Err(ApnsError::StreamClosedBeforeReply));
                return;
            }
        };

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = match read_body(response.into_body()).await {
            Ok(b) => b,
            Err(err) => {
                let _ = waiter.send(Err(ApnsError::WriteFailure(err)));
                return;
            }
        };

        if req.retry_on_expired_token
            && !expired_token_retried
            && !(200..300).contains(&status)
            && is_expired_provider_token(&body)
        {
            if let (Some(provider), Some(stale)) = (&cfg.token_provider, &bearer_token) {
                provider.invalidate(stale);
            }
            expired_token_retried = true;
            continue;
        }

        let _ = waiter.send(Ok(RawResponse { status, headers, body }));
        return;
    }
}

fn req_topic(req: &RequestSpec) -> Option<&str> {
    req.headers
        .iter()
        .find(|(name, _)| name.as_str() == "apns-topic")
        .and_then(|(_, v)| v.to_str().ok())
}

fn is_expired_provider_token(body: &Bytes) -> bool {
    serde_json::from_slice::<RejectionPeek>(body)
        .map(|peek| peek.reason == "ExpiredProviderToken")
        .unwrap_or(false)
}

fn build_http_request(
    req: &RequestSpec,
    bearer_token: Option<&str>,
    authority: &str,
) -> Result<Request<()>, ApnsError> {
    let mut builder = Request::builder()
        .method(req.method.clone())
        .version(Version::HTTP_2)
        .uri(format!("https://{authority}{}", req.path));

    for (name, value) in &req.headers {
        builder = builder.header(name, value);
    }

    if let Some(token) = bearer_token {
        builder = builder.header(http::header::AUTHORIZATION, format!("bearer {token}"));
    }

    builder
        .body(())
        .map_err(|e| ApnsError::ConnectFailed(format!("malformed request: {e}")))
}

async fn read_body(mut body: h2::RecvStream) -> Result<Bytes, h2::Error> {
    let mut collected = bytes::BytesMut::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        body.flow_control().release_capacity(chunk.len())?;
        collected.extend_from_slice(&chunk);
    }
    Ok(collected.freeze())
}
