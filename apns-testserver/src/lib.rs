//! In-process mock HTTP/2 server for `apns`'s end-to-end tests.
//!
//! Speaks real TLS (a freshly minted self-signed certificate) and real
//! HTTP/2 (via `h2::server`, the same crate the client rides), so the tests
//! built on top of this exercise the client's actual wire behavior rather
//! than a stand-in transport. What it does *not* do is implement APNs: each
//! request is resolved to a scripted [`Verdict`] by a [`Verifier`] the test
//! supplies.

mod tls;
mod verdict;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use bytes::Bytes;
use h2::server::SendResponse;
use h2::RecvStream;
use http::request::Parts;
use http::Request;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

pub use verdict::{ScriptedVerifier, Verdict, Verifier};

/// Installs the process-wide `ring` crypto provider `rustls` needs, exactly
/// once. Both the mock server and its callers' `apns::Client`s need this
/// done before building any `rustls::ClientConfig`/`ServerConfig`; tests
/// that build a `Client` directly should call this too.
pub fn ensure_crypto_provider_installed() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Tunables that are not per-request (those belong on a [`Verifier`]).
#[derive(Debug, Clone, Default)]
pub struct MockServerConfig {
    /// Send `GOAWAY` on a connection once it has accepted this many
    /// requests (used to exercise P8).
    pub goaway_after_requests: Option<usize>,
}

/// A running mock server. Dropping it stops accepting new connections;
/// already-spawned per-connection tasks run to completion independently.
pub struct MockServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    /// Starts a server bound to an ephemeral `127.0.0.1` port, using
    /// `verifier` to resolve every request and the default (unlimited)
    /// configuration.
    pub async fn start(verifier: Arc<dyn Verifier>) -> std::io::Result<Self> {
        Self::start_with_config(verifier, MockServerConfig::default()).await
    }

    pub async fn start_with_config(
        verifier: Arc<dyn Verifier>,
        config: MockServerConfig,
    ) -> std::io::Result<Self> {
        ensure_crypto_provider_installed();

        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let tls_acceptor = TlsAcceptor::from(tls::build_self_signed_server_config());
        let shutdown = CancellationToken::new();
        let config = Arc::new(config);

        let accept_task = tokio::spawn(accept_loop(listener, tls_acceptor, verifier, config, shutdown.clone()));

        Ok(Self { addr, shutdown, accept_task })
    }

    /// The `127.0.0.1:<port>` address to hand to
    /// `ClientConfig::builder().server_address(...)`.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// A `ClientConfigBuilder` pre-pointed at this server with hostname
    /// verification disabled (the server's certificate is self-signed for
    /// `localhost`, not issued by a trusted root). Callers still need to
    /// supply credentials before calling `build()`.
    pub fn client_config(&self) -> apns::ClientConfigBuilder {
        apns::ClientConfig::builder()
            .server_address(self.host(), self.port())
            .hostname_verification_enabled(false)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    tls_acceptor: TlsAcceptor,
    verifier: Arc<dyn Verifier>,
    config: Arc<MockServerConfig>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let Ok((tcp, _peer)) = accepted else { continue };
                tcp.set_nodelay(true).ok();
                let tls_acceptor = tls_acceptor.clone();
                let verifier = Arc::clone(&verifier);
                let config = Arc::clone(&config);
                tokio::spawn(async move {
                    match tls_acceptor.accept(tcp).await {
                        Ok(tls_stream) => serve_connection(tls_stream, verifier, config).await,
                        Err(err) => tracing::debug!(error = %err, "mock server tls handshake failed"),
                    }
                });
            }
        }
    }
}

async fn serve_connection<IO>(io: IO, verifier: Arc<dyn Verifier>, config: Arc<MockServerConfig>)
where
    IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let mut connection = match h2::server::handshake(io).await {
        Ok(connection) => connection,
        Err(err) => {
            tracing::debug!(error = %err, "mock server http/2 handshake failed");
            return;
        }
    };

    let attempts: Arc<Mutex<HashMap<String, usize>>> = Arc::new(Mutex::new(HashMap::new()));
    let accepted = Arc::new(AtomicUsize::new(0));

    loop {
        match connection.accept().await {
            Some(Ok((request, respond))) => {
                let n = accepted.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(limit) = config.goaway_after_requests {
                    if n >= limit {
                        connection.graceful_shutdown();
                    }
                }
                let verifier = Arc::clone(&verifier);
                let attempts = Arc::clone(&attempts);
                tokio::spawn(async move {
                    serve_stream(request, respond, verifier, attempts).await;
                });
            }
            Some(Err(err)) => {
                tracing::debug!(error = %err, "mock server connection error");
                break;
            }
            None => break,
        }
    }
}

async fn serve_stream(
    request: Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
    verifier: Arc<dyn Verifier>,
    attempts: Arc<Mutex<HashMap<String, usize>>>,
) {
    let (parts, body) = request.into_parts();
    if let Err(err) = drain_body(body).await {
        tracing::debug!(error = %err, "mock server failed reading request body");
    }

    let key = request_key(&parts);
    let attempt = {
        let mut attempts = attempts.lock().expect("mock server attempts lock poisoned");
        let counter = attempts.entry(key.clone()).or_insert(0);
        *counter += 1;
        *counter
    };

    match verifier.verdict(&key, attempt) {
        Verdict::RefuseStream => {
            let _ = respond.send_reset(h2::Reason::REFUSED_STREAM);
        }
        Verdict::InternalError => {
            let _ = respond.send_reset(h2::Reason::INTERNAL_ERROR);
        }
        Verdict::Respond { status, headers, body } => {
            let mut builder = http::Response::builder().status(status);
            for (name, value) in headers {
                builder = builder.header(name, value);
            }
            let response = builder.body(()).expect("status and header values are always valid here");
            match respond.send_response(response, body.is_empty()) {
                Ok(mut send_stream) if !body.is_empty() => {
                    if let Err(err) = send_stream.send_data(body, true) {
                        tracing::debug!(error = %err, "mock server failed sending response body");
                    }
                }
                Ok(_) => {}
                Err(err) => tracing::debug!(error = %err, "mock server failed sending response headers"),
            }
        }
    }
}

async fn drain_body(mut body: RecvStream) -> Result<Bytes, h2::Error> {
    let mut collected = bytes::BytesMut::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk?;
        body.flow_control().release_capacity(chunk.len())?;
        collected.extend_from_slice(&chunk);
    }
    Ok(collected.freeze())
}

/// Maps a request onto the key a [`Verifier`] scripts against: the device
/// token for notification sends, the `apns-channel-id` header for
/// per-channel management requests, or the bare path otherwise (covers
/// create-channel and list-channels, which address no single key).
fn request_key(parts: &Parts) -> String {
    if let Some(channel_id) = parts.headers.get("apns-channel-id").and_then(|v| v.to_str().ok()) {
        return channel_id.to_string();
    }
    if let Some(token) = parts.uri.path().strip_prefix("/3/device/") {
        return token.to_string();
    }
    parts.uri.path().to_string()
}
