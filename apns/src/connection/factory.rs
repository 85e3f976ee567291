//! C2 — builds one configured HTTP/2 connection and tracks the per-factory
//! exponential back-off between connect attempts (§4.2, P3).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls_pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::auth::TokenProvider;
use crate::config::ClientConfig;
use crate::error::ApnsError;
use crate::metrics::{FrameLogger, MetricsListener};

use super::handler::{self, ConnectionHandle, HandlerConfig};

const MAX_BACK_OFF_SECS: u64 = 60;

/// Builds connections for one pool. Shared by every connection the pool
/// creates; back-off state is the only mutable field and is accessed only
/// from the pool's single-mutator task, so a plain [`AtomicU64`] suffices.
pub struct ConnectionFactory {
    server_host: String,
    server_port: u16,
    server_authority: String,
    tls_config: Arc<rustls::ClientConfig>,
    connection_timeout: Option<Duration>,
    idle_ping_interval: Option<Duration>,
    close_after_idle: bool,
    token_provider: Option<Arc<TokenProvider>>,
    metrics: Arc<dyn MetricsListener>,
    frame_logger: Arc<dyn FrameLogger>,
    current_back_off: AtomicU64,
    next_id: AtomicU64,
}

impl ConnectionFactory {
    pub fn new(config: &ClientConfig, token_provider: Option<Arc<TokenProvider>>) -> Result<Self, ApnsError> {
        let tls_config = crate::tls::build_tls_config(
            &config.credentials,
            config.hostname_verification_enabled,
            config.use_alpn,
        )?;
        Ok(Self {
            server_host: config.server_host.clone(),
            server_port: config.server_port,
            server_authority: config.server_authority(),
            tls_config,
            connection_timeout: config.connection_timeout,
            idle_ping_interval: config.idle_ping_interval,
            close_after_idle: config.close_after_idle,
            token_provider,
            metrics: Arc::clone(&config.metrics_listener),
            frame_logger: Arc::clone(&config.frame_logger),
            current_back_off: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        })
    }

    /// Runs one connect attempt: sleeps for the current back-off, then
    /// TCP-connects, TLS-handshakes and performs the HTTP/2 handshake.
    /// Resets back-off to zero on success; doubles it (clamped to 60s,
    /// floored to 1s) on failure.
    pub async fn connect(&self) -> Result<ConnectionHandle, ApnsError> {
        let delay = self.current_back_off.load(Ordering::Acquire);
        if delay > 0 {
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        match self.try_connect().await {
            Ok(handle) => {
                self.current_back_off.store(0, Ordering::Release);
                Ok(handle)
            }
            Err(err) => {
                let next = next_back_off(delay);
                self.current_back_off.store(next, Ordering::Release);
                self.metrics.connection_creation_failed();
                tracing::warn!(error = %err, next_back_off_secs = next, "connection attempt failed");
                Err(err)
            }
        }
    }

    async fn try_connect(&self) -> Result<ConnectionHandle, ApnsError> {
        let attempt = async {
            let tcp = TcpStream::connect((self.server_host.as_str(), self.server_port))
                .await
                .map_err(|e| ApnsError::ConnectFailed(format!("tcp connect: {e}")))?;
            tcp.set_nodelay(true).ok();

            let server_name = ServerName::try_from(self.server_host.clone())
                .map_err(|e| ApnsError::ConnectFailed(format!("invalid server name: {e}")))?;
            let connector = TlsConnector::from(Arc::clone(&self.tls_config));
            let tls_stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| ApnsError::ConnectFailed(format!("tls handshake: {e}")))?;

            let (send_request, connection) = h2::client::handshake(tls_stream)
                .await
                .map_err(|e| ApnsError::ConnectFailed(format!("http2 handshake: {e}")))?;

            Ok::<_, ApnsError>((send_request, connection))
        };

        let (send_request, mut connection) = match self.connection_timeout {
            Some(timeout) => tokio::time::timeout(timeout, attempt)
                .await
                .map_err(|_| ApnsError::ConnectFailed("connection_timeout elapsed".into()))??,
            None => attempt.await?,
        };

        // `h2::client::handshake` only resolves after the server's initial
        // `SETTINGS` frame has been received, so readiness and the frame
        // log entry coincide here rather than at a separately observed event.
        self.frame_logger.on_frame(&crate::metrics::FrameEvent::Settings);

        let ping_pong = connection.ping_pong();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let handler_cfg = HandlerConfig {
            server_authority: self.server_authority.clone(),
            token_provider: self.token_provider.clone(),
            idle_ping_interval: self.idle_ping_interval,
            close_after_idle: self.close_after_idle,
            metrics: Arc::clone(&self.metrics),
            frame_logger: Arc::clone(&self.frame_logger),
        };

        let driver = async move {
            connection.await
        };

        Ok(handler::spawn(send_request, ping_pong, driver, handler_cfg, id))
    }
}

/// The back-off sequence described in §4.2/P3: `0, 1, 2, 4, 8, 16, 32, 60,
/// 60, …`. A pure function so P3 can be tested without any real I/O.
fn next_back_off(current: u64) -> u64 {
    if current == 0 {
        1
    } else {
        (current * 2).min(MAX_BACK_OFF_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn back_off_sequence_matches_p3() {
        let mut delay = 0;
        let mut sequence = vec![delay];
        for _ in 0..9 {
            delay = next_back_off(delay);
            sequence.push(delay);
        }
        assert_eq!(sequence, vec![0, 1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }
}
