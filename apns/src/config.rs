//! Typed client configuration (§4.6).
//!
//! Construction failures — mixed or missing credentials, a zero-sized pool —
//! are caught at `build()` time, before any socket is opened, rather than
//! surfacing on the first `send()`.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::metrics::{FrameLogger, MetricsListener, NoopMetricsListener, TracingFrameLogger};
use crate::tls::Credentials;

/// Default interval between ES256 token regenerations (§4.1).
pub const DEFAULT_TOKEN_EXPIRATION: Duration = Duration::from_secs(50 * 60);
/// Default budget `Pool::close` waits for in-flight streams to drain.
pub const DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
/// Default notification-pool size.
pub const DEFAULT_CONCURRENT_CONNECTIONS: usize = 1;

/// Fully-resolved, immutable client configuration (§6's enumerated surface).
#[derive(Clone)]
pub struct ClientConfig {
    pub(crate) server_host: String,
    pub(crate) server_port: u16,
    pub(crate) hostname_verification_enabled: bool,
    pub(crate) credentials: Credentials,
    pub(crate) token_expiration: Duration,
    pub(crate) connection_timeout: Option<Duration>,
    pub(crate) idle_ping_interval: Option<Duration>,
    pub(crate) close_after_idle: bool,
    pub(crate) graceful_shutdown_timeout: Duration,
    pub(crate) concurrent_connections: usize,
    pub(crate) acquire_queue_cap: Option<usize>,
    pub(crate) metrics_listener: Arc<dyn MetricsListener>,
    pub(crate) frame_logger: Arc<dyn FrameLogger>,
    pub(crate) use_alpn: bool,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("hostname_verification_enabled", &self.hostname_verification_enabled)
            .field("credentials", &self.credentials)
            .field("token_expiration", &self.token_expiration)
            .field("connection_timeout", &self.connection_timeout)
            .field("idle_ping_interval", &self.idle_ping_interval)
            .field("close_after_idle", &self.close_after_idle)
            .field("graceful_shutdown_timeout", &self.graceful_shutdown_timeout)
            .field("concurrent_connections", &self.concurrent_connections)
            .field("acquire_queue_cap", &self.acquire_queue_cap)
            .field("use_alpn", &self.use_alpn)
            .finish()
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// APNs production notification endpoint, port 443.
    pub fn production() -> ClientConfigBuilder {
        ClientConfigBuilder::default().server_address("api.push.apple.com", 443)
    }

    /// APNs development/sandbox notification endpoint, port 443.
    pub fn development() -> ClientConfigBuilder {
        ClientConfigBuilder::default().server_address("api.development.push.apple.com", 443)
    }

    pub(crate) fn server_authority(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

/// Builder for [`ClientConfig`]. Every field has a setter; `build()` performs
/// the validation described in §4.6.
pub struct ClientConfigBuilder {
    server_host: Option<String>,
    server_port: u16,
    hostname_verification_enabled: bool,
    certificate: Option<Credentials>,
    signing_key: Option<Credentials>,
    token_expiration: Duration,
    connection_timeout: Option<Duration>,
    idle_ping_interval: Option<Duration>,
    close_after_idle: bool,
    graceful_shutdown_timeout: Duration,
    concurrent_connections: usize,
    acquire_queue_cap: Option<usize>,
    metrics_listener: Option<Arc<dyn MetricsListener>>,
    frame_logger: Option<Arc<dyn FrameLogger>>,
    use_alpn: bool,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self {
            server_host: None,
            server_port: 443,
            hostname_verification_enabled: true,
            certificate: None,
            signing_key: None,
            token_expiration: DEFAULT_TOKEN_EXPIRATION,
            connection_timeout: None,
            idle_ping_interval: None,
            close_after_idle: false,
            graceful_shutdown_timeout: DEFAULT_GRACEFUL_SHUTDOWN_TIMEOUT,
            concurrent_connections: DEFAULT_CONCURRENT_CONNECTIONS,
            acquire_queue_cap: None,
            metrics_listener: None,
            frame_logger: None,
            use_alpn: false,
        }
    }
}

impl ClientConfigBuilder {
    pub fn server_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.server_host = Some(host.into());
        self.server_port = port;
        self
    }

    pub fn hostname_verification_enabled(mut self, enabled: bool) -> Self {
        self.hostname_verification_enabled = enabled;
        self
    }

    /// Sets mTLS client-certificate credentials. Mutually exclusive with
    /// [`Self::signing_key`].
    pub fn certificate(mut self, cert_chain_pem: &[u8], private_key_pem: &[u8]) -> Result<Self, ConfigError> {
        self.certificate = Some(crate::tls::load_certificate_pem(cert_chain_pem, private_key_pem)?);
        Ok(self)
    }

    /// Sets token-based credentials. Mutually exclusive with
    /// [`Self::certificate`].
    pub fn signing_key(
        mut self,
        ec_private_key_pem: impl Into<Vec<u8>>,
        key_id: impl Into<String>,
        team_id: impl Into<String>,
    ) -> Self {
        self.signing_key = Some(Credentials::SigningKey {
            ec_private_key_pem: ec_private_key_pem.into(),
            key_id: key_id.into(),
            team_id: team_id.into(),
        });
        self
    }

    pub fn token_expiration(mut self, duration: Duration) -> Self {
        self.token_expiration = duration;
        self
    }

    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.connection_timeout = Some(duration);
        self
    }

    pub fn idle_ping_interval(mut self, duration: Duration) -> Self {
        self.idle_ping_interval = Some(duration);
        self
    }

    pub fn close_after_idle(mut self, close: bool) -> Self {
        self.close_after_idle = close;
        self
    }

    pub fn graceful_shutdown_timeout(mut self, duration: Duration) -> Self {
        self.graceful_shutdown_timeout = duration;
        self
    }

    pub fn concurrent_connections(mut self, n: usize) -> Self {
        self.concurrent_connections = n;
        self
    }

    /// Caps how many `send()` callers may queue behind a full pool at once.
    /// Unset (the default) means unbounded queueing; a caller beyond the cap
    /// fails immediately with [`crate::error::ApnsError::RejectedAcquisition`]
    /// instead of waiting indefinitely.
    pub fn acquire_queue_cap(mut self, cap: usize) -> Self {
        self.acquire_queue_cap = Some(cap);
        self
    }

    pub fn metrics_listener(mut self, listener: Arc<dyn MetricsListener>) -> Self {
        self.metrics_listener = Some(listener);
        self
    }

    pub fn frame_logger(mut self, logger: Arc<dyn FrameLogger>) -> Self {
        self.frame_logger = Some(logger);
        self
    }

    /// Negotiate `h2` via ALPN instead of connecting directly with prior
    /// knowledge. Off by default for the production/development endpoints;
    /// the mock test server is the primary reason to turn it on.
    pub fn use_alpn(mut self, use_alpn: bool) -> Self {
        self.use_alpn = use_alpn;
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        let credentials = match (self.certificate, self.signing_key) {
            (Some(_), Some(_)) => return Err(ConfigError::MixedCredentials),
            (None, None) => return Err(ConfigError::MissingCredentials),
            (Some(cert), None) => cert,
            (None, Some(key)) => key,
        };

        let server_host = self.server_host.ok_or_else(|| ConfigError::InvalidServerAddress("<unset>".into()))?;
        if server_host.trim().is_empty() || self.server_port == 0 {
            return Err(ConfigError::InvalidServerAddress(format!("{server_host}:{}", self.server_port)));
        }

        if self.concurrent_connections == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }

        Ok(ClientConfig {
            server_host,
            server_port: self.server_port,
            hostname_verification_enabled: self.hostname_verification_enabled,
            credentials,
            token_expiration: self.token_expiration,
            connection_timeout: self.connection_timeout,
            idle_ping_interval: self.idle_ping_interval,
            close_after_idle: self.close_after_idle,
            graceful_shutdown_timeout: self.graceful_shutdown_timeout,
            concurrent_connections: self.concurrent_connections,
            acquire_queue_cap: self.acquire_queue_cap,
            metrics_listener: self.metrics_listener.unwrap_or_else(|| Arc::new(NoopMetricsListener)),
            frame_logger: self.frame_logger.unwrap_or_else(|| Arc::new(TracingFrameLogger)),
            use_alpn: self.use_alpn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_credentials() {
        let err = ClientConfig::builder()
            .server_address("localhost", 4433)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredentials));
    }

    #[test]
    fn rejects_mixed_credentials() {
        const CERT_PEM: &str = "-----BEGIN CERTIFICATE-----\ntest\n-----END CERTIFICATE-----\n";
        let builder = ClientConfig::builder()
            .server_address("localhost", 4433)
            .signing_key(b"not-really-a-key".to_vec(), "KEYID12345", "TEAMID1234");
        // A malformed certificate still sets the builder's certificate slot
        // (the parse failure is independent of the mixing check), so we
        // exercise mixing directly against the builder's two credential
        // fields instead of relying on `certificate()`'s PEM parser.
        let mut builder = builder;
        builder.certificate = Some(crate::tls::Credentials::Certificate {
            cert_chain: vec![],
            private_key: std::sync::Arc::new(
                rustls::pki_types::PrivateKeyDer::Pkcs8(rustls::pki_types::PrivatePkcs8KeyDer::from(vec![])),
            ),
        });
        let _ = CERT_PEM;
        let err = builder.build().unwrap_err();
        assert!(matches!(err, ConfigError::MixedCredentials));
    }

    #[test]
    fn rejects_zero_pool_size() {
        let err = ClientConfig::builder()
            .server_address("localhost", 4433)
            .signing_key(b"key".to_vec(), "KEYID12345", "TEAMID1234")
            .concurrent_connections(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroPoolSize));
    }

    #[test]
    fn rejects_empty_server_host() {
        let err = ClientConfig::builder()
            .server_address("", 443)
            .signing_key(b"key".to_vec(), "KEYID12345", "TEAMID1234")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidServerAddress(_)));
    }
}
