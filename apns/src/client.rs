//! C5 — the APNs client facade: acquire a connection, write, release,
//! interpret the reply.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method};
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::config::ClientConfig;
use crate::connection::{ConnectionFactory, RawResponse, RequestSpec};
use crate::error::ApnsError;
use crate::metrics::MetricsListener;
use crate::notification::{NotificationResponse, PushNotification, RejectionBody};
use crate::pool::ConnectionPool;
use crate::tls::Credentials;

/// A configured APNs client: one connection pool, one shared token provider
/// (when using token-based authentication), one metrics sink.
pub struct Client {
    pool: ConnectionPool,
    token_provider: Option<Arc<TokenProvider>>,
    metrics: Arc<dyn MetricsListener>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, ApnsError> {
        let token_provider = match &config.credentials {
            Credentials::SigningKey { ec_private_key_pem, key_id, team_id } => Some(TokenProvider::new(
                ec_private_key_pem,
                key_id.clone(),
                team_id.clone(),
                config.token_expiration,
            )?),
            Credentials::Certificate { .. } => None,
        };

        let metrics = Arc::clone(&config.metrics_listener);
        let factory = Arc::new(ConnectionFactory::new(&config, token_provider.clone())?);
        let pool = ConnectionPool::new(
            factory,
            config.concurrent_connections,
            config.acquire_queue_cap,
            config.graceful_shutdown_timeout,
            Arc::clone(&metrics),
        );

        Ok(Self { pool, token_provider, metrics })
    }

    /// Sends one notification. Rejections are returned as data
    /// (`accepted = false`), never as an `Err`; only transport-level
    /// failures are `Err`.
    pub async fn send(&self, notification: PushNotification) -> Result<NotificationResponse, ApnsError> {
        let topic = notification.topic.clone();
        let started = Instant::now();

        let req = build_request_spec(&notification)?;
        let conn = self.pool.acquire().await?;
        let result = conn.write(req).await;
        self.pool.release(conn).await;

        let raw = match result {
            Ok(raw) => raw,
            Err(err) => {
                self.metrics.write_failure(topic.as_deref());
                return Err(err);
            }
        };

        let response = interpret_response(raw, notification.apns_id);
        self.metrics.notification_acknowledged(&response, started.elapsed());
        Ok(response)
    }

    /// Closes the pool (draining in-flight work up to the configured
    /// graceful-shutdown budget) and stops the token provider's background
    /// refresh task, if one is running.
    pub async fn close(&self) {
        self.pool.close().await;
        if let Some(provider) = &self.token_provider {
            provider.shutdown();
        }
    }
}

fn build_request_spec(notification: &PushNotification) -> Result<RequestSpec, ApnsError> {
    let mut headers = Vec::new();
    for (name, value) in notification.apns_headers() {
        let name = HeaderName::from_static(name);
        let value = HeaderValue::from_str(&value)
            .map_err(|e| ApnsError::ConnectFailed(format!("invalid header value: {e}")))?;
        headers.push((name, value));
    }

    Ok(RequestSpec {
        method: Method::POST,
        path: notification.path(),
        headers,
        body: Bytes::from(notification.payload.clone()),
        retry_on_expired_token: true,
    })
}

fn interpret_response(raw: RawResponse, requested_apns_id: Option<Uuid>) -> NotificationResponse {
    let apns_id = raw
        .headers
        .get("apns-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .or(requested_apns_id);
    let apns_unique_id = raw
        .headers
        .get("apns-unique-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok());

    if (200..300).contains(&raw.status) {
        return NotificationResponse {
            accepted: true,
            apns_id,
            status_code: raw.status,
            rejection_reason: None,
            token_invalidation_at: None,
            apns_unique_id,
        };
    }

    let rejection: Option<RejectionBody> = serde_json::from_slice(&raw.body).ok();
    let token_invalidation_at = rejection
        .as_ref()
        .and_then(|r| r.timestamp)
        .and_then(chrono::DateTime::from_timestamp_millis);

    NotificationResponse {
        accepted: false,
        apns_id,
        status_code: raw.status,
        rejection_reason: rejection.map(|r| r.reason),
        token_invalidation_at,
        apns_unique_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interprets_successful_response() {
        let mut headers = http::HeaderMap::new();
        headers.insert("apns-id", "00000000-0000-0000-0000-000000000001".parse().unwrap());
        let raw = RawResponse { status: 200, headers, body: Bytes::new() };

        let response = interpret_response(raw, None);
        assert!(response.accepted);
        assert_eq!(response.status_code, 200);
        assert_eq!(response.apns_id.unwrap().to_string(), "00000000-0000-0000-0000-000000000001");
    }

    #[test]
    fn interprets_unregistered_rejection_with_timestamp() {
        let body = Bytes::from_static(br#"{"reason":"Unregistered","timestamp":1700000000000}"#);
        let raw = RawResponse { status: 410, headers: http::HeaderMap::new(), body };

        let response = interpret_response(raw, None);
        assert!(!response.accepted);
        assert_eq!(response.rejection_reason.as_deref(), Some("Unregistered"));
        assert_eq!(
            response.token_invalidation_at.unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
    }
}
