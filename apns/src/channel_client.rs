//! C6 — the Live-Activity channel-management client. Same shape as C5, but
//! every non-accepting outcome is a typed error rather than a response
//! object with `accepted = false`.

use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method};

use crate::auth::TokenProvider;
use crate::channel::{ChannelConfig, ChannelConfigWire, ChannelList, ChannelListWire, CreateChannelResponse, MessageStoragePolicy};
use crate::config::ClientConfig;
use crate::connection::{ConnectionFactory, RawResponse, RequestSpec};
use crate::error::{ApnsError, ChannelManagementError};
use crate::pool::ConnectionPool;
use crate::tls::Credentials;

pub struct ChannelManagementClient {
    pool: ConnectionPool,
    token_provider: Option<Arc<TokenProvider>>,
    bundle_id: String,
}

impl ChannelManagementClient {
    pub fn new(config: ClientConfig, bundle_id: impl Into<String>) -> Result<Self, ApnsError> {
        let token_provider = match &config.credentials {
            Credentials::SigningKey { ec_private_key_pem, key_id, team_id } => Some(TokenProvider::new(
                ec_private_key_pem,
                key_id.clone(),
                team_id.clone(),
                config.token_expiration,
            )?),
            Credentials::Certificate { .. } => None,
        };

        // Channel-management connections omit the idle-ping keep-alive
        // entirely (§4.3): these short-lived REST-over-HTTP/2 calls don't
        // justify the ping/timeout machinery notification connections need.
        let mut factory_config = config.clone();
        factory_config.idle_ping_interval = None;
        let factory = Arc::new(ConnectionFactory::new(&factory_config, token_provider.clone())?);
        let pool = ConnectionPool::new(
            factory,
            config.concurrent_connections,
            config.acquire_queue_cap,
            config.graceful_shutdown_timeout,
            Arc::clone(&config.metrics_listener),
        );

        Ok(Self { pool, token_provider, bundle_id: bundle_id.into() })
    }

    /// `POST /1/apps/<bundle>/channels` — creates a channel, expects 201
    /// with the new id in the `apns-channel-id` response header.
    pub async fn create_channel(&self) -> Result<CreateChannelResponse, ChannelManagementError> {
        let req = RequestSpec {
            method: Method::POST,
            path: self.channels_path(),
            headers: vec![],
            body: Bytes::new(),
            retry_on_expired_token: false,
        };
        let raw = self.send(req).await?;
        expect_status(&raw, 201)?;
        let channel_id = raw
            .headers
            .get("apns-channel-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| ChannelManagementError {
                status: raw.status,
                apns_request_id: request_id(&raw),
                cause: None,
            })?;
        Ok(CreateChannelResponse { channel_id })
    }

    /// `GET /1/apps/<bundle>/channels` with the `apns-channel-id` header.
    pub async fn get_channel_config(&self, channel_id: &str) -> Result<ChannelConfig, ChannelManagementError> {
        let req = self.with_channel_id(Method::GET, self.channels_path(), channel_id)?;
        let raw = self.send(req).await?;
        expect_status(&raw, 200)?;
        let wire: ChannelConfigWire = serde_json::from_slice(&raw.body).map_err(|e| ChannelManagementError {
            status: raw.status,
            apns_request_id: request_id(&raw),
            cause: Some(ApnsError::ConnectFailed(format!("invalid channel config body: {e}"))),
        })?;
        let message_storage_policy = MessageStoragePolicy::from_wire(wire.message_storage_policy).ok_or_else(|| {
            ChannelManagementError {
                status: raw.status,
                apns_request_id: request_id(&raw),
                cause: Some(ApnsError::ConnectFailed("unrecognized message-storage-policy value".into())),
            }
        })?;
        Ok(ChannelConfig { message_storage_policy, push_type: wire.push_type })
    }

    /// `DELETE /1/apps/<bundle>/channels` with the `apns-channel-id` header.
    /// Issues exactly one DELETE; some historical ports recursed here, which
    /// this crate treats as a bug rather than behavior to preserve.
    pub async fn delete_channel(&self, channel_id: &str) -> Result<(), ChannelManagementError> {
        let req = self.with_channel_id(Method::DELETE, self.channels_path(), channel_id)?;
        let raw = self.send(req).await?;
        expect_status(&raw, 204)?;
        Ok(())
    }

    /// `GET /1/apps/<bundle>/all-channels`.
    pub async fn list_channels(&self) -> Result<ChannelList, ChannelManagementError> {
        let req = RequestSpec {
            method: Method::GET,
            path: format!("/1/apps/{}/all-channels", self.bundle_id),
            headers: vec![],
            body: Bytes::new(),
            retry_on_expired_token: false,
        };
        let raw = self.send(req).await?;
        expect_status(&raw, 200)?;
        let wire: ChannelListWire = serde_json::from_slice(&raw.body).map_err(|e| ChannelManagementError {
            status: raw.status,
            apns_request_id: request_id(&raw),
            cause: Some(ApnsError::ConnectFailed(format!("invalid channel list body: {e}"))),
        })?;
        Ok(ChannelList { channels: wire.channels })
    }

    pub async fn close(&self) {
        self.pool.close().await;
        if let Some(provider) = &self.token_provider {
            provider.shutdown();
        }
    }

    fn channels_path(&self) -> String {
        format!("/1/apps/{}/channels", self.bundle_id)
    }

    fn with_channel_id(&self, method: Method, path: String, channel_id: &str) -> Result<RequestSpec, ChannelManagementError> {
        let value = HeaderValue::from_str(channel_id).map_err(|e| ChannelManagementError {
            status: 0,
            apns_request_id: None,
            cause: Some(ApnsError::ConnectFailed(format!("invalid channel id: {e}"))),
        })?;
        Ok(RequestSpec {
            method,
            path,
            headers: vec![(HeaderName::from_static("apns-channel-id"), value)],
            body: Bytes::new(),
            retry_on_expired_token: false,
        })
    }

    async fn send(&self, req: RequestSpec) -> Result<RawResponse, ChannelManagementError> {
        let conn = self.pool.acquire().await.map_err(|e| ChannelManagementError {
            status: 0,
            apns_request_id: None,
            cause: Some(e),
        })?;
        let result = conn.write(req).await;
        self.pool.release(conn).await;
        result.map_err(|e| ChannelManagementError { status: 0, apns_request_id: None, cause: Some(e) })
    }
}

fn request_id(raw: &RawResponse) -> Option<String> {
    raw.headers.get("apns-request-id").and_then(|v| v.to_str().ok()).map(str::to_owned)
}

fn expect_status(raw: &RawResponse, expected: u16) -> Result<(), ChannelManagementError> {
    if raw.status == expected {
        Ok(())
    } else {
        Err(ChannelManagementError { status: raw.status, apns_request_id: request_id(raw), cause: None })
    }
}
