//! The push-notification data model (input to C5) and the wire mapping
//! described in the component design's request-header table.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// `apns-priority` values accepted by APNs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Deliver the notification immediately.
    Immediate,
    /// Deliver the notification at a time that conserves power on the device.
    ConservePower,
}

impl Priority {
    fn wire_value(self) -> &'static str {
        match self {
            Priority::Immediate => "10",
            Priority::ConservePower => "5",
        }
    }
}

/// `apns-push-type` values accepted by APNs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushType {
    Alert,
    Background,
    Voip,
    Complication,
    FileProvider,
    Mdm,
    Location,
    LiveActivity,
    PushToTalk,
}

impl PushType {
    fn wire_value(self) -> &'static str {
        match self {
            PushType::Alert => "alert",
            PushType::Background => "background",
            PushType::Voip => "voip",
            PushType::Complication => "complication",
            PushType::FileProvider => "fileprovider",
            PushType::Mdm => "mdm",
            PushType::Location => "location",
            PushType::LiveActivity => "liveactivity",
            PushType::PushToTalk => "pushtotalk",
        }
    }
}

/// A notification to be sent to a single device token.
///
/// `payload` is expected to already be UTF-8 JSON bytes (the "JSON writer"
/// collaborator described in the purpose section is out of core scope: this
/// crate does not render `aps` dictionaries for the caller).
#[derive(Debug, Clone)]
pub struct PushNotification {
    /// 64-character hex-ascii device token.
    pub device_token: String,
    /// The receiving app's bundle identifier (optionally suffixed, e.g.
    /// `.voip`, `.push-type.liveactivity`).
    pub topic: Option<String>,
    /// UTF-8 JSON payload bytes. Must be no larger than 4096 bytes.
    pub payload: Vec<u8>,
    /// When APNs should stop trying to deliver the notification.
    pub expiration: Option<SystemTime>,
    pub priority: Option<Priority>,
    pub push_type: Option<PushType>,
    pub collapse_id: Option<String>,
    /// A caller-supplied `apns-id`. Filled in from the server's response if
    /// left unset.
    pub apns_id: Option<Uuid>,
}

impl PushNotification {
    /// Starts building a notification for `device_token` carrying `payload`.
    pub fn new(device_token: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            device_token: device_token.into(),
            topic: None,
            payload: payload.into(),
            expiration: None,
            priority: None,
            push_type: None,
            collapse_id: None,
            apns_id: None,
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_expiration(mut self, expiration: SystemTime) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_push_type(mut self, push_type: PushType) -> Self {
        self.push_type = Some(push_type);
        self
    }

    pub fn with_collapse_id(mut self, collapse_id: impl Into<String>) -> Self {
        self.collapse_id = Some(collapse_id.into());
        self
    }

    pub fn with_apns_id(mut self, apns_id: Uuid) -> Self {
        self.apns_id = Some(apns_id);
        self
    }

    /// The `/3/device/<hex-token>` request path.
    pub fn path(&self) -> String {
        format!("/3/device/{}", self.device_token)
    }

    /// Builds the `apns-*` request headers per the request-header mapping
    /// table. `:method`, `:scheme`, `:authority`, `:path` and `authorization`
    /// are attached by the connection handler, not here.
    pub fn apns_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(5);

        let expiration_secs = self
            .expiration
            .map(|t| {
                t.duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        headers.push(("apns-expiration", expiration_secs.to_string()));

        if let Some(topic) = &self.topic {
            headers.push(("apns-topic", topic.clone()));
        }
        if let Some(priority) = self.priority {
            headers.push(("apns-priority", priority.wire_value().to_string()));
        }
        if let Some(push_type) = self.push_type {
            headers.push(("apns-push-type", push_type.wire_value().to_string()));
        }
        if let Some(collapse_id) = &self.collapse_id {
            headers.push(("apns-collapse-id", collapse_id.clone()));
        }
        if let Some(apns_id) = self.apns_id {
            headers.push(("apns-id", apns_id.hyphenated().to_string()));
        }

        headers
    }
}

/// The result of sending a [`PushNotification`].
///
/// Rejections are data, not errors: a 4xx/5xx round-trip still produces a
/// `NotificationResponse` with `accepted = false` rather than an `Err`.
#[derive(Debug, Clone)]
pub struct NotificationResponse {
    pub accepted: bool,
    pub apns_id: Option<Uuid>,
    pub status_code: u16,
    pub rejection_reason: Option<String>,
    pub token_invalidation_at: Option<DateTime<Utc>>,
    pub apns_unique_id: Option<Uuid>,
}

/// The JSON body APNs sends back on a non-accepting response.
#[derive(Debug, Clone, serde::Deserialize)]
pub(crate) struct RejectionBody {
    pub reason: String,
    pub timestamp: Option<i64>,
}

/// Known `reason` values from the wire spec. Unrecognized reasons still
/// surface as `rejection_reason`; this is purely for callers who want to
/// `match` without string comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    BadDeviceToken,
    DeviceTokenNotForTopic,
    ExpiredProviderToken,
    PayloadTooLarge,
    Unregistered,
    TooManyRequests,
    Other,
}

impl RejectionReason {
    pub(crate) fn parse(reason: &str) -> Self {
        match reason {
            "BadDeviceToken" => RejectionReason::BadDeviceToken,
            "DeviceTokenNotForTopic" => RejectionReason::DeviceTokenNotForTopic,
            "ExpiredProviderToken" => RejectionReason::ExpiredProviderToken,
            "PayloadTooLarge" => RejectionReason::PayloadTooLarge,
            "Unregistered" => RejectionReason::Unregistered,
            "TooManyRequests" => RejectionReason::TooManyRequests,
            _ => RejectionReason::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_mapping_includes_only_set_fields() {
        let n = PushNotification::new("a".repeat(64), b"{}".to_vec())
            .with_topic("com.example.app")
            .with_priority(Priority::Immediate)
            .with_push_type(PushType::Alert);

        let headers = n.apns_headers();
        assert!(headers.contains(&("apns-expiration", "0".to_string())));
        assert!(headers.contains(&("apns-topic", "com.example.app".to_string())));
        assert!(headers.contains(&("apns-priority", "10".to_string())));
        assert!(headers.contains(&("apns-push-type", "alert".to_string())));
        assert!(!headers.iter().any(|(k, _)| *k == "apns-collapse-id"));
        assert!(!headers.iter().any(|(k, _)| *k == "apns-id"));
    }

    #[test]
    fn conserve_power_priority_encodes_as_five() {
        let n = PushNotification::new("a".repeat(64), b"{}".to_vec())
            .with_priority(Priority::ConservePower);
        assert!(n.apns_headers().contains(&("apns-priority", "5".to_string())));
    }

    #[test]
    fn rejection_reason_parses_known_values() {
        assert_eq!(RejectionReason::parse("BadDeviceToken"), RejectionReason::BadDeviceToken);
        assert_eq!(RejectionReason::parse("Unregistered"), RejectionReason::Unregistered);
        assert_eq!(RejectionReason::parse("SomethingNew"), RejectionReason::Other);
    }
}
