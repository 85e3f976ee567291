//! Data model for the Live-Activity channel-management REST-over-HTTP/2
//! endpoints consumed by C6.

use serde::Deserialize;

/// `message-storage-policy` as returned by "get channel config".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStoragePolicy {
    /// `0` — messages are not stored by APNs.
    None,
    /// `1` — messages are stored for later delivery.
    OnDevice,
}

impl MessageStoragePolicy {
    pub(crate) fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageStoragePolicy::None),
            1 => Some(MessageStoragePolicy::OnDevice),
            _ => None,
        }
    }
}

/// The JSON body returned by `POST /1/apps/<bundle>/channels` is empty; the
/// created channel id arrives in the `apns-channel-id` response header.
#[derive(Debug, Clone)]
pub struct CreateChannelResponse {
    pub channel_id: String,
}

/// The JSON body returned by `GET /1/apps/<bundle>/channels`.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub message_storage_policy: MessageStoragePolicy,
    pub push_type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelConfigWire {
    #[serde(rename = "message-storage-policy")]
    pub message_storage_policy: u8,
    #[serde(rename = "push-type")]
    pub push_type: String,
}

/// The JSON body returned by `GET /1/apps/<bundle>/all-channels`.
#[derive(Debug, Clone)]
pub struct ChannelList {
    pub channels: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelListWire {
    pub channels: Vec<String>,
}
