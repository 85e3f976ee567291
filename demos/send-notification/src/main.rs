//! Sends one push notification through `apns` and prints the result.
//!
//! Demonstrates the intended shape of a caller: build a `ClientConfig`,
//! construct a `Client`, send a `PushNotification`, inspect the typed
//! `NotificationResponse` (accepted or rejected — never an error for an
//! ordinary rejection).

use std::path::PathBuf;

use apns::notification::{Priority, PushNotification, PushType};
use apns::{Client, ClientConfig};
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Sends one APNs push notification.", long_about = None)]
struct AppConfig {
    /// 64-character hex device token to send to.
    #[clap(long)]
    device_token: String,

    /// The receiving app's bundle identifier (the APNs "topic").
    #[clap(long)]
    topic: Option<String>,

    /// JSON payload bytes. Defaults to a minimal alert payload.
    #[clap(long, default_value = r#"{"aps":{"alert":"Hello from apns"}}"#)]
    payload: String,

    /// Path to the ES256 signing key (`.p8`) issued by the developer portal.
    /// Can also be provided via `APNS_SIGNING_KEY_PATH`.
    #[clap(long, env = "APNS_SIGNING_KEY_PATH")]
    signing_key_path: PathBuf,

    /// The ten-character key id matching the signing key.
    #[clap(long, env = "APNS_KEY_ID")]
    key_id: String,

    /// The ten-character Apple Developer team id.
    #[clap(long, env = "APNS_TEAM_ID")]
    team_id: String,

    /// Send to the production endpoint instead of the development sandbox.
    #[clap(long)]
    production: bool,

    /// `apns-push-type` to send.
    #[clap(long, value_enum, default_value_t = CliPushType::Alert)]
    push_type: CliPushType,

    /// Deliver immediately (`10`) or at a time that conserves power (`5`).
    #[clap(long)]
    conserve_power: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CliPushType {
    Alert,
    Background,
    Voip,
    Complication,
    Fileprovider,
    Mdm,
    Location,
    Liveactivity,
    Pushtotalk,
}

impl From<CliPushType> for PushType {
    fn from(value: CliPushType) -> Self {
        match value {
            CliPushType::Alert => PushType::Alert,
            CliPushType::Background => PushType::Background,
            CliPushType::Voip => PushType::Voip,
            CliPushType::Complication => PushType::Complication,
            CliPushType::Fileprovider => PushType::FileProvider,
            CliPushType::Mdm => PushType::Mdm,
            CliPushType::Location => PushType::Location,
            CliPushType::Liveactivity => PushType::LiveActivity,
            CliPushType::Pushtotalk => PushType::PushToTalk,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder().with_env_filter(EnvFilter::from_default_env()).finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set global default tracing subscriber");

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let args = AppConfig::parse();

    let signing_key_pem = std::fs::read(&args.signing_key_path)?;
    let mut builder = if args.production { ClientConfig::production() } else { ClientConfig::development() };
    builder = builder.signing_key(signing_key_pem, args.key_id, args.team_id);
    let config = builder.build()?;

    let client = Client::new(config)?;

    let mut notification = PushNotification::new(args.device_token, args.payload.into_bytes())
        .with_push_type(args.push_type.into());
    if let Some(topic) = args.topic {
        notification = notification.with_topic(topic);
    }
    notification = notification.with_priority(if args.conserve_power {
        Priority::ConservePower
    } else {
        Priority::Immediate
    });

    let response = client.send(notification).await?;
    if response.accepted {
        info!(
            status = response.status_code,
            apns_id = ?response.apns_id,
            "notification accepted"
        );
    } else {
        info!(
            status = response.status_code,
            reason = ?response.rejection_reason,
            token_invalidation_at = ?response.token_invalidation_at,
            "notification rejected"
        );
    }

    client.close().await;
    Ok(())
}
