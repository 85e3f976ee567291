//! Async HTTP/2 client for Apple's Push Notification service and its
//! Live-Activity channel-management companion.
//!
//! The entry points are [`Client`] (notifications) and
//! [`ChannelManagementClient`] (Live Activity channel management), both
//! built from a [`ClientConfig`]. Everything else in this crate exists to
//! support those two: a bounded pool of HTTP/2 connections
//! ([`pool::ConnectionPool`]), a per-connection stream multiplexer that
//! rides on top of `h2` ([`connection`]), and a shared ES256 JWT provider
//! ([`auth::TokenProvider`]) for token-based authentication.

pub mod auth;
pub mod channel;
mod channel_client;
mod client;
pub mod config;
mod connection;
pub mod error;
pub mod metrics;
pub mod notification;
mod pool;
pub mod tls;

pub use channel_client::ChannelManagementClient;
pub use client::Client;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use connection::{RawResponse, RequestSpec};
pub use error::{ApnsError, ChannelManagementError, ConfigError};
