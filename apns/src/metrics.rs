//! Metrics and frame-logging collaborators (C7).
//!
//! Both traits are optional at configuration time; the client always has a
//! listener to call (falling back to the no-op/tracing-only defaults), so
//! the send path never needs an `Option::map` at every call site.

use std::time::Duration;

use crate::notification::NotificationResponse;

/// Observes pool and send-path lifecycle events.
///
/// Implementations must not block: callbacks run on the connection or pool
/// executor that produced the event.
pub trait MetricsListener: Send + Sync {
    /// A notification's HEADERS+DATA frames were written successfully.
    fn notification_sent(&self, _topic: Option<&str>) {}

    /// A round-trip completed (accepted or rejected) after `duration`.
    fn notification_acknowledged(&self, _response: &NotificationResponse, _duration: Duration) {}

    /// A local write failed before any reply could arrive.
    fn write_failure(&self, _topic: Option<&str>) {}

    /// A new connection was added to a pool.
    fn connection_added(&self) {}

    /// A connection was removed from a pool (closed or never became ready).
    fn connection_removed(&self) {}

    /// A connection factory attempt failed.
    fn connection_creation_failed(&self) {}
}

/// The default listener: does nothing. Structured logging (via `tracing`)
/// still happens independently of whichever `MetricsListener` is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsListener;

impl MetricsListener for NoopMetricsListener {}

/// A structured description of one inbound or outbound HTTP/2 frame, handed
/// to an optional [`FrameLogger`] for diagnostics.
#[derive(Debug, Clone)]
pub enum FrameEvent<'a> {
    Headers { stream_id: u32, end_stream: bool },
    Data { stream_id: u32, len: usize, end_stream: bool },
    RstStream { stream_id: u32, reason: &'a str },
    Ping { ack: bool },
    GoAway { last_stream_id: u32 },
    Settings,
}

/// Observes raw HTTP/2 frame traffic for diagnostics.
///
/// The configuration surface names this `frame_logger` and treats it as
/// optional; this crate still carries an always-on default that emits
/// `tracing::trace!` events, so frame-level diagnostics are never fully
/// absent even with no listener configured.
pub trait FrameLogger: Send + Sync {
    fn on_frame(&self, event: &FrameEvent<'_>);
}

/// The default [`FrameLogger`]: forwards every event to `tracing` at trace
/// level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFrameLogger;

impl FrameLogger for TracingFrameLogger {
    fn on_frame(&self, event: &FrameEvent<'_>) {
        tracing::trace!(?event, "http2 frame");
    }
}
