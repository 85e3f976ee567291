//! The mock server's decision sum type (§9 design notes: "exceptions for
//! control flow in the mock server decompose into a sum type").
//!
//! A [`Verifier`] inspects one incoming request and returns a [`Verdict`];
//! the connection-serving loop turns that into HTTP/2 frames. Verdicts are
//! scripted per request-key (device token, channel id, …) so a single test
//! can express "refuse the first attempt, accept the second" (P7) or
//! "reject with `ExpiredProviderToken` once, then accept" (scenario 4)
//! without any shared mutable state in the test body itself.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use bytes::Bytes;
use http::{HeaderName, HeaderValue};
use uuid::Uuid;

/// What the mock server should do with one accepted HTTP/2 stream.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Reply with a status code, extra headers and a body.
    Respond {
        status: u16,
        headers: Vec<(HeaderName, HeaderValue)>,
        body: Bytes,
    },
    /// Reset the stream with `REFUSED_STREAM` instead of replying at all.
    RefuseStream,
    /// Reset the stream with `INTERNAL_ERROR`.
    InternalError,
}

impl Verdict {
    /// A successful notification response: `200` with `apns-id` and,
    /// optionally, `apns-unique-id` (development environment only, per
    /// §4.3's finalization rule).
    pub fn accepted_notification(apns_id: Uuid, apns_unique_id: Option<Uuid>) -> Self {
        let mut headers = vec![(
            HeaderName::from_static("apns-id"),
            HeaderValue::from_str(&apns_id.to_string()).expect("uuid is valid header value"),
        )];
        if let Some(unique_id) = apns_unique_id {
            headers.push((
                HeaderName::from_static("apns-unique-id"),
                HeaderValue::from_str(&unique_id.to_string()).expect("uuid is valid header value"),
            ));
        }
        Verdict::Respond { status: 200, headers, body: Bytes::new() }
    }

    /// A rejected notification: the wire's `{"reason": ..., "timestamp": ...}`
    /// JSON body at the given status.
    pub fn rejected_notification(status: u16, reason: &str, timestamp_millis: Option<i64>) -> Self {
        let body = match timestamp_millis {
            Some(ts) => serde_json::json!({ "reason": reason, "timestamp": ts }),
            None => serde_json::json!({ "reason": reason }),
        };
        Verdict::Respond {
            status,
            headers: vec![],
            body: Bytes::from(serde_json::to_vec(&body).expect("static shape always serializes")),
        }
    }

    /// Shorthand for the transparent-retry scenario: `403` with reason
    /// `ExpiredProviderToken`.
    pub fn expired_provider_token() -> Self {
        Self::rejected_notification(403, "ExpiredProviderToken", None)
    }

    /// A channel-management success with no body (create/delete).
    pub fn channel_status(status: u16, extra_headers: Vec<(HeaderName, HeaderValue)>) -> Self {
        Verdict::Respond { status, headers: extra_headers, body: Bytes::new() }
    }

    /// A channel-management JSON body success (get config / list channels).
    pub fn channel_json(status: u16, body: serde_json::Value) -> Self {
        Verdict::Respond {
            status,
            headers: vec![],
            body: Bytes::from(serde_json::to_vec(&body).expect("caller-provided JSON always serializes")),
        }
    }
}

/// Produces a [`Verdict`] for one request, given a caller-chosen key (e.g.
/// the device token or channel id the request addresses) and the 1-based
/// attempt number the server has seen for that key so far.
pub trait Verifier: Send + Sync {
    fn verdict(&self, key: &str, attempt: usize) -> Verdict;
}

/// A verifier scripted ahead of time: each key has its own queue of
/// verdicts, popped one per attempt; once a key's queue is exhausted, its
/// last scripted verdict (or the server-wide default) repeats.
pub struct ScriptedVerifier {
    default: Verdict,
    scripts: Mutex<HashMap<String, VecDeque<Verdict>>>,
    last: Mutex<HashMap<String, Verdict>>,
}

impl ScriptedVerifier {
    /// A verifier that returns `default` for every request unless
    /// overridden via [`Self::script`].
    pub fn new(default: Verdict) -> Self {
        Self { default, scripts: Mutex::new(HashMap::new()), last: Mutex::new(HashMap::new()) }
    }

    /// Scripts the sequence of verdicts returned for `key`, one per attempt,
    /// in order. Subsequent builder calls for the same key replace the
    /// remaining script.
    pub fn script(&self, key: impl Into<String>, verdicts: impl IntoIterator<Item = Verdict>) -> &Self {
        self.scripts
            .lock()
            .expect("scripted verifier lock poisoned")
            .insert(key.into(), verdicts.into_iter().collect());
        self
    }
}

impl Verifier for ScriptedVerifier {
    fn verdict(&self, key: &str, _attempt: usize) -> Verdict {
        let mut scripts = self.scripts.lock().expect("scripted verifier lock poisoned");
        if let Some(queue) = scripts.get_mut(key) {
            if let Some(next) = queue.pop_front() {
                self.last.lock().expect("scripted verifier lock poisoned").insert(key.to_string(), next.clone());
                return next;
            }
        }
        self.last
            .lock()
            .expect("scripted verifier lock poisoned")
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}
