//! Shared wire and persisted record types for the ActingWeb mesh core.
//!
//! Nothing in this crate talks to storage or the network; it only defines
//! the shapes other crates exchange, plus a closed error taxonomy as a typed
//! enum.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Trust relationship
// ---------------------------------------------------------------------------

/// A bilateral trust relationship, keyed by `(actor_id, peer_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub actor_id: String,
    pub peer_id: String,
    /// Peer's URL prefix, e.g. `https://peer.example.com/actorid123`.
    pub baseuri: String,
    /// Bearer token shared with the peer.
    pub secret: String,
    /// Role tag, e.g. `"friend"`.
    pub relationship: String,
    pub approved: bool,
    /// Comma-separated option tags the peer has advertised (see [`crate::OPTION_TAGS`]).
    #[serde(default)]
    pub aw_supported: String,
    #[serde(default)]
    pub aw_version: Option<String>,
    #[serde(default)]
    pub capabilities_fetched_at: Option<DateTime<Utc>>,
    pub established_via: String,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl TrustRecord {
    /// A trust is usable for peer calls iff both `baseuri` and `secret` are non-empty.
    #[must_use]
    pub fn is_usable_for_calls(&self) -> bool {
        !self.baseuri.is_empty() && !self.secret.is_empty()
    }
}

/// Known protocol option tags a peer may advertise via `/meta/actingweb/supported`.
pub mod option_tags {
    pub const SUBSCRIPTION_BATCH: &str = "subscriptionbatch";
    pub const CALLBACK_COMPRESSION: &str = "callbackcompression";
    pub const SUBSCRIPTION_HEALTH: &str = "subscriptionhealth";
    pub const SUBSCRIPTION_RESYNC: &str = "subscriptionresync";
    pub const SUBSCRIPTION_STATS: &str = "subscriptionstats";
}

// ---------------------------------------------------------------------------
// Subscriptions (publisher view)
// ---------------------------------------------------------------------------

/// Shape of a callback body: `high` carries data inline, `low` a URL to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    High,
    Low,
}

/// A publisher-side subscription record, keyed `(actor_id, peer_id, subscription_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub actor_id: String,
    pub peer_id: String,
    pub subscription_id: String,
    /// Resource family, e.g. `"properties"`.
    pub target: String,
    #[serde(default)]
    pub subtarget: Option<String>,
    pub granularity: Granularity,
    /// Monotonic, strictly increasing; starts at 0 and advances only on diff recording.
    pub sequence: u64,
    /// The peer's inbound callback URL, e.g.
    /// `<peer.baseuri>/callbacks/subscriptions/<publisher_id>/<subscription_id>`.
    pub callback_url: String,
}

/// Exactly one of `data`/`url` is present; `url` means the receiver must fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffPayload {
    Data(Value),
    Url(String),
}

/// A single recorded change at a publisher, at a monotonically increasing sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionDiff {
    pub actor_id: String,
    pub peer_id: String,
    pub subscription_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub payload: DiffPayload,
}

// ---------------------------------------------------------------------------
// Subscriptions (subscriber view)
// ---------------------------------------------------------------------------

/// One callback envelope held in the subscriber's pending queue, keyed by sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCallback {
    pub sequence: u64,
    pub envelope: CallbackEnvelope,
}

/// Per-`(actor_id, publisher_id, subscription_id)` subscriber-side sequencing state.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberState {
    pub actor_id: String,
    pub publisher_id: String,
    pub subscription_id: String,
    pub last_processed_sequence: u64,
    /// Ordered by sequence; bounded by the subscriber's configured queue depth.
    pub pending: BTreeMap<u64, PendingCallback>,
    pub last_updated: DateTime<Utc>,
}

impl SubscriberState {
    #[must_use]
    pub fn new(actor_id: String, publisher_id: String, subscription_id: String, now: DateTime<Utc>) -> Self {
        Self {
            actor_id,
            publisher_id,
            subscription_id,
            last_processed_sequence: 0,
            pending: BTreeMap::new(),
            last_updated: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Callback envelope
// ---------------------------------------------------------------------------

/// The wire shape of a subscription callback, normative per the wire protocol.
/// Unknown top-level keys are ignored by `serde` by default (no `deny_unknown_fields`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    pub id: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtarget: Option<String>,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub granularity: Granularity,
    pub subscriptionid: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A validated, typed view of a [`CallbackEnvelope`] body — a tagged union
/// of resync vs. diff, high vs. low granularity — so downstream code
/// matches on the variant instead of re-checking raw fields.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedCallback {
    Diff {
        publisher_id: String,
        target: String,
        subtarget: Option<String>,
        subscription_id: String,
        sequence: u64,
        timestamp: DateTime<Utc>,
        body: DiffPayload,
    },
    Resync {
        publisher_id: String,
        target: String,
        subtarget: Option<String>,
        subscription_id: String,
        sequence: u64,
        timestamp: DateTime<Utc>,
        baseline: DiffPayload,
    },
}

impl ParsedCallback {
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            ParsedCallback::Diff { sequence, .. } | ParsedCallback::Resync { sequence, .. } => *sequence,
        }
    }

    #[must_use]
    pub fn subscription_id(&self) -> &str {
        match self {
            ParsedCallback::Diff { subscription_id, .. }
            | ParsedCallback::Resync { subscription_id, .. } => subscription_id,
        }
    }

    #[must_use]
    pub fn is_low_granularity(&self) -> bool {
        let body = match self {
            ParsedCallback::Diff { body, .. } | ParsedCallback::Resync { baseline: body, .. } => body,
        };
        matches!(body, DiffPayload::Url(_))
    }
}

impl CallbackEnvelope {
    /// Validate and classify this envelope. 400-worthy malformed envelopes
    /// surface as `Err(MalformedEnvelope)`.
    pub fn parse(self) -> Result<ParsedCallback, MalformedEnvelope> {
        if self.sequence == 0 {
            return Err(MalformedEnvelope("sequence must be > 0".to_string()));
        }
        let body = match (self.data, self.url) {
            (Some(data), None) => DiffPayload::Data(data),
            (None, Some(url)) => DiffPayload::Url(url),
            (None, None) => {
                return Err(MalformedEnvelope(
                    "exactly one of data/url must be present".to_string(),
                ));
            }
            (Some(_), Some(_)) => {
                return Err(MalformedEnvelope(
                    "exactly one of data/url must be present, got both".to_string(),
                ));
            }
        };

        if self.kind.as_deref() == Some("resync") {
            Ok(ParsedCallback::Resync {
                publisher_id: self.id,
                target: self.target,
                subtarget: self.subtarget,
                subscription_id: self.subscriptionid,
                sequence: self.sequence,
                timestamp: self.timestamp,
                baseline: body,
            })
        } else {
            Ok(ParsedCallback::Diff {
                publisher_id: self.id,
                target: self.target,
                subtarget: self.subtarget,
                subscription_id: self.subscriptionid,
                sequence: self.sequence,
                timestamp: self.timestamp,
                body,
            })
        }
    }
}

/// A malformed callback envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEnvelope(pub String);

impl std::fmt::Display for MalformedEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed callback envelope: {}", self.0)
    }
}

impl std::error::Error for MalformedEnvelope {}

// ---------------------------------------------------------------------------
// List operations
// ---------------------------------------------------------------------------

/// A list mutation carried inside a diff's `data` payload under a
/// `"list:<name>"` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListOperation {
    Append,
    Extend,
    Update,
    Delete,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListMutation {
    pub list: String,
    pub operation: ListOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
}

/// If `data` is a single-key object `{"list:<name>": {...}}`, extract it.
#[must_use]
pub fn as_list_mutation(data: &Value) -> Option<(String, ListMutation)> {
    let obj = data.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    let (key, value) = obj.iter().next()?;
    let name = key.strip_prefix("list:")?;
    let mutation: ListMutation = serde_json::from_value(value.clone()).ok()?;
    Some((name.to_string(), mutation))
}

// ---------------------------------------------------------------------------
// Circuit breaker record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Persisted, per-peer circuit breaker record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerRecord {
    pub peer_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    #[serde(default)]
    pub last_failure_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success_time: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub cooldown_seconds: u64,
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// The closed taxonomy of delivery/processing failure kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    CircuitOpen,
    RateLimited { retry_after: Option<u64> },
    ServiceUnavailable,
    Timeout,
    HttpError(u16),
    RequestError(String),
    AuthFailure,
    NotAuthorized,
    GapPending,
    BackPressure,
    MalformedEnvelope(String),
    StorageError(String),
}

/// The structured, user-visible error shape: `{code, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorValue {
    pub code: i32,
    pub message: String,
}

impl CoreError {
    /// Codes align with HTTP status where applicable; `circuit_open` has no
    /// HTTP status since it is an internal delivery outcome, not a response
    /// this actor ever sends over the wire.
    #[must_use]
    pub fn to_value(&self) -> ErrorValue {
        let (code, message) = match self {
            CoreError::CircuitOpen => (0, "circuit_open".to_string()),
            CoreError::RateLimited { retry_after } => (
                429,
                match retry_after {
                    Some(s) => format!("rate_limited (retry_after={s}s)"),
                    None => "rate_limited".to_string(),
                },
            ),
            CoreError::ServiceUnavailable => (503, "service_unavailable".to_string()),
            CoreError::Timeout => (408, "timeout".to_string()),
            CoreError::HttpError(status) => (i32::from(*status), format!("http_error_{status}")),
            CoreError::RequestError(detail) => (500, format!("request_error: {detail}")),
            CoreError::AuthFailure => (401, "auth_failure".to_string()),
            CoreError::NotAuthorized => (403, "not_authorized".to_string()),
            CoreError::GapPending => (204, "gap_pending".to_string()),
            CoreError::BackPressure => (429, "back_pressure".to_string()),
            CoreError::MalformedEnvelope(detail) => (400, format!("malformed_envelope: {detail}")),
            CoreError::StorageError(detail) => (500, format!("storage_error: {detail}")),
        };
        ErrorValue { code, message }
    }

    /// The bare taxonomy tag, as used in [`crate::CoreError::to_value`]'s `error` field
    /// on [`DeliveryResult`](https://docs.rs/aw-fanout) results.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            CoreError::CircuitOpen => "circuit_open",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::ServiceUnavailable => "service_unavailable",
            CoreError::Timeout => "timeout",
            CoreError::HttpError(_) => "http_error",
            CoreError::RequestError(_) => "request_error",
            CoreError::AuthFailure => "auth_failure",
            CoreError::NotAuthorized => "not_authorized",
            CoreError::GapPending => "gap_pending",
            CoreError::BackPressure => "back_pressure",
            CoreError::MalformedEnvelope(_) => "malformed_envelope",
            CoreError::StorageError(_) => "storage_error",
        }
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_value().message)
    }
}

impl std::error::Error for CoreError {}
