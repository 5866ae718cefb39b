//! Data model shared by every crate in the broker workspace: broker identities, peer
//! addresses, the two-level priority tag, the opaque `Message` envelope and the wire DTOs
//! exchanged between peers over HTTP.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Statically assigned, totally ordered broker identity. Higher id wins elections.
pub type BrokerId = u32;

/// Opaque, non-empty topic name. Topics are created implicitly on first reference.
pub type Topic = String;

/// Per-connection identifier for an attached push-stream. Unique within a process.
pub type StreamId = u64;

/// `host:port` of a peer's HTTP listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{self}")
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Two-valued publish priority. Governs intra-publish-call delivery order only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

impl Priority {
    /// Parses a priority exactly as the original broker does: `"high"` and the numeric
    /// string `"0"` (case-insensitively) map to `High`; everything else, including an
    /// absent field, maps to `Low`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.to_lowercase()).as_deref() {
            Some("high") | Some("0") => Priority::High,
            _ => Priority::Low,
        }
    }

    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// The JSON object received on `/publish`: stored and forwarded verbatim. The broker reads
/// only `topic` and `priority` out of it; every other field is opaque payload that survives
/// round-trip serialization unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(serde_json::Value);

impl Message {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn topic(&self) -> Option<&str> {
        self.0.get("topic").and_then(|v| v.as_str())
    }

    pub fn priority(&self) -> Priority {
        let raw = self.0.get("priority").map(|v| match v.as_str() {
            Some(s) => s.to_string(),
            None => v.to_string(),
        });
        Priority::parse(raw.as_deref())
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }

    /// Renders the `data: ...` line body for an SSE event (without the leading `data: ` or
    /// trailing blank line, which are the stream handler's job).
    pub fn to_sse_payload(&self) -> String {
        self.0.to_string()
    }
}

/// `POST /election` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionRequest {
    pub broker_id: BrokerId,
}

/// `POST /election` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionResponse {
    pub response: ElectionVerdict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionVerdict {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NO")]
    No,
}

/// `POST /leader` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderAnnouncement {
    pub leader_id: BrokerId,
}

/// `GET /get_leader` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderQueryResponse {
    pub leader_id: Option<BrokerId>,
}

/// `GET /logs/<topic>` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub topic: Topic,
    pub logs: Vec<Message>,
}

/// Subscription mode carried on `/subscribe` and `/unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMode {
    Sse,
    Webhook,
}

/// `POST /subscribe` and `POST /unsubscribe` request body. `mode` defaults to `webhook`
/// when absent, matching the original's `mode == "webhook" or not mode` branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub topic: Option<Topic>,
    pub mode: Option<String>,
    pub url: Option<String>,
}

/// A generic `{"message": "..."}` or `{"error": "..."}` envelope used by several endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub message: String,
}

/// Gossip payload exchanged on `/gossip`: per-topic sets of addresses believed subscribed,
/// and per-topic sets of addresses recently observed as detached.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GossipPayload {
    #[serde(default)]
    pub sse_subscribers: HashMap<Topic, Vec<String>>,
    #[serde(default)]
    pub unsubscribed: HashMap<Topic, Vec<String>>,
}

impl GossipPayload {
    pub fn is_empty(&self) -> bool {
        self.sse_subscribers.values().all(|v| v.is_empty())
            && self.unsubscribed.values().all(|v| v.is_empty())
    }
}
