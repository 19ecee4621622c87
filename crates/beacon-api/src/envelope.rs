// ── Inbound envelope ─────────────────────────────────────────────────
//
// The transport hands every broadcast or row-change frame to the core as
// an `InboundEnvelope`. Nothing is rejected at this layer: unknown event
// kinds are carried as `Other` and the router decides what to drop.

use std::fmt;

use serde_json::Value;

/// Classification of an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Ephemeral pub/sub message not tied to a row.
    Broadcast,
    /// Row insert (legacy `postgres_changes`).
    Insert,
    /// Row update (legacy `postgres_changes`).
    Update,
    /// Anything else the server sent, preserved verbatim.
    Other(String),
}

impl EventKind {
    /// Map a wire-level event/type string onto a kind.
    ///
    /// Matching is case-insensitive because the realtime server sends
    /// `"INSERT"` in row payloads and `"broadcast"` in frame events.
    pub fn from_wire(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("broadcast") {
            Self::Broadcast
        } else if raw.eq_ignore_ascii_case("insert") {
            Self::Insert
        } else if raw.eq_ignore_ascii_case("update") {
            Self::Update
        } else {
            Self::Other(raw.to_owned())
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast => f.write_str("broadcast"),
            Self::Insert => f.write_str("INSERT"),
            Self::Update => f.write_str("UPDATE"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}

/// One inbound realtime message, as delivered to the core.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEnvelope {
    pub topic: String,
    pub schema: String,
    pub table: String,
    pub event_kind: EventKind,
    /// Raw JSON body. Broadcasts carry `{event, payload}`; row changes
    /// carry `{data: {type, table, schema, record}}`.
    pub payload: Value,
}

impl InboundEnvelope {
    pub fn broadcast(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            schema: String::new(),
            table: String::new(),
            event_kind: EventKind::Broadcast,
            payload,
        }
    }

    pub fn row_change(
        topic: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
        event_kind: EventKind,
        payload: Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            schema: schema.into(),
            table: table.into(),
            event_kind,
            payload,
        }
    }

    /// Structural validity: the payload is an object, row changes name a
    /// table, and the kind is one the core understands.
    pub fn is_valid(&self) -> bool {
        if !self.payload.is_object() {
            return false;
        }
        match self.event_kind {
            EventKind::Broadcast => true,
            EventKind::Insert | EventKind::Update => !self.table.trim().is_empty(),
            EventKind::Other(_) => false,
        }
    }
}
