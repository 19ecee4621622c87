//! Phoenix channel frame codec.
//!
//! The realtime service speaks the Phoenix channels protocol over a
//! WebSocket: every text frame is `{topic, event, payload, ref, join_ref}`.
//! Servers on the v2 serializer send the same fields as a positional
//! array `[join_ref, ref, topic, event, payload]`; [`Frame::decode`]
//! accepts both.

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::envelope::{EventKind, InboundEnvelope};
use crate::error::Error;

// ── Topics & events ──────────────────────────────────────────────────

/// Topic used for socket-level heartbeats.
pub const PHOENIX_TOPIC: &str = "phoenix";

/// Channel carrying legacy row-change subscriptions.
pub const LEGACY_TABLES_TOPIC: &str = "realtime:display";

pub mod event {
    pub const JOIN: &str = "phx_join";
    pub const REPLY: &str = "phx_reply";
    pub const CLOSE: &str = "phx_close";
    pub const ERROR: &str = "phx_error";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const BROADCAST: &str = "broadcast";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
    pub const PRESENCE_STATE: &str = "presence_state";
    pub const PRESENCE_DIFF: &str = "presence_diff";
}

pub fn user_topic(user_uuid: &str) -> String {
    format!("realtime:user:{user_uuid}")
}

pub fn device_topic(device_uuid: &str) -> String {
    format!("realtime:device:{device_uuid}")
}

pub fn pairing_broadcast_topic(pairing_code: &str) -> String {
    format!("realtime:pairing:{pairing_code}:events")
}

// ── Frame ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    pub payload: Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl Frame {
    pub fn new(topic: impl Into<String>, event: &str, payload: Value, msg_ref: &str) -> Self {
        Self {
            topic: topic.into(),
            event: event.to_owned(),
            payload,
            msg_ref: Some(msg_ref.to_owned()),
            join_ref: None,
        }
    }

    pub fn encode(&self) -> String {
        // Serializing plain strings and a `Value` cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Parse one inbound text frame in either object or array form.
    pub fn decode(text: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(text).map_err(|e| Error::FrameDecode {
            message: e.to_string(),
        })?;

        match value {
            Value::Object(mut map) => Ok(Self {
                topic: take_string(&mut map, "topic")?,
                event: take_string(&mut map, "event")?,
                payload: map.remove("payload").unwrap_or(Value::Null),
                msg_ref: ref_string(map.get("ref")),
                join_ref: ref_string(map.get("join_ref")),
            }),
            Value::Array(items) if items.len() == 5 => {
                let mut items = items.into_iter();
                let join_ref = items.next();
                let msg_ref = items.next();
                let topic = items.next();
                let event = items.next();
                let payload = items.next().unwrap_or(Value::Null);
                Ok(Self {
                    topic: required_str(topic.as_ref(), "topic")?,
                    event: required_str(event.as_ref(), "event")?,
                    payload,
                    msg_ref: ref_string(msg_ref.as_ref()),
                    join_ref: ref_string(join_ref.as_ref()),
                })
            }
            _ => Err(Error::FrameDecode {
                message: "expected an object or a 5-element array".into(),
            }),
        }
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Result<String, Error> {
    match map.remove(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(Error::FrameDecode {
            message: format!("missing string field `{key}`"),
        }),
    }
}

fn required_str(value: Option<&Value>, key: &str) -> Result<String, Error> {
    value
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::FrameDecode {
            message: format!("missing string field `{key}`"),
        })
}

/// Refs are strings on the wire, but some servers echo them as numbers.
fn ref_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Outbound builders ────────────────────────────────────────────────

pub fn heartbeat(msg_ref: &str) -> Frame {
    Frame::new(PHOENIX_TOPIC, event::HEARTBEAT, json!({}), msg_ref)
}

/// Join a private broadcast channel (user or device scoped).
pub fn join_private(topic: &str, access_token: &str, msg_ref: &str) -> Frame {
    let payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "private": true,
        },
        "access_token": access_token,
    });
    join(topic, payload, msg_ref)
}

/// Join a public broadcast channel (legacy pairing-code events).
pub fn join_broadcast(topic: &str, access_token: &str, msg_ref: &str) -> Frame {
    let payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "private": false,
        },
        "access_token": access_token,
    });
    join(topic, payload, msg_ref)
}

/// Join a channel that streams row changes for several tables.
pub fn join_postgres(
    topic: &str,
    schema: &str,
    tables: &[&str],
    filter: &str,
    access_token: &str,
    msg_ref: &str,
) -> Frame {
    let changes: Vec<Value> = tables
        .iter()
        .map(|table| {
            let mut entry = json!({ "event": "*", "schema": schema, "table": table });
            if !filter.is_empty() {
                entry["filter"] = Value::String(filter.to_owned());
            }
            entry
        })
        .collect();

    let payload = json!({
        "config": {
            "broadcast": { "self": false },
            "presence": { "key": "" },
            "postgres_changes": changes,
            "private": false,
        },
        "access_token": access_token,
    });
    join(topic, payload, msg_ref)
}

/// Refresh the token on an already-joined channel.
pub fn access_token(topic: &str, token: &str, msg_ref: &str) -> Frame {
    Frame::new(
        topic,
        event::ACCESS_TOKEN,
        json!({ "access_token": token }),
        msg_ref,
    )
}

fn join(topic: &str, payload: Value, msg_ref: &str) -> Frame {
    let mut frame = Frame::new(topic, event::JOIN, payload, msg_ref);
    frame.join_ref = Some(msg_ref.to_owned());
    frame
}

// ── Inbound classification ───────────────────────────────────────────

/// What a decoded frame means to the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    HeartbeatReply,
    JoinReply {
        topic: String,
        accepted: bool,
        reason: Option<String>,
    },
    /// Presence traffic only flows on joined channels.
    PresenceConfirm { topic: String },
    ChannelClosed { topic: String },
    Message(InboundEnvelope),
    Ignored { event: String },
}

pub fn classify(frame: Frame) -> Inbound {
    let Frame {
        topic,
        event,
        payload,
        ..
    } = frame;

    match event.as_str() {
        event::REPLY if topic == PHOENIX_TOPIC => Inbound::HeartbeatReply,
        event::REPLY => {
            let status = payload.get("status").and_then(Value::as_str).unwrap_or("");
            let accepted = status == "ok";
            let reason = if accepted {
                None
            } else {
                payload
                    .pointer("/response/reason")
                    .and_then(Value::as_str)
                    .or(Some(status))
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
            };
            Inbound::JoinReply {
                topic,
                accepted,
                reason,
            }
        }
        event::PRESENCE_STATE | event::PRESENCE_DIFF => Inbound::PresenceConfirm { topic },
        event::CLOSE | event::ERROR => Inbound::ChannelClosed { topic },
        event::BROADCAST => Inbound::Message(InboundEnvelope::broadcast(topic, payload)),
        event::POSTGRES_CHANGES => Inbound::Message(row_change_envelope(topic, &payload)),
        _ => Inbound::Ignored { event },
    }
}

/// Normalize a `postgres_changes` payload so the core always sees
/// `{data: {type, table, schema, record}}`.
fn row_change_envelope(topic: String, payload: &Value) -> InboundEnvelope {
    let data = match payload.get("data") {
        Some(d @ Value::Object(_)) => d,
        Some(Value::Array(rows)) => rows.first().unwrap_or(payload),
        _ => payload,
    };

    let kind = data
        .get("type")
        .or_else(|| data.get("eventType"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let table = data
        .get("table")
        .or_else(|| data.get("relation"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let schema = data.get("schema").and_then(Value::as_str).unwrap_or("");

    InboundEnvelope::row_change(
        topic,
        schema,
        table,
        EventKind::from_wire(kind),
        json!({ "data": data }),
    )
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn heartbeat_encodes_on_phoenix_topic() {
        let encoded = heartbeat("7").encode();
        let value: Value = serde_json::from_str(&encoded).unwrap_or_default();
        assert_eq!(value["topic"], "phoenix");
        assert_eq!(value["event"], "heartbeat");
        assert_eq!(value["ref"], "7");
        assert!(value.get("join_ref").is_none());
    }

    #[test]
    fn private_join_carries_token_and_join_ref() {
        let frame = join_private(&user_topic("u-1"), "tok", "3");
        assert_eq!(frame.topic, "realtime:user:u-1");
        assert_eq!(frame.event, "phx_join");
        assert_eq!(frame.join_ref.as_deref(), Some("3"));
        assert_eq!(frame.payload["config"]["private"], true);
        assert_eq!(frame.payload["access_token"], "tok");
    }

    #[test]
    fn postgres_join_lists_each_table_with_filter() {
        let frame = join_postgres(
            LEGACY_TABLES_TOPIC,
            "display",
            &["commands", "pairings"],
            "pairing_code=eq.ABC123",
            "tok",
            "1",
        );
        let changes = frame.payload["config"]["postgres_changes"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0]["table"], "commands");
        assert_eq!(changes[1]["filter"], "pairing_code=eq.ABC123");
        assert_eq!(changes[1]["event"], "*");
    }

    #[test]
    fn decodes_object_form() {
        let frame = Frame::decode(
            r#"{"topic":"realtime:user:u","event":"broadcast","payload":{"event":"command"},"ref":null}"#,
        )
        .unwrap();
        assert_eq!(frame.topic, "realtime:user:u");
        assert_eq!(frame.msg_ref, None);
        assert_eq!(frame.payload["event"], "command");
    }

    #[test]
    fn decodes_array_form_with_numeric_ref() {
        let frame =
            Frame::decode(r#"["1", 4, "realtime:user:u", "phx_reply", {"status":"ok"}]"#).unwrap();
        assert_eq!(frame.join_ref.as_deref(), Some("1"));
        assert_eq!(frame.msg_ref.as_deref(), Some("4"));
        assert_eq!(frame.event, "phx_reply");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Frame::decode("not json").is_err());
        assert!(Frame::decode(r#"{"event":"x"}"#).is_err());
        assert!(Frame::decode("[1,2,3]").is_err());
    }

    #[test]
    fn ok_reply_accepts_channel() {
        let frame = Frame::decode(
            r#"{"topic":"realtime:user:u","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#,
        )
        .unwrap();
        assert_eq!(
            classify(frame),
            Inbound::JoinReply {
                topic: "realtime:user:u".into(),
                accepted: true,
                reason: None,
            }
        );
    }

    #[test]
    fn error_reply_carries_reason() {
        let frame = Frame::decode(
            r#"{"topic":"realtime:user:u","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}},"ref":"1"}"#,
        )
        .unwrap();
        let Inbound::JoinReply {
            accepted, reason, ..
        } = classify(frame)
        else {
            panic!("expected join reply");
        };
        assert!(!accepted);
        assert_eq!(reason.as_deref(), Some("unauthorized"));
    }

    #[test]
    fn phoenix_reply_is_heartbeat() {
        let frame = Frame::decode(
            r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok"},"ref":"9"}"#,
        )
        .unwrap();
        assert_eq!(classify(frame), Inbound::HeartbeatReply);
    }

    #[test]
    fn postgres_changes_are_normalized() {
        let frame = Frame::decode(
            r#"{"topic":"realtime:display","event":"postgres_changes","payload":{"data":{"type":"INSERT","table":"commands","schema":"display","record":{"id":"abcdefgh"}}},"ref":null}"#,
        )
        .unwrap();
        let Inbound::Message(env) = classify(frame) else {
            panic!("expected message");
        };
        assert_eq!(env.event_kind, EventKind::Insert);
        assert_eq!(env.table, "commands");
        assert_eq!(env.schema, "display");
        assert_eq!(env.payload["data"]["record"]["id"], "abcdefgh");
    }

    #[test]
    fn postgres_changes_array_data_uses_first_row() {
        let payload = json!({"data": [{"eventType": "UPDATE", "relation": "pairings"}]});
        let env = row_change_envelope("realtime:display".into(), &payload);
        assert_eq!(env.event_kind, EventKind::Update);
        assert_eq!(env.table, "pairings");
    }

    #[test]
    fn presence_confirms_channel() {
        let frame = Frame::new("realtime:user:u", event::PRESENCE_STATE, json!({}), "2");
        assert_eq!(
            classify(frame),
            Inbound::PresenceConfirm {
                topic: "realtime:user:u".into()
            }
        );
    }
}
