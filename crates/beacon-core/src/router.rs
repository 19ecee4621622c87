//! Inbound event routing.
//!
//! Every envelope the transport delivers goes through
//! [`EventRouter::on_message`], which picks exactly one handler. Two
//! broadcast shapes are in circulation:
//!
//! - current: `{event, payload: {...}}`
//! - legacy nested: `{payload: {event, payload: {table, operation, record}}}`
//!
//! [`decode_broadcast`] probes the top level first and falls back to the
//! nested form. Row-change (`postgres_changes`) envelopes are the legacy
//! path and are only honoured while the device has no user uuid.

use serde_json::Value;

use beacon_api::{EventKind, InboundEnvelope};

use crate::clock::Tick;
use crate::command::{self, str_field};
use crate::context::SyncContext;
use crate::identity::non_empty;
use crate::pairing::{self, PairingSnapshot};

// ── Outcomes ─────────────────────────────────────────────────────────

/// What happened to one inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    CommandAccepted,
    StatusApplied,
    /// Pairing liveness ping; only the sync timestamp moved.
    StatusUnchanged,
    /// The user uuid was rewritten; the supervisor must reconnect.
    IdentityChanged,
    ConfigRequested,
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Malformed,
    UnknownEvent,
    /// Row change received while a user channel is authoritative.
    LegacySuperseded,
    UnhandledTable,
    MissingRecord,
    MissingUserUuid,
    UnchangedIdentity,
    /// Device-scoped broadcast without a `device_uuid`.
    MissingDeviceScope,
    OtherDevice,
    InvalidCommand,
    Duplicate,
    NotPending,
}

// ── Broadcast decoding ───────────────────────────────────────────────

/// A broadcast body after shape probing. Borrows from the envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastEvent<'a> {
    UserAssigned(&'a Value),
    WebexStatus(&'a Value),
    Command(&'a Value),
    RequestConfig(&'a Value),
    RowChange {
        table: &'a str,
        operation: &'a str,
        record: Option<&'a Value>,
    },
    Unknown(String),
}

pub fn decode_broadcast(payload: &Value) -> BroadcastEvent<'_> {
    if let Some(event) = known_event(payload) {
        return event;
    }

    let nested = payload.get("payload").filter(|v| v.is_object());
    if let Some(inner) = nested {
        if let Some(event) = known_event(inner) {
            return event;
        }

        let body = data_of(inner);
        let table = str_field(body, "table");
        let operation = str_field(body, "operation");
        if !table.is_empty() && !operation.is_empty() {
            return BroadcastEvent::RowChange {
                table,
                operation,
                record: body.get("record").filter(|r| r.is_object()),
            };
        }
    }

    let name = [Some(payload), nested]
        .into_iter()
        .flatten()
        .map(|v| str_field(v, "event"))
        .find(|name| !name.is_empty())
        .unwrap_or_default();
    BroadcastEvent::Unknown(name.to_owned())
}

/// The data object for a `{event, payload}` body, or the body itself.
fn data_of(body: &Value) -> &Value {
    body.get("payload").filter(|p| p.is_object()).unwrap_or(body)
}

fn known_event(body: &Value) -> Option<BroadcastEvent<'_>> {
    let data = data_of(body);
    match body.get("event")?.as_str()? {
        "user_assigned" => Some(BroadcastEvent::UserAssigned(data)),
        "webex_status" => Some(BroadcastEvent::WebexStatus(data)),
        "command" => Some(BroadcastEvent::Command(data)),
        "request_config" => Some(BroadcastEvent::RequestConfig(data)),
        _ => None,
    }
}

// ── Router ───────────────────────────────────────────────────────────

/// Running totals, exposed for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub received: u64,
    pub handled: u64,
    pub dropped: u64,
}

#[derive(Debug, Default)]
pub struct EventRouter {
    stats: RouterStats,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Route one envelope to its handler. Never fails; anything that cannot
    /// be handled is dropped and logged.
    pub fn on_message(
        &mut self,
        envelope: &InboundEnvelope,
        now: Tick,
        ctx: &mut SyncContext<'_>,
    ) -> RouteOutcome {
        self.stats.received += 1;
        let outcome = route(envelope, now, ctx);
        if let RouteOutcome::Dropped(reason) = outcome {
            self.stats.dropped += 1;
            tracing::debug!(topic = %envelope.topic, ?reason, "Realtime message dropped");
        } else {
            self.stats.handled += 1;
        }
        outcome
    }
}

fn route(envelope: &InboundEnvelope, now: Tick, ctx: &mut SyncContext<'_>) -> RouteOutcome {
    if !envelope.is_valid() {
        tracing::debug!(
            topic = %envelope.topic,
            kind = %envelope.event_kind,
            "Malformed realtime envelope"
        );
        return RouteOutcome::Dropped(DropReason::Malformed);
    }

    match envelope.event_kind {
        EventKind::Broadcast => route_broadcast(&envelope.payload, now, ctx),
        EventKind::Insert | EventKind::Update => route_row_change(envelope, now, ctx),
        EventKind::Other(_) => RouteOutcome::Dropped(DropReason::Malformed),
    }
}

fn route_broadcast(payload: &Value, now: Tick, ctx: &mut SyncContext<'_>) -> RouteOutcome {
    match decode_broadcast(payload) {
        BroadcastEvent::UserAssigned(data) => handle_user_assigned(data, ctx),
        BroadcastEvent::WebexStatus(data) => {
            let snapshot = PairingSnapshot::from_record(data, true);
            pairing::reconcile(&snapshot, now, ctx)
        }
        BroadcastEvent::Command(data) => handle_command_broadcast(data, ctx),
        BroadcastEvent::RequestConfig(data) => handle_request_config(data, ctx),
        BroadcastEvent::RowChange {
            table,
            operation,
            record,
        } => {
            if legacy_superseded(ctx) {
                return RouteOutcome::Dropped(DropReason::LegacySuperseded);
            }
            let Some(record) = record else {
                return RouteOutcome::Dropped(DropReason::MissingRecord);
            };
            let kind = EventKind::from_wire(operation);
            route_table(table, &kind, record, now, ctx)
        }
        BroadcastEvent::Unknown(name) => {
            tracing::info!(event = %name, "Unknown broadcast event");
            RouteOutcome::Dropped(DropReason::UnknownEvent)
        }
    }
}

fn route_row_change(
    envelope: &InboundEnvelope,
    now: Tick,
    ctx: &mut SyncContext<'_>,
) -> RouteOutcome {
    if legacy_superseded(ctx) {
        return RouteOutcome::Dropped(DropReason::LegacySuperseded);
    }
    let Some(record) = envelope
        .payload
        .pointer("/data/record")
        .filter(|r| r.is_object())
    else {
        return RouteOutcome::Dropped(DropReason::MissingRecord);
    };
    route_table(&envelope.table, &envelope.event_kind, record, now, ctx)
}

fn route_table(
    table: &str,
    kind: &EventKind,
    record: &Value,
    now: Tick,
    ctx: &mut SyncContext<'_>,
) -> RouteOutcome {
    match (table, kind) {
        ("commands", EventKind::Insert) => {
            let local = ctx.identity.device_uuid();
            command::ingest(record, None, local.as_deref(), ctx.commands)
        }
        ("pairings", EventKind::Update) => {
            let snapshot = PairingSnapshot::from_record(record, false);
            pairing::reconcile(&snapshot, now, ctx)
        }
        _ => RouteOutcome::Dropped(DropReason::UnhandledTable),
    }
}

/// Once a user uuid exists the user channel carries everything.
fn legacy_superseded(ctx: &SyncContext<'_>) -> bool {
    ctx.identity.user_uuid().is_some()
}

// ── Handlers ─────────────────────────────────────────────────────────

fn handle_user_assigned(data: &Value, ctx: &mut SyncContext<'_>) -> RouteOutcome {
    let Some(user_uuid) = non_empty(data.get("user_uuid").and_then(Value::as_str).map(str::to_owned))
    else {
        return RouteOutcome::Dropped(DropReason::MissingUserUuid);
    };

    if ctx.identity.user_uuid().as_deref() == Some(user_uuid.as_str()) {
        return RouteOutcome::Dropped(DropReason::UnchangedIdentity);
    }

    if let Err(e) = ctx.identity.set_user_uuid(&user_uuid) {
        tracing::warn!(error = %e, "Failed to persist assigned user uuid");
    }
    tracing::info!(user_uuid = %user_uuid, "User assigned, reconnecting realtime");
    RouteOutcome::IdentityChanged
}

fn handle_command_broadcast(data: &Value, ctx: &mut SyncContext<'_>) -> RouteOutcome {
    let record = ["command", "record"]
        .into_iter()
        .find_map(|key| data.get(key).filter(|v| v.is_object()))
        .unwrap_or(data);

    let target = non_empty(
        data.get("device_uuid")
            .or_else(|| record.get("device_uuid"))
            .and_then(Value::as_str)
            .map(str::to_owned),
    );
    let Some(target) = target else {
        return RouteOutcome::Dropped(DropReason::MissingDeviceScope);
    };

    let local = ctx.identity.device_uuid();
    command::ingest(record, Some(&target), local.as_deref(), ctx.commands)
}

fn handle_request_config(data: &Value, ctx: &mut SyncContext<'_>) -> RouteOutcome {
    let local = ctx.identity.device_uuid();
    let target = non_empty(
        data.get("device_uuid")
            .and_then(Value::as_str)
            .map(str::to_owned),
    );

    if let Some(target) = target {
        if local.as_deref() != Some(target.as_str()) {
            return RouteOutcome::Dropped(DropReason::OtherDevice);
        }
    }

    tracing::info!("Config re-broadcast requested");
    ctx.config_sync.request_config_broadcast(local.as_deref());
    RouteOutcome::ConfigRequested
}

// ── Tests ────────────────────────────────────────────────────────────
