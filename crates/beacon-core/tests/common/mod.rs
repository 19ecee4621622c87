// Shared fakes for beacon-core integration tests.
#![allow(dead_code, clippy::unwrap_used)]

use std::time::Duration;

use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use beacon_api::{EventKind, InboundEnvelope, RealtimeTransport};
use beacon_core::{
    BackendSession, Command, CommandEngine, ConfigSync, DeviceState, MemoryIdentityStore,
    Platform, RecentCommands, SyncContext, Tick,
};

pub const USER_UUID: &str = "user-12345678-1234-1234-1234-123456789abc";
pub const DEVICE_UUID: &str = "device-12345678-1234-1234-1234-123456789abc";
pub const OTHER_DEVICE_UUID: &str = "device-87654321-4321-4321-4321-cba987654321";
pub const PAIRING_CODE: &str = "ABC123";

pub fn at(ms: u32) -> Tick {
    Tick::from_millis(ms)
}

pub fn later(t: Tick, secs: u64) -> Tick {
    t.after(Duration::from_secs(secs))
}

// ── Transport ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Begin { url: String },
    RegisterSink,
    SubscribeUser(String),
    SubscribeDevice(String),
    SubscribeMultiple {
        schema: String,
        tables: Vec<String>,
        filter: String,
    },
    SubscribeBroadcast,
    SetTopic(String),
    Tick,
    Disconnect,
}

/// Transport double that records every call and reports whatever
/// connection flags the test sets.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub calls: Vec<Call>,
    pub socket_connected: bool,
    pub fully_connected: bool,
    pub connecting: bool,
    pub ever_connected: bool,
    pub min_heap: u64,
    pub fail_begin: bool,
    pub reject_user: bool,
    pub reject_device: bool,
    pub reject_legacy: bool,
    /// Returned once from `take_error`, like a socket task that died.
    pub pending_error: Option<beacon_api::Error>,
    sink: Option<mpsc::Sender<InboundEnvelope>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            min_heap: 100_000,
            ..Self::default()
        }
    }

    pub fn deliver(&self, envelope: InboundEnvelope) {
        self.sink
            .as_ref()
            .expect("message sink not registered")
            .try_send(envelope)
            .unwrap();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn begins(&self) -> usize {
        self.count(|c| matches!(c, Call::Begin { .. }))
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.calls.iter().position(|c| c == call)
    }

    /// Calls made after the last `Begin`, excluding ticks.
    pub fn session_calls(&self) -> Vec<Call> {
        let start = self
            .calls
            .iter()
            .rposition(|c| matches!(c, Call::Begin { .. }))
            .map_or(0, |i| i + 1);
        self.calls[start..]
            .iter()
            .filter(|c| !matches!(c, Call::Tick))
            .cloned()
            .collect()
    }
}

impl RealtimeTransport for MockTransport {
    fn begin(
        &mut self,
        service_url: &str,
        _anon_key: &SecretString,
        _access_token: &SecretString,
    ) -> Result<(), beacon_api::Error> {
        self.calls.push(Call::Begin {
            url: service_url.to_owned(),
        });
        if self.fail_begin {
            return Err(beacon_api::Error::UnsupportedScheme("ftp".into()));
        }
        Ok(())
    }

    fn register_message_sink(&mut self, sink: mpsc::Sender<InboundEnvelope>) {
        self.calls.push(Call::RegisterSink);
        self.sink = Some(sink);
    }

    fn subscribe_to_user_channel(&mut self, user_uuid: &str) -> bool {
        self.calls.push(Call::SubscribeUser(user_uuid.to_owned()));
        !self.reject_user
    }

    fn subscribe_to_device_channel(&mut self, device_uuid: &str) -> bool {
        self.calls.push(Call::SubscribeDevice(device_uuid.to_owned()));
        !self.reject_device
    }

    fn subscribe_multiple(&mut self, schema: &str, tables: &[&str], filter: &str) -> bool {
        self.calls.push(Call::SubscribeMultiple {
            schema: schema.to_owned(),
            tables: tables.iter().map(|t| (*t).to_owned()).collect(),
            filter: filter.to_owned(),
        });
        !self.reject_legacy
    }

    fn subscribe_broadcast(&mut self) -> bool {
        self.calls.push(Call::SubscribeBroadcast);
        !self.reject_legacy
    }

    fn set_channel_topic(&mut self, topic: &str) {
        self.calls.push(Call::SetTopic(topic.to_owned()));
    }

    fn tick(&mut self) {
        self.calls.push(Call::Tick);
    }

    fn is_socket_connected(&self) -> bool {
        self.socket_connected
    }

    fn is_fully_connected(&self) -> bool {
        self.fully_connected
    }

    fn is_connecting(&self) -> bool {
        self.connecting
    }

    fn has_ever_connected(&self) -> bool {
        self.ever_connected
    }

    fn min_heap_required(&self) -> u64 {
        self.min_heap
    }

    fn disconnect(&mut self) {
        self.calls.push(Call::Disconnect);
        self.socket_connected = false;
        self.fully_connected = false;
        self.connecting = false;
    }

    fn take_error(&mut self) -> Option<beacon_api::Error> {
        self.pending_error.take()
    }
}

// ── Collaborators ───────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MockBackend {
    pub token: Option<String>,
    pub in_flight: bool,
    pub logs: Vec<(String, String, Value)>,
}

impl BackendSession for MockBackend {
    fn access_token(&self) -> Option<SecretString> {
        self.token.clone().map(SecretString::from)
    }

    fn is_request_in_flight(&self) -> bool {
        self.in_flight
    }

    fn insert_device_log(&mut self, level: &str, event: &str, meta: &Value) {
        self.logs
            .push((level.to_owned(), event.to_owned(), meta.clone()));
    }
}

#[derive(Debug, Default)]
pub struct RecordingEngine {
    pub recent: RecentCommands,
    pub executed: Vec<Command>,
}

impl CommandEngine for RecordingEngine {
    fn was_recently_processed(&self, id: &str) -> bool {
        self.recent.contains(id)
    }

    fn execute(&mut self, command: Command) {
        self.recent.insert(&command.id);
        self.executed.push(command);
    }
}

#[derive(Debug, Default)]
pub struct MockConfigSync {
    pub requests: Vec<Option<String>>,
}

impl ConfigSync for MockConfigSync {
    fn request_config_broadcast(&mut self, device_uuid: Option<&str>) {
        self.requests.push(device_uuid.map(str::to_owned));
    }
}

#[derive(Debug)]
pub struct MockPlatform {
    pub heap: u64,
    pub time: i64,
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self {
            heap: 180_000,
            time: 1_760_000_000,
        }
    }
}

impl Platform for MockPlatform {
    fn free_heap(&mut self) -> u64 {
        self.heap
    }

    fn unix_time(&self) -> i64 {
        self.time
    }
}

// ── Harness ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Harness {
    pub state: DeviceState,
    pub identity: MemoryIdentityStore,
    pub backend: MockBackend,
    pub engine: RecordingEngine,
    pub config_sync: MockConfigSync,
    pub platform: MockPlatform,
}

impl Harness {
    /// Every precondition met, identity keyed by user + device uuid.
    pub fn ready() -> Self {
        let mut h = Self::default();
        h.state.wifi_connected = true;
        h.state.backend_connected = true;
        h.state.time_synced = true;
        h.identity.anon_key = Some("anon-key".into());
        h.identity.service_url = Some("https://example.supabase.co".into());
        h.identity.user_uuid = Some(USER_UUID.into());
        h.identity.device_uuid = Some(DEVICE_UUID.into());
        h.backend.token = Some("access-token".into());
        h
    }

    /// Like [`ready`](Self::ready), but only a pairing code is known.
    pub fn legacy() -> Self {
        let mut h = Self::ready();
        h.identity.user_uuid = None;
        h.identity.pairing_code = Some(PAIRING_CODE.into());
        h
    }

    pub fn ctx(&mut self) -> SyncContext<'_> {
        SyncContext {
            state: &mut self.state,
            identity: &mut self.identity,
            backend: &mut self.backend,
            commands: &mut self.engine,
            config_sync: &mut self.config_sync,
            platform: &mut self.platform,
        }
    }
}

// ── Envelopes ───────────────────────────────────────────────────────

pub fn broadcast(event: &str, payload: Value) -> InboundEnvelope {
    InboundEnvelope::broadcast(
        format!("realtime:user:{USER_UUID}"),
        json!({ "type": "broadcast", "event": event, "payload": payload }),
    )
}

pub fn row_change(table: &str, kind: EventKind, record: Value) -> InboundEnvelope {
    InboundEnvelope::row_change(
        "realtime:display",
        "display",
        table,
        kind.clone(),
        json!({ "data": { "type": kind.to_string(), "table": table, "schema": "display", "record": record } }),
    )
}

pub fn command_record(id: &str) -> Value {
    json!({
        "id": id,
        "command": "set_brightness",
        "created_at": "2026-10-18T09:00:00Z",
        "status": "pending",
        "payload": { "value": 128 },
    })
}
