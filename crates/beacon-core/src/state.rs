// ── Shared device state ──
//
// One owned `DeviceState` lives for the whole uptime of the device and is
// threaded by `&mut` into every tick entry point through `SyncContext`.

use serde::Serialize;
use strum::{Display, IntoStaticStr};

use crate::clock::Tick;

/// Where the current camera/mic/call status came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusSource {
    #[default]
    None,
    /// Companion app over the realtime channel.
    EmbeddedApp,
    /// Local device integration (xAPI); outranks the app.
    Xapi,
}

/// Process-wide device state.
///
/// | field                                  | written by                          |
/// |----------------------------------------|-------------------------------------|
/// | `wifi_connected`, `backend_connected`  | network layer (host application)    |
/// | `time_synced`                          | time sync (host application)        |
/// | `xapi_connected`                       | local integration                   |
/// | `realtime_connected`                   | `Supervisor::tick`                  |
/// | `last_error`, `last_error_at`          | `Supervisor::attempt_init`          |
/// | `defer_until`                          | anyone deferring realtime work      |
/// | `app_connected`, `webex_status`,       |                                     |
/// | `webex_status_received`, `status_source`, `display_name` | pairing reconciliation |
/// | `camera_on`, `mic_muted`, `in_call`    | pairing reconciliation, local integration |
/// | `last_sync_at`                         | pairing reconciliation              |
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    // ── Connectivity ─────────────────────────────────────────────────
    pub wifi_connected: bool,
    pub backend_connected: bool,
    pub time_synced: bool,
    pub xapi_connected: bool,
    pub realtime_connected: bool,

    // ── Presence / status ────────────────────────────────────────────
    pub app_connected: bool,
    pub webex_status: String,
    pub webex_status_received: bool,
    pub status_source: StatusSource,
    pub display_name: String,
    pub camera_on: bool,
    pub mic_muted: bool,
    pub in_call: bool,

    // ── Bookkeeping ──────────────────────────────────────────────────
    pub last_error: Option<String>,
    #[serde(skip)]
    pub last_error_at: Option<Tick>,
    #[serde(skip)]
    pub last_sync_at: Option<Tick>,
    #[serde(skip)]
    pub defer_until: Option<Tick>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            wifi_connected: false,
            backend_connected: false,
            time_synced: false,
            xapi_connected: false,
            realtime_connected: false,
            app_connected: false,
            webex_status: "offline".into(),
            webex_status_received: false,
            status_source: StatusSource::None,
            display_name: String::new(),
            camera_on: false,
            mic_muted: false,
            in_call: false,
            last_error: None,
            last_error_at: None,
            last_sync_at: None,
            defer_until: None,
        }
    }
}

impl DeviceState {
    pub fn record_error(&mut self, reason: &str, now: Tick) {
        self.last_error = Some(reason.to_owned());
        self.last_error_at = Some(now);
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.last_error_at = None;
    }

    /// Suppress realtime (re)connection until `until`.
    pub fn defer_realtime_until(&mut self, until: Tick) {
        self.defer_until = Some(until);
    }

    /// Whether `now` is still inside the defer window. An expired window
    /// is cleared so it cannot appear active again once the tick wraps.
    pub fn realtime_deferred(&mut self, now: Tick) -> bool {
        match self.defer_until {
            Some(until) if now.is_before(until) => true,
            Some(_) => {
                self.defer_until = None;
                false
            }
            None => false,
        }
    }

    /// Link up and backend reachable.
    pub fn network_ready(&self) -> bool {
        self.wifi_connected && self.backend_connected
    }
}
