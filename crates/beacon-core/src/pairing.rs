// ── Pairing / status reconciliation ──
//
// The companion app publishes presence and call status either as a
// `webex_status` broadcast or as an UPDATE on the legacy `pairings`
// table. Most of those messages are liveness pings that change nothing;
// only real changes touch device state.

use serde_json::Value;

use crate::clock::Tick;
use crate::command::{opt_field, str_field};
use crate::context::SyncContext;
use crate::router::RouteOutcome;
use crate::state::{DeviceState, StatusSource};

const OFFLINE: &str = "offline";

/// Status fields carried by a pairing update, used for comparison only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingSnapshot {
    pub app_connected: bool,
    pub webex_status: String,
    pub display_name: String,
    pub camera_on: bool,
    pub mic_muted: bool,
    pub in_call: bool,
}

impl PairingSnapshot {
    /// Extract a snapshot; `app_connected_default` applies when the record
    /// omits `app_connected`.
    pub fn from_record(record: &Value, app_connected_default: bool) -> Self {
        let flag = |key: &str| record.get(key).and_then(Value::as_bool).unwrap_or(false);
        Self {
            app_connected: record
                .get("app_connected")
                .and_then(Value::as_bool)
                .unwrap_or(app_connected_default),
            webex_status: opt_field(record, "webex_status").unwrap_or_else(|| OFFLINE.to_owned()),
            display_name: str_field(record, "display_name").trim().to_owned(),
            camera_on: flag("camera_on"),
            mic_muted: flag("mic_muted"),
            in_call: flag("in_call"),
        }
    }

    /// Whether applying this snapshot would change anything visible.
    ///
    /// Camera/mic/call only count while no local integration owns them.
    pub fn differs_from(&self, state: &DeviceState) -> bool {
        let presence_changed = self.app_connected != state.app_connected
            || self.webex_status != state.webex_status
            || (!self.display_name.is_empty() && self.display_name != state.display_name);

        let media_changed = !state.xapi_connected
            && (self.camera_on != state.camera_on
                || self.mic_muted != state.mic_muted
                || self.in_call != state.in_call);

        presence_changed || media_changed
    }
}

/// Apply `snapshot` if it changes anything; otherwise only refresh the
/// sync timestamp.
pub fn reconcile(snapshot: &PairingSnapshot, now: Tick, ctx: &mut SyncContext<'_>) -> RouteOutcome {
    ctx.state.last_sync_at = Some(now);

    if !snapshot.differs_from(ctx.state) {
        if ctx.identity.pairing_realtime_debug() {
            tracing::debug!(
                status = %snapshot.webex_status,
                "Pairing update ignored (no status change)"
            );
        }
        return RouteOutcome::StatusUnchanged;
    }

    let applied = apply(snapshot, ctx.state);
    if applied.presence {
        persist(snapshot, ctx);
    }

    match applied {
        Applied {
            presence: true,
            media: true,
        } => tracing::info!(
            status = %snapshot.webex_status,
            camera_on = snapshot.camera_on,
            mic_muted = snapshot.mic_muted,
            in_call = snapshot.in_call,
            "Pairing status changed"
        ),
        Applied {
            presence: true,
            media: false,
        } => tracing::info!(
            status = %snapshot.webex_status,
            "Pairing status changed (media owned by xAPI)"
        ),
        Applied { presence: false, .. } => tracing::info!(
            app_connected = snapshot.app_connected,
            "Pairing app connectivity changed"
        ),
    }
    RouteOutcome::StatusApplied
}

/// Which groups of fields [`apply`] actually wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Applied {
    presence: bool,
    media: bool,
}

fn apply(snapshot: &PairingSnapshot, state: &mut DeviceState) -> Applied {
    state.app_connected = snapshot.app_connected;
    if !snapshot.app_connected {
        return Applied {
            presence: false,
            media: false,
        };
    }

    state.webex_status.clone_from(&snapshot.webex_status);
    state.webex_status_received = true;
    state.status_source = StatusSource::EmbeddedApp;
    if !snapshot.display_name.is_empty() {
        state.display_name.clone_from(&snapshot.display_name);
    }

    let media = !state.xapi_connected;
    if media {
        state.camera_on = snapshot.camera_on;
        state.mic_muted = snapshot.mic_muted;
        state.in_call = snapshot.in_call;
    }
    Applied {
        presence: true,
        media,
    }
}

fn persist(snapshot: &PairingSnapshot, ctx: &mut SyncContext<'_>) {
    if let Err(e) = ctx.identity.set_last_webex_status(&snapshot.webex_status) {
        tracing::warn!(error = %e, "Failed to persist last webex status");
    }
    if !snapshot.display_name.is_empty() {
        if let Err(e) = ctx.identity.set_display_name(&snapshot.display_name) {
            tracing::warn!(error = %e, "Failed to persist display name");
        }
    }
}
