// ── Connection supervisor ──
//
// Owns the realtime transport and decides, once per tick, whether to pump
// it, drain its inbound queue, warn about a stalled subscription, or try
// to (re)connect. Nothing here blocks; every wait is a "not yet due"
// comparison against the caller's `Tick`.

use std::time::Duration;

use serde_json::json;
use strum::IntoStaticStr;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use beacon_api::{InboundEnvelope, RealtimeTransport};

use crate::clock::Tick;
use crate::context::SyncContext;
use crate::error::CoreError;
use crate::identity::{LegacyMode, ResolvedIdentity, SubscriptionMode, resolve_identity};
use crate::router::{EventRouter, RouteOutcome};

/// Retry pacing before the transport has ever connected.
pub const INIT_RETRY_INTERVAL: Duration = Duration::from_secs(15);
/// Retry pacing once a connection has succeeded at least once.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(60);
/// How long "not fully connected" is tolerated before the watchdog warns.
pub const WATCHDOG_STALL: Duration = Duration::from_secs(60);
pub const WATCHDOG_LOG_INTERVAL: Duration = Duration::from_secs(30);
/// Reason recorded when a live socket session ends with an error.
pub const CONNECTION_LOST: &str = "connection_lost";
/// Minimum spacing of `realtime_connect_failed` diagnostics.
pub const DIAGNOSTIC_INTERVAL: Duration = Duration::from_secs(600);

const INBOUND_QUEUE_CAPACITY: usize = 32;
const LEGACY_SCHEMA: &str = "display";

// ── InitFailure ──────────────────────────────────────────────────────

/// Why an init attempt stopped. The snake_case variant name is the
/// symbolic reason recorded in device state.
#[derive(Debug, Error, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum InitFailure {
    #[error("anon key is not configured")]
    AnonKeyMissing,

    #[error("wall clock is not synchronized")]
    TimeNotSynced,

    #[error("free heap {free} is below the transport minimum {required}")]
    LowHeap { free: u64, required: u64 },

    #[error("service URL or access token is missing")]
    MissingUrlOrToken,

    #[error("transport rejected connection parameters: {0}")]
    TransportBeginFailed(#[from] CoreError),

    #[error("user channel subscription was not accepted")]
    UserChannelSubscribeFailed,

    #[error("neither a user uuid nor a pairing code is available")]
    NoIdentity,

    #[error("legacy subscription was not accepted")]
    ConnectionTimeout,
}

impl InitFailure {
    pub fn reason(&self) -> &'static str {
        self.into()
    }

    /// Failures reported upstream as connection timeouts.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::NoIdentity | Self::ConnectionTimeout)
    }
}

// ── ConnectionState ──────────────────────────────────────────────────

/// Supervisor bookkeeping. Reset by [`Supervisor::begin`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub initialized: bool,
    pub last_init_attempt: Option<Tick>,
    pub last_subscribed_time: Tick,
    pub last_watchdog_log: Option<Tick>,
    pub watchdog_primed: bool,
}

// ── Supervisor ───────────────────────────────────────────────────────

pub struct Supervisor<T: RealtimeTransport> {
    transport: T,
    router: EventRouter,
    legacy_mode: LegacyMode,
    conn: ConnectionState,
    last_diagnostic: Option<Tick>,
    subscription: Option<SubscriptionMode>,
    inbound_tx: mpsc::Sender<InboundEnvelope>,
    inbound_rx: mpsc::Receiver<InboundEnvelope>,
}

impl<T: RealtimeTransport> Supervisor<T> {
    pub fn new(transport: T, legacy_mode: LegacyMode) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        Self {
            transport,
            router: EventRouter::new(),
            legacy_mode,
            conn: ConnectionState::default(),
            last_diagnostic: None,
            subscription: None,
            inbound_tx,
            inbound_rx,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.conn
    }

    /// Subscription shape requested by the last successful attempt.
    pub fn subscription(&self) -> Option<SubscriptionMode> {
        self.subscription
    }

    /// Reset bookkeeping. Safe to call more than once.
    pub fn begin(&mut self) {
        self.conn = ConnectionState::default();
        self.subscription = None;
    }

    /// Socket open and at least one channel confirmed.
    pub fn is_connected(&self) -> bool {
        self.transport.is_socket_connected() && self.transport.is_fully_connected()
    }

    /// Tear the transport down; the next due tick retries immediately.
    pub fn force_reconnect(&mut self) {
        info!("Forcing realtime reconnect");
        self.transport.disconnect();
        self.conn.initialized = false;
        self.conn.last_init_attempt = None;
        self.subscription = None;
    }

    pub fn tick(&mut self, now: Tick, ctx: &mut SyncContext<'_>) {
        if self.transport.is_socket_connected() || self.transport.is_connecting() {
            self.transport.tick();
        }
        if let Some(err) = self.transport.take_error() {
            let err = CoreError::from(err);
            warn!(error = %err, "Realtime session ended");
            ctx.state.record_error(CONNECTION_LOST, now);
        }

        let identity_changed = self.drain_inbound(now, ctx);
        self.update_watchdog(now, ctx);
        ctx.state.realtime_connected = self.is_connected();

        // Re-subscription after an identity change waits for the next tick.
        if identity_changed {
            self.force_reconnect();
            ctx.state.realtime_connected = false;
            return;
        }

        if self.reconnect_due(now, ctx) {
            if ctx.backend.is_request_in_flight() {
                debug!("Realtime retry due but a backend request is in flight");
                return;
            }
            self.conn.last_init_attempt = Some(now);
            info!(
                ever_connected = self.transport.has_ever_connected(),
                "Attempting realtime connection"
            );
            self.attempt_init(now, ctx);
        }
    }

    /// Run the precondition gate and, if it passes, start the transport and
    /// request subscriptions. Returns `true` when subscriptions were queued.
    pub fn attempt_init(&mut self, now: Tick, ctx: &mut SyncContext<'_>) -> bool {
        match self.try_init(ctx) {
            Ok(mode) => {
                self.conn.initialized = true;
                self.subscription = Some(mode);
                ctx.state.clear_error();
                info!(mode = %mode, "Realtime subscription requested");
                true
            }
            Err(failure) => {
                let reason = failure.reason();
                warn!(reason, detail = %failure, "Realtime init blocked");
                ctx.state.record_error(reason, now);
                if failure.is_timeout() {
                    self.emit_diagnostic(reason, now, ctx);
                }
                false
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Hand every queued envelope to the router. Returns whether any of
    /// them changed the user identity.
    fn drain_inbound(&mut self, now: Tick, ctx: &mut SyncContext<'_>) -> bool {
        let mut identity_changed = false;
        while let Ok(envelope) = self.inbound_rx.try_recv() {
            if self.router.on_message(&envelope, now, ctx) == RouteOutcome::IdentityChanged {
                identity_changed = true;
            }
        }
        identity_changed
    }

    fn update_watchdog(&mut self, now: Tick, ctx: &SyncContext<'_>) {
        if !self.conn.watchdog_primed {
            self.conn.watchdog_primed = true;
            self.conn.last_subscribed_time = now;
        }

        if self.transport.is_fully_connected() {
            self.conn.last_subscribed_time = now;
            return;
        }

        if !ctx.state.network_ready() {
            return;
        }

        let stalled_for = now.since(self.conn.last_subscribed_time);
        if stalled_for <= WATCHDOG_STALL {
            return;
        }

        let log_due = self
            .conn
            .last_watchdog_log
            .is_none_or(|last| now.since(last) >= WATCHDOG_LOG_INTERVAL);
        if log_due {
            self.conn.last_watchdog_log = Some(now);
            warn!(
                stalled_secs = stalled_for.as_secs(),
                socket = self.transport.is_socket_connected(),
                connecting = self.transport.is_connecting(),
                "Realtime watchdog: not fully subscribed"
            );
        }
    }

    fn reconnect_due(&self, now: Tick, ctx: &mut SyncContext<'_>) -> bool {
        // Checked first so an expired window is dropped on every tick.
        if ctx.state.realtime_deferred(now) {
            return false;
        }
        if !ctx.state.network_ready() {
            return false;
        }
        if self.transport.is_socket_connected() || self.transport.is_connecting() {
            return false;
        }

        let interval = if self.transport.has_ever_connected() {
            RECONNECT_INTERVAL
        } else {
            INIT_RETRY_INTERVAL
        };
        self.conn
            .last_init_attempt
            .is_none_or(|last| now.since(last) >= interval)
    }

    fn try_init(&mut self, ctx: &mut SyncContext<'_>) -> Result<SubscriptionMode, InitFailure> {
        let anon_key = ctx.identity.anon_key().ok_or(InitFailure::AnonKeyMissing)?;

        if !ctx.state.time_synced {
            return Err(InitFailure::TimeNotSynced);
        }

        let required = self.transport.min_heap_required();
        let free = ctx.platform.free_heap();
        if free < required {
            return Err(InitFailure::LowHeap { free, required });
        }

        let (Some(service_url), Some(access_token)) =
            (ctx.identity.service_url(), ctx.backend.access_token())
        else {
            return Err(InitFailure::MissingUrlOrToken);
        };

        let identity = resolve_identity(&*ctx.identity);
        if identity == ResolvedIdentity::None {
            return Err(InitFailure::NoIdentity);
        }

        self.transport.register_message_sink(self.inbound_tx.clone());
        self.transport
            .begin(&service_url, &anon_key, &access_token)
            .map_err(CoreError::from)?;

        match identity {
            ResolvedIdentity::User {
                user_uuid,
                device_uuid,
            } => {
                if !self.transport.subscribe_to_user_channel(&user_uuid) {
                    return Err(InitFailure::UserChannelSubscribeFailed);
                }
                match device_uuid {
                    Some(device_uuid) => {
                        if !self.transport.subscribe_to_device_channel(&device_uuid) {
                            warn!(device_uuid = %device_uuid, "Device channel subscribe failed");
                        }
                    }
                    None => debug!("No device uuid, skipping device channel"),
                }
                Ok(SubscriptionMode::UserChannel)
            }
            ResolvedIdentity::Pairing { code } => self.subscribe_legacy(&code),
            ResolvedIdentity::None => Err(InitFailure::NoIdentity),
        }
    }

    fn subscribe_legacy(&mut self, code: &str) -> Result<SubscriptionMode, InitFailure> {
        let queued = if self.legacy_mode == LegacyMode::Broadcast {
            let topic = beacon_api::phoenix::pairing_broadcast_topic(code);
            self.transport.set_channel_topic(&topic);
            self.transport.subscribe_broadcast()
        } else {
            let filter = format!("pairing_code=eq.{code}");
            self.transport
                .set_channel_topic(beacon_api::phoenix::LEGACY_TABLES_TOPIC);
            self.transport
                .subscribe_multiple(LEGACY_SCHEMA, self.legacy_mode.tables(), &filter)
        };

        if queued {
            Ok(self.legacy_mode.subscription_mode())
        } else {
            Err(InitFailure::ConnectionTimeout)
        }
    }

    fn emit_diagnostic(&mut self, reason: &str, now: Tick, ctx: &mut SyncContext<'_>) {
        let due = self
            .last_diagnostic
            .is_none_or(|last| now.since(last) >= DIAGNOSTIC_INTERVAL);
        if !due {
            return;
        }
        self.last_diagnostic = Some(now);

        let meta = json!({
            "reason": reason,
            "heap": ctx.platform.free_heap(),
            "time": ctx.platform.unix_time(),
        });
        ctx.backend
            .insert_device_log("warn", "realtime_connect_failed", &meta);
    }
}
