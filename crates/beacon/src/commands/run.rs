//! `beacon run`: drive the supervisor on a fixed tick until interrupted.

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use beacon_api::{PhoenixSocket, RealtimeTransport};
use beacon_config::FileIdentityStore;
use beacon_core::{
    Clock, DeviceState, HostPlatform, IdentityStore, PendingConfigBroadcast, QueuedCommandEngine,
    StaticSession, Supervisor, SyncContext,
};

use crate::cli::{GlobalOpts, RunArgs};
use crate::commands::{load_config, open_identity};
use crate::error::CliError;
use crate::output;

const COMMAND_QUEUE_CAPACITY: usize = 16;

/// Give the device a uuid on first run so device-scoped messages can
/// reach it.
fn ensure_device_uuid(store: &mut FileIdentityStore) -> Result<(), CliError> {
    if store.device_uuid().is_none() {
        let generated = Uuid::new_v4().to_string();
        store.set_device_uuid(&generated)?;
        info!(device_uuid = %generated, "Generated device uuid");
    }
    Ok(())
}

/// Initial state: last known status restored, connectivity as requested.
fn initial_state(store: &FileIdentityStore, online: bool) -> DeviceState {
    let mut state = DeviceState {
        wifi_connected: online,
        backend_connected: online,
        time_synced: true,
        ..DeviceState::default()
    };
    if let Some(status) = store.last_webex_status() {
        state.webex_status = status;
    }
    if let Some(name) = store.display_name() {
        state.display_name = name;
    }
    state
}

pub async fn handle(args: &RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = load_config(global)?;
    let mut identity = open_identity(&cfg)?;
    ensure_device_uuid(&mut identity)?;

    if cfg.realtime.service_url.is_none() {
        warn!("realtime.service_url is not set; the loop will not connect");
    }

    let mut session = StaticSession::new(identity.access_token());
    let mut platform = HostPlatform::new();
    let (mut engine, mut accepted) = QueuedCommandEngine::new(COMMAND_QUEUE_CAPACITY);
    let mut config_sync = PendingConfigBroadcast::default();
    let mut state = initial_state(&identity, !args.offline);

    let mut supervisor = Supervisor::new(
        PhoenixSocket::new(cfg.socket_config()),
        cfg.realtime.legacy_mode,
    );
    supervisor.begin();

    let clock = Clock::start();
    let deadline = args
        .exit_after
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let color = output::should_color(&global.color);

    let mut ticker = tokio::time::interval(cfg.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        tick_ms = cfg.realtime.tick_interval_ms,
        legacy_mode = %cfg.realtime.legacy_mode,
        "Realtime loop started"
    );

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Interrupted, shutting down");
                break;
            }
            _ = ticker.tick() => {}
        }

        let mut ctx = SyncContext {
            state: &mut state,
            identity: &mut identity,
            backend: &mut session,
            commands: &mut engine,
            config_sync: &mut config_sync,
            platform: &mut platform,
        };
        supervisor.tick(clock.now(), &mut ctx);

        while let Ok(command) = accepted.try_recv() {
            output::print_command(&command, color)?;
        }
        if let Some(request) = config_sync.take() {
            info!(
                device_uuid = request.device_uuid.as_deref().unwrap_or("-"),
                "Config re-broadcast requested"
            );
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }

    supervisor.transport_mut().disconnect();
    let stats = supervisor.router().stats();
    info!(
        received = stats.received,
        handled = stats.handled,
        dropped = stats.dropped,
        diagnostics = session.logs_sent(),
        config_requests = config_sync.requests(),
        last_error = state.last_error.as_deref().unwrap_or("-"),
        "Realtime loop stopped"
    );
    Ok(())
}
