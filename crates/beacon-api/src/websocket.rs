//! Phoenix-channel WebSocket transport.
//!
//! [`PhoenixSocket`] implements [`RealtimeTransport`] on top of
//! `tokio-tungstenite`. Each [`begin`](RealtimeTransport::begin) spawns
//! one background task that owns the socket for a single connection; it
//! never reconnects on its own, since retry pacing belongs to the caller.
//!
//! The tick side and the task share only atomics and a concurrent channel
//! table. Outbound frames go through a bounded mpsc channel, inbound
//! envelopes through the sink registered by the caller.
//!
//! ```rust,ignore
//! use beacon_api::{PhoenixSocket, RealtimeTransport, SocketConfig};
//!
//! let mut socket = PhoenixSocket::new(SocketConfig::default());
//! socket.register_message_sink(tx);
//! socket.begin("https://project.supabase.co", &anon_key, &token)?;
//! socket.subscribe_to_user_channel(&user_uuid);
//!
//! loop {
//!     socket.tick();
//!     // drain rx ...
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::envelope::InboundEnvelope;
use crate::error::Error;
use crate::phoenix::{self, Frame, Inbound};
use crate::transport::RealtimeTransport;

// ── Constants ────────────────────────────────────────────────────────

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

pub const REALTIME_PATH: &str = "/realtime/v1/websocket";
pub const PROTOCOL_VERSION: &str = "1.0.0";

// ── SocketConfig ─────────────────────────────────────────────────────

/// Timing and memory budget for the socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Interval between `heartbeat` pushes. Default: 30s.
    pub heartbeat_interval: Duration,

    /// Silence after which the socket is considered dead. Default: 60s.
    pub heartbeat_timeout: Duration,

    /// Free heap needed for the first TLS handshake. Default: 100 000.
    pub first_connect_heap: u64,

    /// Free heap needed once a connection has succeeded. Default: 60 000.
    pub steady_state_heap: u64,

    /// Lower bound applied to both budgets. Default: 50 000.
    pub heap_floor: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            first_connect_heap: 100_000,
            steady_state_heap: 60_000,
            heap_floor: 50_000,
        }
    }
}

/// Build the realtime endpoint from a service base URL.
///
/// `https://host` becomes `wss://host/realtime/v1/websocket?apikey=..&vsn=1.0.0`.
pub fn realtime_url(service_url: &str, anon_key: &str) -> Result<Url, Error> {
    let mut url = Url::parse(service_url.trim())?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(Error::UnsupportedScheme(other.to_owned())),
    };
    url.set_scheme(scheme)
        .map_err(|()| Error::UnsupportedScheme(url.scheme().to_owned()))?;
    url.set_path(REALTIME_PATH);
    url.set_fragment(None);
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

// ── Per-connection shared state ──────────────────────────────────────

#[derive(Debug)]
struct ChannelEntry {
    join_frame: String,
    sent: bool,
    subscribed: bool,
    private: bool,
}

/// State shared between the tick side and one socket task.
///
/// A fresh `Session` is created on every `begin`, so a task that is
/// still winding down can never clobber the flags of its successor.
#[derive(Debug, Default)]
struct Session {
    connected: AtomicBool,
    connecting: AtomicBool,
    channels: DashMap<String, ChannelEntry>,
    last_error: Mutex<Option<Error>>,
}

impl Session {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn mark_open(&self) {
        self.connected.store(true, Ordering::SeqCst);
        self.connecting.store(false, Ordering::SeqCst);
    }

    fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.connecting.store(false, Ordering::SeqCst);
        for mut entry in self.channels.iter_mut() {
            entry.subscribed = false;
        }
    }

    /// Take the join frame for `topic` if nobody has sent it yet.
    fn claim_join(&self, topic: &str) -> Option<String> {
        let mut entry = self.channels.get_mut(topic)?;
        if entry.sent {
            return None;
        }
        entry.sent = true;
        Some(entry.join_frame.clone())
    }

    /// Every join queued before the socket opened.
    fn claim_pending_joins(&self) -> Vec<String> {
        self.channels
            .iter_mut()
            .filter_map(|mut entry| {
                if entry.sent {
                    None
                } else {
                    entry.sent = true;
                    Some(entry.join_frame.clone())
                }
            })
            .collect()
    }

    fn set_subscribed(&self, topic: &str, subscribed: bool) -> bool {
        match self.channels.get_mut(topic) {
            Some(mut entry) => {
                let changed = entry.subscribed != subscribed;
                entry.subscribed = subscribed;
                changed
            }
            None => false,
        }
    }

    /// The error that ended this session. `None` while the lock is held
    /// by the task; the next tick picks it up.
    fn take_error(&self) -> Option<Error> {
        self.last_error.try_lock().ok()?.take()
    }

    fn any_subscribed(&self) -> bool {
        self.channels.iter().any(|entry| entry.subscribed)
    }

    fn private_topics(&self) -> Vec<String> {
        self.channels
            .iter()
            .filter(|entry| entry.private && entry.subscribed)
            .map(|entry| entry.key().clone())
            .collect()
    }
}

// ── PhoenixSocket ────────────────────────────────────────────────────

pub struct PhoenixSocket {
    config: SocketConfig,
    session: Option<Arc<Session>>,
    outbound: Option<mpsc::Sender<String>>,
    cancel: Option<CancellationToken>,
    sink: Option<mpsc::Sender<InboundEnvelope>>,
    access_token: Option<SecretString>,
    channel_topic: String,
    ever_connected: Arc<AtomicBool>,
    next_ref: u64,
    last_heartbeat: Option<Instant>,
}

impl PhoenixSocket {
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            session: None,
            outbound: None,
            cancel: None,
            sink: None,
            access_token: None,
            channel_topic: phoenix::LEGACY_TABLES_TOPIC.to_owned(),
            ever_connected: Arc::new(AtomicBool::new(false)),
            next_ref: 0,
            last_heartbeat: None,
        }
    }

    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    pub fn channel_topic(&self) -> &str {
        &self.channel_topic
    }

    /// Number of channels requested on the current connection.
    pub fn channel_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.channels.len())
    }

    fn next_ref(&mut self) -> String {
        self.next_ref = self.next_ref.wrapping_add(1);
        self.next_ref.to_string()
    }

    fn token(&self) -> String {
        self.access_token
            .as_ref()
            .map(|t| t.expose_secret().to_owned())
            .unwrap_or_default()
    }

    fn push(&self, text: String) -> bool {
        let Some(outbound) = &self.outbound else {
            return false;
        };
        match outbound.try_send(text) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Realtime outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Realtime socket task gone, dropping frame");
                false
            }
        }
    }

    /// Record a join for `topic`; send it now if the socket is open,
    /// otherwise the task flushes it on connect.
    fn queue_join(&mut self, topic: &str, private: bool, frame: Frame) -> bool {
        let Some(session) = self.session.clone() else {
            tracing::warn!(topic, "Cannot subscribe without an active socket");
            return false;
        };

        session.channels.insert(
            topic.to_owned(),
            ChannelEntry {
                join_frame: frame.encode(),
                sent: false,
                subscribed: false,
                private,
            },
        );

        if session.is_connected() {
            if let Some(join) = session.claim_join(topic) {
                tracing::debug!(topic, "Sending channel join");
                return self.push(join);
            }
        }

        tracing::debug!(topic, "Channel join queued until socket opens");
        true
    }
}

impl Drop for PhoenixSocket {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

impl RealtimeTransport for PhoenixSocket {
    fn begin(
        &mut self,
        service_url: &str,
        anon_key: &SecretString,
        access_token: &SecretString,
    ) -> Result<(), Error> {
        let url = realtime_url(service_url, anon_key.expose_secret())?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        if self.session.is_some() {
            self.disconnect();
        }

        let session = Arc::new(Session::default());
        session.connecting.store(true, Ordering::SeqCst);

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        tracing::info!(
            host = url.host_str().unwrap_or_default(),
            "Starting realtime socket"
        );

        let task = SocketTask {
            url,
            session: Arc::clone(&session),
            ever_connected: Arc::clone(&self.ever_connected),
            sink: self.sink.clone(),
            outbound_rx,
            cancel: cancel.clone(),
            heartbeat_timeout: self.config.heartbeat_timeout,
        };
        runtime.spawn(socket_task(task));

        self.session = Some(session);
        self.outbound = Some(outbound_tx);
        self.cancel = Some(cancel);
        self.access_token = Some(SecretString::from(
            access_token.expose_secret().to_owned(),
        ));
        self.last_heartbeat = None;
        Ok(())
    }

    fn register_message_sink(&mut self, sink: mpsc::Sender<InboundEnvelope>) {
        self.sink = Some(sink);
    }

    fn subscribe_to_user_channel(&mut self, user_uuid: &str) -> bool {
        let topic = phoenix::user_topic(user_uuid);
        let msg_ref = self.next_ref();
        let frame = phoenix::join_private(&topic, &self.token(), &msg_ref);
        self.queue_join(&topic, true, frame)
    }

    fn subscribe_to_device_channel(&mut self, device_uuid: &str) -> bool {
        let topic = phoenix::device_topic(device_uuid);
        let msg_ref = self.next_ref();
        let frame = phoenix::join_private(&topic, &self.token(), &msg_ref);
        self.queue_join(&topic, true, frame)
    }

    fn subscribe_multiple(&mut self, schema: &str, tables: &[&str], filter: &str) -> bool {
        let topic = self.channel_topic.clone();
        let msg_ref = self.next_ref();
        let frame =
            phoenix::join_postgres(&topic, schema, tables, filter, &self.token(), &msg_ref);
        self.queue_join(&topic, false, frame)
    }

    fn subscribe_broadcast(&mut self) -> bool {
        let topic = self.channel_topic.clone();
        let msg_ref = self.next_ref();
        let frame = phoenix::join_broadcast(&topic, &self.token(), &msg_ref);
        self.queue_join(&topic, false, frame)
    }

    fn set_channel_topic(&mut self, topic: &str) {
        topic.clone_into(&mut self.channel_topic);
    }

    fn tick(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        if !session.is_connected() {
            return;
        }

        let interval = self.config.heartbeat_interval;
        if !self
            .last_heartbeat
            .is_none_or(|sent| sent.elapsed() >= interval)
        {
            return;
        }
        self.last_heartbeat = Some(Instant::now());

        let msg_ref = self.next_ref();
        self.push(phoenix::heartbeat(&msg_ref).encode());

        // Private channels expect the current token alongside each heartbeat.
        let token = self.token();
        if token.is_empty() {
            return;
        }
        for topic in session.private_topics() {
            let msg_ref = self.next_ref();
            self.push(phoenix::access_token(&topic, &token, &msg_ref).encode());
        }
    }

    fn is_socket_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_connected())
    }

    fn is_fully_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.is_connected() && s.any_subscribed())
    }

    fn is_connecting(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.connecting.load(Ordering::SeqCst))
    }

    fn has_ever_connected(&self) -> bool {
        self.ever_connected.load(Ordering::SeqCst)
    }

    fn min_heap_required(&self) -> u64 {
        let budget = if self.has_ever_connected() {
            self.config.steady_state_heap
        } else {
            self.config.first_connect_heap
        };
        budget.max(self.config.heap_floor)
    }

    fn disconnect(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(session) = self.session.take() {
            session.mark_closed();
            tracing::info!("Realtime socket disconnected");
        }
        self.outbound = None;
        self.last_heartbeat = None;
    }

    fn take_error(&mut self) -> Option<Error> {
        self.session.as_ref().and_then(|s| s.take_error())
    }
}

// ── Background socket task ───────────────────────────────────────────

struct SocketTask {
    url: Url,
    session: Arc<Session>,
    ever_connected: Arc<AtomicBool>,
    sink: Option<mpsc::Sender<InboundEnvelope>>,
    outbound_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    heartbeat_timeout: Duration,
}

async fn socket_task(mut task: SocketTask) {
    match connect_and_read(&mut task).await {
        Ok(()) => tracing::debug!("Realtime socket task exiting"),
        Err(e) => {
            if e.is_transient() {
                tracing::warn!(error = %e, "Realtime socket error");
            } else {
                tracing::error!(error = %e, "Realtime socket failed");
            }
            *task.session.last_error.lock().await = Some(e);
        }
    }
    task.session.mark_closed();
}

/// Open one connection, flush queued joins, and pump frames until the
/// socket drops, goes silent, or the task is cancelled.
async fn connect_and_read(task: &mut SocketTask) -> Result<(), Error> {
    let connect = tokio::select! {
        biased;
        () = task.cancel.cancelled() => return Ok(()),
        result = tokio_tungstenite::connect_async(task.url.as_str()) => result,
    };
    let (ws_stream, _response) = connect.map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    task.session.mark_open();
    task.ever_connected.store(true, Ordering::SeqCst);
    tracing::info!("Realtime socket connected");

    let (mut write, mut read) = ws_stream.split();

    for join in task.session.claim_pending_joins() {
        write
            .send(Message::text(join))
            .await
            .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
    }

    let timeout = task.heartbeat_timeout;
    let mut deadline = tokio::time::Instant::now() + timeout;

    loop {
        tokio::select! {
            biased;
            () = task.cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(());
            }
            () = tokio::time::sleep_until(deadline) => {
                return Err(Error::HeartbeatTimeout { timeout_secs: timeout.as_secs() });
            }
            outbound = task.outbound_rx.recv() => {
                let Some(text) = outbound else {
                    return Ok(());
                };
                write
                    .send(Message::text(text))
                    .await
                    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        deadline = tokio::time::Instant::now() + timeout;
                        handle_text(task, &text);
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // tungstenite handles pong replies automatically
                        deadline = tokio::time::Instant::now() + timeout;
                        tracing::trace!("Realtime ping");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(cf) => Err(Error::WebSocketClosed {
                                code: u16::from(cf.code),
                                reason: cf.reason.to_string(),
                            }),
                            None => {
                                tracing::info!("Realtime close frame received (no payload)");
                                Ok(())
                            }
                        };
                    }
                    Some(Err(e)) => {
                        return Err(Error::WebSocketConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("Realtime stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

fn handle_text(task: &SocketTask, text: &str) {
    let frame = match Frame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping undecodable realtime frame");
            return;
        }
    };

    match phoenix::classify(frame) {
        Inbound::HeartbeatReply => tracing::trace!("Heartbeat acknowledged"),
        Inbound::JoinReply {
            topic,
            accepted,
            reason,
        } => {
            let changed = task.session.set_subscribed(&topic, accepted);
            if accepted && changed {
                tracing::info!(topic = %topic, "Realtime channel subscribed");
            } else if !accepted {
                tracing::warn!(
                    topic = %topic,
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "Realtime channel join rejected"
                );
            }
        }
        Inbound::PresenceConfirm { topic } => {
            if task.session.set_subscribed(&topic, true) {
                tracing::info!(topic = %topic, "Realtime channel confirmed by presence");
            }
        }
        Inbound::ChannelClosed { topic } => {
            if task.session.set_subscribed(&topic, false) {
                tracing::info!(topic = %topic, "Realtime channel closed by server");
            }
        }
        Inbound::Message(envelope) => deliver(task.sink.as_ref(), envelope),
        Inbound::Ignored { event } => tracing::trace!(event = %event, "Ignoring realtime frame"),
    }
}

fn deliver(sink: Option<&mpsc::Sender<InboundEnvelope>>, envelope: InboundEnvelope) {
    let Some(sink) = sink else {
        tracing::debug!(topic = %envelope.topic, "No message sink registered, dropping");
        return;
    };
    match sink.try_send(envelope) {
        Ok(()) => {}
        Err(TrySendError::Full(envelope)) => {
            tracing::warn!(topic = %envelope.topic, "Inbound realtime queue full, dropping");
        }
        Err(TrySendError::Closed(_)) => tracing::debug!("Inbound realtime sink closed"),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_owned())
    }

    #[test]
    fn https_service_url_maps_to_wss_endpoint() {
        let url = realtime_url("https://abc.supabase.co", "anon").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://abc.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn http_service_url_maps_to_ws_and_drops_path() {
        let url = realtime_url("http://127.0.0.1:54321/rest/v1?x=1#frag", "k").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://127.0.0.1:54321/realtime/v1/websocket?apikey=k&vsn=1.0.0"
        );
    }

    #[test]
    fn unsupported_scheme_is_rejected() {
        assert!(matches!(
            realtime_url("ftp://example.com", "k"),
            Err(Error::UnsupportedScheme(_))
        ));
        assert!(matches!(
            realtime_url("not a url", "k"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[test]
    fn heap_budget_switches_after_first_connect() {
        let socket = PhoenixSocket::new(SocketConfig::default());
        assert_eq!(socket.min_heap_required(), 100_000);
        socket.ever_connected.store(true, Ordering::SeqCst);
        assert_eq!(socket.min_heap_required(), 60_000);
    }

    #[test]
    fn heap_floor_applies() {
        let config = SocketConfig {
            steady_state_heap: 10_000,
            ..SocketConfig::default()
        };
        let socket = PhoenixSocket::new(config);
        socket.ever_connected.store(true, Ordering::SeqCst);
        assert_eq!(socket.min_heap_required(), 50_000);
    }

    #[test]
    fn subscribe_without_socket_is_refused() {
        let mut socket = PhoenixSocket::new(SocketConfig::default());
        assert!(!socket.subscribe_to_user_channel("u-1"));
        assert!(!socket.subscribe_broadcast());
        assert!(!socket.is_connecting());
    }

    #[test]
    fn begin_outside_runtime_fails() {
        let mut socket = PhoenixSocket::new(SocketConfig::default());
        let result = socket.begin("https://abc.supabase.co", &secret("a"), &secret("t"));
        assert!(matches!(result, Err(Error::NoRuntime)));
    }

    #[tokio::test]
    async fn joins_queue_while_connecting() {
        let mut socket = PhoenixSocket::new(SocketConfig::default());
        // Port 9 (discard) on localhost is not listening in test environments.
        socket
            .begin("http://127.0.0.1:9", &secret("a"), &secret("t"))
            .unwrap();
        assert!(socket.subscribe_to_user_channel("u-1"));
        assert!(socket.subscribe_to_device_channel("d-1"));
        assert_eq!(socket.channel_count(), 2);
        assert!(!socket.is_fully_connected());

        socket.disconnect();
        assert!(!socket.is_connecting());
        assert_eq!(socket.channel_count(), 0);
    }

    #[test]
    fn set_channel_topic_is_used_for_legacy_joins() {
        let mut socket = PhoenixSocket::new(SocketConfig::default());
        assert_eq!(socket.channel_topic(), "realtime:display");
        socket.set_channel_topic("realtime:pairing:ABC123:events");
        assert_eq!(socket.channel_topic(), "realtime:pairing:ABC123:events");
    }
}
