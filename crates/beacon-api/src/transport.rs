// ── Transport contract ───────────────────────────────────────────────
//
// The connection supervisor drives a transport through this trait and
// never touches the socket directly. Every method is non-blocking; a
// `true` from a subscribe call means the request was queued, not that
// the server confirmed it.

use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::envelope::InboundEnvelope;
use crate::error::Error;

pub trait RealtimeTransport {
    /// Open a socket to `service_url`. Any previous session is torn down.
    fn begin(
        &mut self,
        service_url: &str,
        anon_key: &SecretString,
        access_token: &SecretString,
    ) -> Result<(), Error>;

    /// Where inbound broadcast and row-change envelopes are delivered.
    fn register_message_sink(&mut self, sink: mpsc::Sender<InboundEnvelope>);

    fn subscribe_to_user_channel(&mut self, user_uuid: &str) -> bool;

    fn subscribe_to_device_channel(&mut self, device_uuid: &str) -> bool;

    /// Legacy row-change subscription on the current channel topic.
    fn subscribe_multiple(&mut self, schema: &str, tables: &[&str], filter: &str) -> bool;

    /// Legacy broadcast subscription on the current channel topic.
    fn subscribe_broadcast(&mut self) -> bool;

    fn set_channel_topic(&mut self, topic: &str);

    /// Housekeeping; called from the supervisor tick while a socket exists.
    fn tick(&mut self);

    fn is_socket_connected(&self) -> bool;

    /// Socket open and at least one channel confirmed by the server.
    fn is_fully_connected(&self) -> bool;

    fn is_connecting(&self) -> bool;

    fn has_ever_connected(&self) -> bool;

    /// Free heap, in bytes, needed before `begin` is worth attempting.
    fn min_heap_required(&self) -> u64;

    fn disconnect(&mut self);

    /// The error that ended the last socket session, if any. Taking it
    /// clears it.
    fn take_error(&mut self) -> Option<Error> {
        None
    }
}
