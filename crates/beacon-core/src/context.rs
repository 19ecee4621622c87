// ── Collaborators ──
//
// Everything the supervisor and router touch outside of themselves,
// bundled into one borrow for the duration of a tick.

use secrecy::SecretString;
use serde_json::Value;

use crate::command::CommandEngine;
use crate::identity::IdentityStore;
use crate::state::DeviceState;

/// Authenticated backend session.
pub trait BackendSession {
    fn access_token(&self) -> Option<SecretString>;

    /// Another backend request is outstanding; reconnects wait for it.
    fn is_request_in_flight(&self) -> bool;

    /// Fire-and-forget structured diagnostic.
    fn insert_device_log(&mut self, level: &str, event: &str, meta: &Value);
}

/// Pushes the device's configuration back to the cloud on request.
pub trait ConfigSync {
    fn request_config_broadcast(&mut self, device_uuid: Option<&str>);
}

/// Host probes.
pub trait Platform {
    /// Free heap in bytes.
    fn free_heap(&mut self) -> u64;

    /// Wall-clock seconds since the Unix epoch.
    fn unix_time(&self) -> i64;
}

/// Mutable view of device state and collaborators for one tick.
pub struct SyncContext<'a> {
    pub state: &'a mut DeviceState,
    pub identity: &'a mut dyn IdentityStore,
    pub backend: &'a mut dyn BackendSession,
    pub commands: &'a mut dyn CommandEngine,
    pub config_sync: &'a mut dyn ConfigSync,
    pub platform: &'a mut dyn Platform,
}
