// ── Host collaborators ──
//
// Collaborator implementations for running the sync loop on a regular
// machine instead of the display firmware.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use sysinfo::System;

use crate::context::{BackendSession, ConfigSync, Platform};

// ── Platform ─────────────────────────────────────────────────────────

/// Reports available system memory as "free heap".
pub struct HostPlatform {
    system: System,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn free_heap(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.available_memory()
    }

    fn unix_time(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

// ── Backend session ──────────────────────────────────────────────────

/// Session holding a pre-issued access token. Diagnostics go to the log.
#[derive(Debug, Default)]
pub struct StaticSession {
    access_token: Option<SecretString>,
    logs_sent: u64,
}

impl StaticSession {
    pub fn new(access_token: Option<SecretString>) -> Self {
        Self {
            access_token,
            logs_sent: 0,
        }
    }

    pub fn logs_sent(&self) -> u64 {
        self.logs_sent
    }
}

impl BackendSession for StaticSession {
    fn access_token(&self) -> Option<SecretString> {
        self.access_token
            .as_ref()
            .map(|t| t.expose_secret().trim().to_owned())
            .filter(|t| !t.is_empty())
            .map(SecretString::from)
    }

    fn is_request_in_flight(&self) -> bool {
        false
    }

    fn insert_device_log(&mut self, level: &str, event: &str, meta: &Value) {
        self.logs_sent += 1;
        tracing::warn!(log_level = level, log_event = event, meta = %meta, "Device diagnostic");
    }
}

// ── Config sync ──────────────────────────────────────────────────────

/// One outstanding config re-broadcast request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRequest {
    pub device_uuid: Option<String>,
}

/// Records config re-broadcast requests for the host loop to act on.
#[derive(Debug, Default)]
pub struct PendingConfigBroadcast {
    pending: Option<ConfigRequest>,
    requests: u64,
}

impl PendingConfigBroadcast {
    pub fn take(&mut self) -> Option<ConfigRequest> {
        self.pending.take()
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }
}

impl ConfigSync for PendingConfigBroadcast {
    fn request_config_broadcast(&mut self, device_uuid: Option<&str>) {
        self.requests += 1;
        self.pending = Some(ConfigRequest {
            device_uuid: device_uuid.map(str::to_owned),
        });
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn blank_token_reads_as_missing() {
        let session = StaticSession::new(Some(SecretString::from("  ".to_owned())));
        assert!(session.access_token().is_none());
    }

    #[test]
    fn device_log_is_counted() {
        let mut session = StaticSession::default();
        session.insert_device_log("warn", "realtime_connect_failed", &json!({"reason": "x"}));
        assert_eq!(session.logs_sent(), 1);
    }

    #[test]
    fn config_request_is_taken_once() {
        let mut sync = PendingConfigBroadcast::default();
        sync.request_config_broadcast(Some("d-1"));
        assert_eq!(
            sync.take(),
            Some(ConfigRequest {
                device_uuid: Some("d-1".to_owned())
            })
        );
        assert_eq!(sync.take(), None);
        assert_eq!(sync.requests(), 1);
    }

    #[test]
    fn host_reports_time_and_memory() {
        let mut platform = HostPlatform::new();
        assert!(platform.unix_time() > 1_600_000_000);
        let _ = platform.free_heap();
    }
}
