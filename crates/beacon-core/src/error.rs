// ── Core error types ──
//
// Errors surfaced by beacon-core collaborators. Router handlers log and
// swallow these; nothing here ever stops the tick loop. The
// `From<beacon_api::Error>` impl folds transport failures into
// domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Identity errors ──────────────────────────────────────────────
    #[error("Invalid identity value for {field}: {reason}")]
    InvalidIdentity { field: &'static str, reason: String },

    #[error("Failed to persist identity: {message}")]
    Persistence { message: String },

    // ── Transport errors ─────────────────────────────────────────────
    #[error("Cannot reach realtime service at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Realtime connection lost: {reason}")]
    Disconnected { reason: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<beacon_api::Error> for CoreError {
    fn from(err: beacon_api::Error) -> Self {
        match err {
            beacon_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("invalid service URL: {e}"),
            },
            beacon_api::Error::UnsupportedScheme(scheme) => CoreError::Config {
                message: format!("service URL scheme `{scheme}` has no WebSocket equivalent"),
            },
            beacon_api::Error::NoRuntime => CoreError::Config {
                message: "realtime transport needs a Tokio runtime".into(),
            },
            beacon_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: "realtime websocket".into(),
                reason,
            },
            beacon_api::Error::WebSocketClosed { code, reason } => CoreError::Disconnected {
                reason: format!("closed with code {code}: {reason}"),
            },
            beacon_api::Error::HeartbeatTimeout { timeout_secs } => CoreError::Disconnected {
                reason: format!("no heartbeat reply within {timeout_secs}s"),
            },
            beacon_api::Error::FrameDecode { message } => CoreError::Disconnected {
                reason: format!("malformed frame: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_map_to_domain_variants() {
        let err: CoreError = beacon_api::Error::HeartbeatTimeout { timeout_secs: 60 }.into();
        assert!(matches!(err, CoreError::Disconnected { .. }));

        let err: CoreError = beacon_api::Error::UnsupportedScheme("ftp".into()).into();
        assert!(matches!(err, CoreError::Config { .. }));
        assert!(err.to_string().contains("ftp"));

        let err: CoreError = beacon_api::Error::WebSocketConnect("refused".into()).into();
        assert!(matches!(err, CoreError::ConnectionFailed { .. }));
    }
}
