use thiserror::Error;

/// Top-level error type for the `beacon-api` crate.
///
/// Covers URL construction, the WebSocket session, and Phoenix frame
/// decoding. `beacon-core` folds these into init failure reasons.
#[derive(Debug, Error)]
pub enum Error {
    // ── Endpoint ────────────────────────────────────────────────────
    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The service URL uses a scheme that has no WebSocket equivalent.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// `begin` was called outside of a Tokio runtime.
    #[error("No async runtime available to drive the socket")]
    NoRuntime,

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// No frame arrived within the heartbeat window.
    #[error("No heartbeat reply within {timeout_secs}s")]
    HeartbeatTimeout { timeout_secs: u64 },

    // ── Data ────────────────────────────────────────────────────────
    /// A text frame was not a valid Phoenix message.
    #[error("Frame decode error: {message}")]
    FrameDecode { message: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_)
                | Self::WebSocketClosed { .. }
                | Self::HeartbeatTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_failures_are_transient() {
        assert!(Error::WebSocketConnect("refused".into()).is_transient());
        assert!(Error::HeartbeatTimeout { timeout_secs: 60 }.is_transient());
        assert!(!Error::UnsupportedScheme("ftp".into()).is_transient());
        assert!(!Error::NoRuntime.is_transient());
    }
}
