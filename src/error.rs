//! Error types for audio-bridge.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`BridgeError`]): Prevent the bridge from starting, or
//!   terminate it. Reported once through the event callback.
//! - **Recoverable errors** ([`TransportError`]): Per-send transport failures
//!   the worker tolerates without tearing the session down.

/// Fatal errors that prevent the bridge from reaching the streaming state.
///
/// These are returned from [`BridgeBuilder::start()`] or surfaced through
/// [`BridgeEvent::Error`] when a running bridge fails. Steady-state anomalies
/// (occasional send failures, malformed samples) are never represented here.
///
/// [`BridgeBuilder::start()`]: crate::BridgeBuilder::start
/// [`BridgeEvent::Error`]: crate::BridgeEvent::Error
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A required runtime primitive is unavailable (e.g. the worker thread
    /// could not be spawned).
    #[error("environment unsupported: {reason}")]
    EnvironmentUnsupported {
        /// What was missing.
        reason: String,
    },

    /// Every connect strategy for the streaming session failed.
    #[error("streaming session failed to open: {detail}")]
    SessionOpen {
        /// Description of the last attempt's failure.
        detail: String,
    },

    /// A handshake stage did not complete within the configured bound.
    #[error("handshake timed out waiting for {stage}")]
    HandshakeTimeout {
        /// The stage that never arrived (`worker_ready`).
        stage: &'static str,
    },

    /// The configuration was rejected before any resources were allocated.
    #[error("invalid config: {reason}")]
    InvalidConfig {
        /// Why the configuration is unusable.
        reason: String,
    },

    /// No streaming session was configured before starting.
    #[error("no streaming session configured - call session() before start()")]
    NoSessionConfigured,
}

/// Recoverable transport errors from a [`StreamingSession`](crate::StreamingSession).
///
/// The worker logs these and keeps draining the ring; a chunk that fails to
/// send is dropped, never retried from the real-time path.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The session is not (or no longer) connected.
    #[error("session not connected")]
    NotConnected,

    /// Connecting to an endpoint failed.
    #[error("connect to {url} failed: {reason}")]
    ConnectFailed {
        /// The endpoint that was attempted.
        url: String,
        /// The underlying failure.
        reason: String,
    },

    /// A send was attempted but could not be completed.
    #[error("send failed: {reason}")]
    SendFailed {
        /// The underlying failure.
        reason: String,
    },

    /// The remote peer closed the session.
    #[error("session closed")]
    Closed,
}

impl TransportError {
    /// Creates a send failure with the given reason.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed {
            reason: reason.into(),
        }
    }
}
