//! Streaming session contract and implementations.
//!
//! A [`StreamingSession`] is the network collaborator that accepts PCM16
//! chunks and emits structured conversation events. The bridge core only
//! depends on this trait; the crate ships a WebSocket implementation
//! ([`WsSession`], feature `ws`) and a [`MockSession`] for tests and
//! embedding without a network.

mod mock;
#[cfg(feature = "ws")]
mod ws;

pub use mock::MockSession;
#[cfg(feature = "ws")]
pub use ws::{WsSession, WsSessionConfig};

use std::sync::Arc;

use crate::TransportError;

/// Events a session reports back to the bridge.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The session is connected and the remote end accepted the stream
    /// configuration.
    Opened,
    /// A JSON event frame from the remote end, passed through untouched.
    Event {
        /// The decoded frame.
        payload: serde_json::Value,
    },
    /// The session closed; no further sends will succeed.
    Closed {
        /// Why the session closed.
        reason: String,
    },
    /// The session failed.
    Error {
        /// Human-readable cause.
        detail: String,
    },
}

/// Callback a session uses to deliver [`SessionEvent`]s to the bridge.
pub type SessionEventCallback = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// A remote real-time speech endpoint.
///
/// # Implementation Notes
///
/// - Methods take `&self`; use interior mutability for connection state
/// - `open` is called from the worker thread and may block; it must return
///   only once `is_open()` would report true (or with the failure)
/// - `send_audio` is called from the worker's drain loop and must not block
///   for longer than a bounded, short time; prefer an internal queue
/// - The worker checks `is_open()` before every send attempt
pub trait StreamingSession: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Connects to the remote endpoint and registers the event callback.
    fn open(&self, on_event: SessionEventCallback) -> Result<(), TransportError>;

    /// True while the session can accept audio.
    fn is_open(&self) -> bool;

    /// Hands one binary little-endian PCM16 chunk to the session.
    fn send_audio(&self, pcm: &[u8]) -> Result<(), TransportError>;

    /// Closes the session. Idempotent.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_object_safety() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn StreamingSession>();
    }

    #[test]
    fn test_session_event_clone() {
        let event = SessionEvent::Event {
            payload: serde_json::json!({"type": "message"}),
        };
        if let SessionEvent::Event { payload } = event.clone() {
            assert_eq!(payload["type"], "message");
        } else {
            panic!("expected Event variant");
        }
    }
}
