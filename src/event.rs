//! Lifecycle and conversation events delivered to the embedding application.
//!
//! The bridge reports everything the application needs to observe through a
//! single callback: initialization, conversation events relayed from the
//! remote session, transmission gating, dropped-audio warnings, and fatal
//! errors. Events are notifications; apart from [`BridgeEvent::Error`] the
//! bridge keeps running after emitting one.

use std::sync::Arc;

/// Events emitted by a running bridge.
///
/// Register a callback via [`BridgeBuilder::on_event()`] to receive these.
/// The callback is invoked from background threads, never from the render
/// callback.
///
/// [`BridgeBuilder::on_event()`]: crate::BridgeBuilder::on_event
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// The render-side processor installed the shared buffers and the bridge
    /// is ready to accept audio.
    Initialized,

    /// A structured conversation event relayed from the remote session.
    ///
    /// The payload is the session's JSON frame, passed through untouched.
    Conversation {
        /// The remote session's event frame.
        payload: serde_json::Value,
    },

    /// The remote session signalled it is ready to interpret audio; the
    /// worker will forward chunks from now on. Emitted at most once.
    TransmissionStarted,

    /// The ring buffer was full and incoming frames were discarded.
    ///
    /// This happens when the worker falls behind the render callback for an
    /// extended period. Consider increasing `ring_buffer_length`.
    FramesDropped {
        /// Number of frames discarded since the last report.
        frames: u64,
    },

    /// An irrecoverable failure. The bridge stops making progress; no
    /// automatic retry is attempted. Emitted at most once per bridge.
    Error {
        /// Human-readable cause.
        detail: String,
    },
}

/// Callback type for receiving bridge events.
///
/// # Example
///
/// ```
/// use audio_bridge::{event_callback, BridgeEvent};
///
/// let callback = event_callback(|event| {
///     if let BridgeEvent::Conversation { payload } = event {
///         println!("conversation event: {payload}");
///     }
/// });
/// ```
pub type EventCallback = Arc<dyn Fn(BridgeEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(BridgeEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
