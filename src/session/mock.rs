//! Mock streaming session for testing without a network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::session::{SessionEvent, SessionEventCallback, StreamingSession};
use crate::TransportError;

/// A session that records sent chunks instead of transmitting them.
///
/// Lets tests drive the whole bridge without audio hardware or a network:
/// chunks are captured for inspection and remote events can be injected with
/// [`MockSession::emit`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use audio_bridge::MockSession;
///
/// let session = Arc::new(MockSession::new());
/// // hand a clone to the bridge builder, keep one for assertions
/// let handle = Arc::clone(&session);
/// assert_eq!(handle.sent_chunks(), 0);
/// ```
pub struct MockSession {
    open: AtomicBool,
    open_result: Option<TransportError>,
    open_delay: Duration,
    callback: Mutex<Option<SessionEventCallback>>,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl MockSession {
    /// A session that opens immediately and accepts every send.
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            open_result: None,
            open_delay: Duration::ZERO,
            callback: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// A session whose `open` fails with the given error.
    pub fn failing(error: TransportError) -> Self {
        Self {
            open_result: Some(error),
            ..Self::new()
        }
    }

    /// A session whose `open` blocks for `delay` before succeeding, for
    /// exercising handshake timeouts.
    pub fn slow(delay: Duration) -> Self {
        Self {
            open_delay: delay,
            ..Self::new()
        }
    }

    /// Injects a remote event frame, as if received from the endpoint.
    pub fn emit(&self, payload: serde_json::Value) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(SessionEvent::Event { payload });
        }
    }

    /// Simulates the remote end closing the session.
    pub fn emit_closed(&self, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(SessionEvent::Closed {
                reason: reason.to_string(),
            });
        }
    }

    /// Forces the open flag, for tests that need a closed-but-running
    /// session.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }

    /// Number of chunks handed to the session so far.
    pub fn sent_chunks(&self) -> usize {
        self.sent.lock().len()
    }

    /// The most recently sent chunk, if any.
    pub fn last_chunk(&self) -> Option<Vec<u8>> {
        self.sent.lock().last().cloned()
    }

    /// All sent chunks, in order.
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingSession for MockSession {
    fn name(&self) -> &str {
        "mock"
    }

    fn open(&self, on_event: SessionEventCallback) -> Result<(), TransportError> {
        if !self.open_delay.is_zero() {
            std::thread::sleep(self.open_delay);
        }
        if let Some(error) = &self.open_result {
            return Err(error.clone());
        }
        *self.callback.lock() = Some(on_event.clone());
        self.open.store(true, Ordering::SeqCst);
        on_event(SessionEvent::Opened);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send_audio(&self, pcm: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(pcm.to_vec());
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_open_records_callback_and_reports_opened() {
        use std::sync::atomic::AtomicUsize;

        let session = MockSession::new();
        let opened = Arc::new(AtomicUsize::new(0));
        let opened_clone = Arc::clone(&opened);

        session
            .open(Arc::new(move |event| {
                if matches!(event, SessionEvent::Opened) {
                    opened_clone.fetch_add(1, Ordering::SeqCst);
                }
            }))
            .unwrap();

        assert!(session.is_open());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_requires_open() {
        let session = MockSession::new();
        assert!(matches!(
            session.send_audio(&[0, 0]),
            Err(TransportError::NotConnected)
        ));

        session.open(Arc::new(|_| {})).unwrap();
        session.send_audio(&[1, 2, 3, 4]).unwrap();
        assert_eq!(session.sent_chunks(), 1);
        assert_eq!(session.last_chunk().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_failing_session() {
        let session = MockSession::failing(TransportError::NotConnected);
        assert!(session.open(Arc::new(|_| {})).is_err());
        assert!(!session.is_open());
    }

    #[test]
    fn test_emit_reaches_callback() {
        let session = MockSession::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        session
            .open(Arc::new(move |event| {
                if let SessionEvent::Event { payload } = event {
                    seen_clone.lock().push(payload);
                }
            }))
            .unwrap();

        session.emit(serde_json::json!({"type": "message"}));
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let session = MockSession::new();
        session.open(Arc::new(|_| {})).unwrap();
        session.close();
        session.close();
        assert!(!session.is_open());
    }
}
