//! Bridge controller: startup handshake, event pump and teardown.
//!
//! The controller orchestrates the two-stage handshake the bridge depends
//! on: the worker thread opens the streaming session and reports ready, the
//! controller allocates the shared buffers and hands them to both sides,
//! and the render-side processor reports ready once it has installed them.
//! Conversation events flow back through the controller's event pump to the
//! application callback.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::event::{BridgeEvent, EventCallback};
use crate::producer::RenderHandle;
use crate::ring::SharedRing;
use crate::session::{SessionEvent, StreamingSession};
use crate::state::{BridgeShared, BridgeState};
use crate::{BridgeConfig, BridgeError, BridgeStats};
use crate::consumer::Worker;

/// Commands from the controller to the worker thread.
pub(crate) enum WorkerCmd {
    /// Shared buffer handles; completes the worker's startup.
    Buffers(Arc<SharedRing>),
    /// Tear down before or during streaming.
    Stop,
}

/// Messages converging on the controller's event pump.
pub(crate) enum PumpMsg {
    /// Worker opened the session and can receive buffer handles.
    WorkerReady,
    /// Worker failed fatally during startup.
    WorkerError(String),
    /// Render-side processor installed the shared buffers.
    ProcessorReady,
    /// Event relayed from the streaming session.
    Session(SessionEvent),
    /// Ring overflow report from the worker.
    FramesDropped(u64),
    /// Pump teardown.
    Shutdown,
}

/// Entry point for building a bridge.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use audio_bridge::{AudioBridge, BridgeConfig, BridgeEvent, MockSession};
///
/// # fn main() -> Result<(), audio_bridge::BridgeError> {
/// let mut bridge = AudioBridge::builder()
///     .config(BridgeConfig::default())
///     .session(MockSession::new())
///     .on_event(|event| {
///         if let BridgeEvent::Conversation { payload } = event {
///             println!("{payload}");
///         }
///     })
///     .start()?;
///
/// let mut renderer = bridge.take_renderer().expect("first take");
/// // drive renderer.render(quantum) from the audio callback...
/// bridge.stop()?;
/// # Ok(())
/// # }
/// ```
pub struct AudioBridge;

impl AudioBridge {
    /// Creates a new builder.
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::new()
    }
}

/// Builder for configuring and starting a bridge.
#[must_use]
pub struct BridgeBuilder {
    config: BridgeConfig,
    session: Option<Arc<dyn StreamingSession>>,
    event_callback: Option<EventCallback>,
}

impl Default for BridgeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeBuilder {
    /// Creates a builder with default settings and no session.
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            session: None,
            event_callback: None,
        }
    }

    /// Sets the bridge configuration.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the streaming session the worker forwards audio to.
    pub fn session<S: StreamingSession + 'static>(mut self, session: S) -> Self {
        self.session = Some(Arc::new(session));
        self
    }

    /// Sets a pre-shared streaming session.
    ///
    /// Useful when the caller needs to keep a handle to the session, e.g. a
    /// [`MockSession`](crate::MockSession) under test.
    pub fn shared_session(mut self, session: Arc<dyn StreamingSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Sets the callback receiving lifecycle and conversation events.
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(BridgeEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(crate::event::event_callback(callback));
        self
    }

    /// Starts the bridge: spawns the worker, runs the startup handshake up
    /// to the buffer sharing stage and returns the session handle.
    ///
    /// The processor-ready stage completes asynchronously once the render
    /// callback begins delivering quanta; [`BridgeEvent::Initialized`] is
    /// emitted at that point.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, no session was
    /// configured, the worker cannot start, the session fails to open, or
    /// the worker-ready stage times out. In the failure cases the bridge
    /// ends in the `Errored` state with no resources leaked.
    pub fn start(self) -> Result<Bridge, BridgeError> {
        self.config.validate()?;
        let session = self.session.ok_or(BridgeError::NoSessionConfigured)?;
        let callback = self.event_callback;
        let config = self.config;

        let shared = Arc::new(BridgeShared::new());
        let (msg_tx, msg_rx) = unbounded::<PumpMsg>();
        let (cmd_tx, cmd_rx) = unbounded::<WorkerCmd>();
        let (attach_tx, attach_rx) = bounded::<Arc<SharedRing>>(1);

        shared.transition(BridgeState::Idle, BridgeState::WorkerStarting);
        tracing::info!(
            ring_buffer_length = config.ring_buffer_length,
            kernel_length = config.kernel_length,
            channel_count = config.channel_count,
            sample_rate = config.sample_rate,
            "starting bridge"
        );

        let worker = Worker {
            shared: Arc::clone(&shared),
            session: Arc::clone(&session),
            cmd_rx,
            msg_tx: msg_tx.clone(),
            handshake_timeout: config.handshake_timeout,
        };
        let worker_handle = std::thread::Builder::new()
            .name("bridge-worker".to_string())
            .spawn(move || worker.run())
            .map_err(|e| {
                shared.finish(BridgeState::Errored);
                BridgeError::EnvironmentUnsupported {
                    reason: format!("failed to spawn worker thread: {e}"),
                }
            })?;

        // Stage one: bounded wait for WORKER_READY.
        if let Err(error) =
            Self::await_worker_ready(&msg_rx, &shared, &config, callback.as_ref())
        {
            shared.finish(BridgeState::Errored);
            if let Some(cb) = &callback {
                cb(BridgeEvent::Error {
                    detail: error.to_string(),
                });
            }
            let _ = cmd_tx.send(WorkerCmd::Stop);
            return Err(error);
        }
        shared.transition(BridgeState::WorkerStarting, BridgeState::WorkerReady);

        // Stage two: allocate the shared memory and hand it to both sides.
        let ring = SharedRing::new(
            config.ring_buffer_length,
            config.kernel_length,
            config.channel_count,
        );
        let _ = cmd_tx.send(WorkerCmd::Buffers(Arc::clone(&ring)));
        let _ = attach_tx.send(Arc::clone(&ring));
        shared.transition(BridgeState::WorkerReady, BridgeState::BuffersShared);
        tracing::debug!("shared buffers handed to worker and processor");

        let renderer = RenderHandle::new(Arc::clone(&shared), attach_rx, msg_tx.clone());

        let pump = Pump {
            shared: Arc::clone(&shared),
            ring: Arc::clone(&ring),
            callback,
        };
        let pump_handle = std::thread::Builder::new()
            .name("bridge-pump".to_string())
            .spawn(move || pump.run(msg_rx))
            .map_err(|e| BridgeError::EnvironmentUnsupported {
                reason: format!("failed to spawn event pump: {e}"),
            })?;

        Ok(Bridge {
            shared,
            ring,
            session,
            cmd_tx,
            msg_tx,
            worker_handle: Some(worker_handle),
            pump_handle: Some(pump_handle),
            renderer: Some(renderer),
        })
    }

    fn await_worker_ready(
        msg_rx: &Receiver<PumpMsg>,
        shared: &BridgeShared,
        config: &BridgeConfig,
        callback: Option<&EventCallback>,
    ) -> Result<(), BridgeError> {
        let deadline = Instant::now() + config.handshake_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match msg_rx.recv_timeout(remaining) {
                Ok(PumpMsg::WorkerReady) => return Ok(()),
                Ok(PumpMsg::WorkerError(detail)) => {
                    return Err(BridgeError::SessionOpen { detail });
                }
                Ok(PumpMsg::Session(SessionEvent::Event { payload })) => {
                    // The session may start talking before the worker is
                    // fully ready. The gate signal in particular arrives
                    // only once per session, so it must be honored here
                    // too, not just in the pump.
                    open_gate_on_started(shared, callback, &payload);
                    if let Some(cb) = callback {
                        cb(BridgeEvent::Conversation { payload });
                    }
                }
                Ok(_) => {}
                Err(_) => {
                    return Err(BridgeError::HandshakeTimeout {
                        stage: "worker_ready",
                    });
                }
            }
        }
    }
}

/// The controller's event pump: relays session events to the application,
/// opens the SEND_AUDIO gate and turns session failures into the `Errored`
/// state.
struct Pump {
    shared: Arc<BridgeShared>,
    ring: Arc<SharedRing>,
    callback: Option<EventCallback>,
}

impl Pump {
    fn run(self, msg_rx: Receiver<PumpMsg>) {
        for msg in msg_rx.iter() {
            match msg {
                PumpMsg::ProcessorReady => {
                    if self
                        .shared
                        .transition(BridgeState::BuffersShared, BridgeState::ProcessorReady)
                    {
                        tracing::info!("bridge initialized");
                        self.emit(BridgeEvent::Initialized);
                    }
                }
                PumpMsg::Session(SessionEvent::Event { payload }) => {
                    open_gate_on_started(&self.shared, self.callback.as_ref(), &payload);
                    self.emit(BridgeEvent::Conversation { payload });
                }
                PumpMsg::Session(SessionEvent::Opened) => {
                    tracing::debug!("streaming session opened");
                }
                PumpMsg::Session(SessionEvent::Closed { reason }) => {
                    self.fail(format!("streaming session closed: {reason}"));
                }
                PumpMsg::Session(SessionEvent::Error { detail }) => {
                    self.fail(format!("streaming session error: {detail}"));
                }
                PumpMsg::WorkerError(detail) => {
                    self.fail(format!("worker failed: {detail}"));
                }
                PumpMsg::FramesDropped(frames) => {
                    tracing::warn!(frames, "ring buffer overflow, frames dropped");
                    self.emit(BridgeEvent::FramesDropped { frames });
                }
                PumpMsg::WorkerReady => {}
                PumpMsg::Shutdown => break,
            }
        }
    }

    /// Transitions to `Errored` (once) and reports the cause.
    fn fail(&self, detail: String) {
        if self.shared.finish(BridgeState::Errored) {
            tracing::error!(detail, "bridge errored");
            self.ring.shutdown();
            self.emit(BridgeEvent::Error { detail });
        }
    }

    fn emit(&self, event: BridgeEvent) {
        if let Some(callback) = &self.callback {
            callback(event);
        }
    }
}

/// Opens the transmission gate on the first "recognition started"
/// conversation event: the remote session is only ready to interpret audio
/// from that point on. Called wherever session events are handled, since
/// the signal is emitted once per session and may arrive at any handshake
/// phase.
fn open_gate_on_started(
    shared: &BridgeShared,
    callback: Option<&EventCallback>,
    payload: &serde_json::Value,
) {
    use std::sync::atomic::Ordering;

    if shared.send_gate.load(Ordering::Acquire) {
        return;
    }
    if !is_recognition_started(payload) {
        return;
    }
    shared.send_gate.store(true, Ordering::Release);
    tracing::info!("remote session listening, transmission gate opened");
    if let Some(cb) = callback {
        cb(BridgeEvent::TransmissionStarted);
    }
}

/// True for `message`-typed frames whose inner message type signals the
/// start of recognition.
fn is_recognition_started(payload: &serde_json::Value) -> bool {
    payload["type"] == "message"
        && matches!(
            payload["message"]["type"].as_str(),
            Some("recognition_started") | Some("started_listening")
        )
}

/// Handle to a running bridge.
///
/// Returned by [`BridgeBuilder::start()`]. The worker and event pump run in
/// background threads until [`stop()`](Bridge::stop) is called or the handle
/// is dropped (prefer the explicit stop).
pub struct Bridge {
    shared: Arc<BridgeShared>,
    ring: Arc<SharedRing>,
    session: Arc<dyn StreamingSession>,
    cmd_tx: Sender<WorkerCmd>,
    msg_tx: Sender<PumpMsg>,
    worker_handle: Option<JoinHandle<()>>,
    pump_handle: Option<JoinHandle<()>>,
    renderer: Option<RenderHandle>,
}

impl Bridge {
    /// Takes the render handle. Returns `None` after the first call: there
    /// is exactly one producer side.
    pub fn take_renderer(&mut self) -> Option<RenderHandle> {
        self.renderer.take()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        self.shared.state()
    }

    /// Current session statistics.
    pub fn stats(&self) -> BridgeStats {
        self.shared.stats(self.ring.control().dropped_frames())
    }

    /// The shared ring, for diagnostics.
    pub fn ring(&self) -> &SharedRing {
        &self.ring
    }

    /// Gracefully stops the bridge.
    ///
    /// Safe to call from any state, including half-initialized: both threads
    /// detach from the shared memory, no further wake signals are delivered
    /// and the streaming session is closed.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` keeps room for join diagnostics.
    pub fn stop(mut self) -> Result<(), BridgeError> {
        self.stop_internal(true);
        Ok(())
    }

    fn stop_internal(&mut self, join: bool) {
        // `finish` is a no-op when the pump already recorded an error; the
        // terminal state is preserved either way.
        if self.shared.finish(BridgeState::Stopped) {
            tracing::info!("stopping bridge");
        }

        let _ = self.cmd_tx.send(WorkerCmd::Stop);
        self.ring.shutdown();
        let _ = self.msg_tx.send(PumpMsg::Shutdown);
        self.session.close();

        if join {
            if let Some(handle) = self.worker_handle.take() {
                let _ = handle.join();
            }
            if let Some(handle) = self.pump_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Dropped without explicit stop(): best-effort teardown without
        // blocking on the background threads.
        self.stop_internal(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MockSession;
    use crate::TransportError;
    use std::time::Duration;

    fn quick_config() -> BridgeConfig {
        BridgeConfig {
            handshake_timeout: Duration::from_millis(200),
            ..Default::default()
        }
    }

    #[test]
    fn test_start_requires_session() {
        let result = AudioBridge::builder().start();
        assert!(matches!(result, Err(BridgeError::NoSessionConfigured)));
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        let result = AudioBridge::builder()
            .config(BridgeConfig {
                kernel_length: 0,
                ..Default::default()
            })
            .session(MockSession::new())
            .start();
        assert!(matches!(result, Err(BridgeError::InvalidConfig { .. })));
    }

    #[test]
    fn test_start_reaches_buffers_shared() {
        let bridge = AudioBridge::builder()
            .config(quick_config())
            .session(MockSession::new())
            .start()
            .unwrap();

        assert_eq!(bridge.state(), BridgeState::BuffersShared);
        bridge.stop().unwrap();
    }

    #[test]
    fn test_worker_ready_timeout_errors() {
        let result = AudioBridge::builder()
            .config(quick_config())
            .session(MockSession::slow(Duration::from_secs(2)))
            .start();

        assert!(matches!(
            result,
            Err(BridgeError::HandshakeTimeout {
                stage: "worker_ready"
            })
        ));
    }

    #[test]
    fn test_session_open_failure_errors() {
        let result = AudioBridge::builder()
            .config(quick_config())
            .session(MockSession::failing(TransportError::NotConnected))
            .start();

        assert!(matches!(result, Err(BridgeError::SessionOpen { .. })));
    }

    #[test]
    fn test_recognition_started_detection() {
        assert!(is_recognition_started(&serde_json::json!({
            "type": "message",
            "message": {"type": "recognition_started"}
        })));
        assert!(is_recognition_started(&serde_json::json!({
            "type": "message",
            "message": {"type": "started_listening"}
        })));
        assert!(!is_recognition_started(&serde_json::json!({
            "type": "message",
            "message": {"type": "recognition_result"}
        })));
        assert!(!is_recognition_started(&serde_json::json!({
            "type": "topic_response"
        })));
    }

    #[test]
    fn test_take_renderer_is_once() {
        let mut bridge = AudioBridge::builder()
            .config(quick_config())
            .session(MockSession::new())
            .start()
            .unwrap();

        assert!(bridge.take_renderer().is_some());
        assert!(bridge.take_renderer().is_none());
        bridge.stop().unwrap();
    }

    #[test]
    fn test_stop_from_half_initialized_state() {
        let session = Arc::new(MockSession::new());
        let bridge = AudioBridge::builder()
            .config(quick_config())
            .shared_session(Arc::clone(&session) as Arc<dyn StreamingSession>)
            .start()
            .unwrap();

        // Never drove the renderer: bridge is mid-handshake at BuffersShared.
        let ring = Arc::clone(&bridge.ring);
        bridge.stop().unwrap();

        assert!(ring.is_shut_down());
        assert!(!session.is_open());
    }
}
