//! Render-side producer: runs inside the hard-real-time audio callback.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::controller::PumpMsg;
use crate::convert::convert_quantum;
use crate::ring::SharedRing;
use crate::state::{BridgeShared, BridgeState};

/// Handle driven by the audio render callback.
///
/// Call [`render`](RenderHandle::render) once per audio quantum with the raw
/// f32 samples. The handle converts them to PCM16, pushes them into the
/// shared ring and signals the worker — all without blocking or allocating
/// on the hot path (the scratch buffer is reused across quanta).
///
/// Until the startup handshake completes, `render` is a no-op that still
/// reports liveness: quanta may begin arriving before the worker has shared
/// its buffers, and the render thread must stay alive through that window.
///
/// # Example
///
/// ```ignore
/// let mut renderer = bridge.take_renderer().expect("renderer taken once");
/// audio_callback(move |quantum: &[f32]| {
///     renderer.render(quantum);
/// });
/// ```
pub struct RenderHandle {
    shared: Arc<BridgeShared>,
    attach_rx: Receiver<Arc<SharedRing>>,
    msg_tx: Sender<PumpMsg>,
    ring: Option<Arc<SharedRing>>,
    scratch: Vec<i16>,
}

impl RenderHandle {
    pub(crate) fn new(
        shared: Arc<BridgeShared>,
        attach_rx: Receiver<Arc<SharedRing>>,
        msg_tx: Sender<PumpMsg>,
    ) -> Self {
        Self {
            shared,
            attach_rx,
            msg_tx,
            ring: None,
            scratch: Vec::new(),
        }
    }

    /// Processes one quantum of f32 samples in the range [-1, 1].
    ///
    /// Returns `true` while the render thread should stay alive, `false`
    /// once the bridge has stopped or errored and the callback can be
    /// disconnected. Never blocks.
    pub fn render(&mut self, quantum: &[f32]) -> bool {
        if self.shared.state().is_terminal() {
            // Detach from the shared allocation; the worker side does the
            // same, which lets the ring be reclaimed.
            self.ring = None;
            return false;
        }

        if self.ring.is_none() && !self.try_attach() {
            // Handshake still in flight; keep the render thread alive.
            return true;
        }
        let Some(ring) = self.ring.as_ref() else {
            return true;
        };

        if quantum.is_empty() {
            return true;
        }

        let non_finite = convert_quantum(quantum, &mut self.scratch);
        if non_finite > 0 {
            self.shared
                .non_finite_samples
                .fetch_add(non_finite as u64, Ordering::Relaxed);
            tracing::warn!(count = non_finite, "non-finite samples rendered as silence");
        }

        let dropped = ring.push(&self.scratch);
        // Count only what actually entered the ring; shed frames are
        // tracked separately by the overflow counter.
        let pushed = self.scratch.len() - dropped * ring.channel_count();
        if pushed > 0 {
            self.shared
                .samples_pushed
                .fetch_add(pushed as u64, Ordering::Relaxed);
        }
        self.shared.quanta_rendered.fetch_add(1, Ordering::Relaxed);

        // First accepted quantum moves the session into active streaming.
        self.shared
            .transition(BridgeState::ProcessorReady, BridgeState::Streaming);

        if ring.control().input_frames_available() >= ring.control().kernel_length() {
            ring.request_wake();
        }

        true
    }

    /// True once the shared buffers are installed.
    pub fn is_attached(&self) -> bool {
        self.ring.is_some()
    }

    fn try_attach(&mut self) -> bool {
        match self.attach_rx.try_recv() {
            Ok(ring) => {
                tracing::info!(
                    ring_buffer_length = ring.control().ring_buffer_length(),
                    kernel_length = ring.control().kernel_length(),
                    "render processor installed shared buffers"
                );
                self.ring = Some(ring);
                let _ = self.msg_tx.send(PumpMsg::ProcessorReady);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn handle_with_ring(
        length: usize,
        kernel: usize,
    ) -> (RenderHandle, Arc<SharedRing>, Receiver<PumpMsg>) {
        let shared = Arc::new(BridgeShared::new());
        shared.transition(BridgeState::Idle, BridgeState::WorkerStarting);
        shared.transition(BridgeState::WorkerStarting, BridgeState::WorkerReady);
        shared.transition(BridgeState::WorkerReady, BridgeState::BuffersShared);

        let (attach_tx, attach_rx) = unbounded();
        let (msg_tx, msg_rx) = unbounded();
        let ring = SharedRing::new(length, kernel, 1);
        attach_tx.send(Arc::clone(&ring)).unwrap();

        (RenderHandle::new(shared, attach_rx, msg_tx), ring, msg_rx)
    }

    #[test]
    fn test_noop_before_attach_keeps_liveness() {
        let shared = Arc::new(BridgeShared::new());
        let (_attach_tx, attach_rx) = unbounded();
        let (msg_tx, _msg_rx) = unbounded();
        let mut handle = RenderHandle::new(shared, attach_rx, msg_tx);

        assert!(handle.render(&[0.5; 128]));
        assert!(!handle.is_attached());
    }

    #[test]
    fn test_attach_reports_processor_ready() {
        let (mut handle, ring, msg_rx) = handle_with_ring(4096, 512);

        assert!(handle.render(&[0.0; 128]));
        assert!(handle.is_attached());
        assert!(matches!(msg_rx.try_recv(), Ok(PumpMsg::ProcessorReady)));
        assert_eq!(ring.control().input_frames_available(), 128);
    }

    #[test]
    fn test_wake_only_at_kernel_threshold() {
        let (mut handle, ring, _msg_rx) = handle_with_ring(4096, 512);

        // Three quanta: 384 frames, below the 512 threshold.
        for _ in 0..3 {
            handle.render(&[0.1; 128]);
        }
        assert_eq!(ring.control().wake_flag(), 0);

        // Fourth quantum crosses the threshold.
        handle.render(&[0.1; 128]);
        assert_ne!(ring.control().wake_flag(), 0);
    }

    #[test]
    fn test_render_after_terminal_state_detaches() {
        let (mut handle, ring, _msg_rx) = handle_with_ring(4096, 512);
        handle.render(&[0.1; 128]);
        assert!(handle.is_attached());

        handle.shared.finish(BridgeState::Stopped);
        assert!(!handle.render(&[0.1; 128]));
        assert!(!handle.is_attached());
        // No wake was produced by the post-stop quantum.
        assert_eq!(ring.control().input_frames_available(), 128);
    }

    #[test]
    fn test_first_quantum_enters_streaming() {
        let (mut handle, _ring, _msg_rx) = handle_with_ring(4096, 512);
        handle.shared.transition(
            BridgeState::BuffersShared,
            BridgeState::ProcessorReady,
        );

        handle.render(&[0.1; 128]);
        assert_eq!(handle.shared.state(), BridgeState::Streaming);
    }

    #[test]
    fn test_samples_pushed_excludes_shed_frames() {
        let (mut handle, ring, _msg_rx) = handle_with_ring(256, 128);

        // Two quanta fill the ring; nothing drains it, so the third is
        // shed entirely.
        for _ in 0..3 {
            handle.render(&[0.1; 128]);
        }

        assert_eq!(ring.control().dropped_frames(), 128);
        assert_eq!(handle.shared.samples_pushed.load(Ordering::Relaxed), 256);
        assert_eq!(handle.shared.quanta_rendered.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_non_finite_counted() {
        let (mut handle, ring, _msg_rx) = handle_with_ring(4096, 512);
        let mut quantum = [0.1f32; 128];
        quantum[7] = f32::NAN;

        handle.render(&quantum);
        assert_eq!(
            handle.shared.non_finite_samples.load(Ordering::Relaxed),
            1
        );
        // The malformed sample entered the ring as silence.
        let mut out = vec![0i16; 128];
        ring.pull(&mut out);
        assert_eq!(out[7], 0);
    }
}
