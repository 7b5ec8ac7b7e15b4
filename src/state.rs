//! Bridge lifecycle state and session statistics.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

/// Lifecycle phase of a bridge.
///
/// Transitions move strictly forward through the handshake; `Stopped` and
/// `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BridgeState {
    /// No start requested yet.
    Idle = 0,
    /// The worker thread has been spawned and is opening the session.
    WorkerStarting = 1,
    /// The worker opened the session and can receive buffer handles.
    WorkerReady = 2,
    /// The control block and sample ring were allocated and handed to both
    /// sides.
    BuffersShared = 3,
    /// The render-side processor installed the handles and accepts audio.
    ProcessorReady = 4,
    /// Audio quanta are flowing through the ring.
    Streaming = 5,
    /// Explicit teardown completed.
    Stopped = 6,
    /// Irrecoverable failure; no automatic retry.
    Errored = 7,
}

impl BridgeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::WorkerStarting,
            2 => Self::WorkerReady,
            3 => Self::BuffersShared,
            4 => Self::ProcessorReady,
            5 => Self::Streaming,
            6 => Self::Stopped,
            _ => Self::Errored,
        }
    }

    /// True for `Stopped` and `Errored`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Errored)
    }
}

/// Statistics about a bridge session.
#[derive(Debug, Clone, Default)]
pub struct BridgeStats {
    /// Audio quanta accepted by the render handle.
    pub quanta_rendered: u64,
    /// Samples pushed into the ring.
    pub samples_pushed: u64,
    /// Frames discarded by the ring overflow policy.
    pub frames_dropped: u64,
    /// Non-finite input samples rendered as silence.
    pub non_finite_samples: u64,
    /// Chunks drained from the ring by the worker.
    pub chunks_drained: u64,
    /// Chunks handed to the streaming session.
    pub chunks_forwarded: u64,
    /// Chunks drained but not transmitted (gate closed or session not open).
    pub chunks_suppressed: u64,
    /// Sends the session rejected.
    pub send_failures: u64,
}

/// State shared between the controller, the render handle, the worker and
/// the event pump. Everything here is atomic; the render callback touches it
/// wait-free.
pub(crate) struct BridgeShared {
    state: AtomicU8,
    /// SEND_AUDIO gate: the worker forwards chunks only while this is set.
    pub send_gate: AtomicBool,
    pub quanta_rendered: AtomicU64,
    pub samples_pushed: AtomicU64,
    pub non_finite_samples: AtomicU64,
    pub chunks_drained: AtomicU64,
    pub chunks_forwarded: AtomicU64,
    pub chunks_suppressed: AtomicU64,
    pub send_failures: AtomicU64,
}

impl BridgeShared {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(BridgeState::Idle as u8),
            send_gate: AtomicBool::new(false),
            quanta_rendered: AtomicU64::new(0),
            samples_pushed: AtomicU64::new(0),
            non_finite_samples: AtomicU64::new(0),
            chunks_drained: AtomicU64::new(0),
            chunks_forwarded: AtomicU64::new(0),
            chunks_suppressed: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves `from → to`; returns false if the current state differs.
    /// Terminal states are never left, so a late transition attempt after
    /// stop or error is a harmless no-op.
    pub fn transition(&self, from: BridgeState, to: BridgeState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Forces a terminal state unless one is already set.
    /// Returns true if this call performed the transition.
    pub fn finish(&self, terminal: BridgeState) -> bool {
        debug_assert!(terminal.is_terminal());
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if BridgeState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                terminal as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Snapshot of the counters. `frames_dropped` is tracked in the control
    /// block and merged in by the caller.
    pub fn stats(&self, frames_dropped: u64) -> BridgeStats {
        BridgeStats {
            quanta_rendered: self.quanta_rendered.load(Ordering::Relaxed),
            samples_pushed: self.samples_pushed.load(Ordering::Relaxed),
            frames_dropped,
            non_finite_samples: self.non_finite_samples.load(Ordering::Relaxed),
            chunks_drained: self.chunks_drained.load(Ordering::Relaxed),
            chunks_forwarded: self.chunks_forwarded.load(Ordering::Relaxed),
            chunks_suppressed: self.chunks_suppressed.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
        }
    }
}
