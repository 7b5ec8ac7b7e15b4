//! Worker-side consumer: drains the ring and forwards chunks to the session.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use crossbeam_channel::{Receiver, Sender};

use crate::controller::{PumpMsg, WorkerCmd};
use crate::ring::{SharedRing, WakeReason};
use crate::session::StreamingSession;
use crate::state::BridgeShared;

/// The background worker.
///
/// Opens the streaming session, reports readiness, waits for the shared
/// buffer handles and then loops: block on the wake flag, re-check the real
/// frame count, drain `kernel_length` frames per cycle and forward them.
///
/// The drain always advances the read index, even when the session is not
/// open or the SEND_AUDIO gate has not opened yet — the ring must never
/// stall behind a slow or absent downstream. Suppressed chunks are counted,
/// not retried.
pub(crate) struct Worker {
    pub shared: Arc<BridgeShared>,
    pub session: Arc<dyn StreamingSession>,
    pub cmd_rx: Receiver<WorkerCmd>,
    pub msg_tx: Sender<PumpMsg>,
    pub handshake_timeout: Duration,
}

impl Worker {
    pub fn run(self) {
        let ring = match self.start_up() {
            Some(ring) => ring,
            None => return,
        };

        let mut chunk = vec![0i16; ring.kernel_samples()];
        let mut wire = vec![0u8; chunk.len() * 2];
        let mut dropped_reported = 0u64;

        loop {
            match ring.consumer_wait() {
                WakeReason::Shutdown => break,
                WakeReason::Data => {
                    // Spurious wakes are tolerated: trust the counter, not
                    // the wake itself.
                    while ring.control().input_frames_available()
                        >= ring.control().kernel_length()
                    {
                        self.drain_cycle(&ring, &mut chunk, &mut wire);
                    }
                    self.report_dropped(&ring, &mut dropped_reported);
                }
            }

            if matches!(self.cmd_rx.try_recv(), Ok(WorkerCmd::Stop)) {
                break;
            }
        }

        tracing::info!("worker detaching from shared buffers");
        self.session.close();
    }

    /// Opens the session, reports WORKER_READY and receives the buffer
    /// handles. Returns `None` on any startup failure or early stop.
    fn start_up(&self) -> Option<Arc<SharedRing>> {
        let on_event = {
            let msg_tx = self.msg_tx.clone();
            Arc::new(move |event| {
                let _ = msg_tx.send(PumpMsg::Session(event));
            })
        };

        if let Err(error) = self.session.open(on_event) {
            tracing::error!(%error, session = self.session.name(), "session open failed");
            let _ = self.msg_tx.send(PumpMsg::WorkerError(error.to_string()));
            return None;
        }

        tracing::info!(session = self.session.name(), "worker ready");
        let _ = self.msg_tx.send(PumpMsg::WorkerReady);

        match self.cmd_rx.recv_timeout(self.handshake_timeout) {
            Ok(WorkerCmd::Buffers(ring)) => Some(ring),
            Ok(WorkerCmd::Stop) | Err(_) => {
                self.session.close();
                None
            }
        }
    }

    /// One drain cycle: pull exactly one kernel and forward it if the
    /// session is open and transmission has been gated on.
    fn drain_cycle(&self, ring: &SharedRing, chunk: &mut [i16], wire: &mut [u8]) {
        ring.pull(chunk);
        let drained = self.shared.chunks_drained.fetch_add(1, Ordering::Relaxed);

        let gated = self.shared.send_gate.load(Ordering::Acquire);
        if !gated || !self.session.is_open() {
            self.shared.chunks_suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        LittleEndian::write_i16_into(chunk, wire);
        match self.session.send_audio(wire) {
            Ok(()) => {
                self.shared.chunks_forwarded.fetch_add(1, Ordering::Relaxed);
                if drained % 100 == 0 {
                    tracing::debug!(chunks = drained + 1, "forwarding audio");
                }
            }
            Err(error) => {
                // Transient transport failures are tolerated; the chunk is
                // dropped and the session decides when it is really dead.
                self.shared.send_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%error, "chunk send failed");
            }
        }
    }

    /// Surfaces newly dropped frames as a single event per batch.
    fn report_dropped(&self, ring: &SharedRing, reported: &mut u64) {
        let total = ring.control().dropped_frames();
        if total > *reported {
            let _ = self.msg_tx.send(PumpMsg::FramesDropped(total - *reported));
            *reported = total;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MockSession;
    use crossbeam_channel::unbounded;

    struct Fixture {
        worker: Worker,
        session: Arc<MockSession>,
        cmd_tx: Sender<WorkerCmd>,
        msg_rx: Receiver<PumpMsg>,
    }

    fn fixture() -> Fixture {
        let shared = Arc::new(BridgeShared::new());
        let session = Arc::new(MockSession::new());
        let (cmd_tx, cmd_rx) = unbounded();
        let (msg_tx, msg_rx) = unbounded();

        let worker = Worker {
            shared,
            session: Arc::clone(&session) as Arc<dyn StreamingSession>,
            cmd_rx,
            msg_tx,
            handshake_timeout: Duration::from_millis(500),
        };

        Fixture {
            worker,
            session,
            cmd_tx,
            msg_rx,
        }
    }

    #[test]
    fn test_drain_advances_even_when_gate_closed() {
        let f = fixture();
        let ring = SharedRing::new(16, 4, 1);
        f.session.open(Arc::new(|_| {})).unwrap();

        ring.push(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut chunk = [0i16; 4];
        let mut wire = [0u8; 8];

        f.worker.drain_cycle(&ring, &mut chunk, &mut wire);
        assert_eq!(ring.control().input_frames_available(), 4);
        assert_eq!(ring.control().input_read_index(), 4);
        assert_eq!(f.session.sent_chunks(), 0);
        assert_eq!(
            f.worker.shared.chunks_suppressed.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_drain_forwards_when_gated_and_open() {
        let f = fixture();
        let ring = SharedRing::new(16, 4, 1);
        f.session.open(Arc::new(|_| {})).unwrap();
        f.worker.shared.send_gate.store(true, Ordering::Release);

        ring.push(&[256, -1, 2, 3]);
        let mut chunk = [0i16; 4];
        let mut wire = [0u8; 8];
        f.worker.drain_cycle(&ring, &mut chunk, &mut wire);

        assert_eq!(f.session.sent_chunks(), 1);
        // Little-endian PCM16 framing.
        assert_eq!(
            f.session.last_chunk().unwrap(),
            vec![0x00, 0x01, 0xFF, 0xFF, 0x02, 0x00, 0x03, 0x00]
        );
    }

    #[test]
    fn test_drain_suppresses_when_session_closed() {
        let f = fixture();
        let ring = SharedRing::new(16, 4, 1);
        f.worker.shared.send_gate.store(true, Ordering::Release);
        // Session never opened.

        ring.push(&[0; 4]);
        let mut chunk = [0i16; 4];
        let mut wire = [0u8; 8];
        f.worker.drain_cycle(&ring, &mut chunk, &mut wire);

        assert_eq!(f.session.sent_chunks(), 0);
        assert_eq!(ring.control().input_frames_available(), 0);
    }

    #[test]
    fn test_startup_reports_ready_and_receives_buffers() {
        let f = fixture();
        let ring = SharedRing::new(16, 4, 1);
        f.cmd_tx.send(WorkerCmd::Buffers(Arc::clone(&ring))).unwrap();

        let received = f.worker.start_up();
        assert!(received.is_some());
        assert!(matches!(f.msg_rx.try_recv(), Ok(PumpMsg::WorkerReady)));
        assert!(f.session.is_open());
    }

    #[test]
    fn test_startup_failure_reports_worker_error() {
        let shared = Arc::new(BridgeShared::new());
        let session = Arc::new(MockSession::failing(crate::TransportError::NotConnected));
        let (_cmd_tx, cmd_rx) = unbounded();
        let (msg_tx, msg_rx) = unbounded();

        let worker = Worker {
            shared,
            session,
            cmd_rx,
            msg_tx,
            handshake_timeout: Duration::from_millis(100),
        };

        assert!(worker.start_up().is_none());
        assert!(matches!(msg_rx.try_recv(), Ok(PumpMsg::WorkerError(_))));
    }

    #[test]
    fn test_run_exits_on_shutdown() {
        let f = fixture();
        let ring = SharedRing::new(16, 4, 1);
        f.cmd_tx.send(WorkerCmd::Buffers(Arc::clone(&ring))).unwrap();

        let session = Arc::clone(&f.session);
        let handle = std::thread::spawn(move || f.worker.run());
        std::thread::sleep(Duration::from_millis(50));

        ring.shutdown();
        handle.join().unwrap();
        assert!(!session.is_open());
    }
}
