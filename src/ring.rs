//! Shared-memory ring buffer and control block.
//!
//! This is the heart of the bridge: a single-producer single-consumer
//! circular buffer of 16-bit samples plus a block of control counters, both
//! shared between the render callback and the worker thread. No locks are
//! involved; the `request_render` flag is the sole cross-thread handshake
//! primitive, driven with futex-style wait/wake.
//!
//! Ownership rules enforced by this module's API:
//! - only the producer side writes `input_write_index` and increments
//!   `input_frames_available`
//! - only the consumer side writes `input_read_index`, decrements
//!   `input_frames_available`, and resets `request_render` to idle
//! - both sides hold non-owning `Arc` views; the allocation lives until the
//!   last side detaches

use std::sync::atomic::{AtomicI16, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// `request_render` value while the consumer is (or may be) waiting.
const FLAG_IDLE: u32 = 0;
/// `request_render` value after the producer signalled data availability.
const FLAG_WAKE: u32 = 1;
/// `request_render` value after teardown; never overwritten by the producer.
const FLAG_SHUTDOWN: u32 = 2;

/// Why [`SharedRing::consumer_wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The producer signalled that a kernel's worth of frames may be
    /// available. The caller must re-check the actual frame count; spurious
    /// wakes are tolerated, not assumed absent.
    Data,
    /// The ring was shut down; the consumer must detach.
    Shutdown,
}

/// Control counters shared between producer and consumer.
///
/// All fields are atomics because the two sides run in different OS-level
/// execution contexts with no other memory-ordering guarantee between them.
/// Index fields are always in `[0, ring_buffer_length)` and count frames;
/// `input_frames_available` is always in `[0, ring_buffer_length]`.
pub struct ControlBlock {
    /// Wait/notify flag. See the `FLAG_*` constants.
    request_render: AtomicU32,
    input_frames_available: AtomicUsize,
    input_read_index: AtomicUsize,
    input_write_index: AtomicUsize,
    /// Output-side counters. Reserved for a render-output path; the capture
    /// bridge never populates them, matching the one-directional data flow.
    output_frames_available: AtomicUsize,
    output_read_index: AtomicUsize,
    output_write_index: AtomicUsize,
    /// Frames discarded by the overflow policy since session start.
    dropped_frames: AtomicU64,
    /// Ring capacity in frames. Fixed at allocation.
    ring_buffer_length: usize,
    /// Frames consumed per wake cycle. Fixed at allocation.
    kernel_length: usize,
}

impl ControlBlock {
    fn new(ring_buffer_length: usize, kernel_length: usize) -> Self {
        Self {
            request_render: AtomicU32::new(FLAG_IDLE),
            input_frames_available: AtomicUsize::new(0),
            input_read_index: AtomicUsize::new(0),
            input_write_index: AtomicUsize::new(0),
            output_frames_available: AtomicUsize::new(0),
            output_read_index: AtomicUsize::new(0),
            output_write_index: AtomicUsize::new(0),
            dropped_frames: AtomicU64::new(0),
            ring_buffer_length,
            kernel_length,
        }
    }

    /// Frames currently readable.
    pub fn input_frames_available(&self) -> usize {
        self.input_frames_available.load(Ordering::Acquire)
    }

    /// Consumer-owned read position, in frames.
    pub fn input_read_index(&self) -> usize {
        self.input_read_index.load(Ordering::Acquire)
    }

    /// Producer-owned write position, in frames.
    pub fn input_write_index(&self) -> usize {
        self.input_write_index.load(Ordering::Acquire)
    }

    /// Output-side available count (reserved, always zero for capture).
    pub fn output_frames_available(&self) -> usize {
        self.output_frames_available.load(Ordering::Acquire)
    }

    /// Output-side read position (reserved).
    pub fn output_read_index(&self) -> usize {
        self.output_read_index.load(Ordering::Acquire)
    }

    /// Output-side write position (reserved).
    pub fn output_write_index(&self) -> usize {
        self.output_write_index.load(Ordering::Acquire)
    }

    /// Total frames discarded by the overflow policy.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Ring capacity in frames.
    pub fn ring_buffer_length(&self) -> usize {
        self.ring_buffer_length
    }

    /// Frames drained per wake cycle.
    pub fn kernel_length(&self) -> usize {
        self.kernel_length
    }

    /// Raw value of the wake flag, for diagnostics and tests.
    pub fn wake_flag(&self) -> u32 {
        self.request_render.load(Ordering::Acquire)
    }
}

/// The shared ring: control block plus a fixed-capacity array of interleaved
/// 16-bit samples, sized `ring_buffer_length × channel_count`.
///
/// Allocated once per session by the controller; never resized. Both sides
/// hold `Arc` clones into the same backing storage.
pub struct SharedRing {
    control: ControlBlock,
    samples: Box<[AtomicI16]>,
    channel_count: usize,
}

impl SharedRing {
    /// Allocates a ring with the given geometry.
    ///
    /// `ring_buffer_length` and `kernel_length` count frames; the sample
    /// array holds `ring_buffer_length × channel_count` values.
    pub fn new(ring_buffer_length: usize, kernel_length: usize, channel_count: u16) -> Arc<Self> {
        let channel_count = usize::from(channel_count);
        let capacity = ring_buffer_length * channel_count;
        let samples: Box<[AtomicI16]> = (0..capacity).map(|_| AtomicI16::new(0)).collect();

        Arc::new(Self {
            control: ControlBlock::new(ring_buffer_length, kernel_length),
            samples,
            channel_count,
        })
    }

    /// The shared control counters.
    pub fn control(&self) -> &ControlBlock {
        &self.control
    }

    /// Interleaved channels per frame.
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Samples per drained chunk (`kernel_length × channel_count`).
    pub fn kernel_samples(&self) -> usize {
        self.control.kernel_length * self.channel_count
    }

    /// Pushes interleaved samples at the write index. Producer side only.
    ///
    /// The write wraps around the ring end as a split pair of contiguous
    /// writes; `input_write_index` moves to the wrap point and
    /// `input_frames_available` is incremented afterwards, which is what
    /// publishes the samples to the consumer. Never blocks.
    ///
    /// Overflow policy: frames that do not fit are discarded (drop-newest)
    /// and counted in `dropped_frames`. Returns the number of frames
    /// dropped, zero in the steady state.
    pub fn push(&self, samples: &[i16]) -> usize {
        debug_assert_eq!(samples.len() % self.channel_count, 0);

        let length = self.control.ring_buffer_length;
        let frames = samples.len() / self.channel_count;

        // Acquire pairs with the consumer's release decrement, so freed
        // space observed here is really free.
        let available = self.control.input_frames_available.load(Ordering::Acquire);
        let free = length - available;
        let accepted = frames.min(free);
        let dropped = frames - accepted;

        if accepted > 0 {
            let write_index = self.control.input_write_index.load(Ordering::Relaxed);
            let capacity = length * self.channel_count;
            let start = write_index * self.channel_count;
            let count = accepted * self.channel_count;
            let first = count.min(capacity - start);

            for (i, &sample) in samples[..first].iter().enumerate() {
                self.samples[start + i].store(sample, Ordering::Relaxed);
            }
            for (i, &sample) in samples[first..count].iter().enumerate() {
                self.samples[i].store(sample, Ordering::Relaxed);
            }

            self.control
                .input_write_index
                .store((write_index + accepted) % length, Ordering::Release);
            // Release publishes the sample stores above.
            self.control
                .input_frames_available
                .fetch_add(accepted, Ordering::Release);
        }

        if dropped > 0 {
            self.control
                .dropped_frames
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }

        dropped
    }

    /// Pulls exactly `out.len()` samples from the read index. Consumer side
    /// only.
    ///
    /// Reads wrap around the ring end to complete the count, never short.
    /// `input_read_index` advances modulo `ring_buffer_length` and
    /// `input_frames_available` decrements by the frame count. The caller
    /// must have verified availability first (`input_frames_available() >=
    /// kernel_length()`).
    pub fn pull(&self, out: &mut [i16]) {
        debug_assert_eq!(out.len() % self.channel_count, 0);

        let length = self.control.ring_buffer_length;
        let frames = out.len() / self.channel_count;
        let read_index = self.control.input_read_index.load(Ordering::Relaxed);
        let capacity = length * self.channel_count;
        let start = read_index * self.channel_count;
        let count = out.len();
        let first = count.min(capacity - start);

        for (i, slot) in out[..first].iter_mut().enumerate() {
            *slot = self.samples[start + i].load(Ordering::Relaxed);
        }
        for (i, slot) in out[first..].iter_mut().enumerate() {
            *slot = self.samples[i].load(Ordering::Relaxed);
        }

        self.control
            .input_read_index
            .store((read_index + frames) % length, Ordering::Release);
        // Release pairs with the producer's acquire load of free space.
        self.control
            .input_frames_available
            .fetch_sub(frames, Ordering::Release);
    }

    /// Signals the consumer that a kernel's worth of frames is available.
    /// Producer side only; notifies at most one waiter.
    ///
    /// A no-op when a wake is already pending or the ring has been shut
    /// down (the producer never overwrites the shutdown value).
    pub fn request_wake(&self) {
        if self
            .control
            .request_render
            .compare_exchange(FLAG_IDLE, FLAG_WAKE, Ordering::Release, Ordering::Relaxed)
            .is_ok()
        {
            atomic_wait::wake_one(&self.control.request_render);
        }
    }

    /// Blocks until the producer signals or the ring shuts down. Consumer
    /// side only.
    ///
    /// On a data wake the flag is reset to idle *before* returning, and the
    /// caller re-checks the frame count afterwards; together with the wait
    /// primitive returning immediately when the flag has already changed,
    /// this makes wake delivery lossless without a periodic re-poll.
    pub fn consumer_wait(&self) -> WakeReason {
        loop {
            match self.control.request_render.load(Ordering::Acquire) {
                FLAG_SHUTDOWN => return WakeReason::Shutdown,
                FLAG_IDLE => atomic_wait::wait(&self.control.request_render, FLAG_IDLE),
                _ => {
                    // Only the consumer writes the flag back to idle. CAS so
                    // a concurrent shutdown is never clobbered.
                    let _ = self.control.request_render.compare_exchange(
                        FLAG_WAKE,
                        FLAG_IDLE,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    return WakeReason::Data;
                }
            }
        }
    }

    /// Shuts the ring down: any current or future `consumer_wait` returns
    /// [`WakeReason::Shutdown`] and subsequent producer wakes are inert.
    /// Safe to call from any thread, any number of times.
    pub fn shutdown(&self) {
        self.control
            .request_render
            .store(FLAG_SHUTDOWN, Ordering::Release);
        atomic_wait::wake_all(&self.control.request_render);
    }

    /// True once [`SharedRing::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.control.request_render.load(Ordering::Acquire) == FLAG_SHUTDOWN
    }
}
