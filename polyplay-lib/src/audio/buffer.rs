//! Bounded PCM ring buffers shared between one producer and one consumer.

use dasp_ring_buffer::Bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Longest single condvar wait; blocked callers re-check abort/close flags at
/// least this often.
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Shared handle to a [`PcmBuffer`].
pub type SharedPcmBuffer = Arc<PcmBuffer>;

/// How long a read may block waiting for samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTimeout {
    /// Wait until data arrives, the producer closes the buffer, or abort.
    Unbounded,
    Bounded(Duration),
}

impl ReadTimeout {
    /// Map a millisecond setting to a timeout; `0` means unbounded.
    pub fn from_ms(ms: u64) -> Self {
        if ms == 0 {
            Self::Unbounded
        } else {
            Self::Bounded(Duration::from_millis(ms))
        }
    }
}

/// Result of a single [`PcmBuffer::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Number of samples copied into the output slice.
    Samples(usize),
    /// Nothing became available before the timeout.
    TimedOut,
    /// The producer closed the buffer and every sample was consumed.
    Drained,
    Aborted,
}

struct RingState {
    ring: Bounded<Vec<f32>>,
    frame_len: usize,
    closed: bool,
}

/// Fixed-capacity FIFO of interleaved `f32` samples.
///
/// Reads always return whole frames of [`PcmBuffer::frame_len`] samples; the
/// producer sets the frame length once it knows its channel count. Writers
/// block (in short slices) while the ring is full; readers block up
/// to their [`ReadTimeout`]. Closing the buffer marks end of stream: writers
/// stop accepting data and readers drain what is left.
pub struct PcmBuffer {
    state: Mutex<RingState>,
    readable: Condvar,
    writable: Condvar,
}

impl PcmBuffer {
    /// Create a shared buffer holding at most `capacity` samples.
    pub fn new(capacity: usize) -> SharedPcmBuffer {
        Arc::new(Self {
            state: Mutex::new(RingState {
                ring: Bounded::from(vec![0.0; capacity.max(1)]),
                frame_len: 1,
                closed: false,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().ring.max_len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples per frame (the stream's channel count); `1` until set.
    pub fn frame_len(&self) -> usize {
        self.state.lock().unwrap().frame_len
    }

    pub fn set_frame_len(&self, frame_len: usize) {
        self.state.lock().unwrap().frame_len = frame_len.max(1);
    }

    /// Mark end of stream and wake every blocked reader and writer.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Return `true` once the buffer is closed and fully consumed.
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.closed && state.ring.is_empty()
    }

    /// Push samples, blocking while the ring is full.
    ///
    /// # Returns
    ///
    /// Number of samples accepted. Fewer than `samples.len()` means the
    /// buffer was closed or `abort` was raised while waiting.
    pub fn write(&self, samples: &[f32], abort: &AtomicBool) -> usize {
        let mut offset = 0usize;
        let mut state = self.state.lock().unwrap();
        while offset < samples.len() {
            if state.closed || abort.load(Ordering::Relaxed) {
                break;
            }

            let room = state.ring.max_len().saturating_sub(state.ring.len());
            if room == 0 {
                let (guard, _) = self.writable.wait_timeout(state, WAIT_SLICE).unwrap();
                state = guard;
                continue;
            }

            let take = room.min(samples.len() - offset);
            for sample in samples[offset..offset + take].iter().copied() {
                state.ring.push(sample);
            }
            offset += take;
            self.readable.notify_one();
        }
        offset
    }

    /// Pop up to `out.len()` samples in whole frames.
    ///
    /// Waits until a full slice is buffered, the buffer is closed, or the
    /// timeout expires, then takes whatever is available.
    ///
    /// # Arguments
    ///
    /// * `out` - Destination slice.
    /// * `timeout` - Maximum time to block.
    /// * `abort` - Checked between wait slices.
    pub fn read(&self, out: &mut [f32], timeout: ReadTimeout, abort: &AtomicBool) -> ReadOutcome {
        let deadline = match timeout {
            ReadTimeout::Bounded(duration) => Some(Instant::now() + duration),
            ReadTimeout::Unbounded => None,
        };

        let mut state = self.state.lock().unwrap();
        let align = state.frame_len;
        let wanted = out.len() - out.len() % align;
        if wanted == 0 {
            return ReadOutcome::Samples(0);
        }

        loop {
            if state.ring.len() >= wanted || state.closed {
                break;
            }
            if abort.load(Ordering::Relaxed) {
                return ReadOutcome::Aborted;
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    (deadline - now).min(WAIT_SLICE)
                }
                None => WAIT_SLICE,
            };
            let (guard, _) = self.readable.wait_timeout(state, wait).unwrap();
            state = guard;
        }

        let available = state.ring.len().min(wanted);
        let take = available - available % align;
        if take == 0 {
            if state.closed {
                // A trailing partial frame can never be completed.
                while state.ring.pop().is_some() {}
                return ReadOutcome::Drained;
            }
            return ReadOutcome::TimedOut;
        }

        for slot in out.iter_mut().take(take) {
            *slot = state.ring.pop().unwrap_or(0.0);
        }
        drop(state);
        self.writable.notify_one();

        ReadOutcome::Samples(take)
    }
}
