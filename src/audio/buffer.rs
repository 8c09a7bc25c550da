//! Rolling audio window shared between the capture thread and the scheduler.
//!
//! [`RingBuffer`] is the plain fixed-capacity circular store; it is not
//! thread-safe on its own.  [`RingAudioBuffer`] wraps it in a `Mutex` and is
//! the only type the rest of the crate touches: the capture thread calls
//! [`append`](RingAudioBuffer::append), the scheduler calls
//! [`snapshot_if_full`](RingAudioBuffer::snapshot_if_full).
//!
//! # Example
//!
//! ```rust
//! use edgesense::audio::RingAudioBuffer;
//!
//! let buf = RingAudioBuffer::new(4);
//! buf.append(&[1, 2, 3]);
//! assert!(buf.snapshot_if_full().is_none()); // not ready yet
//!
//! buf.append(&[4, 5]); // 5 samples → horizon 4 → oldest dropped
//! assert_eq!(buf.snapshot_if_full(), Some(vec![2, 3, 4, 5]));
//! ```

use std::sync::{Mutex, MutexGuard};

use super::Sample;

// ---------------------------------------------------------------------------
// RingBuffer
// ---------------------------------------------------------------------------

/// A fixed-capacity circular buffer.
///
/// When [`push_slice`](Self::push_slice) would exceed `capacity`, the oldest
/// samples are overwritten.  The buffer never allocates beyond its initial
/// capacity.
pub struct RingBuffer<T> {
    buf: Vec<T>,
    capacity: usize,
    /// Index of the *next* write position (wraps around `capacity`).
    write_pos: usize,
    /// Number of valid samples currently stored (≤ `capacity`).
    len: usize,
}

impl<T: Copy + Default> RingBuffer<T> {
    /// Create a new ring buffer with the given `capacity`.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            buf: vec![T::default(); capacity],
            capacity,
            write_pos: 0,
            len: 0,
        }
    }

    /// Append `data`, overwriting the oldest samples once full.
    pub fn push_slice(&mut self, data: &[T]) {
        // Only the newest `capacity` items can survive; skip the rest.
        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };

        for &item in data {
            self.buf[self.write_pos] = item;
            self.write_pos = (self.write_pos + 1) % self.capacity;
        }
        self.len = (self.len + data.len()).min(self.capacity);
    }

    /// Copy all stored samples in chronological order.  The buffer is left
    /// untouched.
    pub fn snapshot(&self) -> Vec<T> {
        if self.len < self.capacity {
            // Never wrapped: valid data starts at 0.
            return self.buf[..self.len].to_vec();
        }

        // Full: the oldest sample sits where the next write would go.
        let mut result = Vec::with_capacity(self.capacity);
        result.extend_from_slice(&self.buf[self.write_pos..]);
        result.extend_from_slice(&self.buf[..self.write_pos]);
        result
    }

    /// Discard all samples and reset the write position.
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.len = 0;
    }

    /// Number of valid samples currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the buffer contains no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of samples the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` once the buffer holds `capacity` samples.
    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }
}

// ---------------------------------------------------------------------------
// RingAudioBuffer
// ---------------------------------------------------------------------------

/// Thread-safe rolling store of the most recent `horizon` samples.
///
/// Every operation takes the same lock, so an `append` in progress is never
/// visible to a concurrent snapshot.  Callers only ever receive owned copies.
pub struct RingAudioBuffer {
    inner: Mutex<RingBuffer<Sample>>,
    horizon: usize,
}

impl RingAudioBuffer {
    /// Create a buffer retaining exactly `horizon` samples.
    ///
    /// # Panics
    ///
    /// Panics if `horizon == 0`.
    pub fn new(horizon: usize) -> Self {
        Self {
            inner: Mutex::new(RingBuffer::new(horizon)),
            horizon,
        }
    }

    /// Create a buffer sized for `window_secs` of mono audio at `sample_rate`.
    pub fn for_window(sample_rate: u32, window_secs: f32) -> Self {
        Self::new((sample_rate as f32 * window_secs).round() as usize)
    }

    /// Append `samples` in order, evicting the oldest ones beyond the horizon.
    pub fn append(&self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }
        self.lock().push_slice(samples);
    }

    /// Copy of the full window, or `None` while fewer than `horizon` samples
    /// have been captured.
    pub fn snapshot_if_full(&self) -> Option<Vec<Sample>> {
        let buf = self.lock();
        if buf.is_full() {
            Some(buf.snapshot())
        } else {
            None
        }
    }

    /// Drop all history.  Readiness is lost until the buffer refills.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns `true` when a snapshot would succeed right now.
    pub fn is_ready(&self) -> bool {
        self.lock().is_full()
    }

    /// Window length in samples.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Seconds of audio currently held, assuming `sample_rate` Hz mono.
    pub fn duration_secs(&self, sample_rate: u32) -> f32 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.len() as f32 / sample_rate as f32
    }

    // A panic while holding the lock cannot leave the ring half-written in a
    // way that breaks its invariants, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, RingBuffer<Sample>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for RingAudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingAudioBuffer")
            .field("horizon", &self.horizon)
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
