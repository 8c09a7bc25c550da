//! Audio side of the pipeline: microphone capture → rolling window →
//! normalized snapshot.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → AudioChunk (mpsc) → CpalSource::read
//!           (downmix → StreamResampler → i16)
//!           → CaptureLoop thread → RingAudioBuffer ← snapshot_if_full
//!           → NormalizedWindow
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edgesense::audio::{CaptureLoop, CpalSource, NormalizedWindow, RingAudioBuffer};
//!
//! let buffer = Arc::new(RingAudioBuffer::for_window(16_000, 3.0));
//! let mut capture = CaptureLoop::new(
//!     Arc::clone(&buffer),
//!     CpalSource::factory(None, 16_000),
//!     1024,
//! );
//! capture.start().unwrap();
//!
//! if let Some(samples) = buffer.snapshot_if_full() {
//!     let window = NormalizedWindow::from_samples(&samples);
//!     println!("{} samples ready", window.len());
//! }
//! capture.stop();
//! ```

pub mod buffer;
pub mod capture;
pub mod normalize;
pub mod recorder;
pub mod resample;

/// One mono PCM amplitude value.
pub type Sample = i16;

pub use buffer::{RingAudioBuffer, RingBuffer};
pub use capture::{AudioChunk, AudioSource, CaptureError, CpalSource, SourceFactory};
pub use normalize::{peak_amplitude, NormalizedWindow};
pub use recorder::{CaptureLoop, CaptureState};
pub use resample::{downmix_to_mono, f32_to_sample, StreamResampler};
