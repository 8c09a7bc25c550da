//! Detection pipeline: wires capture, feature extraction and classification.
//!
//! # Architecture
//!
//! ```text
//! CaptureLoop (OS thread) ──append──▶ RingAudioBuffer
//!                                          │ snapshot_if_full
//!                                          ▼
//! DetectionScheduler (tokio task) ── spawn_blocking(normalize → extract → predict)
//!        │
//!        └─ DetectionEvent (bounded mpsc, try_send) ──▶ host / observer
//! ```
//!
//! The two activities share nothing but the buffer.  Both are stopped
//! cooperatively by `DetectionScheduler::stop`.

pub mod scheduler;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use scheduler::{DetectionScheduler, SchedulerSettings};
pub use state::{Detection, DetectionEvent, PipelineError, SchedulerState};
